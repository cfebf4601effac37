//! Configuration types for Tapedeck sessions

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fingerprint::MatchRules;
use crate::interaction::Request;
use crate::{Result, TapedeckError};

/// On-disk cassette encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// Pretty-printed JSON, one file per cassette
    #[default]
    Json,
    /// Memory-mapped binary format with CRC checks
    Binary,
}

impl StorageFormat {
    /// File extension used for this format
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Binary => "tape",
        }
    }

    /// Infer the format from a cassette file path
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Some(Self::Json),
            Some("tape") => Some(Self::Binary),
            _ => None,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cassette to load and, when recording, to write
    pub cassette_name: String,
    /// Whether a missing cassette may be recorded from the live network
    #[serde(default = "default_true")]
    pub recording_enabled: bool,
    /// Header names that participate in matching
    #[serde(default)]
    pub headers_to_check: BTreeSet<String>,
    /// Query parameters excluded from matching
    #[serde(default)]
    pub parameters_to_ignore: BTreeSet<String>,
    /// Headers added to every task's request unless it already sets them
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    /// Directory holding cassette files
    #[serde(default = "default_cassette_dir")]
    pub cassette_dir: PathBuf,
    /// Cassette encoding
    #[serde(default)]
    pub format: StorageFormat,
    /// Request sent to the transport in place of the task's request while recording
    #[serde(skip)]
    pub request_override: Option<Request>,
}

fn default_true() -> bool {
    true
}

fn default_cassette_dir() -> PathBuf {
    PathBuf::from("cassettes")
}

impl SessionConfig {
    /// Configuration with defaults for the given cassette
    pub fn new(cassette_name: impl Into<String>) -> Self {
        Self {
            cassette_name: cassette_name.into(),
            recording_enabled: true,
            headers_to_check: BTreeSet::new(),
            parameters_to_ignore: BTreeSet::new(),
            default_headers: BTreeMap::new(),
            cassette_dir: default_cassette_dir(),
            format: StorageFormat::default(),
            request_override: None,
        }
    }

    /// Allow or forbid recording
    #[must_use]
    pub fn recording_enabled(mut self, enabled: bool) -> Self {
        self.recording_enabled = enabled;
        self
    }

    /// Add a header name to the match key
    #[must_use]
    pub fn check_header(mut self, name: impl Into<String>) -> Self {
        self.headers_to_check.insert(name.into());
        self
    }

    /// Exclude a query parameter from the match key
    #[must_use]
    pub fn ignore_parameter(mut self, name: impl Into<String>) -> Self {
        self.parameters_to_ignore.insert(name.into());
        self
    }

    /// Add a header applied to every task's request
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Set the cassette directory
    #[must_use]
    pub fn cassette_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cassette_dir = dir.into();
        self
    }

    /// Set the cassette encoding
    #[must_use]
    pub fn format(mut self, format: StorageFormat) -> Self {
        self.format = format;
        self
    }

    /// Send `request` to the transport instead of each task's own request
    #[must_use]
    pub fn request_override(mut self, request: Request) -> Self {
        self.request_override = Some(request);
        self
    }

    /// Matching rules derived from this configuration
    pub fn match_rules(&self) -> MatchRules {
        MatchRules::new(&self.headers_to_check, &self.parameters_to_ignore)
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if the cassette name or directory is unusable
    pub fn validate(&self) -> Result<()> {
        validate_cassette_name(&self.cassette_name)?;

        if self.cassette_dir.as_os_str().is_empty() {
            return Err(TapedeckError::ConfigError(
                "cassette_dir cannot be empty".to_string(),
            ));
        }

        if let Some(name) = self.headers_to_check.iter().find(|name| name.trim().is_empty()) {
            return Err(TapedeckError::ConfigError(format!(
                "headers_to_check contains a blank header name: {name:?}"
            )));
        }

        Ok(())
    }
}

/// Validate a cassette name
///
/// # Errors
///
/// Returns error if the name could escape the cassette directory or is
/// otherwise unusable as a file stem
pub fn validate_cassette_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot be empty".to_string(),
        ));
    }

    if name.len() > 255 {
        return Err(TapedeckError::InvalidCassetteName(format!(
            "Cassette name too long: {} > 255",
            name.len()
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot contain path separators".to_string(),
        ));
    }

    if name.starts_with('.') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot start with dot".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot contain null bytes".to_string(),
        ));
    }

    if name.contains("..") {
        return Err(TapedeckError::InvalidCassetteName(
            "Cassette name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}
