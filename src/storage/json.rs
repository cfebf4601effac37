//! Human-diffable JSON cassette files

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{cassette_path, CassetteStore};
use crate::config::StorageFormat;
use crate::interaction::{HeaderMap, Interaction, Request, Response};
use crate::{Result, TapedeckError};

/// Cassette file layout
#[derive(Debug, Serialize, Deserialize)]
struct StoredCassette {
    name: String,
    interactions: Vec<StoredInteraction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredInteraction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recorded_at: Option<u64>,
    request: StoredRequest,
    response: StoredResponse,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: HeaderMap,
    #[serde(default)]
    body: Option<StoredBody>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredResponse {
    status: u16,
    #[serde(default)]
    headers: HeaderMap,
    #[serde(default)]
    body: Option<StoredBody>,
}

/// Body bytes: readable text when they are UTF-8, base64 otherwise
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
enum StoredBody {
    Utf8(String),
    Base64(String),
}

impl StoredBody {
    fn encode(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::Utf8(text.to_string()),
            Err(_) => Self::Base64(STANDARD.encode(bytes)),
        }
    }

    fn decode(self) -> Result<Vec<u8>> {
        match self {
            Self::Utf8(text) => Ok(text.into_bytes()),
            Self::Base64(data) => STANDARD
                .decode(data)
                .map_err(|e| TapedeckError::InvalidFormat(format!("Invalid base64 body: {e}"))),
        }
    }
}

fn decode_body(body: Option<StoredBody>) -> Result<Option<Vec<u8>>> {
    body.map(StoredBody::decode).transpose()
}

impl StoredInteraction {
    fn from_interaction(interaction: &Interaction) -> Self {
        let request = interaction.request();
        let response = interaction.response();

        Self {
            recorded_at: interaction.recorded_at(),
            request: StoredRequest {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                body: request.body.as_deref().map(StoredBody::encode),
            },
            response: StoredResponse {
                status: response.status,
                headers: response.headers.clone(),
                body: response.body.as_deref().map(StoredBody::encode),
            },
        }
    }

    fn into_interaction(self) -> Result<Interaction> {
        let request = Request {
            method: self.request.method,
            url: self.request.url,
            headers: self.request.headers,
            body: decode_body(self.request.body)?,
        };
        let response = Response {
            status: self.response.status,
            headers: self.response.headers,
            body: decode_body(self.response.body)?,
        };

        Ok(Interaction::new(request, response, self.recorded_at))
    }
}

/// Stores each cassette as `<dir>/<name>.json`
#[derive(Debug, Clone)]
pub struct JsonCassetteStore {
    dir: PathBuf,
}

impl JsonCassetteStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CassetteStore for JsonCassetteStore {
    fn load(&self, name: &str) -> Result<Option<Vec<Interaction>>> {
        let path = cassette_path(&self.dir, name, StorageFormat::Json)?;

        if !path.exists() {
            debug!("No JSON cassette at {}", path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let stored: StoredCassette = serde_json::from_str(&content)?;

        let interactions = stored
            .interactions
            .into_iter()
            .map(StoredInteraction::into_interaction)
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Loaded cassette '{}': {} interactions",
            name,
            interactions.len()
        );

        Ok(Some(interactions))
    }

    fn save(&self, name: &str, interactions: &[Interaction]) -> Result<()> {
        let path = cassette_path(&self.dir, name, StorageFormat::Json)?;
        std::fs::create_dir_all(&self.dir)?;

        let stored = StoredCassette {
            name: name.to_string(),
            interactions: interactions
                .iter()
                .map(StoredInteraction::from_interaction)
                .collect(),
        };

        let mut content = serde_json::to_string_pretty(&stored)?;
        content.push('\n');
        std::fs::write(&path, content)?;

        info!(
            "Saved cassette '{}' to {}: {} interactions",
            name,
            path.display(),
            interactions.len()
        );

        Ok(())
    }
}
