//! Cassette persistence
//!
//! The engine only sees [`CassetteStore`]; the encodings live behind it.

mod binary;
mod codec;
mod format;
mod json;
mod memory;
mod reader;
mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use binary::BinaryCassetteStore;
pub use format::{FileHeader, InteractionEntry, FILE_MAGIC, FILE_VERSION, HEADER_SIZE, INDEX_ENTRY_SIZE};
pub use json::JsonCassetteStore;
pub use memory::MemoryCassetteStore;
pub use reader::CassetteReader;
pub use writer::CassetteWriter;

use crate::config::{validate_cassette_name, StorageFormat};
use crate::interaction::Interaction;
use crate::{Result, TapedeckError};

/// Persistence collaborator for cassettes
///
/// Implementations must round-trip every interaction field losslessly,
/// including header maps and raw body bytes, and preserve order.
pub trait CassetteStore: Send + Sync {
    /// Load a cassette's interactions, or `None` if it was never saved
    ///
    /// # Errors
    ///
    /// Returns error if the cassette exists but cannot be read or decoded
    fn load(&self, name: &str) -> Result<Option<Vec<Interaction>>>;

    /// Save a cassette, replacing any previous contents
    ///
    /// # Errors
    ///
    /// Returns error if the cassette cannot be encoded or written
    fn save(&self, name: &str, interactions: &[Interaction]) -> Result<()>;
}

/// Open the on-disk store for a format rooted at `dir`
pub fn open_store(format: StorageFormat, dir: impl Into<PathBuf>) -> Arc<dyn CassetteStore> {
    match format {
        StorageFormat::Json => Arc::new(JsonCassetteStore::new(dir)),
        StorageFormat::Binary => Arc::new(BinaryCassetteStore::new(dir)),
    }
}

/// Load a cassette file by path, inferring the format from its extension
///
/// # Errors
///
/// Returns error if the extension is unknown or the file cannot be loaded
pub fn load_file(path: &Path) -> Result<Vec<Interaction>> {
    let format = StorageFormat::from_path(path).ok_or_else(|| {
        TapedeckError::InvalidFormat(format!(
            "Unknown cassette extension: {}",
            path.display()
        ))
    })?;

    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| TapedeckError::InvalidCassetteName(path.display().to_string()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    open_store(format, dir)
        .load(name)?
        .ok_or_else(|| TapedeckError::CassetteNotFound(path.display().to_string()))
}

/// Path of a cassette file, after validating its name
fn cassette_path(dir: &Path, name: &str, format: StorageFormat) -> Result<PathBuf> {
    validate_cassette_name(name)?;
    Ok(dir.join(format!("{name}.{}", format.extension())))
}

/// Validate cassette file magic and version
///
/// # Errors
///
/// Returns error if magic or version is invalid
pub fn validate_header(header: &FileHeader) -> Result<()> {
    if header.magic != FILE_MAGIC {
        return Err(TapedeckError::InvalidFormat(format!(
            "Invalid magic bytes: expected {:?}, got {:?}",
            FILE_MAGIC, header.magic
        )));
    }

    if header.version != FILE_VERSION {
        return Err(TapedeckError::InvalidFormat(format!(
            "Unsupported version: {}, expected {}",
            header.version, FILE_VERSION
        )));
    }

    Ok(())
}
