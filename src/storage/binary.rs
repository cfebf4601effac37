//! Binary cassette store

use std::path::PathBuf;

use tracing::{debug, info};

use super::{cassette_path, CassetteReader, CassetteStore, CassetteWriter};
use crate::config::StorageFormat;
use crate::interaction::Interaction;
use crate::Result;

/// Stores each cassette as `<dir>/<name>.tape`
#[derive(Debug, Clone)]
pub struct BinaryCassetteStore {
    dir: PathBuf,
}

impl BinaryCassetteStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CassetteStore for BinaryCassetteStore {
    fn load(&self, name: &str) -> Result<Option<Vec<Interaction>>> {
        let path = cassette_path(&self.dir, name, StorageFormat::Binary)?;

        if !path.exists() {
            debug!("No binary cassette at {}", path.display());
            return Ok(None);
        }

        let interactions = CassetteReader::open(&path)?.interactions()?;
        info!(
            "Loaded cassette '{}': {} interactions",
            name,
            interactions.len()
        );

        Ok(Some(interactions))
    }

    fn save(&self, name: &str, interactions: &[Interaction]) -> Result<()> {
        let path = cassette_path(&self.dir, name, StorageFormat::Binary)?;
        std::fs::create_dir_all(&self.dir)?;

        let writer = CassetteWriter::new(interactions)?;
        let size = writer.file_size();
        writer.write_to(&path)?;

        info!(
            "Saved cassette '{}' to {}: {} interactions, {} bytes",
            name,
            path.display(),
            interactions.len(),
            size
        );

        Ok(())
    }
}
