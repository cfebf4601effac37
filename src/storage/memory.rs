//! In-process cassette store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::CassetteStore;
use crate::interaction::Interaction;
use crate::Result;

/// Keeps cassettes in memory; clones share the same contents
#[derive(Debug, Clone, Default)]
pub struct MemoryCassetteStore {
    cassettes: Arc<DashMap<String, Vec<Interaction>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryCassetteStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cassette as if it had been saved earlier
    pub fn insert(&self, name: impl Into<String>, interactions: Vec<Interaction>) {
        self.cassettes.insert(name.into(), interactions);
    }

    /// Current contents of a cassette
    pub fn get(&self, name: &str) -> Option<Vec<Interaction>> {
        self.cassettes.get(name).map(|entry| entry.value().clone())
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl CassetteStore for MemoryCassetteStore {
    fn load(&self, name: &str) -> Result<Option<Vec<Interaction>>> {
        Ok(self.get(name))
    }

    fn save(&self, name: &str, interactions: &[Interaction]) -> Result<()> {
        self.cassettes.insert(name.to_string(), interactions.to_vec());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
