//! Surrogate table source
//!
//! Tables are JSON files named `<name>.json`; the file stem is the lookup
//! key. Loaded networks are shared read-only through `Arc`.

use crate::network::{Network, SurrogateModel};
use geomag_field::{MagFieldError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Conventional key of the K-Phi table.
pub const K_PHI_TABLE: &str = "fast_phi";
/// Conventional key of the K-Hmin table.
pub const K_HMIN_TABLE: &str = "fast_hmin";

#[derive(Debug, Clone, Default)]
pub struct SurrogateStore {
    tables: BTreeMap<String, Arc<Network>>,
}

impl SurrogateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `*.json` file in `dir`.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut store = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let mut model = SurrogateModel::from_json_file(&path)?;
            if model.name.is_empty() {
                model.name = stem.to_string();
            }
            debug!("Surrogate table {} from {}", stem, path.display());
            store.insert(stem, Network::from_model(model)?);
        }
        info!("Loaded {} surrogate tables from {}", store.len(), dir.display());
        Ok(store)
    }

    pub fn insert(&mut self, name: &str, network: Network) -> Arc<Network> {
        let shared = Arc::new(network);
        self.tables.insert(name.to_string(), Arc::clone(&shared));
        shared
    }

    pub fn load_surrogate(&self, name: &str) -> Result<Arc<Network>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| MagFieldError::NotFound(format!("surrogate table '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
