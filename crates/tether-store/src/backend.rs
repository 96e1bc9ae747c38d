//! Key-value backends for the write-history store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// The mapping persisted under the store's single key: characteristic UUID
/// string to the list of previously sent values, most recent last.
pub type HistoryMap = BTreeMap<String, Vec<String>>;

/// Durable key-value collaborator for the write-history store.
///
/// Exposes exactly the `get`/`set` surface the store needs, under one fixed
/// key that the backend itself owns.
pub trait Backend: Send {
    /// Load the persisted mapping; an absent store yields an empty map.
    fn load(&self) -> Result<HistoryMap>;

    /// Replace the persisted mapping.
    fn save(&mut self, map: &HistoryMap) -> Result<()>;
}

/// JSON file backend.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Create a backend writing to the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a backend at the platform default path.
    pub fn default_path() -> Self {
        Self::new(crate::default_store_path())
    }

    /// The path the backend writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for JsonFileBackend {
    fn load(&self) -> Result<HistoryMap> {
        match std::fs::read(&self.path) {
            Ok(raw) => {
                let map = serde_json::from_slice(&raw)?;
                debug!("Loaded write history from {}", self.path.display());
                Ok(map)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No write history at {}, starting empty", self.path.display());
                Ok(HistoryMap::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, map: &HistoryMap) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let raw = serde_json::to_vec_pretty(map)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// In-memory backend for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: HistoryMap,
    /// When set, every save fails; used to exercise best-effort persistence.
    pub fail_saves: bool,
}

impl Backend for MemoryBackend {
    fn load(&self) -> Result<HistoryMap> {
        Ok(self.map.clone())
    }

    fn save(&mut self, map: &HistoryMap) -> Result<()> {
        if self.fail_saves {
            return Err(Error::Io(std::io::Error::other("save disabled")));
        }
        self.map = map.clone();
        Ok(())
    }
}
