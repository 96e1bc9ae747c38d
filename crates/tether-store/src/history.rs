//! Bounded per-characteristic history of previously sent values.

use uuid::Uuid;

use tracing::warn;

use crate::backend::{Backend, HistoryMap};

/// Maximum retained entries per characteristic.
pub const HISTORY_CAP: usize = 10;

/// Bounded, persisted ring of values previously written to each
/// characteristic.
///
/// Every mutation persists the full mapping synchronously; persistence
/// failures are logged and the in-memory copy stays authoritative for the
/// session.
pub struct WriteHistoryStore<B: Backend> {
    map: HistoryMap,
    backend: B,
}

impl<B: Backend> WriteHistoryStore<B> {
    /// Create a store over the given backend, starting from the persisted
    /// state when it loads cleanly.
    pub fn new(backend: B) -> Self {
        let map = backend.load().unwrap_or_else(|e| {
            warn!("Could not load write history: {e}");
            HistoryMap::new()
        });
        Self { map, backend }
    }

    /// Append a value to a characteristic's history, evicting the oldest
    /// entries beyond [`HISTORY_CAP`], then persist.
    pub fn record(&mut self, characteristic: Uuid, value: impl Into<String>) {
        let entries = self.map.entry(characteristic.to_string()).or_default();
        entries.push(value.into());
        if entries.len() > HISTORY_CAP {
            let excess = entries.len() - HISTORY_CAP;
            entries.drain(..excess);
        }
        self.persist();
    }

    /// Empty a characteristic's history (leaving a persisted empty list),
    /// then persist.
    pub fn clear(&mut self, characteristic: Uuid) {
        self.map.insert(characteristic.to_string(), Vec::new());
        self.persist();
    }

    /// Previously sent values for a characteristic, most recent last.
    pub fn entries(&self, characteristic: Uuid) -> Vec<String> {
        self.map
            .get(&characteristic.to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Repopulate the in-memory state from durable storage.
    ///
    /// Safe to call repeatedly; a failed load leaves the current in-memory
    /// state untouched.
    pub fn load(&mut self) {
        match self.backend.load() {
            Ok(map) => self.map = map,
            Err(e) => warn!("Could not reload write history: {e}"),
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.backend.save(&self.map) {
            warn!("Could not persist write history: {e}");
        }
    }
}
