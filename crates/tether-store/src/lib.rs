//! Durable write-history persistence for the tether BLE link manager.
//!
//! This crate stores, per characteristic, the values previously sent to it:
//! a bounded ring of the ten most recent entries, persisted as a flat JSON
//! mapping from characteristic UUID to list of values. The in-memory copy is
//! authoritative for the session; persistence is best-effort.
//!
//! # Example
//!
//! ```
//! use tether_store::{MemoryBackend, WriteHistoryStore};
//! use uuid::Uuid;
//!
//! let mut store = WriteHistoryStore::new(MemoryBackend::default());
//! let characteristic = Uuid::new_v4();
//! store.record(characteristic, "0x01");
//! assert_eq!(store.entries(characteristic), ["0x01"]);
//! ```

mod backend;
mod error;
mod history;

pub use backend::{Backend, JsonFileBackend, MemoryBackend};
pub use error::{Error, Result};
pub use history::{WriteHistoryStore, HISTORY_CAP};

/// Default store path following platform conventions.
///
/// - Linux: `~/.local/share/tether/write_history.json`
/// - macOS: `~/Library/Application Support/tether/write_history.json`
/// - Windows: `C:\Users\<user>\AppData\Local\tether\write_history.json`
pub fn default_store_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("tether")
        .join("write_history.json")
}
