//! BLE connection lifecycle management.
//!
//! This crate supervises Bluetooth Low Energy peripheral links: discovery,
//! connection with bounded automatic reconnection, attribute polling,
//! descriptor and value caching, and a coalescing activity log. All mutable
//! state is owned by one spawned manager task; interaction happens through
//! a clonable [`LinkHandle`] and a broadcast event stream.
//!
//! # Features
//!
//! - **Discovery**: scan for advertisements and pick up peripherals the
//!   system already holds connected
//! - **Supervised connections**: explicit connect/disconnect plus bounded
//!   automatic reconnection (three attempts by default) on unsolicited
//!   link drops
//! - **Attribute polling**: periodic reads of every readable characteristic
//!   of the selected device, with unchanged values suppressed
//! - **Descriptor caching**: user-description descriptors read once per
//!   process and reused as human labels
//! - **Write history**: the last ten written values per characteristic,
//!   persisted through `tether-store`
//! - **Coalescing log**: activity entries become visible in batches after a
//!   short flush delay
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_core::{BtleTransport, LinkManager, ManagerConfig, transport_channel};
//! use tether_store::{JsonFileBackend, WriteHistoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (event_tx, event_rx) = transport_channel();
//!     let transport = Arc::new(BtleTransport::new(event_tx).await?);
//!     let store = WriteHistoryStore::new(JsonFileBackend::new(
//!         tether_store::default_store_path(),
//!     ));
//!     let link = LinkManager::spawn(transport, event_rx, store, ManagerConfig::default());
//!
//!     link.start_scan()?;
//!     let mut events = link.events();
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod logbuf;
pub mod manager;
pub mod mock;
pub mod platform;
pub mod poll;
pub mod reconnect;
pub mod registry;
pub mod transport;

// Re-export the shared types crate for convenience
pub use tether_types as types;

// Core exports
pub use cache::AttributeCache;
pub use commands::DeviceSnapshot;
pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use events::{EventReceiver, LinkEvent};
pub use logbuf::LogBuffer;
pub use manager::{LinkHandle, LinkManager};
pub use platform::BtleTransport;
pub use reconnect::{ReconnectPolicy, ReconnectScope};
pub use registry::DeviceRegistry;
pub use transport::{Advertisement, Transport, TransportEvent, transport_channel};
