//! Platform-agnostic types for the tether BLE link manager.
//!
//! This crate provides the shared data model used by `tether-core` and
//! `tether-store`: device records, connection status, GATT attribute
//! records, and log entries.
//!
//! # Features
//!
//! - Device identity and connection status types
//! - Opaque service/characteristic/descriptor records
//! - Characteristic capability flags
//! - Standard BLE assigned-number constants

pub mod ble;
pub mod types;

pub use types::{
    CharacteristicProperties, CharacteristicRecord, ConnectionStatus, DescriptorRecord, Device,
    DeviceId, LogEntry, ServiceRecord,
};
