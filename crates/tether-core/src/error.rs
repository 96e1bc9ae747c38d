//! Error types for tether-core.
//!
//! No error in this core is fatal: transport failures are logged and may
//! feed the bounded reconnection policy, protocol inconsistencies are logged
//! and ignored, capacity overflows truncate silently, and persistence
//! failures leave the in-memory state authoritative for the session. The
//! variants here surface on the command API, where a caller can still be
//! told that a device is unknown or the manager has shut down.

use thiserror::Error;

use tether_types::DeviceId;

/// Errors surfaced by the link manager's command API.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error
/// variants in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the transport.
    #[error("Bluetooth error: {0}")]
    Transport(#[from] btleplug::Error),

    /// A command referenced a device the registry has never seen.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// Operation attempted while not connected to the device.
    #[error("Not connected to device")]
    NotConnected,

    /// The manager task has shut down and can no longer accept commands.
    #[error("Link manager is not running")]
    ChannelClosed,

    /// Write-history persistence error.
    #[error("Store error: {0}")]
    Store(#[from] tether_store::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias using tether-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
