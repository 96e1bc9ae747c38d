//! Radio/transport collaborator boundary.
//!
//! The link manager never touches a radio directly: it issues fire-and-
//! forget commands through the [`Transport`] trait and learns their outcomes
//! later as [`TransportEvent`]s on an mpsc channel. This keeps every
//! transport callback out of the shared-state mutation path: events are
//! processed one at a time on the manager's owning task, preserving order
//! and removing re-entrancy hazards.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use tether_types::{CharacteristicRecord, DescriptorRecord, DeviceId, ServiceRecord};

use crate::error::Result;

/// Advertisement data for a (possibly new) device.
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// Stable identifier derived from the peripheral handle.
    pub id: DeviceId,
    /// Advertised local name, if present.
    pub local_name: Option<String>,
    /// Raw manufacturer data including the company-id prefix.
    pub manufacturer_data: Option<Bytes>,
    /// Signal strength at advertisement time.
    pub rssi: Option<i16>,
}

/// Asynchronous completion events delivered by the transport.
///
/// Failures carry an error string rather than a typed error: the core logs
/// them and feeds the reconnection policy, it never matches on radio
/// internals.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A device advertisement was received.
    Discovered(Advertisement),
    /// A connect attempt completed successfully.
    Connected { id: DeviceId },
    /// The link dropped, or a connect attempt failed.
    Disconnected { id: DeviceId, error: Option<String> },
    /// Service enumeration completed.
    ServicesDiscovered {
        id: DeviceId,
        services: Vec<ServiceRecord>,
    },
    /// Characteristic enumeration for one service completed.
    CharacteristicsDiscovered {
        id: DeviceId,
        service: Uuid,
        characteristics: Vec<CharacteristicRecord>,
    },
    /// Descriptor enumeration for one characteristic completed.
    DescriptorsDiscovered {
        id: DeviceId,
        characteristic: Uuid,
        descriptors: Vec<DescriptorRecord>,
    },
    /// A descriptor read completed.
    DescriptorValue {
        id: DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Option<String>,
        error: Option<String>,
    },
    /// A characteristic read or notification delivered a value.
    CharacteristicValue {
        id: DeviceId,
        characteristic: Uuid,
        value: Option<Bytes>,
        error: Option<String>,
    },
    /// A write with response was acknowledged (or failed).
    WriteAcknowledged {
        id: DeviceId,
        characteristic: Uuid,
        error: Option<String>,
    },
    /// A signal-strength read completed.
    SignalStrength { id: DeviceId, rssi: i16 },
    /// The radio became available or unavailable.
    AdapterAvailable { available: bool },
}

/// Sender half of the transport event channel.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half of the transport event channel.
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the channel a transport delivers its events on.
pub fn transport_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

/// Operations the radio stack must expose.
///
/// Every method is a command: it returns as soon as the operation has been
/// issued, and the outcome (including failure) arrives later as a
/// [`TransportEvent`]. An `Err` from a method only means the command could
/// not even be issued (adapter gone, unknown peripheral).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start scanning for advertisements.
    async fn start_scan(&self) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Begin connecting to a device.
    async fn connect(&self, id: &DeviceId) -> Result<()>;

    /// Cancel a pending connect attempt.
    async fn cancel_connect(&self, id: &DeviceId) -> Result<()>;

    /// Disconnect an established link.
    async fn disconnect(&self, id: &DeviceId) -> Result<()>;

    /// Enumerate the device's services.
    async fn discover_services(&self, id: &DeviceId) -> Result<()>;

    /// Enumerate the characteristics of one service.
    async fn discover_characteristics(&self, id: &DeviceId, service: Uuid) -> Result<()>;

    /// Enumerate the descriptors of one characteristic.
    async fn discover_descriptors(&self, id: &DeviceId, characteristic: Uuid) -> Result<()>;

    /// Read a characteristic value.
    async fn read_characteristic(&self, id: &DeviceId, characteristic: Uuid) -> Result<()>;

    /// Read a descriptor value.
    async fn read_descriptor(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<()>;

    /// Write a characteristic value.
    async fn write_characteristic(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        value: Bytes,
    ) -> Result<()>;

    /// Subscribe to or unsubscribe from value notifications.
    async fn set_notify(&self, id: &DeviceId, characteristic: Uuid, enabled: bool) -> Result<()>;

    /// Read the link's signal strength.
    async fn read_rssi(&self, id: &DeviceId) -> Result<()>;

    /// Devices already connected at the radio level, reported independently
    /// of this session's own discovery.
    async fn retrieve_connected(&self) -> Result<Vec<Advertisement>>;
}
