//! Commands accepted by the manager task.
//!
//! Every mutation of link state funnels through this enum: API calls from
//! [`LinkHandle`](crate::manager::LinkHandle), ticks from the
//! [`PollingScheduler`](crate::poll::PollingScheduler), and the deferred
//! log flush all arrive on the same channel and are applied in order.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use uuid::Uuid;

use tether_types::{Device, DeviceId, LogEntry};

/// A request for the manager task.
#[derive(Debug)]
pub enum Command {
    /// Begin connecting to a discovered device.
    Connect(DeviceId),
    /// Abort an in-flight connection attempt to the given device.
    CancelConnect(DeviceId),
    /// Disconnect the given device without triggering reconnect.
    Disconnect(DeviceId),
    /// Change (or clear) the selected device.
    Select(Option<DeviceId>),
    /// Start scanning for advertisements.
    StartScan,
    /// Stop scanning.
    StopScan,
    /// Begin polling readable characteristics of the selected device.
    StartPolling {
        /// Override of the configured poll interval.
        every: Option<Duration>,
    },
    /// Stop polling.
    StopPolling,
    /// Write a value to a characteristic of a connected device.
    Write {
        characteristic: Uuid,
        value: Bytes,
    },
    /// Fetch the recorded write history for one characteristic.
    WriteHistory {
        characteristic: Uuid,
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Clear the recorded write history for one characteristic.
    ClearWriteHistory(Uuid),
    /// Re-read write history from the backing store.
    ReloadWriteHistory,
    /// Snapshot the device registry.
    Devices(oneshot::Sender<DeviceSnapshot>),
    /// Snapshot the visible log entries.
    Logs(oneshot::Sender<Vec<LogEntry>>),
    /// Internal: a characteristic poll interval elapsed.
    PollTick,
    /// Internal: a signal-strength refresh interval elapsed.
    RssiTick,
    /// Internal: the deferred log flush delay elapsed.
    FlushLogs,
    /// Stop the manager task.
    Shutdown,
}

/// Point-in-time copy of the device registry.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub discovered: Vec<Device>,
    pub connected: Vec<Device>,
    pub selected: Option<DeviceId>,
}

impl DeviceSnapshot {
    /// The selected device's full record, if it is known.
    pub fn selected_device(&self) -> Option<&Device> {
        let id = self.selected.as_ref()?;
        self.discovered.iter().find(|d| &d.id == id)
    }
}
