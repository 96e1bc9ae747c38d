//! Observable link events.
//!
//! The manager broadcasts a [`LinkEvent`] for every externally interesting
//! state change. All events are serializable for logging, persistence, and
//! IPC; sends are best-effort and never fail the manager when nobody is
//! listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use tether_types::DeviceId;

/// Events broadcast by the link manager.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LinkEvent {
    /// A new device was discovered.
    Discovered { id: DeviceId, name: Option<String> },
    /// A device connected.
    Connected { id: DeviceId },
    /// A device disconnected; `unsolicited` is false for explicit
    /// disconnect commands.
    Disconnected { id: DeviceId, unsolicited: bool },
    /// An automatic reconnection attempt was issued.
    ReconnectStarted { id: DeviceId, attempt: u32 },
    /// Automatic reconnection was abandoned after the bounded attempts.
    ReconnectAbandoned { id: DeviceId, attempts: u32 },
    /// A characteristic delivered a value different from the last seen one.
    CharacteristicChanged {
        id: DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// The radio became available or unavailable.
    AdapterAvailable { available: bool },
    /// A batch of pending log entries became visible.
    LogsFlushed { visible: usize },
}

/// Sender for link events.
pub type EventSender = broadcast::Sender<LinkEvent>;

/// Receiver for link events.
pub type EventReceiver = broadcast::Receiver<LinkEvent>;

/// Event dispatcher fanning events out to every subscriber.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a dispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event, ignoring the error when no receivers exist.
    pub fn send(&self, event: LinkEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
