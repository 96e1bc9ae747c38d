//! Link manager: connection supervision and transport event routing.
//!
//! All mutable link state lives on a single spawned task. User commands
//! (via [`LinkHandle`]) and transport completions (via the transport event
//! channel) funnel into the same loop and are applied in arrival order, so
//! no state is ever touched from two tasks at once. Snapshots travel out
//! through oneshot replies, observable changes through the broadcast
//! [`EventDispatcher`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_core::{LinkManager, ManagerConfig, transport_channel};
//! use tether_core::mock::MockTransport;
//! use tether_store::{MemoryBackend, WriteHistoryStore};
//!
//! # async fn demo() {
//! let (event_tx, event_rx) = transport_channel();
//! let transport = Arc::new(MockTransport::new(event_tx));
//! let store = WriteHistoryStore::new(MemoryBackend::default());
//! let handle = LinkManager::spawn(transport, event_rx, store, ManagerConfig::default());
//!
//! handle.start_scan().unwrap();
//! let snapshot = handle.devices().await.unwrap();
//! println!("{} device(s) discovered", snapshot.discovered.len());
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_store::{Backend, WriteHistoryStore};
use tether_types::{
    ble, CharacteristicRecord, ConnectionStatus, Device, DeviceId, LogEntry,
};

use crate::cache::AttributeCache;
use crate::commands::{Command, DeviceSnapshot};
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, LinkEvent};
use crate::logbuf::LogBuffer;
use crate::poll::PollingScheduler;
use crate::reconnect::{AttemptCounters, ReconnectScope, RetryDecision};
use crate::registry::DeviceRegistry;
use crate::transport::{Advertisement, Transport, TransportEvent, TransportEventReceiver};

/// Handle to a running link manager task.
///
/// Cloning is cheap; all clones address the same manager. Command methods
/// return [`Error::ChannelClosed`] once the manager has shut down.
#[derive(Clone)]
pub struct LinkHandle {
    tx: UnboundedSender<Command>,
    dispatcher: EventDispatcher,
}

impl LinkHandle {
    fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| Error::ChannelClosed)
    }

    /// Begin connecting to a discovered device.
    pub fn connect(&self, id: DeviceId) -> Result<()> {
        self.send(Command::Connect(id))
    }

    /// Abort an in-flight connection attempt to the given device.
    pub fn cancel_connect(&self, id: DeviceId) -> Result<()> {
        self.send(Command::CancelConnect(id))
    }

    /// Disconnect a device without triggering automatic reconnection.
    pub fn disconnect(&self, id: DeviceId) -> Result<()> {
        self.send(Command::Disconnect(id))
    }

    /// Change (or clear) the selected device. Changing selection stops
    /// characteristic polling.
    pub fn select(&self, id: Option<DeviceId>) -> Result<()> {
        self.send(Command::Select(id))
    }

    /// Start scanning for advertisements.
    pub fn start_scan(&self) -> Result<()> {
        self.send(Command::StartScan)
    }

    /// Stop scanning.
    pub fn stop_scan(&self) -> Result<()> {
        self.send(Command::StopScan)
    }

    /// Begin polling readable characteristics of the selected device.
    pub fn start_polling(&self, every: Option<Duration>) -> Result<()> {
        self.send(Command::StartPolling { every })
    }

    /// Stop polling.
    pub fn stop_polling(&self) -> Result<()> {
        self.send(Command::StopPolling)
    }

    /// Write a value to a characteristic of a connected device. The value
    /// is recorded in the write history regardless of the outcome on air.
    pub fn write(&self, characteristic: Uuid, value: Bytes) -> Result<()> {
        self.send(Command::Write {
            characteristic,
            value,
        })
    }

    /// Recorded write history for one characteristic, most recent last.
    pub async fn write_history(&self, characteristic: Uuid) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::WriteHistory {
            characteristic,
            reply,
        })?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Clear the recorded write history for one characteristic.
    pub fn clear_write_history(&self, characteristic: Uuid) -> Result<()> {
        self.send(Command::ClearWriteHistory(characteristic))
    }

    /// Re-read write history from the backing store.
    pub fn reload_write_history(&self) -> Result<()> {
        self.send(Command::ReloadWriteHistory)
    }

    /// Snapshot the device registry.
    pub async fn devices(&self) -> Result<DeviceSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Devices(reply))?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Snapshot the visible log entries, oldest first.
    pub async fn logs(&self) -> Result<Vec<LogEntry>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Logs(reply))?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Subscribe to link events.
    pub fn events(&self) -> EventReceiver {
        self.dispatcher.subscribe()
    }

    /// Stop the manager task.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

/// The manager task's state. Constructed by [`LinkManager::spawn`] and
/// owned exclusively by the spawned run loop.
pub struct LinkManager<B: Backend> {
    transport: Arc<dyn Transport>,
    config: ManagerConfig,
    registry: DeviceRegistry,
    cache: AttributeCache,
    counters: AttemptCounters,
    logs: LogBuffer,
    history: WriteHistoryStore<B>,
    scheduler: PollingScheduler,
    dispatcher: EventDispatcher,
    cmd_tx: UnboundedSender<Command>,
    /// Characteristics discovered per device, used for polling and writes.
    characteristics: HashMap<DeviceId, Vec<CharacteristicRecord>>,
    /// Characteristics whose descriptor discovery was already issued.
    descriptors_requested: HashSet<Uuid>,
    /// Devices whose next disconnect was requested and must not retry.
    expected_disconnects: HashSet<DeviceId>,
    /// Devices with an in-flight connect attempt.
    connecting: HashSet<DeviceId>,
    flush_timer: Option<JoinHandle<()>>,
}

impl<B: Backend + Send + 'static> LinkManager<B> {
    /// Spawn the manager task and return a handle to it.
    ///
    /// `events` must be the receiving end of the channel the transport
    /// reports on. The registry starts seeded with the demo device.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        events: TransportEventReceiver,
        history: WriteHistoryStore<B>,
        config: ManagerConfig,
    ) -> LinkHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let dispatcher = EventDispatcher::new(config.event_capacity);
        let handle = LinkHandle {
            tx: cmd_tx.clone(),
            dispatcher: dispatcher.clone(),
        };

        let mut registry = DeviceRegistry::new();
        registry.on_discovered(Device::placeholder());

        let manager = Self {
            transport,
            logs: LogBuffer::new(config.log_capacity),
            config,
            registry,
            cache: AttributeCache::new(),
            counters: AttemptCounters::new(),
            history,
            scheduler: PollingScheduler::new(),
            dispatcher,
            cmd_tx,
            characteristics: HashMap::new(),
            descriptors_requested: HashSet::new(),
            expected_disconnects: HashSet::new(),
            connecting: HashSet::new(),
            flush_timer: None,
        };
        tokio::spawn(manager.run(cmd_rx, events));
        handle
    }

    async fn run(mut self, mut commands: UnboundedReceiver<Command>, mut events: TransportEventReceiver) {
        self.scheduler
            .start_rssi_updates(self.config.rssi_interval, self.cmd_tx.clone());
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
        self.scheduler.stop_all();
        if let Some(timer) = self.flush_timer.take() {
            timer.abort();
        }
        debug!("Link manager task stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(id) => self.connect(id).await,
            Command::CancelConnect(id) => self.cancel_connect(id).await,
            Command::Disconnect(id) => self.disconnect(id).await,
            Command::Select(id) => self.select(id),
            Command::StartScan => self.start_scan().await,
            Command::StopScan => {
                if let Err(e) = self.transport.stop_scan().await {
                    self.log(format!("Failed to stop scanning: {e}"));
                }
            }
            Command::StartPolling { every } => {
                let every = every.unwrap_or(self.config.poll_interval);
                self.scheduler.start_polling(every, self.cmd_tx.clone());
                self.log(format!("Started polling every {every:?}"));
            }
            Command::StopPolling => {
                self.scheduler.stop_polling();
                self.log("Stopped polling");
            }
            Command::Write {
                characteristic,
                value,
            } => self.write(characteristic, value).await,
            Command::WriteHistory {
                characteristic,
                reply,
            } => {
                let _ = reply.send(self.history.entries(characteristic));
            }
            Command::ClearWriteHistory(characteristic) => {
                self.history.clear(characteristic);
            }
            Command::ReloadWriteHistory => self.history.load(),
            Command::Devices(reply) => {
                let _ = reply.send(DeviceSnapshot {
                    discovered: self.registry.discovered().to_vec(),
                    connected: self.registry.connected().to_vec(),
                    selected: self.registry.selected().cloned(),
                });
            }
            Command::Logs(reply) => {
                let _ = reply.send(self.logs.to_vec());
            }
            Command::PollTick => self.poll_tick().await,
            Command::RssiTick => self.rssi_tick().await,
            Command::FlushLogs => self.flush_logs(),
            // Shutdown is intercepted by the run loop
            Command::Shutdown => {}
        }
    }

    async fn connect(&mut self, id: DeviceId) {
        if self.registry.get(&id).is_none() {
            self.log(format!("Cannot connect to unknown device {id}"));
            return;
        }
        let name = self.display_name(&id);

        if id.is_placeholder() {
            // Demo record: no radio behind it, connect completes locally
            self.registry.set_status(&id, ConnectionStatus::Connected);
            self.registry.add_connected(&id);
            self.registry.synchronize_status();
            self.log(format!("Connected to {name}"));
            self.dispatcher.send(LinkEvent::Connected { id });
            return;
        }

        if self.connecting.contains(&id) {
            if let Err(e) = self.transport.cancel_connect(&id).await {
                debug!("Cancelling previous attempt for {id} failed: {e}");
            }
        }
        self.counters.reset(&id);
        self.expected_disconnects.remove(&id);
        self.registry.set_status(&id, ConnectionStatus::Connecting);
        if self.registry.selected().is_none() {
            self.registry.select(Some(id.clone()));
        }
        self.connecting.insert(id.clone());
        self.log(format!("Connecting to {name}"));
        if let Err(e) = self.transport.connect(&id).await {
            self.connecting.remove(&id);
            self.registry.set_status(&id, ConnectionStatus::Disconnected);
            self.log(format!("Failed to issue connect to {name}: {e}"));
        }
    }

    async fn cancel_connect(&mut self, id: DeviceId) {
        if !self.connecting.remove(&id) {
            return;
        }
        // The transport still acks the aborted attempt with a disconnect;
        // without the counter and the expected mark that ack would be taken
        // for an unsolicited drop.
        self.counters.remove(&id);
        self.expected_disconnects.insert(id.clone());
        if let Err(e) = self.transport.cancel_connect(&id).await {
            debug!("Cancel connect for {id} failed: {e}");
        }
        self.registry.set_status(&id, ConnectionStatus::Disconnected);
        self.registry.synchronize_status();
        let name = self.display_name(&id);
        self.log(format!("Cancelled connection attempt to {name}"));
    }

    async fn disconnect(&mut self, id: DeviceId) {
        if !self.registry.is_in_connected(&id) {
            return;
        }
        self.counters.remove(&id);
        if id.is_placeholder() {
            self.finish_disconnect(&id, false);
            return;
        }
        // The device drops out of the connected set at command time; the
        // transport ack only confirms an already-applied transition. Poll
        // ticks between here and the ack must not read it.
        self.expected_disconnects.insert(id.clone());
        self.remove_from_connected(&id);
        if let Err(e) = self.transport.disconnect(&id).await {
            self.expected_disconnects.remove(&id);
            let name = self.display_name(&id);
            self.log(format!("Failed to issue disconnect to {name}: {e}"));
        }
    }

    fn select(&mut self, id: Option<DeviceId>) {
        if self.registry.selected() == id.as_ref() {
            return;
        }
        // Polling targets the selection, so a change invalidates it
        self.scheduler.stop_polling();
        self.registry.select(id);
    }

    async fn start_scan(&mut self) {
        if let Err(e) = self.transport.start_scan().await {
            self.log(format!("Failed to start scanning: {e}"));
            return;
        }
        info!("Scanning for devices");
        self.log("Scanning for devices");
        match self.transport.retrieve_connected().await {
            Ok(peripherals) => {
                for adv in peripherals {
                    let id = adv.id.clone();
                    self.registry.merge_connected(device_from_advertisement(adv));
                    self.counters.reset(&id);
                    self.connecting.insert(id.clone());
                    if let Err(e) = self.transport.connect(&id).await {
                        self.connecting.remove(&id);
                        debug!("Attaching to already-connected {id} failed: {e}");
                    }
                }
            }
            Err(e) => debug!("Retrieving already-connected peripherals failed: {e}"),
        }
    }

    async fn write(&mut self, characteristic: Uuid, value: Bytes) {
        let Some(id) = self.write_target(characteristic) else {
            self.log(format!(
                "Write ignored: no connected device exposes characteristic {characteristic}"
            ));
            return;
        };
        self.history
            .record(characteristic, String::from_utf8_lossy(&value).into_owned());
        if id.is_placeholder() {
            return;
        }
        if let Err(e) = self.transport.write_characteristic(&id, characteristic, value).await {
            let label = self.attribute_label(characteristic);
            self.log(format!("Failed to issue write to {label}: {e}"));
        }
    }

    /// The connected device to address a write to: the selected device if it
    /// exposes the characteristic, else the first connected one that does,
    /// else the selected device anyway (discovery may still be in flight).
    fn write_target(&self, characteristic: Uuid) -> Option<DeviceId> {
        let exposes = |id: &DeviceId| {
            self.characteristics
                .get(id)
                .is_some_and(|chars| chars.iter().any(|c| c.uuid == characteristic))
        };
        let selected = self
            .registry
            .selected()
            .filter(|id| self.registry.is_in_connected(id))
            .cloned();
        if let Some(id) = &selected
            && exposes(id)
        {
            return selected;
        }
        self.registry
            .connected()
            .iter()
            .map(|d| d.id.clone())
            .find(exposes)
            .or(selected)
    }

    async fn poll_tick(&mut self) {
        let Some(id) = self.registry.selected().cloned() else {
            return;
        };
        if id.is_placeholder() || !self.registry.is_in_connected(&id) {
            return;
        }
        let readable: Vec<Uuid> = self
            .characteristics
            .get(&id)
            .map(|chars| {
                chars
                    .iter()
                    .filter(|c| c.properties.can_read())
                    .map(|c| c.uuid)
                    .collect()
            })
            .unwrap_or_default();
        for characteristic in readable {
            if let Err(e) = self.transport.read_characteristic(&id, characteristic).await {
                debug!("Poll read of {characteristic} failed to issue: {e}");
            }
        }
    }

    async fn rssi_tick(&mut self) {
        let connected: Vec<DeviceId> = self
            .registry
            .connected()
            .iter()
            .filter(|d| !d.is_placeholder())
            .map(|d| d.id.clone())
            .collect();
        for id in connected {
            if let Err(e) = self.transport.read_rssi(&id).await {
                debug!("Signal-strength read for {id} failed to issue: {e}");
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Discovered(adv) => self.on_discovered(adv),
            TransportEvent::Connected { id } => self.on_connected(id).await,
            TransportEvent::Disconnected { id, error } => self.on_disconnected(id, error).await,
            TransportEvent::ServicesDiscovered { id, services } => {
                let name = self.display_name(&id);
                self.log(format!("Discovered {} service(s) on {name}", services.len()));
                for service in services {
                    if let Err(e) = self.transport.discover_characteristics(&id, service.uuid).await
                    {
                        debug!("Characteristic discovery for {} failed to issue: {e}", service.uuid);
                    }
                }
            }
            TransportEvent::CharacteristicsDiscovered {
                id,
                characteristics,
                ..
            } => self.on_characteristics(id, characteristics).await,
            TransportEvent::DescriptorsDiscovered {
                id,
                characteristic,
                descriptors,
            } => {
                for descriptor in descriptors {
                    if self.cache.is_descriptor_read(characteristic, descriptor.uuid) {
                        continue;
                    }
                    if let Err(e) = self
                        .transport
                        .read_descriptor(&id, characteristic, descriptor.uuid)
                        .await
                    {
                        debug!("Descriptor read of {} failed to issue: {e}", descriptor.uuid);
                    }
                }
            }
            TransportEvent::DescriptorValue {
                characteristic,
                descriptor,
                value,
                error,
                ..
            } => self.on_descriptor_value(characteristic, descriptor, value, error),
            TransportEvent::CharacteristicValue {
                id,
                characteristic,
                value,
                error,
            } => self.on_characteristic_value(id, characteristic, value, error),
            TransportEvent::WriteAcknowledged {
                characteristic,
                error,
                ..
            } => {
                let label = self.attribute_label(characteristic);
                match error {
                    Some(e) => self.log(format!("Write to {label} failed: {e}")),
                    None => self.log(format!("Write to {label} acknowledged")),
                }
            }
            TransportEvent::SignalStrength { id, rssi } => {
                self.registry.set_rssi(&id, rssi);
            }
            TransportEvent::AdapterAvailable { available } => {
                self.on_adapter_available(available).await;
            }
        }
    }

    fn on_discovered(&mut self, adv: Advertisement) {
        let id = adv.id.clone();
        let rssi = adv.rssi;
        let device = device_from_advertisement(adv);
        let name = device.name.clone();
        if self.registry.on_discovered(device) {
            let display = self.display_name(&id);
            self.log(format!("Discovered {display}"));
            self.dispatcher.send(LinkEvent::Discovered { id, name });
        } else if let Some(rssi) = rssi {
            // Known device: advertisements only refresh signal strength
            self.registry.set_rssi(&id, rssi);
        }
    }

    async fn on_connected(&mut self, id: DeviceId) {
        self.connecting.remove(&id);
        self.expected_disconnects.remove(&id);
        self.counters.reset(&id);
        self.registry.add_connected(&id);
        self.registry.set_status(&id, ConnectionStatus::Connected);
        self.registry.synchronize_status();
        // Stale attribute lists would poll characteristics that may be gone
        self.characteristics.remove(&id);
        let name = self.display_name(&id);
        info!("Connected to {name}");
        self.log(format!("Connected to {name}"));
        self.dispatcher.send(LinkEvent::Connected { id: id.clone() });
        if let Err(e) = self.transport.discover_services(&id).await {
            self.log(format!("Service discovery on {name} failed to issue: {e}"));
        }
    }

    async fn on_disconnected(&mut self, id: DeviceId, error: Option<String>) {
        self.connecting.remove(&id);
        let name = self.display_name(&id);
        if self.expected_disconnects.remove(&id) {
            self.finish_disconnect(&id, false);
            return;
        }

        warn!("{name} disconnected unexpectedly (error: {error:?})");
        match error {
            Some(e) => self.log(format!("{name} disconnected: {e}")),
            None => self.log(format!("{name} disconnected unexpectedly")),
        }
        self.dispatcher.send(LinkEvent::Disconnected {
            id: id.clone(),
            unsolicited: true,
        });

        if self.retry_eligible(&id) {
            match self.counters.decide(&id, &self.config.reconnect) {
                RetryDecision::Retry { attempt } => {
                    self.registry.set_status(&id, ConnectionStatus::Connecting);
                    info!(
                        "Reconnecting to {name} (attempt {attempt} of {})",
                        self.config.reconnect.max_attempts
                    );
                    self.log(format!(
                        "Reconnecting to {name} (attempt {attempt} of {})",
                        self.config.reconnect.max_attempts
                    ));
                    self.dispatcher.send(LinkEvent::ReconnectStarted {
                        id: id.clone(),
                        attempt,
                    });
                    self.connecting.insert(id.clone());
                    if let Err(e) = self.transport.connect(&id).await {
                        self.connecting.remove(&id);
                        self.log(format!("Reconnect to {name} failed to issue: {e}"));
                    }
                    return;
                }
                RetryDecision::GiveUp { attempts } => {
                    self.log(format!(
                        "Giving up on {name} after {attempts} reconnection attempt(s)"
                    ));
                    self.dispatcher.send(LinkEvent::ReconnectAbandoned {
                        id: id.clone(),
                        attempts,
                    });
                }
            }
        }
        self.remove_from_connected(&id);
    }

    /// Whether the bounded retry policy applies to this disconnect.
    ///
    /// Only devices still in the connected set qualify: a failed initial
    /// connect or a cancelled attempt never reached it, so those report a
    /// plain disconnect without reissuing the connect.
    fn retry_eligible(&self, id: &DeviceId) -> bool {
        if id.is_placeholder()
            || self.counters.get(id).is_none()
            || !self.registry.is_in_connected(id)
        {
            return false;
        }
        match self.config.reconnect.scope {
            ReconnectScope::AnyConnected => true,
            ReconnectScope::SelectedOnly => self.registry.selected() == Some(id),
        }
    }

    /// Expected disconnect or abandoned retry: drop connection state.
    fn finish_disconnect(&mut self, id: &DeviceId, unsolicited: bool) {
        let name = self.display_name(id);
        self.log(format!("Disconnected from {name}"));
        self.dispatcher.send(LinkEvent::Disconnected {
            id: id.clone(),
            unsolicited,
        });
        self.remove_from_connected(id);
    }

    fn remove_from_connected(&mut self, id: &DeviceId) {
        self.registry.remove_connected(id);
        self.registry.set_status(id, ConnectionStatus::Disconnected);
        self.registry.synchronize_status();
        if self.registry.selected() == Some(id) {
            self.scheduler.stop_polling();
        }
    }

    async fn on_characteristics(&mut self, id: DeviceId, discovered: Vec<CharacteristicRecord>) {
        let known = self.characteristics.entry(id.clone()).or_default();
        let mut new = Vec::new();
        for record in discovered {
            if known.iter().any(|c| c.uuid == record.uuid) {
                continue;
            }
            known.push(record.clone());
            new.push(record);
        }
        for record in new {
            if record.properties.can_subscribe()
                && let Err(e) = self.transport.set_notify(&id, record.uuid, true).await
            {
                debug!("Subscribing to {} failed to issue: {e}", record.uuid);
            }
            if record.properties.can_read()
                && let Err(e) = self.transport.read_characteristic(&id, record.uuid).await
            {
                debug!("Initial read of {} failed to issue: {e}", record.uuid);
            }
            // At most one descriptor discovery per characteristic per process
            if self.descriptors_requested.insert(record.uuid)
                && let Err(e) = self.transport.discover_descriptors(&id, record.uuid).await
            {
                debug!("Descriptor discovery for {} failed to issue: {e}", record.uuid);
            }
        }
    }

    fn on_descriptor_value(
        &mut self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Option<String>,
        error: Option<String>,
    ) {
        if let Some(e) = error {
            self.log(format!("Reading descriptor {descriptor} failed: {e}"));
            return;
        }
        let Some(value) = value else {
            return;
        };
        if self.cache.is_descriptor_read(characteristic, descriptor) {
            // First value wins; later reads of the same descriptor are noise
            return;
        }
        self.cache.record_descriptor_value(characteristic, descriptor, value.clone());
        self.log(format!("Descriptor {descriptor}: {value}"));
    }

    fn on_characteristic_value(
        &mut self,
        id: DeviceId,
        characteristic: Uuid,
        value: Option<Bytes>,
        error: Option<String>,
    ) {
        // Value traffic is only meaningful while polling; outside of it the
        // selection may have moved on, so drop the update wholesale
        if !self.scheduler.is_polling() {
            return;
        }
        if let Some(e) = error {
            let label = self.attribute_label(characteristic);
            self.log(format!("Reading {label} failed: {e}"));
            return;
        }
        let Some(value) = value else {
            self.log(format!(
                "Characteristic {characteristic} update carried no payload"
            ));
            return;
        };
        let known = self
            .characteristics
            .get(&id)
            .is_some_and(|chars| chars.iter().any(|c| c.uuid == characteristic));
        if !known {
            self.log(format!(
                "Value for unknown characteristic {characteristic} ignored"
            ));
            return;
        }
        if self.cache.has_seen_characteristic_value(characteristic, &value) {
            return;
        }
        self.cache.record_characteristic_value(characteristic, value.clone());
        if let Some(chars) = self.characteristics.get_mut(&id)
            && let Some(record) = chars.iter_mut().find(|c| c.uuid == characteristic)
        {
            record.value = Some(value.clone());
        }
        if characteristic == ble::BATTERY_LEVEL
            && let Some(&level) = value.first()
        {
            self.registry.set_battery(&id, Some(level));
        }
        let label = self.attribute_label(characteristic);
        self.log(format!("{label} = {}", format_value(&value)));
        self.dispatcher.send(LinkEvent::CharacteristicChanged {
            id,
            characteristic,
            value: value.to_vec(),
        });
    }

    async fn on_adapter_available(&mut self, available: bool) {
        if available {
            self.log("Radio is available");
            self.dispatcher.send(LinkEvent::AdapterAvailable { available: true });
            self.start_scan().await;
            self.scheduler
                .start_rssi_updates(self.config.rssi_interval, self.cmd_tx.clone());
            return;
        }

        // Radio gone: every device and timer it backed goes with it
        self.scheduler.stop_all();
        if let Some(timer) = self.flush_timer.take() {
            timer.abort();
        }
        self.logs.drop_pending();
        self.registry.clear();
        self.registry.on_discovered(Device::placeholder());
        self.counters.clear();
        self.connecting.clear();
        self.expected_disconnects.clear();
        self.characteristics.clear();
        self.log("Radio became unavailable");
        self.dispatcher.send(LinkEvent::AdapterAvailable { available: false });
    }

    /// Append a coalescing log entry, scheduling the deferred flush when
    /// this entry opened a new pending batch.
    fn log(&mut self, message: impl Into<String>) {
        if self.logs.append(message) {
            let tx = self.cmd_tx.clone();
            let delay = self.config.log_flush_delay;
            self.flush_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Command::FlushLogs);
            }));
        }
    }

    fn flush_logs(&mut self) {
        self.flush_timer = None;
        if !self.logs.has_pending() {
            return;
        }
        self.logs.flush();
        self.dispatcher.send(LinkEvent::LogsFlushed {
            visible: self.logs.len(),
        });
    }

    fn display_name(&self, id: &DeviceId) -> String {
        self.registry
            .get(id)
            .map(|d| d.display_name().to_owned())
            .unwrap_or_else(|| id.to_string())
    }

    /// Human label for a characteristic: its cached user-description
    /// descriptor when one was read, else the bare identifier.
    fn attribute_label(&self, characteristic: Uuid) -> String {
        self.cache
            .label_for(characteristic)
            .map(str::to_owned)
            .unwrap_or_else(|| characteristic.to_string())
    }
}

fn device_from_advertisement(adv: Advertisement) -> Device {
    let mut device = Device::new(adv.id, adv.local_name);
    device.manufacturer_data = adv.manufacturer_data;
    device.rssi = adv.rssi.unwrap_or(0);
    device
}

/// Render a value for the log: text when printable, hex otherwise.
fn format_value(value: &[u8]) -> String {
    if !value.is_empty()
        && value
            .iter()
            .all(|&b| b.is_ascii_graphic() || b == b' ')
    {
        String::from_utf8_lossy(value).into_owned()
    } else {
        value
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_values_render_as_text() {
        assert_eq!(format_value(b"hello there"), "hello there");
        assert_eq!(format_value(&[0x01, 0xFF]), "01 FF");
        assert_eq!(format_value(&[]), "");
    }

    #[test]
    fn advertisement_conversion_defaults_rssi_to_unmeasured() {
        let adv = Advertisement {
            id: DeviceId::from("AA:BB"),
            local_name: Some("Sensor".into()),
            manufacturer_data: None,
            rssi: None,
        };
        let device = device_from_advertisement(adv);
        assert_eq!(device.rssi, 0);
        assert_eq!(device.display_name(), "Sensor");
    }
}
