//! Production transport over `btleplug`.
//!
//! Wraps the first available system adapter. Every command is issued from a
//! spawned task so the manager loop never blocks on the radio; completions
//! and adapter-level events (advertisements, link drops, power changes) are
//! converted into [`TransportEvent`]s on the shared channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Descriptor, Manager as _,
    Peripheral as _, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use tether_types::{
    CharacteristicProperties, CharacteristicRecord, DescriptorRecord, DeviceId, ServiceRecord,
};

use crate::error::{Error, Result};
use crate::transport::{Advertisement, Transport, TransportEvent, TransportEventSender};

/// [`Transport`] implementation backed by the system Bluetooth adapter.
pub struct BtleTransport {
    inner: Arc<Inner>,
}

struct Inner {
    adapter: Adapter,
    events: TransportEventSender,
    /// Peripheral handles by the identifier the core addresses them with.
    peripherals: Mutex<HashMap<DeviceId, Peripheral>>,
    /// Reverse map for adapter events, which carry only the platform id.
    ids: Mutex<HashMap<PeripheralId, DeviceId>>,
    /// Devices with a running notification-forwarding task.
    notifiers: Mutex<HashMap<DeviceId, tokio::task::JoinHandle<()>>>,
}

impl BtleTransport {
    /// Acquire the first available adapter and start forwarding its events
    /// to `events`.
    pub async fn new(events: TransportEventSender) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(btleplug::Error::DeviceNotFound)?;

        let inner = Arc::new(Inner {
            adapter,
            events,
            peripherals: Mutex::new(HashMap::new()),
            ids: Mutex::new(HashMap::new()),
            notifiers: Mutex::new(HashMap::new()),
        });
        Inner::spawn_event_pump(Arc::clone(&inner)).await?;
        Ok(Self { inner })
    }
}

impl Inner {
    async fn spawn_event_pump(inner: Arc<Self>) -> Result<()> {
        let mut stream = inner.adapter.events().await?;
        let pump = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                pump.on_central_event(event).await;
            }
            debug!("Adapter event stream ended");
        });
        Ok(())
    }

    async fn on_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(pid) | CentralEvent::DeviceUpdated(pid) => {
                if let Some(adv) = self.advertisement_for(&pid).await {
                    self.send(TransportEvent::Discovered(adv));
                }
            }
            // Connect completions are reported by the issuing task; only
            // link drops must come from the adapter
            CentralEvent::DeviceDisconnected(pid) => {
                let known = self.ids.lock().unwrap_or_else(|e| e.into_inner()).get(&pid).cloned();
                if let Some(id) = known {
                    self.send(TransportEvent::Disconnected { id, error: None });
                }
            }
            CentralEvent::StateUpdate(state) => {
                self.send(TransportEvent::AdapterAvailable {
                    available: matches!(state, CentralState::PoweredOn),
                });
            }
            _ => {}
        }
    }

    /// Resolve a platform id to an advertisement, registering the handle
    /// under its stable identifier on the way.
    async fn advertisement_for(&self, pid: &PeripheralId) -> Option<Advertisement> {
        let peripheral = self.adapter.peripheral(pid).await.ok()?;
        let properties = peripheral.properties().await.ok().flatten();
        let id = device_id(&peripheral, properties.as_ref());
        self.register(pid.clone(), id.clone(), peripheral);
        let properties = properties?;
        Some(Advertisement {
            id,
            local_name: properties.local_name,
            manufacturer_data: manufacturer_bytes(&properties.manufacturer_data),
            rssi: properties.rssi,
        })
    }

    fn register(&self, pid: PeripheralId, id: DeviceId, peripheral: Peripheral) {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid, id.clone());
        self.peripherals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, peripheral);
    }

    fn peripheral(&self, id: &DeviceId) -> Result<Peripheral> {
        self.peripherals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(id.clone()))
    }

    fn send(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Start the per-device notification forwarder if it is not running.
    async fn ensure_notifier(&self, id: &DeviceId, peripheral: &Peripheral) {
        {
            let notifiers = self.notifiers.lock().unwrap_or_else(|e| e.into_inner());
            if notifiers.contains_key(id) {
                return;
            }
        }
        let stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Opening notification stream for {id} failed: {e}");
                return;
            }
        };
        let events = self.events.clone();
        let device = id.clone();
        let task = tokio::spawn(async move {
            let mut stream = stream;
            while let Some(notification) = stream.next().await {
                let _ = events.send(TransportEvent::CharacteristicValue {
                    id: device.clone(),
                    characteristic: notification.uuid,
                    value: Some(Bytes::from(notification.value)),
                    error: None,
                });
            }
        });
        self.notifiers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), task);
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn start_scan(&self) -> Result<()> {
        self.inner.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.inner.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, id: &DeviceId) -> Result<()> {
        let peripheral = self.inner.peripheral(id)?;
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => inner.send(TransportEvent::Connected { id }),
                Err(e) => inner.send(TransportEvent::Disconnected {
                    id,
                    error: Some(e.to_string()),
                }),
            }
        });
        Ok(())
    }

    async fn cancel_connect(&self, id: &DeviceId) -> Result<()> {
        // btleplug has no dedicated cancel; tearing the link down aborts a
        // pending attempt as well
        let peripheral = self.inner.peripheral(id)?;
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Cancelling connect to {id} failed: {e}");
            }
        });
        Ok(())
    }

    async fn disconnect(&self, id: &DeviceId) -> Result<()> {
        let peripheral = self.inner.peripheral(id)?;
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Disconnecting {id} failed: {e}");
            }
        });
        Ok(())
    }

    async fn discover_services(&self, id: &DeviceId) -> Result<()> {
        let peripheral = self.inner.peripheral(id)?;
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                warn!("Service discovery on {id} failed: {e}");
                return;
            }
            let services = peripheral
                .services()
                .into_iter()
                .map(|s| ServiceRecord {
                    uuid: s.uuid,
                    primary: s.primary,
                })
                .collect();
            inner.send(TransportEvent::ServicesDiscovered { id, services });
        });
        Ok(())
    }

    async fn discover_characteristics(&self, id: &DeviceId, service: Uuid) -> Result<()> {
        let peripheral = self.inner.peripheral(id)?;
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            let characteristics = peripheral
                .services()
                .into_iter()
                .filter(|s| s.uuid == service)
                .flat_map(|s| s.characteristics)
                .map(|c| CharacteristicRecord {
                    uuid: c.uuid,
                    service_uuid: c.service_uuid,
                    properties: CharacteristicProperties::from_bits(c.properties.bits()),
                    value: None,
                })
                .collect();
            inner.send(TransportEvent::CharacteristicsDiscovered {
                id,
                service,
                characteristics,
            });
        });
        Ok(())
    }

    async fn discover_descriptors(&self, id: &DeviceId, characteristic: Uuid) -> Result<()> {
        let peripheral = self.inner.peripheral(id)?;
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            let descriptors = find_characteristic(&peripheral, characteristic)
                .map(|c| {
                    c.descriptors
                        .into_iter()
                        .map(|d| DescriptorRecord {
                            uuid: d.uuid,
                            characteristic_uuid: d.characteristic_uuid,
                            value: None,
                        })
                        .collect()
                })
                .unwrap_or_default();
            inner.send(TransportEvent::DescriptorsDiscovered {
                id,
                characteristic,
                descriptors,
            });
        });
        Ok(())
    }

    async fn read_characteristic(&self, id: &DeviceId, characteristic: Uuid) -> Result<()> {
        let peripheral = self.inner.peripheral(id)?;
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            let Some(target) = find_characteristic(&peripheral, characteristic) else {
                return;
            };
            let event = match peripheral.read(&target).await {
                Ok(data) => TransportEvent::CharacteristicValue {
                    id,
                    characteristic,
                    value: Some(Bytes::from(data)),
                    error: None,
                },
                Err(e) => TransportEvent::CharacteristicValue {
                    id,
                    characteristic,
                    value: None,
                    error: Some(e.to_string()),
                },
            };
            inner.send(event);
        });
        Ok(())
    }

    async fn read_descriptor(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<()> {
        let peripheral = self.inner.peripheral(id)?;
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            let Some(target) = find_descriptor(&peripheral, characteristic, descriptor) else {
                return;
            };
            let event = match peripheral.read_descriptor(&target).await {
                Ok(data) => TransportEvent::DescriptorValue {
                    id,
                    characteristic,
                    descriptor,
                    value: Some(String::from_utf8_lossy(&data).into_owned()),
                    error: None,
                },
                Err(e) => TransportEvent::DescriptorValue {
                    id,
                    characteristic,
                    descriptor,
                    value: None,
                    error: Some(e.to_string()),
                },
            };
            inner.send(event);
        });
        Ok(())
    }

    async fn write_characteristic(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        value: Bytes,
    ) -> Result<()> {
        let peripheral = self.inner.peripheral(id)?;
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            let Some(target) = find_characteristic(&peripheral, characteristic) else {
                return;
            };
            let write_type = if target.properties.contains(btleplug::api::CharPropFlags::WRITE) {
                WriteType::WithResponse
            } else {
                WriteType::WithoutResponse
            };
            let error = peripheral
                .write(&target, &value, write_type)
                .await
                .err()
                .map(|e| e.to_string());
            inner.send(TransportEvent::WriteAcknowledged {
                id,
                characteristic,
                error,
            });
        });
        Ok(())
    }

    async fn set_notify(&self, id: &DeviceId, characteristic: Uuid, enabled: bool) -> Result<()> {
        let peripheral = self.inner.peripheral(id)?;
        if enabled {
            self.inner.ensure_notifier(id, &peripheral).await;
        }
        let id = id.clone();
        tokio::spawn(async move {
            let Some(target) = find_characteristic(&peripheral, characteristic) else {
                return;
            };
            let result = if enabled {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };
            if let Err(e) = result {
                warn!("Changing notification state of {characteristic} on {id} failed: {e}");
            }
        });
        Ok(())
    }

    async fn read_rssi(&self, id: &DeviceId) -> Result<()> {
        let peripheral = self.inner.peripheral(id)?;
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        tokio::spawn(async move {
            if let Ok(Some(properties)) = peripheral.properties().await
                && let Some(rssi) = properties.rssi
            {
                inner.send(TransportEvent::SignalStrength { id, rssi });
            }
        });
        Ok(())
    }

    async fn retrieve_connected(&self) -> Result<Vec<Advertisement>> {
        let peripherals = self.inner.adapter.peripherals().await?;
        let mut connected = Vec::new();
        for peripheral in peripherals {
            if !peripheral.is_connected().await.unwrap_or(false) {
                continue;
            }
            let properties = peripheral.properties().await.ok().flatten();
            let id = device_id(&peripheral, properties.as_ref());
            self.inner.register(peripheral.id(), id.clone(), peripheral);
            connected.push(Advertisement {
                id,
                local_name: properties.as_ref().and_then(|p| p.local_name.clone()),
                manufacturer_data: properties
                    .as_ref()
                    .map(|p| manufacturer_bytes(&p.manufacturer_data))
                    .unwrap_or(None),
                rssi: properties.as_ref().and_then(|p| p.rssi),
            });
        }
        Ok(connected)
    }
}

/// Extract the useful identifier string from a platform peripheral id.
///
/// On macOS peripheral ids are UUIDs; elsewhere they wrap the address.
fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{id:?}")
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Stable identifier: the Bluetooth address where the platform reports a
/// real one, else the peripheral id (macOS hides addresses).
fn device_id(peripheral: &Peripheral, properties: Option<&PeripheralProperties>) -> DeviceId {
    match properties {
        Some(p) if p.address.to_string() != "00:00:00:00:00:00" => {
            DeviceId::new(p.address.to_string())
        }
        _ => DeviceId::new(format_peripheral_id(&peripheral.id())),
    }
}

/// Flatten advertised manufacturer data into raw bytes with the company-id
/// prefix in little-endian, matching the on-air layout.
fn manufacturer_bytes(data: &HashMap<u16, Vec<u8>>) -> Option<Bytes> {
    let (&company, payload) = data.iter().next()?;
    let mut buf = Vec::with_capacity(2 + payload.len());
    buf.extend_from_slice(&company.to_le_bytes());
    buf.extend_from_slice(payload);
    Some(Bytes::from(buf))
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
}

fn find_descriptor(
    peripheral: &Peripheral,
    characteristic: Uuid,
    descriptor: Uuid,
) -> Option<Descriptor> {
    find_characteristic(peripheral, characteristic)?
        .descriptors
        .into_iter()
        .find(|d| d.uuid == descriptor)
}
