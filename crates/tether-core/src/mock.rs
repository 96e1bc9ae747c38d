//! Mock transport for tests.
//!
//! Records every issued command and optionally answers connects on its own,
//! including scripted failures, so manager behavior can be exercised without
//! a radio.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use tether_types::DeviceId;

use crate::error::{Error, Result};
use crate::transport::{Advertisement, Transport, TransportEvent, TransportEventSender};

/// One command issued against the [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    StartScan,
    StopScan,
    Connect(DeviceId),
    CancelConnect(DeviceId),
    Disconnect(DeviceId),
    DiscoverServices(DeviceId),
    DiscoverCharacteristics(DeviceId, Uuid),
    DiscoverDescriptors(DeviceId, Uuid),
    ReadCharacteristic(DeviceId, Uuid),
    ReadDescriptor(DeviceId, Uuid, Uuid),
    WriteCharacteristic(DeviceId, Uuid, Bytes),
    SetNotify(DeviceId, Uuid, bool),
    ReadRssi(DeviceId),
    RetrieveConnected,
}

/// Scriptable [`Transport`] implementation.
///
/// By default every command is only recorded. With `auto_connect` enabled
/// the mock answers `connect` with a `Connected` event, except for the
/// first `fail_connects` attempts, which are answered with `Disconnected`
/// instead.
pub struct MockTransport {
    calls: Mutex<Vec<MockCall>>,
    events: TransportEventSender,
    auto_connect: AtomicBool,
    fail_connects: AtomicU32,
    fail_disconnects: AtomicBool,
    already_connected: Mutex<Vec<Advertisement>>,
}

impl MockTransport {
    /// Create a mock that reports events on `events`.
    pub fn new(events: TransportEventSender) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            events,
            auto_connect: AtomicBool::new(false),
            fail_connects: AtomicU32::new(0),
            fail_disconnects: AtomicBool::new(false),
            already_connected: Mutex::new(Vec::new()),
        }
    }

    /// Answer future connects with a `Connected` event.
    pub fn set_auto_connect(&self, enabled: bool) {
        self.auto_connect.store(enabled, Ordering::SeqCst);
    }

    /// Fail the next `count` connect attempts with a `Disconnected` event.
    pub fn fail_next_connects(&self, count: u32) {
        self.fail_connects.store(count, Ordering::SeqCst);
    }

    /// Make future disconnect commands fail without emitting an event.
    pub fn set_fail_disconnects(&self, enabled: bool) {
        self.fail_disconnects.store(enabled, Ordering::SeqCst);
    }

    /// Set the peripherals reported by [`Transport::retrieve_connected`].
    pub fn set_already_connected(&self, peripherals: Vec<Advertisement>) {
        *self
            .already_connected
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = peripherals;
    }

    /// Inject a transport event as if the radio produced it.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// All commands issued so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of recorded commands matching `f`.
    pub fn count_calls(&self, f: impl Fn(&MockCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| f(c))
            .count()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

/// Advertisement with a random MAC-style address, for seeding tests.
pub fn random_advertisement(name: &str) -> Advertisement {
    let octets: [u8; 6] = rand::random();
    let address = octets
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":");
    Advertisement {
        id: DeviceId::new(address),
        local_name: Some(name.to_string()),
        manufacturer_data: None,
        rssi: Some(-50),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start_scan(&self) -> Result<()> {
        self.record(MockCall::StartScan);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(MockCall::StopScan);
        Ok(())
    }

    async fn connect(&self, id: &DeviceId) -> Result<()> {
        self.record(MockCall::Connect(id.clone()));
        let failures = self.fail_connects.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_connects.store(failures - 1, Ordering::SeqCst);
            self.emit(TransportEvent::Disconnected {
                id: id.clone(),
                error: Some("simulated connect failure".into()),
            });
        } else if self.auto_connect.load(Ordering::SeqCst) {
            self.emit(TransportEvent::Connected { id: id.clone() });
        }
        Ok(())
    }

    async fn cancel_connect(&self, id: &DeviceId) -> Result<()> {
        self.record(MockCall::CancelConnect(id.clone()));
        Ok(())
    }

    async fn disconnect(&self, id: &DeviceId) -> Result<()> {
        self.record(MockCall::Disconnect(id.clone()));
        if self.fail_disconnects.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.emit(TransportEvent::Disconnected {
            id: id.clone(),
            error: None,
        });
        Ok(())
    }

    async fn discover_services(&self, id: &DeviceId) -> Result<()> {
        self.record(MockCall::DiscoverServices(id.clone()));
        Ok(())
    }

    async fn discover_characteristics(&self, id: &DeviceId, service: Uuid) -> Result<()> {
        self.record(MockCall::DiscoverCharacteristics(id.clone(), service));
        Ok(())
    }

    async fn discover_descriptors(&self, id: &DeviceId, characteristic: Uuid) -> Result<()> {
        self.record(MockCall::DiscoverDescriptors(id.clone(), characteristic));
        Ok(())
    }

    async fn read_characteristic(&self, id: &DeviceId, characteristic: Uuid) -> Result<()> {
        self.record(MockCall::ReadCharacteristic(id.clone(), characteristic));
        Ok(())
    }

    async fn read_descriptor(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<()> {
        self.record(MockCall::ReadDescriptor(id.clone(), characteristic, descriptor));
        Ok(())
    }

    async fn write_characteristic(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        value: Bytes,
    ) -> Result<()> {
        self.record(MockCall::WriteCharacteristic(id.clone(), characteristic, value));
        self.emit(TransportEvent::WriteAcknowledged {
            id: id.clone(),
            characteristic,
            error: None,
        });
        Ok(())
    }

    async fn set_notify(&self, id: &DeviceId, characteristic: Uuid, enabled: bool) -> Result<()> {
        self.record(MockCall::SetNotify(id.clone(), characteristic, enabled));
        Ok(())
    }

    async fn read_rssi(&self, id: &DeviceId) -> Result<()> {
        self.record(MockCall::ReadRssi(id.clone()));
        Ok(())
    }

    async fn retrieve_connected(&self) -> Result<Vec<Advertisement>> {
        self.record(MockCall::RetrieveConnected);
        Ok(self
            .already_connected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::transport_channel;

    #[tokio::test]
    async fn records_calls_in_order() {
        let (tx, _rx) = transport_channel();
        let mock = MockTransport::new(tx);
        let id = DeviceId::from("AA:BB");

        mock.start_scan().await.unwrap();
        mock.connect(&id).await.unwrap();
        mock.read_rssi(&id).await.unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                MockCall::StartScan,
                MockCall::Connect(id.clone()),
                MockCall::ReadRssi(id),
            ]
        );
    }

    #[tokio::test]
    async fn scripted_connect_failures_then_success() {
        let (tx, mut rx) = transport_channel();
        let mock = MockTransport::new(tx);
        mock.set_auto_connect(true);
        mock.fail_next_connects(2);
        let id = DeviceId::from("AA:BB");

        mock.connect(&id).await.unwrap();
        mock.connect(&id).await.unwrap();
        mock.connect(&id).await.unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Disconnected { error: Some(_), .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Disconnected { error: Some(_), .. })
        ));
        assert!(matches!(rx.recv().await, Some(TransportEvent::Connected { .. })));
    }
}
