//! End-to-end lifecycle tests against the mock transport.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{sleep, timeout};
use uuid::{Uuid, uuid};

use tether_core::mock::{random_advertisement, MockCall, MockTransport};
use tether_core::types::{
    CharacteristicProperties, CharacteristicRecord, ConnectionStatus, DeviceId,
};
use tether_core::{
    EventReceiver, LinkEvent, LinkHandle, LinkManager, ManagerConfig, TransportEvent,
    transport_channel,
};
use tether_store::{MemoryBackend, WriteHistoryStore};

const SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");
const CHARACTERISTIC: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");
const USER_DESCRIPTION: Uuid = uuid!("00002901-0000-1000-8000-00805f9b34fb");

/// Config with background timers pushed out of the way and a short log
/// flush so tests can observe visible entries quickly.
fn test_config() -> ManagerConfig {
    ManagerConfig::new()
        .rssi_interval(Duration::from_secs(3600))
        .log_flush_delay(Duration::from_millis(20))
}

fn setup(config: ManagerConfig) -> (Arc<MockTransport>, LinkHandle) {
    let (event_tx, event_rx) = transport_channel();
    let mock = Arc::new(MockTransport::new(event_tx));
    let store = WriteHistoryStore::new(MemoryBackend::default());
    let handle = LinkManager::spawn(mock.clone(), event_rx, store, config);
    (mock, handle)
}

async fn wait_for(
    events: &mut EventReceiver,
    mut matches: impl FnMut(&LinkEvent) -> bool,
) -> LinkEvent {
    loop {
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if matches(&event) {
            return event;
        }
    }
}

fn readable_characteristic() -> CharacteristicRecord {
    CharacteristicRecord {
        uuid: CHARACTERISTIC,
        service_uuid: SERVICE,
        properties: CharacteristicProperties::READ,
        value: None,
    }
}

/// Discover a device and drive it to Connected, returning its id.
async fn connect_device(mock: &MockTransport, handle: &LinkHandle) -> DeviceId {
    let adv = random_advertisement("Sensor");
    let id = adv.id.clone();
    let mut events = handle.events();
    mock.set_auto_connect(true);
    mock.emit(TransportEvent::Discovered(adv));
    wait_for(&mut events, |e| matches!(e, LinkEvent::Discovered { .. })).await;
    handle.connect(id.clone()).unwrap();
    wait_for(&mut events, |e| matches!(e, LinkEvent::Connected { .. })).await;
    id
}

#[tokio::test]
async fn connect_marks_device_connected_and_selects_it() {
    let (mock, handle) = setup(test_config());
    let id = connect_device(&mock, &handle).await;

    let snapshot = handle.devices().await.unwrap();
    assert_eq!(snapshot.selected.as_ref(), Some(&id));
    assert!(snapshot.connected.iter().any(|d| d.id == id));
    let device = snapshot.discovered.iter().find(|d| d.id == id).unwrap();
    assert_eq!(device.status, ConnectionStatus::Connected);

    // Connecting kicks off service discovery
    sleep(Duration::from_millis(50)).await;
    assert_eq!(
        mock.count_calls(|c| matches!(c, MockCall::DiscoverServices(_))),
        1
    );
}

#[tokio::test]
async fn unsolicited_disconnect_retries_three_times_then_gives_up() {
    let (mock, handle) = setup(test_config());
    let mut events = handle.events();
    let id = connect_device(&mock, &handle).await;

    mock.fail_next_connects(10);
    mock.emit(TransportEvent::Disconnected {
        id: id.clone(),
        error: Some("link lost".into()),
    });

    for expected in 1..=3u32 {
        let event = wait_for(&mut events, |e| {
            matches!(e, LinkEvent::ReconnectStarted { .. })
        })
        .await;
        match event {
            LinkEvent::ReconnectStarted { attempt, .. } => assert_eq!(attempt, expected),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    let event = wait_for(&mut events, |e| {
        matches!(e, LinkEvent::ReconnectAbandoned { .. })
    })
    .await;
    match event {
        LinkEvent::ReconnectAbandoned { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected event: {other:?}"),
    }

    // Initial connect plus exactly three retries
    assert_eq!(mock.count_calls(|c| matches!(c, MockCall::Connect(_))), 4);

    let snapshot = handle.devices().await.unwrap();
    assert!(snapshot.connected.is_empty());
    let device = snapshot.discovered.iter().find(|d| d.id == id).unwrap();
    assert_eq!(device.status, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn requested_disconnect_does_not_retry() {
    let (mock, handle) = setup(test_config());
    let mut events = handle.events();
    let id = connect_device(&mock, &handle).await;

    handle.disconnect(id.clone()).unwrap();
    let event = wait_for(&mut events, |e| matches!(e, LinkEvent::Disconnected { .. })).await;
    match event {
        LinkEvent::Disconnected { unsolicited, .. } => assert!(!unsolicited),
        other => panic!("unexpected event: {other:?}"),
    }

    sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.count_calls(|c| matches!(c, MockCall::Connect(_))), 1);
    let snapshot = handle.devices().await.unwrap();
    assert!(snapshot.connected.is_empty());
}

#[tokio::test]
async fn failed_initial_connect_is_not_retried() {
    let (mock, handle) = setup(test_config());
    let mut events = handle.events();

    let adv = random_advertisement("Sensor");
    let id = adv.id.clone();
    mock.fail_next_connects(10);
    mock.emit(TransportEvent::Discovered(adv));
    wait_for(&mut events, |e| matches!(e, LinkEvent::Discovered { .. })).await;

    handle.connect(id.clone()).unwrap();
    let event = wait_for(&mut events, |e| matches!(e, LinkEvent::Disconnected { .. })).await;
    match event {
        LinkEvent::Disconnected { unsolicited, .. } => assert!(unsolicited),
        other => panic!("unexpected event: {other:?}"),
    }

    // The device never reached the connected set, so the failure is final
    sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.count_calls(|c| matches!(c, MockCall::Connect(_))), 1);
    let snapshot = handle.devices().await.unwrap();
    assert!(snapshot.connected.is_empty());
    let device = snapshot.discovered.iter().find(|d| d.id == id).unwrap();
    assert_eq!(device.status, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn cancelled_connect_attempt_is_not_retried() {
    let (mock, handle) = setup(test_config());
    let mut events = handle.events();

    let adv = random_advertisement("Sensor");
    let id = adv.id.clone();
    mock.emit(TransportEvent::Discovered(adv));
    wait_for(&mut events, |e| matches!(e, LinkEvent::Discovered { .. })).await;

    // The mock never answers, so the attempt stays in flight until cancelled
    handle.connect(id.clone()).unwrap();
    handle.cancel_connect(id.clone()).unwrap();

    // Transport acks the aborted attempt with a disconnect
    mock.emit(TransportEvent::Disconnected {
        id: id.clone(),
        error: Some("connection canceled".into()),
    });
    let event = wait_for(&mut events, |e| matches!(e, LinkEvent::Disconnected { .. })).await;
    match event {
        LinkEvent::Disconnected { unsolicited, .. } => assert!(!unsolicited),
        other => panic!("unexpected event: {other:?}"),
    }

    sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.count_calls(|c| matches!(c, MockCall::Connect(_))), 1);
    assert_eq!(
        mock.count_calls(|c| matches!(c, MockCall::CancelConnect(_))),
        1
    );
    let snapshot = handle.devices().await.unwrap();
    let device = snapshot.discovered.iter().find(|d| d.id == id).unwrap();
    assert_eq!(device.status, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn cancel_connect_only_affects_the_named_device() {
    let (mock, handle) = setup(test_config());
    let mut events = handle.events();

    let first = random_advertisement("First");
    let second = random_advertisement("Second");
    let (first_id, second_id) = (first.id.clone(), second.id.clone());
    mock.emit(TransportEvent::Discovered(first));
    mock.emit(TransportEvent::Discovered(second));
    wait_for(&mut events, |e| {
        matches!(e, LinkEvent::Discovered { id, .. } if *id == second_id)
    })
    .await;

    handle.connect(first_id.clone()).unwrap();
    handle.connect(second_id.clone()).unwrap();
    handle.cancel_connect(first_id.clone()).unwrap();

    // The other attempt is still live and may complete
    mock.emit(TransportEvent::Connected {
        id: second_id.clone(),
    });
    wait_for(&mut events, |e| matches!(e, LinkEvent::Connected { .. })).await;

    assert_eq!(
        mock.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::CancelConnect(id) => Some(id),
                _ => None,
            })
            .collect::<Vec<_>>(),
        vec![first_id.clone()]
    );
    let snapshot = handle.devices().await.unwrap();
    assert!(snapshot.connected.iter().any(|d| d.id == second_id));
    let device = snapshot.discovered.iter().find(|d| d.id == first_id).unwrap();
    assert_eq!(device.status, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn failed_disconnect_issue_still_removes_the_device() {
    let (mock, handle) = setup(test_config());
    let mut events = handle.events();
    let id = connect_device(&mock, &handle).await;

    mock.set_fail_disconnects(true);
    handle.disconnect(id.clone()).unwrap();

    // State drops at command time even though the transport refused
    let snapshot = handle.devices().await.unwrap();
    assert!(snapshot.connected.is_empty());
    let device = snapshot.discovered.iter().find(|d| d.id == id).unwrap();
    assert_eq!(device.status, ConnectionStatus::Disconnected);

    // A later drop report for the same device must not be swallowed as
    // the expected ack, nor trigger reconnection
    mock.emit(TransportEvent::Disconnected {
        id: id.clone(),
        error: Some("link lost".into()),
    });
    let event = wait_for(&mut events, |e| matches!(e, LinkEvent::Disconnected { .. })).await;
    match event {
        LinkEvent::Disconnected { unsolicited, .. } => assert!(unsolicited),
        other => panic!("unexpected event: {other:?}"),
    }
    sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.count_calls(|c| matches!(c, MockCall::Connect(_))), 1);
}

#[tokio::test]
async fn value_updates_are_dropped_while_polling_is_inactive() {
    let (mock, handle) = setup(test_config());
    let id = connect_device(&mock, &handle).await;
    mock.emit(TransportEvent::CharacteristicsDiscovered {
        id: id.clone(),
        service: SERVICE,
        characteristics: vec![readable_characteristic()],
    });

    let mut events = handle.events();
    mock.emit(TransportEvent::CharacteristicValue {
        id: id.clone(),
        characteristic: CHARACTERISTIC,
        value: Some(Bytes::from_static(&[42])),
        error: None,
    });
    // Not polling: the update must vanish without a trace
    sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, LinkEvent::CharacteristicChanged { .. }),
            "value leaked through while polling was off"
        );
    }

    handle.start_polling(Some(Duration::from_secs(3600))).unwrap();
    mock.emit(TransportEvent::CharacteristicValue {
        id: id.clone(),
        characteristic: CHARACTERISTIC,
        value: Some(Bytes::from_static(&[42])),
        error: None,
    });
    let event = wait_for(&mut events, |e| {
        matches!(e, LinkEvent::CharacteristicChanged { .. })
    })
    .await;
    match event {
        LinkEvent::CharacteristicChanged { value, .. } => assert_eq!(value, vec![42]),
        other => panic!("unexpected event: {other:?}"),
    }

    // An identical value is suppressed
    mock.emit(TransportEvent::CharacteristicValue {
        id,
        characteristic: CHARACTERISTIC,
        value: Some(Bytes::from_static(&[42])),
        error: None,
    });
    sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, LinkEvent::CharacteristicChanged { .. }));
    }
}

#[tokio::test]
async fn polling_reads_readable_characteristics_of_selected_device() {
    let (mock, handle) = setup(test_config());
    let id = connect_device(&mock, &handle).await;
    mock.emit(TransportEvent::CharacteristicsDiscovered {
        id,
        service: SERVICE,
        characteristics: vec![readable_characteristic()],
    });
    sleep(Duration::from_millis(50)).await;
    let before = mock.count_calls(|c| matches!(c, MockCall::ReadCharacteristic(_, _)));

    handle.start_polling(Some(Duration::from_millis(20))).unwrap();
    sleep(Duration::from_millis(150)).await;
    let after = mock.count_calls(|c| matches!(c, MockCall::ReadCharacteristic(_, _)));
    assert!(after > before + 2, "polling issued no reads");

    handle.stop_polling().unwrap();
    sleep(Duration::from_millis(50)).await;
    let stopped = mock.count_calls(|c| matches!(c, MockCall::ReadCharacteristic(_, _)));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        stopped,
        mock.count_calls(|c| matches!(c, MockCall::ReadCharacteristic(_, _))),
        "reads kept arriving after polling stopped"
    );
}

#[tokio::test]
async fn first_descriptor_value_becomes_the_write_label() {
    let (mock, handle) = setup(test_config());
    let id = connect_device(&mock, &handle).await;

    mock.emit(TransportEvent::DescriptorValue {
        id: id.clone(),
        characteristic: CHARACTERISTIC,
        descriptor: USER_DESCRIPTION,
        value: Some("Battery Level".into()),
        error: None,
    });
    // A later read of the same descriptor must not replace the cached value
    mock.emit(TransportEvent::DescriptorValue {
        id: id.clone(),
        characteristic: CHARACTERISTIC,
        descriptor: USER_DESCRIPTION,
        value: Some("Something Else".into()),
        error: None,
    });
    mock.emit(TransportEvent::WriteAcknowledged {
        id,
        characteristic: CHARACTERISTIC,
        error: None,
    });

    sleep(Duration::from_millis(100)).await;
    let logs = handle.logs().await.unwrap();
    assert!(
        logs.iter()
            .any(|e| e.message == "Write to Battery Level acknowledged"),
        "logs: {logs:?}"
    );
    assert!(!logs.iter().any(|e| e.message.contains("Something Else")));
}

#[tokio::test]
async fn write_history_keeps_the_last_ten_values() {
    let (mock, handle) = setup(test_config());
    connect_device(&mock, &handle).await;

    for n in 1..=11 {
        handle
            .write(CHARACTERISTIC, Bytes::from(n.to_string()))
            .unwrap();
    }
    let history = handle.write_history(CHARACTERISTIC).await.unwrap();
    assert_eq!(history.len(), 10);
    assert!(!history.contains(&"1".to_string()));
    assert_eq!(history.last().map(String::as_str), Some("11"));

    handle.clear_write_history(CHARACTERISTIC).unwrap();
    assert!(handle.write_history(CHARACTERISTIC).await.unwrap().is_empty());
}

#[tokio::test]
async fn log_entries_become_visible_in_batches() {
    let (mock, handle) = setup(
        ManagerConfig::new()
            .rssi_interval(Duration::from_secs(3600))
            .log_flush_delay(Duration::from_millis(200)),
    );
    let mut events = handle.events();
    mock.emit(TransportEvent::Discovered(random_advertisement("One")));
    mock.emit(TransportEvent::Discovered(random_advertisement("Two")));

    sleep(Duration::from_millis(50)).await;
    assert!(
        handle.logs().await.unwrap().is_empty(),
        "entries visible before the flush delay elapsed"
    );

    wait_for(&mut events, |e| matches!(e, LinkEvent::LogsFlushed { .. })).await;
    let logs = handle.logs().await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].message.contains("One"));
}

#[tokio::test]
async fn radio_loss_clears_devices_and_counters() {
    let (mock, handle) = setup(test_config());
    let mut events = handle.events();
    let id = connect_device(&mock, &handle).await;

    mock.emit(TransportEvent::AdapterAvailable { available: false });
    wait_for(&mut events, |e| {
        matches!(e, LinkEvent::AdapterAvailable { available: false })
    })
    .await;

    let snapshot = handle.devices().await.unwrap();
    assert!(snapshot.connected.is_empty());
    assert!(snapshot.discovered.iter().all(|d| d.is_placeholder()));

    // The dropped device cannot retry after the radio comes back
    mock.emit(TransportEvent::Disconnected { id, error: None });
    sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.count_calls(|c| matches!(c, MockCall::Connect(_))), 1);
}

#[tokio::test]
async fn radio_recovery_restarts_scanning() {
    let (mock, handle) = setup(test_config());
    let mut events = handle.events();

    mock.emit(TransportEvent::AdapterAvailable { available: true });
    wait_for(&mut events, |e| {
        matches!(e, LinkEvent::AdapterAvailable { available: true })
    })
    .await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.count_calls(|c| matches!(c, MockCall::StartScan)), 1);
    assert_eq!(
        mock.count_calls(|c| matches!(c, MockCall::RetrieveConnected)),
        1
    );
}

#[tokio::test]
async fn demo_device_connects_without_touching_the_transport() {
    let (mock, handle) = setup(test_config());
    let mut events = handle.events();

    handle.connect(DeviceId::placeholder()).unwrap();
    wait_for(&mut events, |e| matches!(e, LinkEvent::Connected { .. })).await;

    let snapshot = handle.devices().await.unwrap();
    assert!(snapshot.connected.iter().any(|d| d.is_placeholder()));
    assert_eq!(mock.count_calls(|c| matches!(c, MockCall::Connect(_))), 0);
}

#[tokio::test]
async fn already_connected_peripherals_are_merged_on_scan() {
    let (mock, handle) = setup(test_config());
    let adv = random_advertisement("Held by OS");
    let id = adv.id.clone();
    mock.set_already_connected(vec![adv]);
    mock.set_auto_connect(true);

    let mut events = handle.events();
    handle.start_scan().unwrap();
    wait_for(&mut events, |e| matches!(e, LinkEvent::Connected { .. })).await;

    let snapshot = handle.devices().await.unwrap();
    assert!(snapshot.connected.iter().any(|d| d.id == id));
}
