//! Scan for nearby BLE devices and print link activity.
//!
//! Run with `cargo run --example scan_devices`. Scans for ten seconds,
//! printing every discovered device and the activity log collected along
//! the way.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use tether_core::{BtleTransport, LinkManager, ManagerConfig, transport_channel};
use tether_store::{MemoryBackend, WriteHistoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let (event_tx, event_rx) = transport_channel();
    let transport = Arc::new(BtleTransport::new(event_tx).await?);
    let store = WriteHistoryStore::new(MemoryBackend::default());
    let link = LinkManager::spawn(transport, event_rx, store, ManagerConfig::default());

    println!("Scanning for 10 seconds...");
    link.start_scan()?;
    sleep(Duration::from_secs(10)).await;
    link.stop_scan()?;

    let snapshot = link.devices().await?;
    println!("\nFound {} device(s):", snapshot.discovered.len());
    for device in &snapshot.discovered {
        let rssi = if device.rssi == 0 {
            "   ?".to_string()
        } else {
            format!("{:4}", device.rssi)
        };
        println!("  {rssi} dBm  {}  [{}]", device.display_name(), device.id);
    }

    let logs = link.logs().await?;
    if !logs.is_empty() {
        println!("\nActivity:");
        for entry in logs {
            println!("  {entry}");
        }
    }

    link.shutdown()?;
    Ok(())
}
