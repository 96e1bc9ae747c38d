//! Catalog of known devices.
//!
//! The registry keeps two views: `discovered` (every device ever seen this
//! session, deduplicated by identifier) and `connected` (the subset
//! currently or previously connected in-session), plus the currently
//! selected device. A device may appear in both views; the typed setters
//! mutate every copy so the views cannot drift on field values, and
//! [`DeviceRegistry::synchronize_status`] reconciles status against the
//! connected set.

use tether_types::{ConnectionStatus, Device, DeviceId};

use bytes::Bytes;

/// The discovered/connected device catalog.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    discovered: Vec<Device>,
    connected: Vec<Device>,
    selected: Option<DeviceId>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly discovered device; first-seen wins.
    ///
    /// Returns `false` when the identifier was already present (later
    /// advertisements for a known device flow through the field setters
    /// instead).
    pub fn on_discovered(&mut self, device: Device) -> bool {
        if self.discovered.iter().any(|d| d.id == device.id) {
            return false;
        }
        self.discovered.push(device);
        true
    }

    /// Every device seen this session, in discovery order.
    pub fn discovered(&self) -> &[Device] {
        &self.discovered
    }

    /// Devices currently or previously connected this session.
    pub fn connected(&self) -> &[Device] {
        &self.connected
    }

    /// Look up a device in whichever view holds it.
    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.discovered
            .iter()
            .find(|d| &d.id == id)
            .or_else(|| self.connected.iter().find(|d| &d.id == id))
    }

    /// Whether the device is in the connected set.
    pub fn is_in_connected(&self, id: &DeviceId) -> bool {
        self.connected.iter().any(|d| &d.id == id)
    }

    /// Add a device to the connected set if absent, cloning the discovered
    /// record when one exists.
    pub fn add_connected(&mut self, id: &DeviceId) {
        if self.is_in_connected(id) {
            return;
        }
        let device = self
            .discovered
            .iter()
            .find(|d| &d.id == id)
            .cloned()
            .unwrap_or_else(|| Device::new(id.clone(), None));
        self.connected.push(device);
    }

    /// Remove a device from the connected set.
    pub fn remove_connected(&mut self, id: &DeviceId) {
        self.connected.retain(|d| &d.id != id);
    }

    /// Merge a device already connected at the radio level (reported by the
    /// transport independent of this session's discovery) into both views.
    pub fn merge_connected(&mut self, device: Device) {
        let id = device.id.clone();
        self.on_discovered(device);
        self.add_connected(&id);
    }

    /// The currently selected device id.
    pub fn selected(&self) -> Option<&DeviceId> {
        self.selected.as_ref()
    }

    /// The currently selected device record.
    pub fn selected_device(&self) -> Option<&Device> {
        let id = self.selected.as_ref()?;
        self.get(id)
    }

    /// Change the selection.
    pub fn select(&mut self, id: Option<DeviceId>) {
        self.selected = id;
    }

    // --- Typed field setters (one per mutable field) ---

    /// Set the peripheral-reported name.
    pub fn set_name(&mut self, id: &DeviceId, name: Option<String>) {
        self.for_each_copy(id, |d| d.name = name.clone());
    }

    /// Set the signal-strength field.
    pub fn set_rssi(&mut self, id: &DeviceId, rssi: i16) {
        self.for_each_copy(id, |d| d.rssi = rssi);
    }

    /// Set the battery percentage.
    pub fn set_battery(&mut self, id: &DeviceId, battery: Option<u8>) {
        self.for_each_copy(id, |d| d.battery = battery);
    }

    /// Set the connection status.
    pub fn set_status(&mut self, id: &DeviceId, status: ConnectionStatus) {
        self.for_each_copy(id, |d| d.status = status);
    }

    /// Set the raw advertised manufacturer data.
    pub fn set_manufacturer_data(&mut self, id: &DeviceId, data: Option<Bytes>) {
        self.for_each_copy(id, |d| d.manufacturer_data = data.clone());
    }

    fn for_each_copy(&mut self, id: &DeviceId, mut apply: impl FnMut(&mut Device)) {
        for device in self.discovered.iter_mut().filter(|d| &d.id == id) {
            apply(device);
        }
        for device in self.connected.iter_mut().filter(|d| &d.id == id) {
            apply(device);
        }
    }

    /// Recompute every device's status from the connected set: Connected iff
    /// the identifier is present there, else Disconnected.
    ///
    /// Idempotent; tolerates transient inconsistency between the views
    /// caused by asynchronous transport callbacks, and is the single source
    /// of truth for status display.
    pub fn synchronize_status(&mut self) {
        let connected_ids: Vec<DeviceId> = self.connected.iter().map(|d| d.id.clone()).collect();
        let status_of = |id: &DeviceId| {
            if connected_ids.contains(id) {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Disconnected
            }
        };
        for device in &mut self.discovered {
            device.status = status_of(&device.id);
        }
        for device in &mut self.connected {
            device.status = ConnectionStatus::Connected;
        }
    }

    /// Forget every device and the selection (radio became unavailable).
    pub fn clear(&mut self) {
        self.discovered.clear();
        self.connected.clear();
        self.selected = None;
    }
}
