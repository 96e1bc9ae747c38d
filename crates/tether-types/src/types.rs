//! Core types for the tether link manager.

use core::fmt;

use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier for the placeholder (demo) device that has no transport handle.
const PLACEHOLDER_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Stable identifier for a remote device.
///
/// Derived from the transport's peripheral id (a MAC address on
/// Linux/Windows, a CoreBluetooth UUID on macOS), or the fixed sentinel
/// returned by [`DeviceId::placeholder`] for a device without a live
/// transport handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id from a transport peripheral identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The sentinel id used for the placeholder/demo device.
    pub fn placeholder() -> Self {
        Self(PLACEHOLDER_ID.to_string())
    }

    /// Whether this is the placeholder sentinel.
    pub fn is_placeholder(&self) -> bool {
        self.0 == PLACEHOLDER_ID
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Connection status of a device.
///
/// Transitions are driven exclusively by transport events and supervisor
/// commands; the initial state is [`ConnectionStatus::Disconnected`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectionStatus {
    /// No link, and no attempt in flight.
    #[default]
    Disconnected,
    /// A connect attempt has been issued and has not completed.
    Connecting,
    /// The link is established.
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
        }
    }
}

/// A known remote device.
///
/// Two devices are equal iff their identifiers match; every other field is
/// mutable metadata updated in place as transport events arrive.
#[derive(Debug, Clone)]
pub struct Device {
    /// Stable identifier.
    pub id: DeviceId,
    /// Peripheral-reported name, else the advertised local name.
    pub name: Option<String>,
    /// Raw advertised manufacturer data, decoded lazily.
    pub manufacturer_data: Option<Bytes>,
    /// Last measured signal strength in dBm; 0 means not yet measured.
    pub rssi: i16,
    /// Current connection status.
    pub status: ConnectionStatus,
    /// Battery percentage, when the device exposes a battery service.
    pub battery: Option<u8>,
}

impl Device {
    /// Create a device record as first seen during discovery.
    pub fn new(id: DeviceId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            manufacturer_data: None,
            rssi: 0,
            status: ConnectionStatus::Disconnected,
            battery: None,
        }
    }

    /// Create the placeholder/demo device.
    ///
    /// It has no transport handle: every transport-dependent operation on it
    /// is a no-op rather than a failure.
    pub fn placeholder() -> Self {
        Self::new(DeviceId::placeholder(), Some("Demo Device".to_string()))
    }

    /// Whether this device has no live transport handle.
    pub fn is_placeholder(&self) -> bool {
        self.id.is_placeholder()
    }

    /// The name to display, falling back to `"Unknown Device"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }

    /// Decode the advertised manufacturer data as printable text.
    ///
    /// Returns `None` when no data was advertised or it does not decode to
    /// anything printable. The raw bytes keep a 2-byte company id prefix,
    /// which is skipped.
    pub fn manufacturer_string(&self) -> Option<String> {
        let data = self.manufacturer_data.as_ref()?;
        let payload = data.get(2..).unwrap_or(&data[..]);
        let text: String = String::from_utf8_lossy(payload)
            .chars()
            .filter(|c| !c.is_control())
            .collect();
        let text = text.trim().to_string();
        if text.is_empty() { None } else { Some(text) }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Device {}

impl std::hash::Hash for Device {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Capability set of a characteristic, as a bitmask in the order the GATT
/// property byte uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x40);
    pub const EXTENDED_PROPERTIES: Self = Self(0x80);

    /// Build from a raw GATT property byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw property byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two property sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether the characteristic value can be read.
    pub const fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    /// Whether the characteristic value can be written, with or without
    /// response.
    pub const fn can_write(self) -> bool {
        self.0 & (Self::WRITE.0 | Self::WRITE_WITHOUT_RESPONSE.0) != 0
    }

    /// Whether the characteristic supports notifications or indications.
    pub const fn can_subscribe(self) -> bool {
        self.0 & (Self::NOTIFY.0 | Self::INDICATE.0) != 0
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u8, &str); 8] = [
            (0x01, "broadcast"),
            (0x02, "read"),
            (0x04, "write-without-response"),
            (0x08, "write"),
            (0x10, "notify"),
            (0x20, "indicate"),
            (0x40, "authenticated-signed-writes"),
            (0x80, "extended-properties"),
        ];
        let mut first = true;
        for (bit, name) in NAMES {
            if self.0 & bit != 0 {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// A GATT service surfaced read-only by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
}

/// A GATT characteristic surfaced read-only by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Capability set.
    pub properties: CharacteristicProperties,
    /// Last known value, if any.
    pub value: Option<Bytes>,
}

/// A GATT descriptor surfaced read-only by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRecord {
    /// Descriptor UUID.
    pub uuid: Uuid,
    /// UUID of the owning characteristic.
    pub characteristic_uuid: Uuid,
    /// Cached human-readable value, if one has been read.
    pub value: Option<String>,
}

/// A timestamped diagnostic log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogEntry {
    /// When the entry was appended.
    pub at: OffsetDateTime,
    /// The message text.
    pub message: String,
}

impl LogEntry {
    /// Create an entry timestamped now.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            at: OffsetDateTime::now_utc(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at, self.message)
    }
}
