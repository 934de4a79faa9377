//! Discovered controller devices.
//!
//! A [`Device`] is the record a discovery scan produces for one reachable
//! controller board.  It is immutable once produced; a later scan supersedes
//! it with a fresh record rather than updating it in place.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RSSI magnitude below which a link is considered strong.
const STRONG_SIGNAL_MAGNITUDE: u16 = 40;

/// RSSI magnitude below which a link is considered usable but not strong.
const MEDIUM_SIGNAL_MAGNITUDE: u16 = 55;

/// The physical channel used to reach a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Short-range radio link (Bluetooth class range, ~10 m, low power).
    ShortRange,
    /// Local IP network link (WiFi class range, ~100 m).
    LocalNetwork,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::ShortRange => f.write_str("Bluetooth"),
            TransportKind::LocalNetwork => f.write_str("WiFi"),
        }
    }
}

/// Returned when a string does not name a known transport kind.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown transport kind: {0:?} (expected bluetooth or wifi)")]
pub struct ParseTransportKindError(String);

impl FromStr for TransportKind {
    type Err = ParseTransportKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bluetooth" | "bt" | "short-range" | "short_range" => Ok(TransportKind::ShortRange),
            "wifi" | "network" | "local-network" | "local_network" => {
                Ok(TransportKind::LocalNetwork)
            }
            _ => Err(ParseTransportKindError(s.to_string())),
        }
    }
}

/// Identifier of a device on its transport.
///
/// For short-range devices this is the radio address (`AA:BB:CC:DD:EE:FF`);
/// for local-network devices it is `ip:port` or a bare IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

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
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Coarse signal bucket used for the three-dot strength indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    Strong,
    Medium,
    Weak,
}

impl SignalQuality {
    /// Buckets a dBm reading by its magnitude.
    pub fn from_dbm(signal_dbm: i16) -> Self {
        let magnitude = signal_dbm.unsigned_abs();
        if magnitude < STRONG_SIGNAL_MAGNITUDE {
            SignalQuality::Strong
        } else if magnitude < MEDIUM_SIGNAL_MAGNITUDE {
            SignalQuality::Medium
        } else {
            SignalQuality::Weak
        }
    }

    /// Three-dot indicator string.
    pub fn bars(self) -> &'static str {
        match self {
            SignalQuality::Strong => "●●●",
            SignalQuality::Medium => "●●○",
            SignalQuality::Weak => "●○○",
        }
    }
}

/// A controller board found by a discovery scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Radio address or network endpoint.
    pub id: DeviceId,
    /// Advertised display name.
    pub name: String,
    /// Received signal strength; closer to zero is better.
    pub signal_dbm: i16,
    /// Channel the device was found on.
    pub transport: TransportKind,
}

impl Device {
    pub fn new(
        id: impl Into<DeviceId>,
        name: impl Into<String>,
        signal_dbm: i16,
        transport: TransportKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            signal_dbm,
            transport,
        }
    }

    pub fn signal_quality(&self) -> SignalQuality {
        SignalQuality::from_dbm(self.signal_dbm)
    }
}

/// Orders devices strongest-signal first.
///
/// Duplicate ids (a board answering twice during one scan) collapse to the
/// strongest reading.  Ties are broken by name so the ranking is stable
/// across scans.
pub fn rank_devices(devices: Vec<Device>) -> Vec<Device> {
    let mut strongest: HashMap<DeviceId, Device> = HashMap::with_capacity(devices.len());
    for device in devices {
        match strongest.get(&device.id) {
            Some(existing) if existing.signal_dbm >= device.signal_dbm => {}
            _ => {
                strongest.insert(device.id.clone(), device);
            }
        }
    }

    let mut ranked: Vec<Device> = strongest.into_values().collect();
    ranked.sort_by(|a, b| {
        b.signal_dbm
            .cmp(&a.signal_dbm)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bt(id: &str, name: &str, dbm: i16) -> Device {
        Device::new(id, name, dbm, TransportKind::ShortRange)
    }

    #[test]
    fn test_rank_devices_orders_by_descending_signal() {
        // Arrange
        let devices = vec![
            bt("00:11:22:33:44:55", "StepperController_BT01", -45),
            bt("AA:BB:CC:DD:EE:FF", "TriAxis_Motor_Hub", -62),
            bt("12:34:56:78:90:AB", "Arduino_Stepper", -38),
        ];

        // Act
        let ranked = rank_devices(devices);

        // Assert
        let signals: Vec<i16> = ranked.iter().map(|d| d.signal_dbm).collect();
        assert_eq!(signals, vec![-38, -45, -62]);
    }

    #[test]
    fn test_rank_devices_empty_input_returns_empty() {
        assert!(rank_devices(Vec::new()).is_empty());
    }

    #[test]
    fn test_rank_devices_breaks_ties_by_name() {
        let ranked = rank_devices(vec![bt("b", "Zeta", -50), bt("a", "Alpha", -50)]);
        assert_eq!(ranked[0].name, "Alpha");
        assert_eq!(ranked[1].name, "Zeta");
    }

    #[test]
    fn test_rank_devices_collapses_duplicates_to_strongest() {
        // Arrange – the same board answered twice with different readings
        let ranked = rank_devices(vec![bt("a", "Hub", -70), bt("a", "Hub", -41)]);

        // Assert
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].signal_dbm, -41);
    }

    #[test]
    fn test_signal_quality_buckets_match_indicator_thresholds() {
        assert_eq!(SignalQuality::from_dbm(-35), SignalQuality::Strong);
        assert_eq!(SignalQuality::from_dbm(-40), SignalQuality::Medium);
        assert_eq!(SignalQuality::from_dbm(-54), SignalQuality::Medium);
        assert_eq!(SignalQuality::from_dbm(-55), SignalQuality::Weak);
        assert_eq!(SignalQuality::from_dbm(i16::MIN), SignalQuality::Weak);
    }

    #[test]
    fn test_signal_quality_bars() {
        assert_eq!(SignalQuality::Strong.bars(), "●●●");
        assert_eq!(SignalQuality::Weak.bars(), "●○○");
    }

    #[test]
    fn test_transport_kind_parses_common_names() {
        assert_eq!("Bluetooth".parse::<TransportKind>(), Ok(TransportKind::ShortRange));
        assert_eq!("bt".parse::<TransportKind>(), Ok(TransportKind::ShortRange));
        assert_eq!("WiFi".parse::<TransportKind>(), Ok(TransportKind::LocalNetwork));
        assert_eq!(" network ".parse::<TransportKind>(), Ok(TransportKind::LocalNetwork));
        assert!("zigbee".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_transport_kind_display_uses_user_facing_names() {
        assert_eq!(TransportKind::ShortRange.to_string(), "Bluetooth");
        assert_eq!(TransportKind::LocalNetwork.to_string(), "WiFi");
    }
}
