//! Protocol definitions for Fieldlink
//!
//! This module defines the core types shared by every decoder and transport:
//! - Device identifiers (EUI-64)
//! - Raw uplink frames as delivered by a transport
//! - Protocol families and their leading markers

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Leading marker of a location beacon frame
pub const BEACON_MARKER: u8 = 0xAA;

/// Leading tag of a single-sample humidity frame
pub const HUMIDITY_SINGLE_TAG: [u8; 2] = [0xFF, 0x01];

/// Leading tag of a multi-sample humidity frame
pub const HUMIDITY_MULTI_TAG: [u8; 2] = [0xFF, 0x02];

/// 8-byte device identifier
///
/// Text form is 16 lower-case hex digits, which is also how it is
/// serialized and how it appears in topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceEui([u8; 8]);

impl DeviceEui {
    /// Length of the identifier in bytes
    pub const LEN: usize = 8;

    /// Create from raw bytes
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the identifier
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Build from a slice, which must be exactly 8 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ProtocolError::InvalidEuiLength {
                expected: Self::LEN * 2,
                actual: bytes.len() * 2,
            })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for DeviceEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for DeviceEui {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != Self::LEN * 2 {
            return Err(ProtocolError::InvalidEuiLength {
                expected: Self::LEN * 2,
                actual: s.len(),
            });
        }
        let bytes = hex::decode(s).map_err(|_| ProtocolError::InvalidEuiHex(s.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl From<[u8; 8]> for DeviceEui {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl Serialize for DeviceEui {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceEui {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One binary uplink message, as produced by a transport
///
/// Consumed exactly once by the dispatcher and not retained after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUplinkFrame {
    /// Device that sent the frame
    pub device: DeviceEui,
    /// Undecoded frame bytes
    pub payload: Vec<u8>,
}

impl RawUplinkFrame {
    /// Create a new raw frame
    pub fn new(device: DeviceEui, payload: Vec<u8>) -> Self {
        Self { device, payload }
    }

    /// First byte of the payload, if any
    pub fn leading_marker(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Whether the payload starts with the location beacon marker
    pub fn is_location_beacon(&self) -> bool {
        self.leading_marker() == Some(BEACON_MARKER)
    }

    /// Hex form of the payload, for diagnostics
    pub fn payload_hex(&self) -> String {
        hex::encode(&self.payload)
    }
}

/// Device protocol families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// GPS tracker frames starting with 0xAA
    LocationBeacon,
    /// Humidity/temperature logger frames tagged 0xFF01 / 0xFF02
    Humidity,
    /// Smoke detector frames (generic frame envelope around a smoke body)
    Smoke,
    /// Generic frame envelope dispatched on its device type
    Generic,
}

impl ProtocolKind {
    /// Infer the family from the leading bytes alone, when they are unambiguous
    pub fn sniff(payload: &[u8]) -> Option<Self> {
        match payload {
            [BEACON_MARKER, ..] => Some(ProtocolKind::LocationBeacon),
            [0xFF, 0x01, ..] | [0xFF, 0x02, ..] => Some(ProtocolKind::Humidity),
            _ => None,
        }
    }

    /// Stable lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::LocationBeacon => "location_beacon",
            ProtocolKind::Humidity => "humidity",
            ProtocolKind::Smoke => "smoke",
            ProtocolKind::Generic => "generic",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "location_beacon" | "beacon" | "angus" => Ok(ProtocolKind::LocationBeacon),
            "humidity" | "humiture" => Ok(ProtocolKind::Humidity),
            "smoke" => Ok(ProtocolKind::Smoke),
            "generic" | "digital" => Ok(ProtocolKind::Generic),
            other => Err(ProtocolError::UnknownProtocolKind(other.to_string())),
        }
    }
}
