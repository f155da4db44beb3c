// Fieldlink - Uplink frame decoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Location beacon decoder (livestock GPS trackers)
//!
//! # Frame Format
//!
//! ```text
//! [0xAA] [utc: 4] [lat*1e6: 4] [lon*1e6: 4] [speed: 1] [azimuth: 2]
//! [altitude: 2] [code: 1] [data_len: 1] [data: N] [crc: 1]
//! ```
//!
//! All multi-byte fields are big-endian. The function code selects the
//! shape of `data` and the exact total frame length.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinate::{self, GeoPoint};
use crate::error::DecodeError;
use crate::protocol::BEACON_MARKER;
use crate::reader::ByteReader;

/// Smallest valid beacon frame
pub const MIN_FRAME_LEN: usize = 22;

/// Function code of an alert frame
pub const CODE_ALERT: u8 = 0x01;
/// Function code of a sensor report frame
pub const CODE_SENSOR_REPORT: u8 = 0x02;
/// Function code of a heartbeat frame
pub const CODE_HEARTBEAT: u8 = 0x03;

const ALERT_FRAME_LEN: usize = 22;
const SENSOR_REPORT_FRAME_LEN: usize = 28;
const HEARTBEAT_FRAME_LEN: usize = 27;

/// A decoded location beacon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationBeacon {
    /// Device clock at the time of the fix
    pub timestamp: DateTime<Utc>,
    /// Coordinates as sent by the device
    pub raw: GeoPoint,
    /// Coordinates after regional correction
    pub corrected: GeoPoint,
    /// Ground speed
    pub speed: u8,
    /// Heading
    pub azimuth: u16,
    /// Altitude
    pub altitude: u16,
    /// Function code
    pub code: u8,
    /// Sub-payload length as declared by the device
    pub declared_len: u8,
    /// Sub-payload selected by the function code
    pub payload: Option<BeaconPayload>,
    /// Trailing checksum byte (carried through, not verified)
    pub checksum: u8,
}

/// Sub-payload variants of a beacon frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BeaconPayload {
    Alert(BeaconAlert),
    SensorReport(SensorReport),
    Heartbeat(Heartbeat),
}

/// Alert flags
///
/// Each flag is its own bit; more than one may be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BeaconAlert {
    pub sos: bool,
    pub low_battery: bool,
    pub removed: bool,
}

impl BeaconAlert {
    const SOS: u8 = 0x01;
    const LOW_BATTERY: u8 = 0x02;
    const REMOVED: u8 = 0x04;

    /// Decode the one-byte alert field
    pub fn from_bits(bits: u8) -> Self {
        Self {
            sos: bits & Self::SOS != 0,
            low_battery: bits & Self::LOW_BATTERY != 0,
            removed: bits & Self::REMOVED != 0,
        }
    }

    /// Names of the raised flags
    pub fn labels(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.sos {
            out.push("sos");
        }
        if self.low_battery {
            out.push("low_battery");
        }
        if self.removed {
            out.push("removed");
        }
        out
    }
}

/// Periodic sensor report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReport {
    pub step_count: u16,
    pub business_id: u32,
    pub power_percent: u8,
}

/// Heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub step_count: u16,
    pub business_id: u32,
}

impl LocationBeacon {
    /// Decode a beacon frame
    ///
    /// The corrected coordinates are computed here, once.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(DecodeError::BufferTooShort {
                needed: MIN_FRAME_LEN,
                available: data.len(),
            });
        }

        let mut r = ByteReader::new(data);
        let marker = r.read_u8()?;
        if marker != BEACON_MARKER {
            return Err(DecodeError::InvalidMarker {
                expected: BEACON_MARKER,
                actual: marker,
            });
        }

        let utc = r.read_u32_be()?;
        let timestamp =
            DateTime::from_timestamp(i64::from(utc), 0).ok_or_else(|| DecodeError::Malformed {
                offset: 1,
                reason: format!("timestamp {} out of range", utc),
            })?;

        let raw = GeoPoint::new(
            f64::from(r.read_u32_be()?) / 1_000_000.0,
            f64::from(r.read_u32_be()?) / 1_000_000.0,
        );
        let corrected = coordinate::correct(raw);

        let speed = r.read_u8()?;
        let azimuth = r.read_u16_be()?;
        let altitude = r.read_u16_be()?;
        let code = r.read_u8()?;
        let declared_len = r.read_u8()?;

        let payload = match code {
            CODE_ALERT => {
                expect_len(code, ALERT_FRAME_LEN, data.len())?;
                Some(BeaconPayload::Alert(BeaconAlert::from_bits(r.read_u8()?)))
            }
            CODE_SENSOR_REPORT => {
                expect_len(code, SENSOR_REPORT_FRAME_LEN, data.len())?;
                Some(BeaconPayload::SensorReport(SensorReport {
                    step_count: r.read_u16_be()?,
                    business_id: r.read_u32_be()?,
                    power_percent: r.read_u8()?,
                }))
            }
            CODE_HEARTBEAT => {
                expect_len(code, HEARTBEAT_FRAME_LEN, data.len())?;
                Some(BeaconPayload::Heartbeat(Heartbeat {
                    step_count: r.read_u16_be()?,
                    business_id: r.read_u32_be()?,
                }))
            }
            _ => None,
        };

        let checksum = data[data.len() - 1];

        Ok(Self {
            timestamp,
            raw,
            corrected,
            speed,
            azimuth,
            altitude,
            code,
            declared_len,
            payload,
            checksum,
        })
    }
}

fn expect_len(code: u8, expected: usize, actual: usize) -> Result<(), DecodeError> {
    if actual != expected {
        return Err(DecodeError::LengthMismatch {
            code,
            expected,
            actual,
        });
    }
    Ok(())
}
