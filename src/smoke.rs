// Fieldlink - Uplink frame decoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Smoke detector body decoder
//!
//! The body is what remains of a generic frame once its 4-byte prefix and
//! 2-byte trailer are stripped:
//!
//! ```text
//! [count: 1] ([code: 1] [len: 1] [data: len]) * count
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::DecodeError;
use crate::reader::ByteReader;

/// Function code of a heartbeat entry
pub const CODE_HEARTBEAT: u8 = 0x00;
/// Function code of a downlink acknowledgement entry
pub const CODE_DOWNLINK_ACK: u8 = 0x01;
/// Function code of an alarm report entry
pub const CODE_ALARM: u8 = 0x02;

/// Smoke detector alarm code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmokeAlarm {
    Smoke,
    HighTemperature,
    SmokeAndHighTemperature,
    SmokeSensorFailure,
    TemperatureSensorFailure,
    BothSensorsFailure,
    LowBattery,
    LowSensitivity,
    HighSensitivity,
    /// Any value outside the known set
    Unknown(u16),
}

impl SmokeAlarm {
    /// Map the 2-byte alarm value
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => SmokeAlarm::Smoke,
            0x0002 => SmokeAlarm::HighTemperature,
            0x0004 => SmokeAlarm::SmokeAndHighTemperature,
            0x0008 => SmokeAlarm::SmokeSensorFailure,
            0x0010 => SmokeAlarm::TemperatureSensorFailure,
            0x0020 => SmokeAlarm::BothSensorsFailure,
            0x0040 => SmokeAlarm::LowBattery,
            0x0080 => SmokeAlarm::LowSensitivity,
            0x0100 => SmokeAlarm::HighSensitivity,
            other => SmokeAlarm::Unknown(other),
        }
    }

    /// Raw 2-byte value
    pub fn code(&self) -> u16 {
        match self {
            SmokeAlarm::Smoke => 0x0001,
            SmokeAlarm::HighTemperature => 0x0002,
            SmokeAlarm::SmokeAndHighTemperature => 0x0004,
            SmokeAlarm::SmokeSensorFailure => 0x0008,
            SmokeAlarm::TemperatureSensorFailure => 0x0010,
            SmokeAlarm::BothSensorsFailure => 0x0020,
            SmokeAlarm::LowBattery => 0x0040,
            SmokeAlarm::LowSensitivity => 0x0080,
            SmokeAlarm::HighSensitivity => 0x0100,
            SmokeAlarm::Unknown(code) => *code,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            SmokeAlarm::Smoke => "Smoke alarm",
            SmokeAlarm::HighTemperature => "High temperature alarm",
            SmokeAlarm::SmokeAndHighTemperature => "Smoke and high temperature alarm",
            SmokeAlarm::SmokeSensorFailure => "Smoke sensor failure",
            SmokeAlarm::TemperatureSensorFailure => "High temperature sensor failure",
            SmokeAlarm::BothSensorsFailure => "High temperature and smoke sensor failure",
            SmokeAlarm::LowBattery => "System low battery failure",
            SmokeAlarm::LowSensitivity => "Smoke sensor sensitivity is too low",
            SmokeAlarm::HighSensitivity => "Smoke sensor sensitivity is too high",
            SmokeAlarm::Unknown(_) => "unknown alert",
        }
    }

    /// Parse a label back into an alarm
    ///
    /// Unknown labels lose their raw value and come back as `Unknown(0)`.
    pub fn from_label(label: &str) -> Self {
        const KNOWN: [SmokeAlarm; 9] = [
            SmokeAlarm::Smoke,
            SmokeAlarm::HighTemperature,
            SmokeAlarm::SmokeAndHighTemperature,
            SmokeAlarm::SmokeSensorFailure,
            SmokeAlarm::TemperatureSensorFailure,
            SmokeAlarm::BothSensorsFailure,
            SmokeAlarm::LowBattery,
            SmokeAlarm::LowSensitivity,
            SmokeAlarm::HighSensitivity,
        ];
        KNOWN
            .into_iter()
            .find(|a| a.label() == label)
            .unwrap_or(SmokeAlarm::Unknown(0))
    }
}

impl fmt::Display for SmokeAlarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Serialized by label, the form consumers of republished payloads expect
impl Serialize for SmokeAlarm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for SmokeAlarm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SmokeAlarm::from_label(&s))
    }
}

/// Decoded smoke detector report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SmokeEvent {
    /// A heartbeat entry was present
    pub is_heartbeat: bool,
    /// Last alarm entry, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<SmokeAlarm>,
}

impl SmokeEvent {
    /// Decode a smoke body
    ///
    /// Unknown function codes are skipped by their declared length.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(body);
        let count = r.read_u8()?;
        let mut event = SmokeEvent::default();

        for _ in 0..count {
            let code = r.read_u8()?;
            let len = usize::from(r.read_u8()?);
            let offset = r.position();
            let data = r.read_bytes(len)?;
            match code {
                CODE_HEARTBEAT => event.is_heartbeat = true,
                CODE_ALARM => {
                    if len != 2 {
                        return Err(DecodeError::Malformed {
                            offset,
                            reason: format!("alarm entry must carry 2 bytes, got {}", len),
                        });
                    }
                    let value = u16::from_be_bytes([data[0], data[1]]);
                    event.alarm = Some(SmokeAlarm::from_code(value));
                }
                _ => {}
            }
        }

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_battery_report() {
        let body = [0x01, 0x02, 0x02, 0x00, 0x40, 0x63, 0x81];
        let event = SmokeEvent::decode(&body).unwrap();
        assert!(!event.is_heartbeat);
        assert_eq!(event.alarm, Some(SmokeAlarm::LowBattery));
    }

    #[test]
    fn test_heartbeat_then_alarm() {
        let body = [0x02, 0x00, 0x01, 0x55, 0x02, 0x02, 0x01, 0x00];
        let event = SmokeEvent::decode(&body).unwrap();
        assert!(event.is_heartbeat);
        assert_eq!(event.alarm, Some(SmokeAlarm::HighSensitivity));
    }

    #[test]
    fn test_unknown_codes_skipped() {
        let body = [0x03, 0x01, 0x00, 0x7F, 0x03, 0xAA, 0xBB, 0xCC, 0x02, 0x02, 0x00, 0x01];
        let event = SmokeEvent::decode(&body).unwrap();
        assert!(!event.is_heartbeat);
        assert_eq!(event.alarm, Some(SmokeAlarm::Smoke));
    }

    #[test]
    fn test_unknown_alarm_value() {
        let body = [0x01, 0x02, 0x02, 0x12, 0x34];
        let event = SmokeEvent::decode(&body).unwrap();
        let alarm = event.alarm.unwrap();
        assert_eq!(alarm, SmokeAlarm::Unknown(0x1234));
        assert_eq!(alarm.label(), "unknown alert");
        assert_eq!(alarm.code(), 0x1234);
    }

    #[test]
    fn test_declared_length_overruns() {
        let body = [0x01, 0x05, 0x09, 0x00];
        assert!(matches!(
            SmokeEvent::decode(&body),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_count_exceeds_entries() {
        let body = [0x02, 0x00, 0x00];
        assert!(SmokeEvent::decode(&body).is_err());
    }

    #[test]
    fn test_alarm_wrong_length() {
        let body = [0x01, 0x02, 0x01, 0x40];
        assert!(matches!(
            SmokeEvent::decode(&body),
            Err(DecodeError::Malformed { offset: 3, .. })
        ));
    }

    #[test]
    fn test_empty_body() {
        assert!(SmokeEvent::decode(&[]).is_err());
        assert_eq!(SmokeEvent::decode(&[0x00]).unwrap(), SmokeEvent::default());
    }

    #[test]
    fn test_alarm_serializes_as_label() {
        let event = SmokeEvent {
            is_heartbeat: false,
            alarm: Some(SmokeAlarm::LowBattery),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"is_heartbeat":false,"alarm":"System low battery failure"}"#
        );
        let back: SmokeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_codes_roundtrip() {
        for code in [1u16, 2, 4, 8, 0x10, 0x20, 0x40, 0x80, 0x100] {
            let alarm = SmokeAlarm::from_code(code);
            assert!(!matches!(alarm, SmokeAlarm::Unknown(_)));
            assert_eq!(alarm.code(), code);
            assert_eq!(SmokeAlarm::from_label(alarm.label()), alarm);
        }
    }
}
