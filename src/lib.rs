//! # Fieldlink - uplink decoding for field telemetry devices
//!
//! Decodes the binary frames sent by GPS trackers, humidity/temperature
//! loggers and smoke detectors into typed records.
//!
//! ## Key Features
//!
//! - **Bounds-checked decoding**: every decoder reads through a checked cursor
//!   and fails with a [`DecodeError`] instead of panicking
//! - **Run-length expansion**: multi-sample humidity frames
//! - **Coordinate correction**: satellite fixes converted for regional maps
//! - **Pluggable generic frames**: sub-decoders registered by device type
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldlink::{DecodedRecord, Decoder, ProtocolKind};
//!
//! let decoder = Decoder::new();
//! let frame = hex::decode("ff0200015cc056d001011b0401460151ff").unwrap();
//!
//! let record = decoder.decode(ProtocolKind::Humidity, &frame).unwrap();
//! if let DecodedRecord::Humidity(samples) = record {
//!     assert_eq!(samples.len(), 1);
//!     assert_eq!(samples[0].humidity, 70.0);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Device identifiers, raw frames, protocol families
//! - [`decoder`]: Decoded records and per-family dispatch
//! - [`beacon`]: Location beacon frames
//! - [`humidity`]: Humidity logger frames
//! - [`smoke`]: Smoke detector bodies
//! - [`generic`]: Generic frame envelope and device type registry
//! - [`coordinate`]: Regional coordinate correction
//! - [`detail`]: Track and state records built from beacons

// Modules
pub mod beacon;
pub mod coordinate;
pub mod decoder;
pub mod detail;
pub mod error;
pub mod generic;
pub mod humidity;
pub mod protocol;
pub mod reader;
pub mod smoke;

// Re-exports for convenient access
pub use beacon::{BeaconAlert, BeaconPayload, Heartbeat, LocationBeacon, SensorReport};
pub use coordinate::GeoPoint;
pub use decoder::{DecodedRecord, Decoder, FrameDecoder};
pub use detail::{DeviceDetail, DeviceState, DeviceTrackPoint};
pub use error::{DecodeError, FieldlinkError, ProtocolError, Result};
pub use generic::{FrameRegistry, GenericFrame, TransCode};
pub use humidity::{HumidityAlarm, HumiditySample};
pub use protocol::{DeviceEui, ProtocolKind, RawUplinkFrame};
pub use smoke::{SmokeAlarm, SmokeEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_frame_to_state() {
        let frame = RawUplinkFrame::new(
            "0004a30b001c0530".parse().unwrap(),
            hex::decode("aa5cac117c0158a42e06ca2e5c01015bffea01010466").unwrap(),
        );
        assert!(frame.is_location_beacon());

        let record = Decoder::new()
            .decode(ProtocolKind::LocationBeacon, &frame.payload)
            .unwrap();
        let DecodedRecord::LocationBeacon(beacon) = record else {
            panic!("expected a beacon");
        };
        let state = DeviceState::from_beacon(frame.device, &beacon, chrono::Utc::now());
        assert_eq!(state.detail.id, "0004a30b001c0530");
        assert_eq!(state.detail.sensor.alarms, vec!["removed"]);
    }
}
