//! Decoder module
//!
//! This module turns raw uplink payloads into typed records. Each device
//! family has its own stateless [`FrameDecoder`]; [`Decoder`] picks one from a
//! [`ProtocolKind`].

use serde::{Deserialize, Serialize};

use crate::beacon::LocationBeacon;
use crate::error::DecodeError;
use crate::generic::FrameRegistry;
use crate::humidity::{self, HumiditySample};
use crate::protocol::ProtocolKind;
use crate::smoke::SmokeEvent;

/// Result of decoding one uplink frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum DecodedRecord {
    LocationBeacon(LocationBeacon),
    Humidity(Vec<HumiditySample>),
    Smoke(SmokeEvent),
}

impl DecodedRecord {
    /// Protocol family the record came from
    pub fn kind(&self) -> ProtocolKind {
        match self {
            DecodedRecord::LocationBeacon(_) => ProtocolKind::LocationBeacon,
            DecodedRecord::Humidity(_) => ProtocolKind::Humidity,
            DecodedRecord::Smoke(_) => ProtocolKind::Smoke,
        }
    }
}

/// A stateless decoder for one device family
///
/// Implementations must return an error for any input they cannot fully
/// account for, and must never panic.
pub trait FrameDecoder {
    fn decode(&self, data: &[u8]) -> Result<DecodedRecord, DecodeError>;
}

/// GPS tracker frames
#[derive(Debug, Clone, Copy, Default)]
pub struct BeaconDecoder;

impl FrameDecoder for BeaconDecoder {
    fn decode(&self, data: &[u8]) -> Result<DecodedRecord, DecodeError> {
        LocationBeacon::decode(data).map(DecodedRecord::LocationBeacon)
    }
}

/// Humidity/temperature logger frames
#[derive(Debug, Clone, Copy, Default)]
pub struct HumidityDecoder;

impl FrameDecoder for HumidityDecoder {
    fn decode(&self, data: &[u8]) -> Result<DecodedRecord, DecodeError> {
        humidity::decode(data).map(DecodedRecord::Humidity)
    }
}

impl FrameDecoder for FrameRegistry {
    fn decode(&self, data: &[u8]) -> Result<DecodedRecord, DecodeError> {
        FrameRegistry::decode(self, data)
    }
}

/// Dispatches a payload to the decoder of its protocol family
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    beacon: BeaconDecoder,
    humidity: HumidityDecoder,
    generic: FrameRegistry,
}

impl Decoder {
    /// Create a decoder with the default generic frame registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with a custom generic frame registry
    pub fn with_registry(registry: FrameRegistry) -> Self {
        Self {
            generic: registry,
            ..Self::default()
        }
    }

    /// Decode a payload as the given protocol
    ///
    /// Smoke detectors speak the generic envelope, so `Smoke` and `Generic`
    /// share the registry.
    pub fn decode(&self, kind: ProtocolKind, data: &[u8]) -> Result<DecodedRecord, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }

        let decoder: &dyn FrameDecoder = match kind {
            ProtocolKind::LocationBeacon => &self.beacon,
            ProtocolKind::Humidity => &self.humidity,
            ProtocolKind::Smoke | ProtocolKind::Generic => &self.generic,
        };
        let result = decoder.decode(data);

        #[cfg(feature = "logging")]
        {
            match &result {
                Ok(record) => log::debug!("decoded {} frame as {}", kind, record.kind()),
                Err(e) => log::debug!("failed to decode {} frame: {}", kind, e),
            }
        }

        result
    }

    /// Decode a payload whose family can be told from its leading bytes
    pub fn decode_sniffed(&self, data: &[u8]) -> Result<DecodedRecord, DecodeError> {
        let kind = ProtocolKind::sniff(data).ok_or_else(|| {
            DecodeError::UnsupportedProtocol(format!(
                "unrecognised leading bytes {}",
                hex::encode(&data[..data.len().min(2)])
            ))
        })?;
        self.decode(kind, data)
    }

    pub fn registry(&self) -> &FrameRegistry {
        &self.generic
    }
}
