// Fieldlink - Uplink frame decoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Generic frame envelope
//!
//! ```text
//! [header: 1] [transcode: 1] [device_type: 2] [body: N] [crc: 1] [end: 1]
//! ```
//!
//! The body is handed to a sub-decoder chosen by `device_type`. Only the
//! smoke detector (`0x0006`) is registered by default.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::decoder::DecodedRecord;
use crate::error::DecodeError;
use crate::reader::ByteReader;
use crate::smoke::SmokeEvent;

/// Smallest frame accepted by the envelope parser
pub const MIN_FRAME_LEN: usize = 9;

/// Device type of smoke detectors
pub const DEVICE_TYPE_SMOKE: u16 = 0x0006;

const PREFIX_LEN: usize = 4;
const TRAILER_LEN: usize = 2;

/// Direction bit of the transcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    DeviceToServer,
    ServerToDevice,
}

/// Transmission code: direction plus protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransCode {
    pub direction: Direction,
    /// Bits 4..6
    pub major: u8,
    /// Bits 0..3
    pub minor: u8,
}

impl TransCode {
    pub fn from_byte(b: u8) -> Self {
        let direction = if b & 0x80 != 0 {
            Direction::ServerToDevice
        } else {
            Direction::DeviceToServer
        };
        Self {
            direction,
            major: (b >> 4) & 0x07,
            minor: b & 0x0F,
        }
    }
}

impl fmt::Display for TransCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::DeviceToServer => "up",
            Direction::ServerToDevice => "down",
        };
        write!(f, "{} v{}.{}", dir, self.major, self.minor)
    }
}

/// Parsed envelope, borrowing its body from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericFrame<'a> {
    pub header: u8,
    pub trans_code: TransCode,
    pub device_type: u16,
    pub body: &'a [u8],
    pub crc: u8,
    pub end: u8,
}

impl<'a> GenericFrame<'a> {
    /// Split a frame into envelope fields and body
    pub fn parse(data: &'a [u8]) -> Result<Self, DecodeError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(DecodeError::BufferTooShort {
                needed: MIN_FRAME_LEN,
                available: data.len(),
            });
        }
        let mut r = ByteReader::new(data);
        let header = r.read_u8()?;
        let trans_code = TransCode::from_byte(r.read_u8()?);
        let device_type = r.read_u16_be()?;
        let body = r.read_bytes(data.len() - PREFIX_LEN - TRAILER_LEN)?;
        let crc = r.read_u8()?;
        let end = r.read_u8()?;

        Ok(Self {
            header,
            trans_code,
            device_type,
            body,
            crc,
            end,
        })
    }
}

/// Body decoder for one device type
pub type BodyDecoder = fn(&[u8]) -> Result<DecodedRecord, DecodeError>;

/// Device type to body decoder table
#[derive(Clone)]
pub struct FrameRegistry {
    decoders: HashMap<u16, BodyDecoder>,
}

impl fmt::Debug for FrameRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.decoders.keys().collect();
        types.sort();
        f.debug_struct("FrameRegistry")
            .field("device_types", &types)
            .finish()
    }
}

impl FrameRegistry {
    /// Empty registry, every frame is unsupported
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register (or replace) the decoder for a device type
    pub fn register(&mut self, device_type: u16, decoder: BodyDecoder) {
        self.decoders.insert(device_type, decoder);
    }

    /// Builder form of [`FrameRegistry::register`]
    pub fn with(mut self, device_type: u16, decoder: BodyDecoder) -> Self {
        self.register(device_type, decoder);
        self
    }

    pub fn is_registered(&self, device_type: u16) -> bool {
        self.decoders.contains_key(&device_type)
    }

    /// Parse the envelope and decode its body
    pub fn decode(&self, data: &[u8]) -> Result<DecodedRecord, DecodeError> {
        let frame = GenericFrame::parse(data)?;
        let decoder = self.decoders.get(&frame.device_type).ok_or_else(|| {
            DecodeError::UnsupportedProtocol(format!("device type 0x{:04x}", frame.device_type))
        })?;
        decoder(frame.body)
    }
}

impl Default for FrameRegistry {
    fn default() -> Self {
        Self::empty().with(DEVICE_TYPE_SMOKE, |body| {
            SmokeEvent::decode(body).map(DecodedRecord::Smoke)
        })
    }
}
