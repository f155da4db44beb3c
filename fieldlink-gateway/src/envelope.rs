//! Application-server uplink envelope
//!
//! Both transports receive the same JSON document: a device identifier, the
//! frame as hex, and optional radio metadata used only for logging.

use fieldlink::{DeviceEui, ProtocolError, RawUplinkFrame};
use serde::Deserialize;
use thiserror::Error;

/// Envelope rejection reasons
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid device identifier: {0}")]
    Device(#[from] ProtocolError),

    #[error("data is not valid hex: {0}")]
    Data(#[from] hex::FromHexError),
}

/// Uplink JSON document
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UplinkEnvelope {
    #[serde(rename = "deveui", alias = "devEUI", alias = "deviceEUI")]
    pub dev_eui: String,
    /// Frame bytes, hex encoded
    pub data: String,
    #[serde(default, rename = "devname")]
    pub device_name: Option<String>,
    #[serde(default)]
    pub port: Option<u8>,
    #[serde(default)]
    pub uplink_count: Option<u32>,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub lsnr: Option<f64>,
}

impl UplinkEnvelope {
    /// Parse an envelope from raw JSON bytes
    pub fn from_slice(body: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Validate and convert into a raw frame
    pub fn into_frame(self) -> Result<RawUplinkFrame, EnvelopeError> {
        let device: DeviceEui = self.dev_eui.parse()?;
        let payload = hex::decode(self.data.trim())?;
        Ok(RawUplinkFrame::new(device, payload))
    }
}

/// Parse JSON bytes straight into a frame
pub fn parse_uplink(body: &[u8]) -> Result<RawUplinkFrame, EnvelopeError> {
    UplinkEnvelope::from_slice(body)?.into_frame()
}
