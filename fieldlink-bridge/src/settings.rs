// Fieldlink Bridge - Settings file
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! TOML settings
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [lora_backend]
//! type = "mqtt"            # or "http"
//!
//! [lora_backend.mqtt]
//! host = "broker.local"
//! uplink_topic_template = "application/+/device/{device}/rx"
//!
//! [dispatcher]
//! max_in_flight = 64
//!
//! [publisher.mqtt]
//! host = "broker.local"
//!
//! [metrics]
//! bind = "0.0.0.0:9100"
//!
//! [[devices]]
//! eui = "0004a30b001c0530"
//! protocol = "location_beacon"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use fieldlink::{DeviceEui, ProtocolError, ProtocolKind};
use fieldlink_gateway::{
    DispatcherConfig, GatewayError, HttpIngressConfig, MqttConfig, PublisherConfig, TransportKind,
};
use serde::Deserialize;
use thiserror::Error;

/// Settings file read when `--config` is not given
pub const DEFAULT_SETTINGS_FILE: &str = "fieldlink.toml";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid device entry: {0}")]
    Device(#[from] ProtocolError),

    #[error(transparent)]
    Invalid(#[from] GatewayError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct General {
    pub log_level: String,
}

impl Default for General {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Uplink transport selection
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoraBackend {
    #[serde(rename = "type")]
    pub kind: TransportKind,
    pub mqtt: MqttConfig,
    pub http: HttpIngressConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub bind: SocketAddr,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 9100)),
        }
    }
}

/// One registered device
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceEntry {
    pub eui: DeviceEui,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: General,
    pub lora_backend: LoraBackend,
    pub dispatcher: DispatcherConfig,
    pub publisher: PublisherConfig,
    pub metrics: MetricsSettings,
    pub devices: Vec<DeviceEntry>,
}

impl Settings {
    /// Load from `path`, else `./fieldlink.toml` if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_SETTINGS_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_SETTINGS_FILE))?
            }
            None => Self::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Check the sections that will actually be used
    pub fn validate(&self) -> Result<(), SettingsError> {
        match self.lora_backend.kind {
            TransportKind::Mqtt => self.lora_backend.mqtt.validate()?,
            TransportKind::Http => self.lora_backend.http.validate()?,
        }
        self.dispatcher.validate()?;
        if let Some(mqtt) = &self.publisher.mqtt {
            mqtt.validate()?;
        }
        self.device_registry()?;
        Ok(())
    }

    /// Devices with their parsed protocol
    pub fn device_registry(&self) -> Result<Vec<(DeviceEui, ProtocolKind)>, SettingsError> {
        self.devices
            .iter()
            .map(|d| Ok((d.eui, d.protocol.parse()?)))
            .collect()
    }
}
