// Fieldlink Gateway - Uplink ingestion pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for Fieldlink Gateway

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rumqttc::{MqttOptions, QoS, TlsConfiguration, Transport};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Placeholder replaced by the device identifier in topic templates
pub const DEVICE_PLACEHOLDER: &str = "{device}";

/// Which transport feeds the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransportKind {
    #[default]
    Mqtt,
    Http,
}

// Anything other than "http" selects MQTT
impl From<String> for TransportKind {
    fn from(s: String) -> Self {
        if s.trim().eq_ignore_ascii_case("http") {
            TransportKind::Http
        } else {
            TransportKind::Mqtt
        }
    }
}

impl From<TransportKind> for String {
    fn from(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Mqtt => "mqtt".to_string(),
            TransportKind::Http => "http".to_string(),
        }
    }
}

/// MQTT broker connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 0, 1 or 2
    pub qos: u8,
    pub clean_session: bool,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// PEM CA certificate; enables TLS
    pub ca_cert: Option<PathBuf>,
    /// PEM client certificate, requires `tls_key`
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Uplink topic with a `{device}` placeholder
    pub uplink_topic_template: String,
    /// Delay between connection attempts
    pub reconnect_delay_ms: u64,
    /// Capacity of the uplink frame queue
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            qos: 0,
            clean_session: true,
            client_id: "fieldlink".to_string(),
            keep_alive_secs: 30,
            ca_cert: None,
            tls_cert: None,
            tls_key: None,
            uplink_topic_template: "application/+/device/{device}/rx".to_string(),
            reconnect_delay_ms: 2000,
            channel_capacity: 10,
        }
    }
}

impl MqttConfig {
    /// Create a configuration for a specific broker
    pub fn with_broker(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Configured QoS as the client type
    pub fn qos(&self) -> Result<QoS> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(GatewayError::InvalidConfig(format!(
                "qos must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.qos()?;
        if self.host.trim().is_empty() {
            return Err(GatewayError::InvalidConfig("mqtt host is empty".into()));
        }
        if !self.uplink_topic_template.contains(DEVICE_PLACEHOLDER) {
            return Err(GatewayError::InvalidConfig(format!(
                "uplink_topic_template must contain {}",
                DEVICE_PLACEHOLDER
            )));
        }
        if self.channel_capacity == 0 {
            return Err(GatewayError::InvalidConfig(
                "channel_capacity must be greater than 0".into(),
            ));
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(GatewayError::InvalidConfig(
                "tls_cert and tls_key must be set together".into(),
            ));
        }
        if self.tls_cert.is_some() && self.ca_cert.is_none() {
            return Err(GatewayError::InvalidConfig(
                "client certificates require ca_cert".into(),
            ));
        }
        Ok(())
    }

    /// Client options for this broker, loading certificate files if set
    pub fn mqtt_options(&self, client_id: &str) -> Result<MqttOptions> {
        self.validate()?;

        let mut opts = MqttOptions::new(client_id, self.host.clone(), self.port);
        opts.set_keep_alive(Duration::from_secs(self.keep_alive_secs))
            .set_clean_session(self.clean_session);
        if let Some(user) = &self.username {
            opts.set_credentials(user.clone(), self.password.clone().unwrap_or_default());
        }
        if let Some(transport) = self.tls_transport()? {
            opts.set_transport(transport);
        }
        Ok(opts)
    }

    fn tls_transport(&self) -> Result<Option<Transport>> {
        let Some(ca_path) = &self.ca_cert else {
            return Ok(None);
        };
        let ca = read_pem(ca_path)?;
        let client_auth = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((read_pem(cert)?, read_pem(key)?)),
            _ => None,
        };
        Ok(Some(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        })))
    }
}

fn read_pem(path: &PathBuf) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| GatewayError::Tls(format!("could not read {}: {}", path.display(), e)))
}

/// HTTP ingress endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpIngressConfig {
    pub bind: SocketAddr,
    pub path: String,
    pub queue_capacity: usize,
}

impl Default for HttpIngressConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/lora/app".to_string(),
            queue_capacity: 10,
        }
    }
}

impl HttpIngressConfig {
    pub fn with_bind(bind: SocketAddr) -> Self {
        Self {
            bind,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(GatewayError::InvalidConfig(format!(
                "ingress path must start with '/', got {:?}",
                self.path
            )));
        }
        if self.queue_capacity == 0 {
            return Err(GatewayError::InvalidConfig(
                "queue_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Dispatcher limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Frames processed concurrently
    pub max_in_flight: usize,
    /// How long shutdown waits for in-flight frames
    pub drain_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            drain_timeout_secs: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_in_flight(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            ..Default::default()
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(GatewayError::InvalidConfig(
                "max_in_flight must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Metric republishing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Broker to publish to; republishing is off when unset
    pub mqtt: Option<MqttConfig>,
    /// How long to wait for a broker acknowledgement
    pub ack_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            mqtt: None,
            ack_timeout_ms: 5000,
        }
    }
}

impl PublisherConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.mqtt.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mqtt_config_default() {
        let config = MqttConfig::default();
        assert_eq!(config.port, 1883);
        assert_eq!(config.qos, 0);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.channel_capacity, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mqtt_qos_validation() {
        let config = MqttConfig {
            qos: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GatewayError::InvalidConfig(_))
        ));
        let config = MqttConfig {
            qos: 1,
            ..Default::default()
        };
        assert_eq!(config.qos().unwrap(), QoS::AtLeastOnce);
    }

    #[test]
    fn test_template_requires_placeholder() {
        let config = MqttConfig {
            uplink_topic_template: "application/1/device/+/rx".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_pairing_rules() {
        let config = MqttConfig {
            tls_cert: Some("client.pem".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MqttConfig {
            tls_cert: Some("client.pem".into()),
            tls_key: Some("client.key".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_ca_file() {
        let config = MqttConfig {
            ca_cert: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.mqtt_options("test"),
            Err(GatewayError::Tls(_))
        ));
    }

    #[test]
    fn test_transport_kind_fallback() {
        assert_eq!(TransportKind::from("http".to_string()), TransportKind::Http);
        assert_eq!(TransportKind::from("HTTP".to_string()), TransportKind::Http);
        assert_eq!(TransportKind::from("mqtt".to_string()), TransportKind::Mqtt);
        assert_eq!(TransportKind::from("amqp".to_string()), TransportKind::Mqtt);
    }

    #[test]
    fn test_dispatcher_config() {
        let config = DispatcherConfig::with_max_in_flight(8);
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.drain_timeout(), Duration::from_secs(30));
        assert!(DispatcherConfig::with_max_in_flight(0).validate().is_err());
    }

    #[test]
    fn test_http_config() {
        let config = HttpIngressConfig::default();
        assert_eq!(config.path, "/lora/app");
        assert!(config.validate().is_ok());
        let config = HttpIngressConfig {
            path: "lora".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_publisher_disabled_by_default() {
        let config = PublisherConfig::default();
        assert!(!config.is_enabled());
        assert_eq!(config.ack_timeout(), Duration::from_secs(5));
    }
}
