// Fieldlink Gateway - Uplink ingestion pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for Fieldlink Gateway

use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::store::StoreError;

/// Main error type for Gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] fieldlink::DecodeError),

    /// Storage collaborator failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Malformed uplink envelope
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Request could not be handed to the MQTT event loop
    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    /// Broker connection failure
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// Publish was not acknowledged
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Certificate files could not be loaded
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// IO error (listener bind, certificate files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Component already shut down
    #[error("Component closed")]
    Closed,
}

/// Result type alias for Gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
