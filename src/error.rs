// Fieldlink - Uplink frame decoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for Fieldlink
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for Fieldlink operations
pub type Result<T> = std::result::Result<T, FieldlinkError>;

/// Main error type for Fieldlink operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldlinkError {
    /// Decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors during frame decoding
///
/// Every decoder fails closed: a frame that cannot be fully read
/// yields one of these instead of a partial record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Frame has no bytes at all
    #[error("Empty frame")]
    Empty,

    /// Frame shorter than the protocol minimum
    #[error("Buffer too short: need at least {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// A field extends past the end of the frame
    #[error("Truncated frame at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Wrong leading marker byte
    #[error("Invalid leading marker: expected 0x{expected:02x}, got 0x{actual:02x}")]
    InvalidMarker { expected: u8, actual: u8 },

    /// Unknown two-byte frame tag
    #[error("Unknown frame tag: 0x{0:04x}")]
    UnknownTag(u16),

    /// Function code requires an exact total frame length
    #[error("Function code 0x{code:02x} requires a frame of exactly {expected} bytes, got {actual}")]
    LengthMismatch {
        code: u8,
        expected: usize,
        actual: usize,
    },

    /// A run-length stream did not expand to the declared sample count
    #[error("Stream '{stream}' expanded to {actual} values, expected {expected}")]
    SampleCountMismatch {
        stream: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Malformed frame
    #[error("Malformed frame at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    /// No decoder registered for this device type
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}

/// Errors related to identifiers and protocol names
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Device identifier is not valid hex
    #[error("Invalid device identifier '{0}': not a hex string")]
    InvalidEuiHex(String),

    /// Device identifier has the wrong length
    #[error("Invalid device identifier length: expected {expected} hex digits, got {actual}")]
    InvalidEuiLength { expected: usize, actual: usize },

    /// Unknown protocol kind name
    #[error("Unknown protocol kind: {0}")]
    UnknownProtocolKind(String),
}
