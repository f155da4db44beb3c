// Fieldlink - Uplink frame decoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Humidity/temperature logger decoder
//!
//! Two frame forms share a two-byte tag:
//!
//! ```text
//! 0xFF01 single sample:
//! [0xFF 0x01] [utc: 4] [temp_int: i8] [temp_dec: i8] [hum: i8] [ele: i8] [alarm: 1]
//!
//! 0xFF02 multi sample:
//! [0xFF 0x02] [count: 2] [utc: 4] [len_ti: 1] [len_td: 1] [temp_int..] [temp_dec..]
//! [len_hum: 1] [hum..] [len_ele: 1] [ele..]
//! ```
//!
//! Multi-sample streams are run-length encoded: a byte `0xAn` repeats the
//! previous literal `n` times, any other byte is a literal `i8`. Samples are
//! spaced one minute apart starting at `utc`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::protocol::{HUMIDITY_MULTI_TAG, HUMIDITY_SINGLE_TAG};
use crate::reader::ByteReader;

/// Length of a single-sample frame (trailing bytes are ignored)
pub const SINGLE_FRAME_LEN: usize = 11;

/// Fixed header of a multi-sample frame, up to and including both temperature lengths
pub const MULTI_HEADER_LEN: usize = 10;

/// Seconds between consecutive samples of a multi-sample frame
pub const SAMPLE_INTERVAL_SECS: i64 = 60;

const RUN_MARKER: u8 = 0xA0;
const RUN_MASK: u8 = 0xF0;

/// One humidity/temperature observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumiditySample {
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    /// Battery level, percent
    pub electricity: f64,
    /// Observation time
    pub timestamp: DateTime<Utc>,
    /// Threshold alarms, only carried by single-sample frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<HumidityAlarm>,
}

/// Threshold alarm bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HumidityAlarm {
    pub humidity_high: bool,
    pub temperature_high: bool,
    pub humidity_low: bool,
    pub temperature_low: bool,
    pub electricity_low: bool,
}

impl HumidityAlarm {
    /// Decode the alarm byte
    pub fn from_bits(bits: u8) -> Self {
        Self {
            humidity_high: bits & 0x01 != 0,
            temperature_high: bits & 0x02 != 0,
            humidity_low: bits & 0x04 != 0,
            temperature_low: bits & 0x08 != 0,
            electricity_low: bits & 0x10 != 0,
        }
    }

    /// Whether any alarm is raised
    pub fn any(&self) -> bool {
        self.humidity_high
            || self.temperature_high
            || self.humidity_low
            || self.temperature_low
            || self.electricity_low
    }

    /// Human-readable names of the raised alarms
    pub fn labels(&self) -> Vec<&'static str> {
        [
            (self.humidity_high, "Humidity too high"),
            (self.humidity_low, "Humidity too low"),
            (self.temperature_high, "Temperature too high"),
            (self.temperature_low, "Temperature too low"),
            (self.electricity_low, "Battery low"),
        ]
        .into_iter()
        .filter_map(|(set, label)| set.then_some(label))
        .collect()
    }
}

/// Decode a humidity frame of either form
pub fn decode(data: &[u8]) -> Result<Vec<HumiditySample>, DecodeError> {
    if data.len() < 2 {
        return Err(DecodeError::BufferTooShort {
            needed: 2,
            available: data.len(),
        });
    }
    let tag = [data[0], data[1]];
    if tag == HUMIDITY_SINGLE_TAG {
        decode_single(data).map(|s| vec![s])
    } else if tag == HUMIDITY_MULTI_TAG {
        decode_multi(data)
    } else {
        Err(DecodeError::UnknownTag(u16::from_be_bytes(tag)))
    }
}

fn decode_single(data: &[u8]) -> Result<HumiditySample, DecodeError> {
    if data.len() < SINGLE_FRAME_LEN {
        return Err(DecodeError::BufferTooShort {
            needed: SINGLE_FRAME_LEN,
            available: data.len(),
        });
    }
    let mut r = ByteReader::new(data);
    r.skip(2)?;
    let timestamp = epoch(r.read_u32_be()?, 2)?;
    let temp_int = r.read_i8()?;
    let temp_dec = r.read_i8()?;
    let humidity = r.read_i8()?;
    let electricity = r.read_i8()?;
    let alarm = HumidityAlarm::from_bits(r.read_u8()?);

    Ok(HumiditySample {
        temperature: temperature(temp_int, temp_dec),
        humidity: f64::from(humidity),
        electricity: f64::from(electricity),
        timestamp,
        alarm: Some(alarm),
    })
}

fn decode_multi(data: &[u8]) -> Result<Vec<HumiditySample>, DecodeError> {
    if data.len() < MULTI_HEADER_LEN {
        return Err(DecodeError::BufferTooShort {
            needed: MULTI_HEADER_LEN,
            available: data.len(),
        });
    }
    let mut r = ByteReader::new(data);
    r.skip(2)?;
    let count = usize::from(r.read_u16_be()?);
    let base = r.read_u32_be()?;

    let len_ti = usize::from(r.read_u8()?);
    let len_td = usize::from(r.read_u8()?);
    let temp_int = expand_stream(&mut r, len_ti, count, "temperature_integer")?;
    let temp_dec = expand_stream(&mut r, len_td, count, "temperature_decimal")?;

    let len_hum = usize::from(r.read_u8()?);
    let hums = expand_stream(&mut r, len_hum, count, "humidity")?;

    let len_ele = usize::from(r.read_u8()?);
    let eles = expand_stream(&mut r, len_ele, count, "electricity")?;

    let start = epoch(base, 4)?;
    let samples = (0..count)
        .map(|i| HumiditySample {
            temperature: temperature(temp_int[i], temp_dec[i]),
            humidity: f64::from(hums[i]),
            electricity: f64::from(eles[i]),
            timestamp: start + Duration::seconds(SAMPLE_INTERVAL_SECS * i as i64),
            alarm: None,
        })
        .collect();
    Ok(samples)
}

fn expand_stream(
    r: &mut ByteReader<'_>,
    len: usize,
    expected: usize,
    stream: &'static str,
) -> Result<Vec<i8>, DecodeError> {
    let start = r.position();
    let bytes = r.read_bytes(len)?;
    let values = expand_run_length(bytes).map_err(|e| match e {
        DecodeError::Malformed { offset, reason } => DecodeError::Malformed {
            offset: start + offset,
            reason: format!("{}: {}", stream, reason),
        },
        other => other,
    })?;
    if values.len() != expected {
        return Err(DecodeError::SampleCountMismatch {
            stream,
            expected,
            actual: values.len(),
        });
    }
    Ok(values)
}

/// Expand one run-length encoded stream
///
/// A run byte before any literal has nothing to repeat and is rejected.
pub fn expand_run_length(stream: &[u8]) -> Result<Vec<i8>, DecodeError> {
    let mut out = Vec::with_capacity(stream.len());
    let mut last: Option<i8> = None;
    for (offset, &byte) in stream.iter().enumerate() {
        if byte & RUN_MASK == RUN_MARKER {
            let value = last.ok_or_else(|| DecodeError::Malformed {
                offset,
                reason: "run marker before any literal".to_string(),
            })?;
            let repeat = usize::from(byte & 0x0F);
            out.extend(std::iter::repeat(value).take(repeat));
        } else {
            let value = byte as i8;
            out.push(value);
            last = Some(value);
        }
    }
    Ok(out)
}

fn temperature(integer: i8, decimal: i8) -> f64 {
    f64::from(integer) + f64::from(decimal) / 10.0
}

fn epoch(secs: u32, offset: usize) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::from_timestamp(i64::from(secs), 0).ok_or_else(|| DecodeError::Malformed {
        offset,
        reason: format!("timestamp {} out of range", secs),
    })
}
