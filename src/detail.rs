// Fieldlink - Uplink frame decoding
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Persistence records derived from location beacons
//!
//! A decoded beacon yields one [`DeviceTrackPoint`] (append-only history) and
//! one [`DeviceState`] (latest snapshot, keyed by device). The state carries
//! a [`DeviceDetail`] blob in the point/prop/sensor shape map consumers read.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::beacon::{BeaconPayload, LocationBeacon};
use crate::protocol::DeviceEui;

/// One row of a device's position history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTrackPoint {
    pub device: DeviceEui,
    pub observed_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: u16,
}

impl DeviceTrackPoint {
    /// Track point at the beacon's corrected position
    pub fn from_beacon(device: DeviceEui, beacon: &LocationBeacon, observed_at: DateTime<Utc>) -> Self {
        Self {
            device,
            observed_at,
            latitude: beacon.corrected.latitude,
            longitude: beacon.corrected.longitude,
            altitude: beacon.altitude,
        }
    }
}

/// Latest known state of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device: DeviceEui,
    pub last_seen_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub detail: DeviceDetail,
}

impl DeviceState {
    pub fn from_beacon(device: DeviceEui, beacon: &LocationBeacon, last_seen_at: DateTime<Utc>) -> Self {
        Self {
            device,
            last_seen_at,
            latitude: beacon.corrected.latitude,
            longitude: beacon.corrected.longitude,
            detail: DeviceDetail::from_beacon(device, beacon, last_seen_at),
        }
    }

    /// Serialized detail blob, as stored
    pub fn detail_json(&self) -> serde_json::Result<String> {
        self.detail.to_json()
    }
}

/// Detail blob stored with a device state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDetail {
    pub id: String,
    pub point: DetailPoint,
    pub prop: DetailProp,
    pub sensor: DetailSensor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailPoint {
    pub id: String,
    pub geometry: Geometry,
}

/// GeoJSON-style point geometry; coordinates are `[longitude, latitude]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailProp {
    pub device_id: String,
    /// RFC 3339, second precision
    pub last_seen_at: String,
}

/// Scalar readings; optional fields depend on the beacon sub-payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetailSensor {
    pub speed: u8,
    pub azimuth: u16,
    pub altitude: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alarms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_count: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_percent: Option<u8>,
}

impl DeviceDetail {
    /// Assemble the blob from a decoded beacon
    pub fn from_beacon(device: DeviceEui, beacon: &LocationBeacon, last_seen_at: DateTime<Utc>) -> Self {
        let id = device.to_string();
        let mut sensor = DetailSensor {
            speed: beacon.speed,
            azimuth: beacon.azimuth,
            altitude: beacon.altitude,
            ..DetailSensor::default()
        };

        match beacon.payload {
            Some(BeaconPayload::Alert(alert)) => {
                sensor.alarms = alert.labels().into_iter().map(String::from).collect();
            }
            Some(BeaconPayload::SensorReport(report)) => {
                sensor.step_count = Some(report.step_count);
                sensor.business_id = Some(report.business_id);
                sensor.power_percent = Some(report.power_percent);
            }
            Some(BeaconPayload::Heartbeat(hb)) => {
                sensor.step_count = Some(hb.step_count);
                sensor.business_id = Some(hb.business_id);
            }
            None => {}
        }

        Self {
            id: id.clone(),
            point: DetailPoint {
                id: id.clone(),
                geometry: Geometry {
                    kind: "Point".to_string(),
                    coordinates: [beacon.corrected.longitude, beacon.corrected.latitude],
                },
            },
            prop: DetailProp {
                device_id: id,
                last_seen_at: last_seen_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            },
            sensor,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
