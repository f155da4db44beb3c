// Fieldlink Bridge - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for the bridge.
//!
//! The dispatcher keeps its own atomic counters; these gauges mirror a
//! snapshot of them, refreshed on every scrape.

use fieldlink_gateway::{DispatcherState, StatsSnapshot};
use lazy_static::lazy_static;
use prometheus::{register_gauge, register_gauge_vec, Encoder, Gauge, GaugeVec, TextEncoder};
use tracing::error;

lazy_static! {
    /// Frames pulled from the transport.
    pub static ref FRAMES_RECEIVED: Gauge = register_gauge!(
        "fieldlink_frames_received_total",
        "Uplink frames received from the transport"
    ).unwrap();

    /// Frames decoded, by protocol family.
    pub static ref FRAMES_DECODED: GaugeVec = register_gauge_vec!(
        "fieldlink_frames_decoded_total",
        "Uplink frames decoded per protocol",
        &["protocol"]
    ).unwrap();

    /// Per-frame failures, by pipeline stage.
    pub static ref FRAME_FAILURES: GaugeVec = register_gauge_vec!(
        "fieldlink_frame_failures_total",
        "Frames dropped per failing stage (decode, lookup, store)",
        &["stage"]
    ).unwrap();

    /// Republished metric messages, by outcome.
    pub static ref PUBLISHES: GaugeVec = register_gauge_vec!(
        "fieldlink_publishes_total",
        "Republished metric messages per outcome",
        &["result"]
    ).unwrap();

    /// Frame tasks currently running.
    pub static ref FRAMES_IN_FLIGHT: Gauge = register_gauge!(
        "fieldlink_frames_in_flight",
        "Frame tasks currently running"
    ).unwrap();

    /// Frame tasks aborted at the drain deadline.
    pub static ref FRAMES_ABANDONED: Gauge = register_gauge!(
        "fieldlink_frames_abandoned_total",
        "Frame tasks aborted at the shutdown drain deadline"
    ).unwrap();

    /// Dispatcher lifecycle.
    /// Values: 0 = Idle, 1 = Running, 2 = Draining, 3 = Stopped
    pub static ref DISPATCHER_STATE: Gauge = register_gauge!(
        "fieldlink_dispatcher_state",
        "Dispatcher state (0=Idle, 1=Running, 2=Draining, 3=Stopped)"
    ).unwrap();
}

/// Numeric value of a dispatcher state for the state gauge
pub fn state_value(state: DispatcherState) -> f64 {
    match state {
        DispatcherState::Idle => 0.0,
        DispatcherState::Running => 1.0,
        DispatcherState::Draining => 2.0,
        DispatcherState::Stopped => 3.0,
    }
}

/// Copy a stats snapshot into the gauges
pub fn update_from_snapshot(snapshot: &StatsSnapshot, state: DispatcherState) {
    FRAMES_RECEIVED.set(snapshot.frames_received as f64);

    for (protocol, count) in [
        ("location_beacon", snapshot.beacons_decoded),
        ("humidity", snapshot.humidity_decoded),
        ("smoke", snapshot.smoke_decoded),
        ("generic", snapshot.generic_decoded),
    ] {
        FRAMES_DECODED.with_label_values(&[protocol]).set(count as f64);
    }

    for (stage, count) in [
        ("decode", snapshot.decode_failures),
        ("lookup", snapshot.lookup_failures),
        ("store", snapshot.store_failures),
    ] {
        FRAME_FAILURES.with_label_values(&[stage]).set(count as f64);
    }

    PUBLISHES.with_label_values(&["ok"]).set(snapshot.publish_ok as f64);
    PUBLISHES
        .with_label_values(&["failed"])
        .set(snapshot.publish_failed as f64);

    FRAMES_IN_FLIGHT.set(snapshot.in_flight as f64);
    FRAMES_ABANDONED.set(snapshot.abandoned as f64);
    DISPATCHER_STATE.set(state_value(state));
}

/// Encode all registered metrics in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "encoding metrics failed");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
