//! Dispatcher counters
//!
//! Updated lock-free from every frame task and read by whoever exports them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use fieldlink::ProtocolKind;
use serde::Serialize;

/// Live counters of one dispatcher
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub frames_received: AtomicU64,
    pub beacons_decoded: AtomicU64,
    pub humidity_decoded: AtomicU64,
    pub smoke_decoded: AtomicU64,
    pub generic_decoded: AtomicU64,
    pub decode_failures: AtomicU64,
    pub lookup_failures: AtomicU64,
    pub store_failures: AtomicU64,
    pub publish_ok: AtomicU64,
    pub publish_failed: AtomicU64,
    /// Frame tasks abandoned at the drain deadline
    pub abandoned: AtomicU64,
    pub in_flight: AtomicUsize,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_decoded(&self, kind: ProtocolKind) {
        let counter = match kind {
            ProtocolKind::LocationBeacon => &self.beacons_decoded,
            ProtocolKind::Humidity => &self.humidity_decoded,
            ProtocolKind::Smoke => &self.smoke_decoded,
            ProtocolKind::Generic => &self.generic_decoded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy of the counters at this instant
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_received: load(&self.frames_received),
            beacons_decoded: load(&self.beacons_decoded),
            humidity_decoded: load(&self.humidity_decoded),
            smoke_decoded: load(&self.smoke_decoded),
            generic_decoded: load(&self.generic_decoded),
            decode_failures: load(&self.decode_failures),
            lookup_failures: load(&self.lookup_failures),
            store_failures: load(&self.store_failures),
            publish_ok: load(&self.publish_ok),
            publish_failed: load(&self.publish_failed),
            abandoned: load(&self.abandoned),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub beacons_decoded: u64,
    pub humidity_decoded: u64,
    pub smoke_decoded: u64,
    pub generic_decoded: u64,
    pub decode_failures: u64,
    pub lookup_failures: u64,
    pub store_failures: u64,
    pub publish_ok: u64,
    pub publish_failed: u64,
    pub abandoned: u64,
    pub in_flight: usize,
}

impl StatsSnapshot {
    pub fn decoded_total(&self) -> u64 {
        self.beacons_decoded + self.humidity_decoded + self.smoke_decoded + self.generic_decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = DispatchStats::new();
        DispatchStats::bump(&stats.frames_received);
        DispatchStats::bump(&stats.frames_received);
        stats.record_decoded(ProtocolKind::Humidity);
        stats.record_decoded(ProtocolKind::Smoke);
        DispatchStats::bump(&stats.decode_failures);

        let snap = stats.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.humidity_decoded, 1);
        assert_eq!(snap.smoke_decoded, 1);
        assert_eq!(snap.decoded_total(), 2);
        assert_eq!(snap.decode_failures, 1);
        assert_eq!(snap.in_flight, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(StatsSnapshot::default()).unwrap();
        assert_eq!(json["frames_received"], 0);
        assert_eq!(json["abandoned"], 0);
    }
}
