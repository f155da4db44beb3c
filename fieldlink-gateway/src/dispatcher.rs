// Fieldlink Gateway - Uplink ingestion pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Uplink dispatcher
//!
//! Pulls frames from a [`TransportSource`] and runs one task per frame:
//! decode, then persist (location beacons) or republish (everything else).
//! Frames are independent; nothing orders two frames of the same device.
//!
//! At most `max_in_flight` frame tasks run at once. Intake waits for a free
//! slot, which pushes back onto the transport's bounded queue.
//!
//! Shutdown closes the transport, processes frames it had already queued and
//! waits for every task, up to the drain deadline. Tasks still running at the
//! deadline are aborted and counted as abandoned.

use std::sync::Arc;

use chrono::Utc;
use fieldlink::{
    DecodedRecord, Decoder, DeviceEui, DeviceState, DeviceTrackPoint, LocationBeacon, ProtocolKind,
    RawUplinkFrame,
};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{GatewayError, Result};
use crate::republisher::{republish_record, Republish};
use crate::stats::{DispatchStats, StatsSnapshot};
use crate::store::{DeviceStore, StoreError};
use crate::transport::TransportSource;

/// Lifecycle of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Not started
    Idle,
    Running,
    /// Intake closed, finishing started work
    Draining,
    Stopped,
}

/// Consumes uplink frames and fans them out to frame tasks
pub struct UplinkDispatcher {
    worker: FrameWorker,
    config: DispatcherConfig,
    state: watch::Sender<DispatcherState>,
}

impl UplinkDispatcher {
    pub fn new(store: Arc<dyn DeviceStore>, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(DispatcherState::Idle);
        Ok(Self {
            worker: FrameWorker {
                decoder: Arc::new(Decoder::new()),
                store,
                publisher: None,
                stats: Arc::new(DispatchStats::new()),
            },
            config,
            state,
        })
    }

    /// Republish decoded metrics through `publisher`
    pub fn with_publisher(mut self, publisher: Arc<dyn Republish>) -> Self {
        self.worker.publisher = Some(publisher);
        self
    }

    /// Replace the default decoder
    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.worker.decoder = Arc::new(decoder);
        self
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.worker.stats)
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Receiver following state transitions
    pub fn watch_state(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    /// Process frames until `shutdown` fires or the transport ends, then drain
    ///
    /// Runs once; a second call returns [`GatewayError::Closed`].
    pub async fn run<T>(&self, transport: &mut T, shutdown: &CancellationToken) -> Result<StatsSnapshot>
    where
        T: TransportSource + ?Sized,
    {
        let started = self.state.send_if_modified(|state| {
            if *state == DispatcherState::Idle {
                *state = DispatcherState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(GatewayError::Closed);
        }

        let permits = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut tasks = JoinSet::new();
        info!(
            transport = transport.name(),
            max_in_flight = self.config.max_in_flight,
            "dispatcher running"
        );

        // A frame already pulled when shutdown fired is processed while draining
        let mut carried = None;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => self.reap(joined),
                frame = transport.next_frame() => {
                    let Some(frame) = frame else {
                        info!(transport = transport.name(), "transport ended");
                        break;
                    };
                    DispatchStats::bump(&self.worker.stats.frames_received);
                    let permit = tokio::select! {
                        _ = shutdown.cancelled() => {
                            carried = Some(frame);
                            break;
                        }
                        permit = Arc::clone(&permits).acquire_owned() => permit,
                    };
                    match permit {
                        Ok(permit) => self.spawn(frame, permit, &mut tasks),
                        Err(_) => break,
                    }
                }
            }
        }

        self.state.send_replace(DispatcherState::Draining);
        info!(transport = transport.name(), in_flight = tasks.len(), "dispatcher draining");
        if let Err(e) = transport.close().await {
            warn!(transport = transport.name(), error = %e, "closing transport failed");
        }

        let deadline = Instant::now() + self.config.drain_timeout();
        let drained = tokio::time::timeout_at(deadline, async {
            if let Some(frame) = carried.take() {
                if let Ok(permit) = Arc::clone(&permits).acquire_owned().await {
                    self.spawn(frame, permit, &mut tasks);
                }
            }
            // Finished tasks are reaped while the transport still has frames
            loop {
                tokio::select! {
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => self.reap(joined),
                    frame = transport.next_frame() => {
                        let Some(frame) = frame else { break };
                        DispatchStats::bump(&self.worker.stats.frames_received);
                        match Arc::clone(&permits).acquire_owned().await {
                            Ok(permit) => self.spawn(frame, permit, &mut tasks),
                            Err(_) => break,
                        }
                    }
                }
            }
            while let Some(joined) = tasks.join_next().await {
                self.reap(joined);
            }
        })
        .await;

        if drained.is_err() {
            tasks.abort_all();
            let mut abandoned = 0u64;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Err(e) if e.is_cancelled() => abandoned += 1,
                    other => self.reap(other),
                }
            }
            warn!(
                abandoned,
                timeout_secs = self.config.drain_timeout_secs,
                "drain deadline reached, aborted outstanding frames"
            );
            self.worker
                .stats
                .abandoned
                .fetch_add(abandoned, std::sync::atomic::Ordering::Relaxed);
        }

        self.state.send_replace(DispatcherState::Stopped);
        let snapshot = self.worker.stats.snapshot();
        info!(
            received = snapshot.frames_received,
            decoded = snapshot.decoded_total(),
            abandoned = snapshot.abandoned,
            "dispatcher stopped"
        );
        Ok(snapshot)
    }

    fn spawn(&self, frame: RawUplinkFrame, permit: OwnedSemaphorePermit, tasks: &mut JoinSet<()>) {
        let worker = self.worker.clone();
        let guard = InFlight::enter(Arc::clone(&self.worker.stats));
        tasks.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            worker.process(frame).await;
        });
    }

    fn reap(&self, joined: std::result::Result<(), JoinError>) {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(error = %e, "frame task panicked");
            }
        }
    }
}

/// Decrements the in-flight gauge when a frame task ends or is aborted
struct InFlight(Arc<DispatchStats>);

impl InFlight {
    fn enter(stats: Arc<DispatchStats>) -> Self {
        stats.in_flight.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Self(stats)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }
}

#[derive(Clone)]
struct FrameWorker {
    decoder: Arc<Decoder>,
    store: Arc<dyn DeviceStore>,
    publisher: Option<Arc<dyn Republish>>,
    stats: Arc<DispatchStats>,
}

impl FrameWorker {
    async fn process(&self, frame: RawUplinkFrame) {
        let received_at = Utc::now();
        let device = frame.device;
        let data = frame.payload_hex();

        let kind = if frame.is_location_beacon() {
            ProtocolKind::LocationBeacon
        } else {
            match self.store.lookup_device_protocol(&device).await {
                Ok(kind) => kind,
                Err(e) => {
                    DispatchStats::bump(&self.stats.lookup_failures);
                    error!(device = %device, data = %data, error = %e, "device protocol lookup failed");
                    return;
                }
            }
        };

        let record = match self.decoder.decode(kind, &frame.payload) {
            Ok(record) => record,
            Err(e) => {
                DispatchStats::bump(&self.stats.decode_failures);
                error!(device = %device, data = %data, protocol = %kind, error = %e, "decoding frame failed");
                return;
            }
        };
        self.stats.record_decoded(kind);
        debug!(device = %device, protocol = %kind, "frame decoded");

        match record {
            DecodedRecord::LocationBeacon(beacon) => {
                self.persist(device, &beacon, &data, received_at).await;
            }
            record @ (DecodedRecord::Humidity(_) | DecodedRecord::Smoke(_)) => {
                self.republish(device, &record).await;
            }
        }
    }

    async fn persist(
        &self,
        device: DeviceEui,
        beacon: &LocationBeacon,
        data: &str,
        received_at: chrono::DateTime<Utc>,
    ) {
        let track = DeviceTrackPoint::from_beacon(device, beacon, received_at);
        let state = DeviceState::from_beacon(device, beacon, received_at);
        match self.store.record_observation(&track, &state).await {
            Ok(()) => info!(
                device = %device,
                latitude = state.latitude,
                longitude = state.longitude,
                "device position stored"
            ),
            Err(StoreError::StateAfterTrack(e)) => {
                DispatchStats::bump(&self.stats.store_failures);
                error!(device = %device, data = %data, error = %e, "track point stored but state upsert failed");
            }
            Err(e) => {
                DispatchStats::bump(&self.stats.store_failures);
                error!(device = %device, data = %data, error = %e, "storing device position failed");
            }
        }
    }

    async fn republish(&self, device: DeviceEui, record: &DecodedRecord) {
        let Some(publisher) = &self.publisher else {
            debug!(device = %device, "no publisher configured, record not republished");
            return;
        };
        let (ok, failed) = republish_record(publisher.as_ref(), &device, record).await;
        self.stats
            .publish_ok
            .fetch_add(ok, std::sync::atomic::Ordering::Relaxed);
        self.stats
            .publish_failed
            .fetch_add(failed, std::sync::atomic::Ordering::Relaxed);
    }
}
