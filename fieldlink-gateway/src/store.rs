// Fieldlink Gateway - Uplink ingestion pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Storage collaborator
//!
//! The pipeline only needs four calls from storage. [`DeviceStore`] names
//! them; [`MemoryStore`] is a complete in-process implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use fieldlink::{DeviceEui, DeviceState, DeviceTrackPoint, ProtocolKind};
use thiserror::Error;
use tokio::sync::RwLock;

/// Storage failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("device not registered: {0}")]
    DeviceNotFound(DeviceEui),

    #[error("storage backend error: {0}")]
    Backend(String),

    /// The track point was written, the state was not
    #[error("track point stored but state upsert failed: {0}")]
    StateAfterTrack(Box<StoreError>),
}

/// Persistence calls made by the dispatcher
///
/// Calls may block on a remote store and are not retried by the caller.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Append one row of position history
    async fn append_track_point(&self, point: &DeviceTrackPoint) -> Result<(), StoreError>;

    /// Insert or overwrite the device's latest state
    async fn upsert_state(&self, state: &DeviceState) -> Result<(), StoreError>;

    /// Protocol family a device was registered with
    async fn lookup_device_protocol(&self, device: &DeviceEui) -> Result<ProtocolKind, StoreError>;

    /// Every registered device
    async fn list_all_device_ids(&self) -> Result<Vec<DeviceEui>, StoreError>;

    /// Write the track point and the state of one observation
    ///
    /// The default appends then upserts with no rollback: if the upsert fails
    /// the track point stays and [`StoreError::StateAfterTrack`] is returned.
    /// Stores that can write both atomically should override this.
    async fn record_observation(
        &self,
        point: &DeviceTrackPoint,
        state: &DeviceState,
    ) -> Result<(), StoreError> {
        self.append_track_point(point).await?;
        self.upsert_state(state)
            .await
            .map_err(|e| StoreError::StateAfterTrack(Box::new(e)))
    }
}

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<DeviceEui, ProtocolKind>,
    tracks: Vec<DeviceTrackPoint>,
    states: HashMap<DeviceEui, DeviceState>,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with devices already registered
    pub fn with_devices(devices: impl IntoIterator<Item = (DeviceEui, ProtocolKind)>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                devices: devices.into_iter().collect(),
                ..Inner::default()
            }),
        }
    }

    /// Register a device, returning its previous protocol if any
    pub async fn register_device(&self, device: DeviceEui, kind: ProtocolKind) -> Option<ProtocolKind> {
        self.inner.write().await.devices.insert(device, kind)
    }

    /// Remove a device and its state; history is kept
    pub async fn remove_device(&self, device: &DeviceEui) -> bool {
        let mut inner = self.inner.write().await;
        inner.states.remove(device);
        inner.devices.remove(device).is_some()
    }

    /// History of one device, oldest first
    pub async fn track_points(&self, device: &DeviceEui) -> Vec<DeviceTrackPoint> {
        self.inner
            .read()
            .await
            .tracks
            .iter()
            .filter(|t| &t.device == device)
            .cloned()
            .collect()
    }

    pub async fn track_count(&self) -> usize {
        self.inner.read().await.tracks.len()
    }

    pub async fn state(&self, device: &DeviceEui) -> Option<DeviceState> {
        self.inner.read().await.states.get(device).cloned()
    }

    pub async fn state_count(&self) -> usize {
        self.inner.read().await.states.len()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn append_track_point(&self, point: &DeviceTrackPoint) -> Result<(), StoreError> {
        self.inner.write().await.tracks.push(point.clone());
        Ok(())
    }

    async fn upsert_state(&self, state: &DeviceState) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .states
            .insert(state.device, state.clone());
        Ok(())
    }

    async fn lookup_device_protocol(&self, device: &DeviceEui) -> Result<ProtocolKind, StoreError> {
        self.inner
            .read()
            .await
            .devices
            .get(device)
            .copied()
            .ok_or(StoreError::DeviceNotFound(*device))
    }

    async fn list_all_device_ids(&self) -> Result<Vec<DeviceEui>, StoreError> {
        let mut ids: Vec<_> = self.inner.read().await.devices.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    // Both writes under one lock
    async fn record_observation(
        &self,
        point: &DeviceTrackPoint,
        state: &DeviceState,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.tracks.push(point.clone());
        inner.states.insert(state.device, state.clone());
        Ok(())
    }
}
