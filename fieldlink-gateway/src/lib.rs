// Fieldlink Gateway - Uplink ingestion pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Fieldlink Gateway - Uplink ingestion pipeline
//!
//! Moves raw device frames from a transport through the `fieldlink`
//! decoders into storage and, optionally, back out to a broker as
//! per-device metrics.
//!
//! ## Features
//!
//! - **Two transports**: per-device MQTT topics or an HTTP POST endpoint
//! - **Bounded fan-out**: one task per frame, capped by `max_in_flight`
//! - **Drained shutdown**: queued and started frames finish before stop,
//!   up to a deadline
//! - **Metric republishing** to `device/<eui>/<metric>`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fieldlink_gateway::{
//!     DispatcherConfig, HttpIngressConfig, HttpSource, MemoryStore, UplinkDispatcher,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> fieldlink_gateway::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let mut transport = HttpSource::bind(&HttpIngressConfig::default()).await?;
//! let dispatcher = UplinkDispatcher::new(store, DispatcherConfig::default())?;
//!
//! let shutdown = CancellationToken::new();
//! let stats = dispatcher.run(&mut transport, &shutdown).await?;
//! println!("processed {} frames", stats.frames_received);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  broker / HTTP ──► TransportSource ──► UplinkDispatcher
//!                                          │  (task per frame)
//!                                          ├─► Decoder
//!                                          ├─► DeviceStore   (beacons)
//!                                          └─► Republish     (metrics)
//! ```

pub mod config;
pub mod dispatcher;
pub mod envelope;
mod error;
pub mod republisher;
pub mod stats;
pub mod store;
pub mod subscription;
pub mod transport;

// Public API
pub use config::{
    DispatcherConfig, HttpIngressConfig, MqttConfig, PublisherConfig, TransportKind,
};
pub use dispatcher::{DispatcherState, UplinkDispatcher};
pub use envelope::{parse_uplink, EnvelopeError, UplinkEnvelope};
pub use error::{GatewayError, Result};
pub use republisher::{metric_topic, Metric, MqttPublisher, Republish};
pub use stats::{DispatchStats, StatsSnapshot};
pub use store::{DeviceStore, MemoryStore, StoreError};
pub use subscription::{SubscriptionChange, SubscriptionSet};
pub use transport::{HttpSource, MqttSource, SubscriptionNotifier, TransportSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
