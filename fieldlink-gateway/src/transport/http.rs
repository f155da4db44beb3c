// Fieldlink Gateway - Uplink ingestion pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP ingress transport
//!
//! The application server POSTs one envelope per uplink. Accepted frames go
//! into a bounded queue; a full queue holds the request until there is room.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use fieldlink::RawUplinkFrame;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{SubscriptionNotifier, TransportSource};
use crate::config::HttpIngressConfig;
use crate::envelope;
use crate::error::Result;

/// How long close waits for open requests to finish
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct IngressState {
    frames: mpsc::Sender<RawUplinkFrame>,
    closing: CancellationToken,
}

/// Router serving the ingress endpoint at `path`
///
/// Requests still waiting for queue space when `closing` fires get 503.
pub fn ingress_router(
    path: &str,
    frames: mpsc::Sender<RawUplinkFrame>,
    closing: CancellationToken,
) -> Router {
    Router::new()
        .route(path, post(ingest))
        .with_state(IngressState { frames, closing })
}

async fn ingest(State(state): State<IngressState>, body: Bytes) -> StatusCode {
    let frame = match envelope::parse_uplink(&body) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "rejecting uplink envelope");
            return StatusCode::BAD_REQUEST;
        }
    };
    info!(device = %frame.device, data = %frame.payload_hex(), "uplink frame received");

    tokio::select! {
        _ = state.closing.cancelled() => StatusCode::SERVICE_UNAVAILABLE,
        sent = state.frames.send(frame) => match sent {
            Ok(()) => StatusCode::OK,
            Err(_) => StatusCode::SERVICE_UNAVAILABLE,
        },
    }
}

/// Uplink frames POSTed by an application server
pub struct HttpSource {
    frames: mpsc::Receiver<RawUplinkFrame>,
    closing: CancellationToken,
    server: Option<JoinHandle<std::io::Result<()>>>,
    local_addr: SocketAddr,
}

impl HttpSource {
    /// Bind the listener and start serving
    pub async fn bind(config: &HttpIngressConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind).await?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let closing = CancellationToken::new();
        let app = ingress_router(&config.path, tx, closing.clone());

        let token = closing.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });
        info!(addr = %local_addr, path = %config.path, "http ingress listening");

        Ok(Self {
            frames: rx,
            closing,
            server: Some(server),
            local_addr,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl TransportSource for HttpSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn next_frame(&mut self) -> Option<RawUplinkFrame> {
        self.frames.recv().await
    }

    fn notifier(&self) -> SubscriptionNotifier {
        SubscriptionNotifier::noop()
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut server) = self.server.take() else {
            return Ok(());
        };
        info!(addr = %self.local_addr, "closing http ingress");
        self.closing.cancel();

        match tokio::time::timeout(SERVER_STOP_TIMEOUT, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(error = %e, "http ingress stopped with error"),
            Ok(Err(e)) => warn!(error = %e, "http ingress task ended abnormally"),
            Err(_) => {
                warn!("http ingress did not stop in time, aborting");
                server.abort();
            }
        }
        // Connection tasks can outlive an aborted server and keep a sender
        // alive; closing the receiver lets `next_frame` end once drained.
        self.frames.close();
        Ok(())
    }
}
