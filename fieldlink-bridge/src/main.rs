// Fieldlink Bridge - Uplink bridge daemon
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Fieldlink Bridge
//!
//! Receives device uplinks over MQTT or HTTP, decodes them, stores device
//! positions and republishes sensor metrics.
//!
//! ## Usage
//!
//! ```bash
//! # Use ./fieldlink.toml, or defaults if it does not exist
//! fieldlink-bridge
//!
//! # Explicit settings file and log level
//! fieldlink-bridge --config /etc/fieldlink.toml --log-level debug
//! ```

mod metrics;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use clap::Parser;
use fieldlink_gateway::{
    DispatchStats, DispatcherState, GatewayError, HttpSource, MemoryStore, MqttPublisher,
    MqttSource, Republish, StatsSnapshot, TransportKind, TransportSource, UplinkDispatcher,
};
use fieldlink_gateway::store::DeviceStore;
use serde::Serialize;
use settings::Settings;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Fieldlink uplink bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the settings file
    #[arg(long)]
    log_level: Option<String>,
}

/// Application state shared across handlers.
struct AppState {
    stats: Arc<DispatchStats>,
    state: watch::Receiver<DispatcherState>,
    transport: TransportKind,
    start_time: std::time::Instant,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("fieldlink-bridge: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing
    let level_name = args
        .log_level
        .clone()
        .unwrap_or_else(|| settings.general.log_level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match level_name.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Fieldlink Bridge v{}", env!("CARGO_PKG_VERSION"));

    match run(settings).await {
        Ok(snapshot) => {
            info!(
                received = snapshot.frames_received,
                decoded = snapshot.decoded_total(),
                "bridge stopped"
            );
            ExitCode::SUCCESS
        }
        Err(GatewayError::Closed) => {
            info!("shutdown requested before startup completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "bridge failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> fieldlink_gateway::Result<StatsSnapshot> {
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let registry = settings
        .device_registry()
        .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;
    info!(devices = registry.len(), "device registry loaded");
    let store = Arc::new(MemoryStore::with_devices(registry));

    let publisher = if settings.publisher.is_enabled() {
        Some(Arc::new(
            MqttPublisher::connect(&settings.publisher, &shutdown).await?,
        ))
    } else {
        info!("no publisher broker configured, metrics will not be republished");
        None
    };

    let mut dispatcher = UplinkDispatcher::new(store.clone(), settings.dispatcher.clone())?;
    if let Some(publisher) = &publisher {
        dispatcher = dispatcher.with_publisher(Arc::clone(publisher) as Arc<dyn Republish>);
    }

    let metrics_stop = CancellationToken::new();
    let metrics_server = spawn_metrics_server(
        &settings,
        Arc::new(AppState {
            stats: dispatcher.stats(),
            state: dispatcher.watch_state(),
            transport: settings.lora_backend.kind,
            start_time: std::time::Instant::now(),
        }),
        metrics_stop.clone(),
    )
    .await?;

    let mut transport: Box<dyn TransportSource> = match settings.lora_backend.kind {
        TransportKind::Mqtt => {
            let devices = store.list_all_device_ids().await?;
            Box::new(MqttSource::connect(&settings.lora_backend.mqtt, devices, &shutdown).await?)
        }
        TransportKind::Http => Box::new(HttpSource::bind(&settings.lora_backend.http).await?),
    };

    let result = dispatcher.run(transport.as_mut(), &shutdown).await;

    if let Some(publisher) = &publisher {
        publisher.close().await;
    }
    metrics_stop.cancel();
    if let Err(e) = metrics_server.await {
        warn!(error = %e, "metrics server task ended abnormally");
    }
    result
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                    _ = term.recv() => info!("terminate signal received"),
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                info!("interrupt received");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received");
    }
    shutdown.cancel();
}

async fn spawn_metrics_server(
    settings: &Settings,
    state: Arc<AppState>,
    stop: CancellationToken,
) -> fieldlink_gateway::Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    let listener = TcpListener::bind(settings.metrics.bind).await?;
    info!("Metrics endpoint: http://{}/metrics", settings.metrics.bind);

    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await;
        if let Err(e) = served {
            error!(error = %e, "metrics server failed");
        }
    }))
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::update_from_snapshot(&state.stats.snapshot(), *state.state.borrow());
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        metrics::encode_metrics(),
    )
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match *state.state.borrow() {
        DispatcherState::Running => (StatusCode::OK, "OK"),
        DispatcherState::Idle => (StatusCode::SERVICE_UNAVAILABLE, "Starting"),
        DispatcherState::Draining | DispatcherState::Stopped => {
            (StatusCode::SERVICE_UNAVAILABLE, "Stopping")
        }
    }
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    transport: String,
    dispatcher: String,
    stats: StatsSnapshot,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let dispatcher = format!("{:?}", *state.state.borrow()).to_lowercase();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        transport: String::from(state.transport),
        dispatcher,
        stats: state.stats.snapshot(),
    })
}
