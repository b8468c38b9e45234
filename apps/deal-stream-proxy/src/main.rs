//! Deal Stream Proxy Binary
//!
//! Starts the exchange deal relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin deal-stream-proxy
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DEAL_PROXY_UPSTREAM_URL`: Exchange deal feed WebSocket URL
//!
//! ## Optional
//! - `DEAL_PROXY_CONTROL_URL`: Desired-symbol control feed URL (default: disabled)
//! - `DEAL_PROXY_TOPIC_TEMPLATE`: Topic template with `{symbol}` placeholder
//! - `DEAL_PROXY_DEFAULT_TOPIC`: Topic subscribed when no symbol is tracked
//! - `DEAL_PROXY_SYMBOLS`: Comma-separated static symbol list
//! - `DEAL_PROXY_DEBOUNCE_MS`: Desired-set debounce (default: 750)
//! - `DEAL_PROXY_RECONNECT_DELAY_MS`: Reconnect delay (default: 3000)
//! - `DEAL_PROXY_PING_INTERVAL_SECS`: Keepalive ping interval (default: 20)
//! - `DEAL_PROXY_IDLE_TIMEOUT_SECS`: Idle timeout before reconnect (default: 60)
//! - `DEAL_PROXY_SUBSCRIBER_CAPACITY`: Buffered payloads per subscriber (default: 256)
//! - `DEAL_PROXY_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: deal-stream-proxy)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use deal_stream_proxy::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
use deal_stream_proxy::infrastructure::control::{ControlEvent, ControlSession};
use deal_stream_proxy::infrastructure::exchange::{
    UpstreamEvent, UpstreamSession, UpstreamSessionConfig,
};
use deal_stream_proxy::infrastructure::health::{HealthServer, HealthServerState};
use deal_stream_proxy::infrastructure::telemetry;
use deal_stream_proxy::{Relay, RelayConfig, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered upstream events between the session and the relay.
const UPSTREAM_EVENT_CAPACITY: usize = 4096;

/// Buffered control events between the session and the relay.
const CONTROL_EVENT_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Deal Stream Proxy");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("metrics initialization")?;

    let config = RelayConfig::from_env().context("configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Initialize broadcast hub for subscriber fan-out
    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(config.broadcast)));

    // Create event channels for the feed sessions
    let (upstream_tx, upstream_rx) = mpsc::channel::<UpstreamEvent>(UPSTREAM_EVENT_CAPACITY);
    let (control_tx, control_rx) = mpsc::channel::<ControlEvent>(CONTROL_EVENT_CAPACITY);

    // Create the upstream session and the handle the relay drives it with
    let upstream_config =
        UpstreamSessionConfig::new(config.upstream.clone(), config.topics.clone());
    let (upstream_session, upstream_handle) =
        UpstreamSession::new(upstream_config, upstream_tx, shutdown_token.clone());
    let upstream_state = upstream_session.state();

    // Create the control session when configured; without one the sender is
    // dropped and the relay tracks only the static symbols.
    let control_session = config
        .control
        .clone()
        .map(|feed| ControlSession::new(feed, control_tx, shutdown_token.clone()));
    let control_state = control_session.as_ref().map(ControlSession::state);

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        upstream_state,
        control_state,
        Arc::clone(&broadcast_hub),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        Arc::clone(&health_state),
        shutdown_token.clone(),
    );

    // Spawn relay aggregator
    let relay = Relay::new(
        upstream_handle,
        Arc::clone(&broadcast_hub),
        config.debounce,
        config.static_symbols.clone(),
    );
    let relay_shutdown = shutdown_token.clone();
    let relay_task = tokio::spawn(async move {
        relay.run(upstream_rx, control_rx, relay_shutdown).await;
        tracing::info!("Relay stopped");
    });

    // Spawn feed sessions
    tokio::spawn(async move {
        if let Err(e) = upstream_session.run().await {
            tracing::error!(error = %e, "Upstream session error");
        }
    });

    if let Some(control_session) = control_session {
        tokio::spawn(async move {
            if let Err(e) = control_session.run().await {
                tracing::error!(error = %e, "Control session error");
            }
        });
    }

    // Spawn health server
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Deal stream proxy ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, relay_task)
        .await
        .is_err()
    {
        tracing::warn!("Relay did not stop within the shutdown timeout");
    }

    tracing::info!("Deal stream proxy stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        control_feed = config.control.is_some(),
        static_symbols = config.static_symbols.len(),
        debounce_ms = config.debounce.as_millis(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        upstream_url = %config.upstream.url,
        control_url = ?config.control.as_ref().map(|c| c.url.as_str()),
        topic_template = config.topics.template.as_str(),
        default_topic = %config.topics.default_topic,
        "WebSocket endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
