//! Binance Stream Manager Binary
//!
//! Starts the stream manager service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin binance-stream-manager
//! ```
//!
//! # Environment Variables
//!
//! ## Optional credentials (required for user-data streams)
//! - `BINANCE_API_KEY`: Binance API key
//! - `BINANCE_API_SECRET`: Binance API secret
//!
//! ## Optional
//! - `BINANCE_ENV`: PRODUCTION | TESTNET (default: PRODUCTION)
//! - `BINANCE_ACCOUNT_TYPE`: spot | margin | isolated_margin | futures (default: spot)
//! - `BINANCE_MARKETS`: Comma-separated markets (default: btcusdt)
//! - `BINANCE_CHANNELS`: Comma-separated channels (default: trade)
//! - `STREAM_MANAGER_USER_DATA`: Run a user-data stream - "true" | "false" (default: false)
//! - `STREAM_MANAGER_OUTPUT_FORMAT`: raw | normalized_map | event (default: normalized_map)
//! - `STREAM_MANAGER_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: binance-stream-manager)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use binance_stream_manager::infrastructure::telemetry;
use binance_stream_manager::{
    BinanceNormalizer, ChannelName, Endpoints, HealthServer, HealthServerState, KeepaliveService,
    ListenKeyClient, ManagerConfig, StreamDescriptor, StreamRegistry, StreamSupervisor,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let config = ManagerConfig::from_env()?;

    // Telemetry (tracing + optional OTLP export) is driven by the config
    let _telemetry_guard = telemetry::init(&config.telemetry);

    tracing::info!("Starting Binance Stream Manager");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(StreamRegistry::with_buffer_capacity(
        config.buffers.event_buffer_capacity,
    ));

    // REST client for the listen-key lifecycle, when credentials exist
    let listen_key_client = match &config.credentials {
        Some(credentials) => {
            let endpoints = Endpoints::resolve(config.account_type, config.environment)
                .with_overrides(&config.endpoints);
            Some(Arc::new(ListenKeyClient::new(
                endpoints,
                credentials.api_key(),
                config.keepalive.expiry_window,
            )?))
        }
        None => None,
    };

    let supervisor = Arc::new(StreamSupervisor::new(
        Arc::clone(&registry),
        listen_key_client.clone(),
        Arc::new(BinanceNormalizer::new()),
        config.websocket.clone(),
        config.endpoints.clone(),
        shutdown_token.clone(),
    ));

    // Market-data stream from the configured channel/market lists
    let mut market_descriptor = StreamDescriptor::market_data(
        config.channels.iter().map(ChannelName::market).collect(),
        config.markets.clone(),
        config.output_format,
    )
    .with_environment(config.environment);
    market_descriptor.account_type = config.account_type;
    Arc::clone(&supervisor).start_stream(market_descriptor)?;

    // User-data stream, when requested
    if config.user_data {
        let mut user_descriptor =
            StreamDescriptor::user_data(config.account_type, config.output_format)
                .with_environment(config.environment);
        // Isolated-margin listen keys are symbol-scoped.
        user_descriptor.markets = config.markets.clone();
        Arc::clone(&supervisor).start_stream(user_descriptor)?;
    }

    // Keepalive service keeps user-data authorization fresh
    if let Some(client) = &listen_key_client {
        let keepalive = KeepaliveService::new(
            Arc::clone(&registry),
            Arc::clone(client),
            config.keepalive.keepalive_interval,
            shutdown_token.clone(),
        );
        tokio::spawn(keepalive.run());
    }

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
        listen_key_client.as_ref().map(|c| c.status()),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Stream manager ready");

    await_shutdown(shutdown_token).await;

    supervisor.stop_all().await;
    wait_for_streams(&registry).await;

    tracing::info!("Stream manager stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ManagerConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        account_type = config.account_type.as_str(),
        markets = ?config.markets,
        channels = ?config.channels,
        output_format = config.output_format.as_str(),
        user_data = config.user_data,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

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

/// Wait for every socket loop to observe its stop flag, bounded by the
/// shutdown timeout.
async fn wait_for_streams(registry: &StreamRegistry) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_TIMEOUT;
    while registry.stats().running > 0 {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("Shutdown timeout reached with streams still running");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
