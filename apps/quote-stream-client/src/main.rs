//! Quote Stream Client Binary
//!
//! Connects to the market data gateway, subscribes to a ticker and logs
//! order book and execution updates until interrupted.
//!
//! # Usage
//!
//! ```bash
//! QUOTE_API_BASE_URL=http://localhost:8080 QUOTE_STREAM_TICKER=005930 \
//!     cargo run --bin quote-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `QUOTE_API_BASE_URL`: Backend base URL (`http(s)://host[:port]`)
//!
//! ## Optional
//! - `QUOTE_STREAM_TICKER`: Ticker to subscribe to on startup
//! - `QUOTE_STREAM_WS_PATH`: Bus endpoint path (default: /ws)
//! - `QUOTE_STREAM_HEARTBEAT_MS`: Heart-beat interval (default: 4000)
//! - `QUOTE_STREAM_RECONNECT_DELAY_MS`: Reconnect delay (default: 5000)
//! - `QUOTE_STREAM_SUBSCRIBE_RETRY_MS`: Deferred subscribe poll (default: 1000)
//! - `QUOTE_STREAM_EXECUTION_CAPACITY`: Executions retained (default: 30)
//! - `QUOTE_STREAM_SEQUENCED_ENABLE`: Await REST enable before subscribing (default: false)
//! - `QUOTE_STREAM_RESUBSCRIBE_ON_RECONNECT`: Restore topics after reconnect (default: false)
//! - `QUOTE_STREAM_REQUEST_TIMEOUT_SECS`: REST timeout (default: 10)
//! - `QUOTE_STREAM_HEALTH_PORT`: Health check HTTP port (default: 0, disabled)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_stream_client::{
    ClientConfig, HealthServer, HealthServerState, QuoteSubscriptionClient, QuoteView,
    init_metrics, init_telemetry,
};
use tokio::signal;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Upper bound on the unsubscribe/disconnect sequence at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP)
    let _telemetry_guard = init_telemetry();

    tracing::info!("Starting Quote Stream Client");

    let _metrics_handle = init_metrics();

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let client = QuoteSubscriptionClient::connect(&config).context("failed to start client")?;

    if let Some(ticker) = &config.ticker {
        client.subscribe_to_stock(ticker.clone())?;
        tracing::info!(ticker = %ticker, "Subscription requested");
    }

    // Spawn health server
    if config.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            client.changes(),
        ));
        let health_server =
            HealthServer::new(config.health_port, health_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    // Spawn update logger
    let mut updates = client.updates();
    let logger_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        let mut previous = QuoteView::default();
        loop {
            tokio::select! {
                () = logger_shutdown.cancelled() => break,
                next = updates.next() => {
                    let Some(view) = next else { break };
                    log_view_change(&previous, &view);
                    previous = view;
                }
            }
        }
    });

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, client.close())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Client close timed out"
        );
    }

    tracing::info!("Quote Stream Client stopped");
    Ok(())
}

/// Log what changed between two published views.
fn log_view_change(previous: &QuoteView, view: &QuoteView) {
    if previous.connection != view.connection {
        tracing::info!(state = view.connection.as_str(), "Connection state changed");
    }
    if previous.active_symbol != view.active_symbol {
        tracing::info!(ticker = ?view.active_symbol, "Active symbol changed");
    }
    if previous.stock_data != view.stock_data {
        if let Some(book) = &view.stock_data {
            tracing::info!(
                ticker = %book.ticker,
                price = %book.price,
                volume = book.volume,
                best_ask = ?book.best_ask(),
                best_bid = ?book.best_bid(),
                "Order book"
            );
        }
    }
    if previous.executions.first() != view.executions.first() {
        if let Some(execution) = view.executions.first() {
            tracing::info!(
                ticker = %execution.ticker,
                price = %execution.price,
                side = execution.side().as_str(),
                retained = view.executions.len(),
                "Execution"
            );
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        api_base_url = %config.api_base_url,
        health_port = config.health_port,
        sequenced_enable = config.subscription.sequenced_enable,
        resubscribe_on_reconnect = config.subscription.resubscribe_on_reconnect,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = ?config.stream_url(),
        heartbeat_ms = config.stream.heartbeat.as_millis(),
        reconnect_delay_ms = config.stream.reconnect_delay.as_millis(),
        "Stream endpoint"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
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
}
