//! Stream Dispatcher Demo Binary
//!
//! Registers the demo handler set, resolves it against a static instrument
//! catalog and dispatches a synthetic event feed until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin stream-dispatcher
//! ```
//!
//! # Environment Variables
//!
//! - `DISPATCH_SHUTDOWN_GRACE_SECS`: Drain bound for wait-close categories (default: 30)
//! - `DISPATCH_AFTER_BARRIER_TIMEOUT_MS`: Wait bound before after handlers (default: 30000)
//! - `DISPATCH_WAIT_CLOSE_CATEGORIES`: Comma list of categories that drain on shutdown
//! - `DISPATCH_ORDERING_SCOPE`: `identity` or `category` reach of before/after handlers (default: identity)
//! - `DISPATCH_RECONNECT_DELAY_INITIAL_MS`: Initial resubscribe delay (default: 500)
//! - `DISPATCH_RECONNECT_DELAY_MAX_SECS`: Maximum resubscribe delay (default: 30)
//! - `DISPATCH_RECONNECT_DELAY_MULTIPLIER`: Backoff multiplier (default: 2.0)
//! - `DISPATCH_MAX_RECONNECT_ATTEMPTS`: Attempts before degrading, 0 = unlimited (default: 10)
//! - `DISPATCH_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `DISPATCH_DEMO_EVENT_INTERVAL_MS`: Synthetic feed pace (default: 1000)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

mod demo;

use std::sync::Arc;

use stream_dispatcher::infrastructure::health::{HealthServer, HealthServerState};
use stream_dispatcher::infrastructure::telemetry;
use stream_dispatcher::{
    DispatchEngine, EngineConfig, HandlerRegistry, InMemoryTransport, StaticInstrumentLookup,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Stream Dispatcher");

    let _metrics_handle = init_metrics();

    let config = EngineConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Collect registrations from both declaration styles
    let mut registry = HandlerRegistry::new();
    demo::handlers::register_all(&mut registry)?;
    let snapshot = registry.freeze();
    tracing::info!(registrations = snapshot.len(), "Handlers registered");

    let catalog = demo::catalog();
    let lookup = Arc::new(StaticInstrumentLookup::new(catalog.clone()));
    let transport = Arc::new(InMemoryTransport::new());

    let engine = DispatchEngine::new(lookup.clone(), transport.clone(), &config);
    let prepared = engine.prepare(&snapshot).await?;
    tracing::info!(
        lookups = lookup.lookup_count(),
        subscriptions = prepared.subscriptions.groups.len(),
        "Dispatch plan ready"
    );

    let running = engine.start(prepared, shutdown_token.clone());

    // Health server shares the status board; it stops on the same token
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        running.status().clone(),
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

    let feed = tokio::spawn(demo::feed::run(
        Arc::clone(&transport),
        catalog,
        config.demo.event_interval,
        shutdown_token.clone(),
    ));

    tracing::info!("Stream dispatcher ready");

    await_shutdown(shutdown_token).await;

    let terminal = running.shutdown().await;
    let _ = feed.await;
    for (category, state) in terminal {
        tracing::info!(category = %category, state = state.as_str(), "Category stopped");
    }

    tracing::info!("Stream dispatcher stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        shutdown_grace_secs = config.dispatch.shutdown_grace.as_secs(),
        after_barrier_timeout_ms = config.dispatch.after_barrier_timeout.as_millis(),
        wait_close = ?config.dispatch.wait_close_categories,
        ordering_scope = config.dispatch.ordering_scope.as_str(),
        max_reconnect_attempts = config.reconnect.max_attempts,
        health_port = config.server.health_port,
        "Configuration loaded"
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
