//! wspub server - Main entry point.
//!
//! This binary starts the relay with:
//! - Structured JSON logging for production
//! - A publisher/admin listener and a subscriber listener
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`wspub_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Defaults: publishers on 8080, subscribers on 8081
//! cargo run --bin wspub-server
//!
//! WSPUB_PUBLISHER_PORT=9000 \
//! WSPUB_SUBSCRIBER_PORT=9001 \
//! WSPUB_QUEUE_CAPACITY=32 \
//! cargo run --release --bin wspub-server
//! ```

use std::process::ExitCode;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use wspub_server::config::Config;
use wspub_server::routes::{create_publisher_router, create_subscriber_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  WSPUB_PUBLISHER_PORT  - Publisher/admin port (default: 8080)");
            eprintln!("  WSPUB_SUBSCRIBER_PORT - Subscriber port (default: 8081)");
            eprintln!("  WSPUB_BIND_ADDRESS    - Interface to bind (default: 0.0.0.0)");
            eprintln!("  WSPUB_QUEUE_CAPACITY  - Frames buffered per subscriber (default: 8)");
            eprintln!("  RUST_LOG              - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    info!(
        publisher_port = config.publisher_port,
        subscriber_port = config.subscriber_port,
        queue_capacity = config.queue_capacity,
        "wspub server starting"
    );

    match run(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "Server error");
            ExitCode::from(1)
        }
    }
}

/// Binds both listeners and serves until a shutdown signal arrives.
async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config.clone());

    let publisher_addr = config.publisher_addr();
    let publisher_listener = TcpListener::bind(publisher_addr)
        .await
        .with_context(|| format!("failed to bind publisher listener to {publisher_addr}"))?;
    info!(address = %publisher_listener.local_addr()?, "Publisher listener ready");

    let subscriber_addr = config.subscriber_addr();
    let subscriber_listener = TcpListener::bind(subscriber_addr)
        .await
        .with_context(|| format!("failed to bind subscriber listener to {subscriber_addr}"))?;
    info!(address = %subscriber_listener.local_addr()?, "Subscriber listener ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let registrar = state.registrar.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        // Upgraded sockets outlive axum's graceful shutdown; close them here.
        let closed = registrar.close_all();
        info!(streams = closed.len(), "Closed live streams");
        let _ = shutdown_tx.send(true);
    });

    let publishers = axum::serve(publisher_listener, create_publisher_router(state.clone()))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let subscribers = axum::serve(subscriber_listener, create_subscriber_router(state.clone()))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    info!("Server ready to accept connections");
    tokio::try_join!(
        async { publishers.await.context("publisher listener failed") },
        async { subscribers.await.context("subscriber listener failed") },
    )?;

    info!("Server shutting down gracefully");
    state.registrar.close_all();
    Ok(())
}

/// Resolves once the shutdown flag flips (or its sender is gone).
async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` with a default of `info` plus request
/// tracing from tower-http.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Creates a future that resolves when a shutdown signal is received.
///
/// Listens for SIGTERM (container orchestrator shutdown) and SIGINT (Ctrl+C).
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
