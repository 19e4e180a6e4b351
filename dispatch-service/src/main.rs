//! Dispatch Server - HTTP front end for the email dispatch engine.
//!
//! This binary:
//! - Loads configuration from the environment
//! - Connects the dispatch engine to the mail provider
//! - Serves the send and bulk-send endpoints until SIGINT/SIGTERM

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dispatch::web::{is_api_key_auth_enabled, router};
use dispatch::{AppState, Config, DispatchEngine, PostmarkClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("dispatch_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        provider_base_url = %config.provider_base_url,
        provider_token_configured = config.provider_server_token.is_some(),
        api_key_configured = is_api_key_auth_enabled(&config.api_keys),
        allow_unauthenticated = config.allow_unauthenticated,
        max_in_flight = config.max_in_flight,
        max_batch_size = config.max_batch_size,
        retry_bound = config.retry_bound,
        batch_deadline_ms = config.batch_deadline_ms,
        "config_loaded"
    );

    if !is_api_key_auth_enabled(&config.api_keys) {
        if config.allow_unauthenticated {
            warn!("API_KEY not set and ALLOW_UNAUTHENTICATED=true, send endpoints are open");
        } else {
            warn!("API_KEY not set, send endpoints will refuse every request");
        }
    }
    if config.provider_server_token.is_none() {
        warn!("PROVIDER_SERVER_TOKEN not set, provider calls will be rejected");
    }

    let provider = PostmarkClient::new(
        config.provider_base_url.clone(),
        config.provider_server_token.clone().unwrap_or_default(),
        config.sender_address.clone(),
        config.message_stream.clone(),
    )
    .context("Failed to create provider client")?;

    let engine = DispatchEngine::new(Arc::new(provider), config.dispatch_settings())
        .context("Failed to create dispatch engine")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(AppState::new(config, engine));

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "dispatch_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("dispatch_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("dispatch_server_shutting_down");
}
