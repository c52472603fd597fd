//! Sparq realtime server - Main entry point.
//!
//! This binary starts the realtime core with:
//! - Structured JSON logging for production
//! - Producer-key bootstrap from the directory when not configured inline
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`sparq_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! SPARQ_SESSION_PUBLIC_KEY="base64pubkey" \
//! SPARQ_DIRECTORY_URL="https://directory.internal" \
//! SPARQ_DIRECTORY_API_KEY="secret" \
//! SPARQ_ALLOWED_ORIGINS="https://app.sparq.example" \
//! PORT=8080 \
//! cargo run --release --bin sparq-server
//! ```

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use sparq_server::config::Config;
use sparq_server::directory::DirectoryClient;
use sparq_server::routes::{create_router, AppState};
use sparq_server::token;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    init_logging();

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  SPARQ_SESSION_PUBLIC_KEY  - Base64 Ed25519 key of the login service");
            eprintln!("  SPARQ_DIRECTORY_URL       - Base URL of the directory service");
            eprintln!("  SPARQ_DIRECTORY_API_KEY   - API key for directory requests");
            eprintln!("  SPARQ_ALLOWED_ORIGINS     - Comma-separated allowed origins");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  SPARQ_PRODUCER_KEYS         - Format: producer1:pubkey1,producer2:pubkey2");
            eprintln!("  SPARQ_PREVIEW_ORIGIN_SUFFIX - Origin suffix for preview deploys");
            eprintln!("  PORT                        - HTTP server port (default: 8080)");
            eprintln!("  RUST_LOG                    - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    // Session key was validated during config parsing
    let session_key = match token::decode_verifying_key(&config.session_public_key) {
        Ok(key) => key,
        Err(err) => {
            error!(error = %err, "Failed to decode session public key");
            return ExitCode::from(1);
        }
    };

    // Directory client, shared by the authenticator and the entitlement gate
    let directory = match DirectoryClient::new(&config.directory_url, &config.directory_api_key) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!(error = %err, "Failed to create directory client");
            return ExitCode::from(1);
        }
    };

    // Producer keys: inline configuration wins; otherwise bootstrap from the
    // directory with retry
    let producer_keys: HashMap<String, String> = if config.producer_keys.is_empty() {
        match directory.fetch_producer_keys_with_retry().await {
            Ok(keys) => keys
                .into_iter()
                .map(|k| (k.producer_id, k.public_key))
                .collect(),
            Err(err) => {
                error!(error = %err, "Failed to bootstrap producer keys from directory");
                return ExitCode::from(1);
            }
        }
    } else {
        config.producer_keys.clone()
    };

    info!(
        port = config.port,
        producer_count = producer_keys.len(),
        allowed_origins = config.allowed_origins.len(),
        directory = %directory.base_url(),
        "Sparq realtime server starting"
    );

    // Create application state; the connection registry lives inside and is
    // rebuilt from zero on every start
    let state = AppState::new(config.clone(), directory, session_key, producer_keys);

    // Create router
    let app = create_router(state);

    // Bind to address
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(
                port = config.port,
                address = %bind_addr,
                "Server listening"
            );
            listener
        }
        Err(err) => {
            error!(
                error = %err,
                address = %bind_addr,
                "Failed to bind to address"
            );
            return ExitCode::from(1);
        }
    };

    // Start server with graceful shutdown
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// Configures JSON-formatted output for production use with:
/// - Environment-based log level filtering via RUST_LOG
/// - Default log level of `info`
/// - Target and level information
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default: info level for our crates, more detail for the HTTP layer
        EnvFilter::new("info,tower_http=debug,axum::rejection=trace")
    });

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
/// Listens for:
/// - SIGTERM (container orchestrator shutdown)
/// - SIGINT (Ctrl+C)
///
/// Live channels are dropped with the process; clients reconnect and
/// re-register against the fresh registry.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
