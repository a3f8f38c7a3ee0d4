//! # Transcribe Backend - Main Application Entry Point
//!
//! An actix-web server exposing asynchronous audio transcription:
//! clients submit audio (upload, remote URL, or live WebSocket stream) and
//! poll for the result by job id.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state and request metrics
//! - **jobs**: job store and background executor - the asynchronous core
//! - **audio**: normalization into the canonical engine format
//! - **media**: remote media retrieval to temporary files
//! - **transcription**: the Whisper recognition engine
//! - **streaming**: real-time WebSocket transcription sessions
//! - **handlers**: submission and status HTTP endpoints
//! - **error**: the error taxonomy and its HTTP mapping
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: request handling and job execution are fully async
//! - **Arc & locks**: shared state across concurrent requests
//! - **Result<T, E> with ?**: startup failures propagate to one exit point

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod jobs;
mod media;
mod middleware;
mod state;
mod streaming;
mod transcription;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handlers; checked by the polling
/// loop that stops the server.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // Pick up a .env file if there is one; fine if not.
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting transcribe-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, model '{}'",
        config.server.host, config.server.port, config.models.whisper_model
    );

    let app_state = AppState::new(config.clone())?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // Load the recognition model before accepting traffic. A failure is
    // logged, not fatal: the service stays up and affected jobs fail with a
    // descriptive message instead.
    if let Err(e) = app_state.engine.load().await {
        warn!("Recognition model failed to load: {}", e);
        warn!("Transcription jobs will fail until the model can be loaded at restart");
    }

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // Browser clients (the polling UI and the microphone streamer) may be
        // served from anywhere.
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::Telemetry)
            .route(
                "/transcribe-local",
                web::post().to(handlers::transcribe_local),
            )
            .route(
                "/transcribe-remote",
                web::post().to(handlers::transcribe_remote),
            )
            .route("/status/{task_id}", web::get().to(handlers::job_status))
            .route("/ws", web::get().to(streaming::stream_transcribe))
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal.
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Set up structured logging.
///
/// `RUST_LOG` controls verbosity; the default keeps this crate at debug and
/// actix at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms; returns once it is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
