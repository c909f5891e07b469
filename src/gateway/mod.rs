//! Axum-based webhook gateway.
//!
//! The only write path is `POST /webhook/{token}`: Telegram is acked the
//! moment the update is parsed and queued, so ack latency never depends on
//! Bot API round-trips. Body limits and a request timeout guard the
//! listener; the bot token in the path is the authentication.

mod handlers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::Config;
use crate::dialogue::DialogueEngine;
use crate::health::Metrics;
use crate::keepalive::KeepAliveStatus;
use crate::session::SessionStore;
use crate::telegram::TelegramApi;

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub store: Arc<SessionStore>,
    pub engine: Arc<DialogueEngine>,
    pub api: Arc<TelegramApi>,
    pub keepalive: KeepAliveStatus,
    /// Expected value of the `{token}` path segment.
    pub bot_token: Arc<str>,
    /// Tracks spawned dialogue tasks so shutdown can drain them.
    pub workers: TaskTracker,
    /// Bounds concurrent dialogue work.
    pub worker_slots: Arc<Semaphore>,
}

pub fn build_app(state: AppState) -> Router {
    let max_body = state.config.server.max_body_bytes;
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/debug", get(handlers::handle_debug))
        .route("/metrics", get(handlers::handle_metrics))
        .route("/webhook/{token}", post(handlers::handle_webhook))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
}

/// Serves the gateway until the token is cancelled.
pub async fn run(state: AppState, addr: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind webhook gateway to {addr}"))?;
    run_with_listener(state, listener, shutdown).await
}

/// Serves the gateway on an already-bound listener.
pub async fn run_with_listener(
    state: AppState,
    listener: tokio::net::TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let local_addr = listener
        .local_addr()
        .context("failed to read gateway listener address")?;
    tracing::info!(addr = %local_addr, "webhook gateway listening");

    let app = build_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("webhook gateway server failed")?;
    Ok(())
}
