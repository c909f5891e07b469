//! Service assembly and lifecycle.
//!
//! Builds every component in dependency order, spawns the background
//! workers, serves the gateway and coordinates graceful shutdown:
//! background workers are cancelled first, then the listener closes, then
//! in-flight dialogue work gets a bounded drain window.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::dialogue::DialogueEngine;
use crate::gateway::{self, AppState};
use crate::health::Metrics;
use crate::keepalive::{KeepAliveStatus, KeepAliveWorker};
use crate::session::{SessionStore, connect_backend};
use crate::telegram::TelegramApi;
use crate::transport::ReliableClient;

pub async fn run(config: Config) -> Result<()> {
    config.validate()?;
    let config = Arc::new(config);
    let bot_token: Arc<str> = config
        .bot_token()
        .map(Arc::from)
        .context("bot token missing after validation")?;

    let metrics = Arc::new(Metrics::new());
    let client = Arc::new(ReliableClient::new(&config.http, Arc::clone(&metrics)));
    let backend = connect_backend(&config.storage).await;
    let store = Arc::new(SessionStore::new(
        backend,
        Duration::from_secs(config.session.ttl_secs),
    ));
    let api = Arc::new(TelegramApi::new(Arc::clone(&client), bot_token.as_ref()));
    let engine = Arc::new(DialogueEngine::new(
        Arc::clone(&api),
        Arc::clone(&store),
        Arc::clone(&metrics),
        config.quiz.max_questions,
    ));

    let cancel = CancellationToken::new();
    let background = TaskTracker::new();

    background.spawn(sweep_worker(
        Arc::clone(&store),
        Duration::from_secs(config.session.sweep_interval_secs.max(1)),
        cancel.clone(),
    ));

    let keepalive_enabled = config.keepalive.enabled && config.health_url().is_some();
    let keepalive = KeepAliveStatus::new(
        keepalive_enabled,
        Duration::from_secs(config.keepalive.interval_secs),
    );
    if let Some(health_url) = config.health_url().filter(|_| config.keepalive.enabled) {
        let worker = KeepAliveWorker::new(
            &config.keepalive,
            Arc::clone(&client),
            Arc::clone(&api),
            Arc::clone(&metrics),
            keepalive.clone(),
            health_url,
            config.webhook_url(),
        );
        background.spawn(worker.run(cancel.clone()));
    } else {
        tracing::info!("keep-alive disabled (no public url or switched off)");
    }

    let workers = TaskTracker::new();
    let state = AppState {
        config: Arc::clone(&config),
        metrics,
        store: Arc::clone(&store),
        engine,
        api: Arc::clone(&api),
        keepalive,
        bot_token,
        workers: workers.clone(),
        worker_slots: Arc::new(Semaphore::new(config.server.worker_pool_size.max(1))),
    };

    tracing::info!(
        storage = store.backend_name(),
        keepalive = keepalive_enabled,
        workers = config.server.worker_pool_size,
        "starting quizforge"
    );

    let addr = config.bind_addr();
    let serve_cancel = cancel.clone();
    let mut server = tokio::spawn(async move { gateway::run(state, &addr, serve_cancel).await });

    tokio::select! {
        signal = shutdown_signal() => {
            tracing::info!(signal, "shutdown signal received");
            cancel.cancel();
            server.await.context("gateway task panicked")??;
        }
        result = &mut server => {
            // The server never exits on its own unless something is wrong.
            cancel.cancel();
            result.context("gateway task panicked")??;
            anyhow::bail!("webhook gateway exited unexpectedly");
        }
    }

    workers.close();
    let drain = Duration::from_secs(config.server.drain_timeout_secs);
    if tokio::time::timeout(drain, workers.wait()).await.is_err() {
        tracing::warn!(
            drain_secs = drain.as_secs(),
            "dialogue workers still running at shutdown deadline"
        );
    }

    background.close();
    let _ = tokio::time::timeout(Duration::from_secs(5), background.wait()).await;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn sweep_worker(store: Arc<SessionStore>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("session sweeper stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        store.sweep().await;
    }
}

/// Resolves when the process is told to stop.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %error, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "sigterm handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => "ctrl-c",
        () = terminate => "sigterm",
    }
}
