use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use super::AppState;
use crate::telegram::Update;

/// GET /health - liveness snapshot; also the keep-alive ping target.
pub(super) async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let storage_healthy = state.store.backend_healthy().await;
    let body = json!({
        "status": if storage_healthy { "healthy" } else { "degraded" },
        "uptime_seconds": snapshot.uptime_seconds,
        "uptime_human": format_uptime(snapshot.uptime_seconds),
        "metrics": snapshot,
        "storage": {
            "backend": state.store.backend_name(),
            "healthy": storage_healthy,
        },
        "keepalive": state.keepalive.snapshot(),
    });
    Json(body)
}

/// GET /debug - extended read-only snapshot, credentials masked.
pub(super) async fn handle_debug(State(state): State<AppState>) -> impl IntoResponse {
    // Live getMe round-trip; tells a broken token apart from a broken host.
    let bot = match state.api.get_me().await {
        Ok(me) => json!({
            "api": "reachable",
            "username": me.get("username").cloned().unwrap_or_default(),
        }),
        Err(error) => json!({"api": format!("unreachable: {error}")}),
    };
    let body = json!({
        "config": state.config.redacted(),
        "bot": bot,
        "metrics": state.metrics.snapshot(),
        "storage": {
            "backend": state.store.backend_name(),
            "healthy": state.store.backend_healthy().await,
            "session_ttl_secs": state.store.ttl().as_secs(),
        },
        "keepalive": state.keepalive.snapshot(),
        "workers": {
            "tracked": state.workers.len(),
            "free_slots": state.worker_slots.available_permits(),
        },
    });
    Json(body)
}

/// GET /metrics - the counter snapshot as JSON.
pub(super) async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// POST /webhook/{token} - Telegram update ingress.
///
/// Acks as soon as the update is queued. Telegram redelivers updates that
/// are not acked promptly, and a redelivered update replayed against slow
/// dialogue work is worse than answering before the work is done.
pub(super) async fn handle_webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Result<Json<Update>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
    // A wrong token gets the same response as a wrong path.
    if !constant_time_eq(&token, &state.bot_token) {
        tracing::warn!("webhook call with invalid token path");
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})));
    }

    let Json(update) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "webhook body rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid update payload"})),
            );
        }
    };

    // A full worker pool sheds the update rather than queueing it without
    // bound. Shed updates are still acked, so they are not redelivered.
    let slot = match Arc::clone(&state.worker_slots).try_acquire_owned() {
        Ok(slot) => slot,
        Err(_) => {
            tracing::warn!(update_id = update.update_id, "worker pool full, update dropped");
            return (StatusCode::OK, Json(json!({"ok": true})));
        }
    };
    let engine = Arc::clone(&state.engine);
    state.workers.spawn(async move {
        let _slot = slot;
        engine.handle_update(update).await;
    });

    (StatusCode::OK, Json(json!({"ok": true})))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn format_uptime(uptime_seconds: u64) -> String {
    format!("{}h {}m", uptime_seconds / 3600, (uptime_seconds % 3600) / 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison_is_exact() {
        assert!(constant_time_eq("123:abc", "123:abc"));
        assert!(!constant_time_eq("123:abc", "123:abd"));
        assert!(!constant_time_eq("123:abc", "123:abcd"));
        assert!(!constant_time_eq("", "123:abc"));
    }

    #[test]
    fn uptime_renders_hours_and_minutes() {
        assert_eq!(format_uptime(0), "0h 0m");
        assert_eq!(format_uptime(3_720), "1h 2m");
        assert_eq!(format_uptime(90_000), "25h 0m");
    }
}
