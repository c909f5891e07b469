#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use quizforge::config::HttpConfig;
use quizforge::dialogue::DialogueEngine;
use quizforge::health::Metrics;
use quizforge::session::{FileBackend, SessionStore};
use quizforge::telegram::{TelegramApi, Update};
use quizforge::transport::ReliableClient;

pub const BOT_TOKEN: &str = "123:TEST";

/// Production backoffs are seconds; tests shrink them so a retried call
/// stays inside the suite's patience.
pub fn fast_http_config() -> HttpConfig {
    HttpConfig {
        request_timeout_secs: 5,
        connect_timeout_secs: 5,
        pool_max_idle_per_host: 4,
        max_in_flight: 8,
        requests_per_sec: 10_000.0,
        burst: 100,
        max_queue_wait_ms: 50,
        max_attempts: 3,
        base_backoff_ms: 5,
        max_backoff_ms: 20,
        circuit_threshold: 5,
        circuit_cooldown_secs: 30,
    }
}

pub struct TestBot {
    pub engine: DialogueEngine,
    pub store: Arc<SessionStore>,
    pub metrics: Arc<Metrics>,
    pub workspace: Option<TempDir>,
}

/// A dialogue engine wired against `api_base` with file-backed sessions in
/// a fresh temp dir.
pub fn bot_against(api_base: &str) -> TestBot {
    let workspace = TempDir::new().expect("temp workspace should be created");
    let mut bot = bot_with_session_file(api_base, &workspace.path().join("sessions.json"));
    bot.workspace = Some(workspace);
    bot
}

/// Same engine over a caller-owned session file, so a test can tear the
/// bot down and rebuild it against the surviving state.
pub fn bot_with_session_file(api_base: &str, session_file: &Path) -> TestBot {
    let metrics = Arc::new(Metrics::new());
    let client = Arc::new(ReliableClient::new(&fast_http_config(), Arc::clone(&metrics)));
    let api = Arc::new(TelegramApi::new(client, BOT_TOKEN).with_api_base(api_base));
    let backend = Arc::new(FileBackend::new(session_file.to_path_buf()));
    let store = Arc::new(SessionStore::new(backend, Duration::from_secs(3600)));
    let engine = DialogueEngine::new(api, Arc::clone(&store), Arc::clone(&metrics), 25);
    TestBot {
        engine,
        store,
        metrics,
        workspace: None,
    }
}

pub fn message_update(update_id: i64, user_id: i64, chat_id: i64, text: &str) -> Update {
    serde_json::from_value(serde_json::json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id * 100,
            "chat": {"id": chat_id},
            "from": {"id": user_id, "first_name": "Dana"},
            "text": text,
        },
    }))
    .expect("message update literal should deserialize")
}

pub fn callback_update(update_id: i64, user_id: i64, chat_id: i64, data: &str) -> Update {
    serde_json::from_value(serde_json::json!({
        "update_id": update_id,
        "callback_query": {
            "id": format!("cb-{update_id}"),
            "from": {"id": user_id, "first_name": "Dana"},
            "message": {
                "message_id": update_id * 100,
                "chat": {"id": chat_id},
                "text": "Choose your quiz type:",
            },
            "data": data,
        },
    }))
    .expect("callback update literal should deserialize")
}
