#[path = "support/harness.rs"]
mod harness;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harness::{bot_against, bot_with_session_file, callback_update, message_update};
use quizforge::dialogue::machine::{CALLBACK_ANONYMOUS, CALLBACK_NON_ANONYMOUS};
use quizforge::session::{QuizType, SessionState};

fn bot_path(api_method: &str) -> String {
    format!("/bot{}/{api_method}", harness::BOT_TOKEN)
}

fn ok_reply() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {"message_id": 1}}))
}

async fn mount_chat_basics(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(bot_path("sendMessage")))
        .respond_with(ok_reply())
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(bot_path("answerCallbackQuery")))
        .respond_with(ok_reply())
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(bot_path("editMessageText")))
        .respond_with(ok_reply())
        .mount(server)
        .await;
}

#[tokio::test]
async fn full_quiz_flow_delivers_polls_and_completes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(bot_path("sendMessage")))
        .respond_with(ok_reply())
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(bot_path("answerCallbackQuery")))
        .respond_with(ok_reply())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(bot_path("editMessageText")))
        .respond_with(ok_reply())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(bot_path("sendPoll")))
        .and(body_partial_json(json!({"type": "quiz", "is_anonymous": true})))
        .respond_with(ok_reply())
        .expect(3)
        .mount(&server)
        .await;

    let bot = bot_against(&server.uri());
    bot.engine
        .handle_update(message_update(1, 7, 99, "/start"))
        .await;
    bot.engine
        .handle_update(callback_update(2, 7, 99, CALLBACK_ANONYMOUS))
        .await;

    let payload = json!({"all_q": [
        {"q": "Q1", "o": ["a", "b"], "c": 0},
        {"q": "Q2", "o": ["x", "y", "z"], "c": 2, "e": "because"},
        {"q": "Q3", "o": ["1", "2", "3", "4"], "c": 3},
    ]})
    .to_string();
    bot.engine
        .handle_update(message_update(3, 7, 99, &payload))
        .await;

    let session = bot.store.get(7).await.expect("session should persist");
    assert_eq!(session.state, SessionState::Complete);
    assert_eq!(session.quiz_count, 1);
    assert_eq!(session.quiz_type, Some(QuizType::Anonymous));
    assert_eq!(session.pending_payload, None);

    let snap = bot.metrics.snapshot();
    assert_eq!(snap.total_requests, 3);
    assert_eq!(snap.successful_sends, 3);
    assert_eq!(snap.errors, 0);
    server.verify().await;
}

#[tokio::test]
async fn non_anonymous_choice_is_carried_to_the_poll() {
    let server = MockServer::start().await;
    mount_chat_basics(&server).await;

    Mock::given(method("POST"))
        .and(path(bot_path("sendPoll")))
        .and(body_partial_json(json!({"is_anonymous": false})))
        .respond_with(ok_reply())
        .expect(1)
        .mount(&server)
        .await;

    let bot = bot_against(&server.uri());
    bot.engine
        .handle_update(message_update(1, 7, 99, "/start"))
        .await;
    bot.engine
        .handle_update(callback_update(2, 7, 99, CALLBACK_NON_ANONYMOUS))
        .await;
    let payload = json!({"all_q": [{"q": "Q1", "o": ["a", "b"], "c": 1}]}).to_string();
    bot.engine
        .handle_update(message_update(3, 7, 99, &payload))
        .await;

    let session = bot.store.get(7).await.expect("session should persist");
    assert_eq!(session.quiz_type, Some(QuizType::NonAnonymous));
    assert_eq!(session.state, SessionState::Complete);
    server.verify().await;
}

#[tokio::test]
async fn partial_poll_failure_lands_in_error_state() {
    let server = MockServer::start().await;
    mount_chat_basics(&server).await;

    Mock::given(method("POST"))
        .and(path(bot_path("sendPoll")))
        .and(body_partial_json(json!({"question": "Good"})))
        .respond_with(ok_reply())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(bot_path("sendPoll")))
        .and(body_partial_json(json!({"question": "Bad"})))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"ok": false, "description": "POLL_OPTION_INVALID"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let bot = bot_against(&server.uri());
    bot.engine
        .handle_update(message_update(1, 7, 99, "/start"))
        .await;
    bot.engine
        .handle_update(callback_update(2, 7, 99, CALLBACK_ANONYMOUS))
        .await;
    let payload = json!({"all_q": [
        {"q": "Good", "o": ["a", "b"], "c": 0},
        {"q": "Bad", "o": ["a", "b"], "c": 0},
    ]})
    .to_string();
    bot.engine
        .handle_update(message_update(3, 7, 99, &payload))
        .await;

    let session = bot.store.get(7).await.expect("session should persist");
    assert_eq!(session.state, SessionState::Error);
    assert_eq!(session.quiz_count, 1);

    let snap = bot.metrics.snapshot();
    assert_eq!(snap.successful_sends, 1);
    assert_eq!(snap.errors, 1);
    server.verify().await;
}

#[tokio::test]
async fn invalid_payload_reports_the_violation_and_keeps_waiting() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(bot_path("sendMessage")))
        .and(body_string_contains("needs 2 to 10 options"))
        .respond_with(ok_reply())
        .expect(1)
        .mount(&server)
        .await;
    mount_chat_basics(&server).await;
    Mock::given(method("POST"))
        .and(path(bot_path("sendPoll")))
        .respond_with(ok_reply())
        .expect(0)
        .mount(&server)
        .await;

    let bot = bot_against(&server.uri());
    bot.engine
        .handle_update(message_update(1, 7, 99, "/start"))
        .await;
    bot.engine
        .handle_update(callback_update(2, 7, 99, CALLBACK_ANONYMOUS))
        .await;
    let payload = json!({"all_q": [{"q": "Q1", "o": ["only"], "c": 0}]}).to_string();
    bot.engine
        .handle_update(message_update(3, 7, 99, &payload))
        .await;

    // Still waiting for a corrected payload; nothing was delivered.
    let session = bot.store.get(7).await.expect("session should persist");
    assert_eq!(session.state, SessionState::AwaitingQuizJson);
    assert_eq!(bot.metrics.snapshot().successful_sends, 0);
    server.verify().await;
}

#[tokio::test]
async fn stale_keyboard_press_is_answered_with_a_hint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(bot_path("answerCallbackQuery")))
        .and(body_string_contains("expired"))
        .respond_with(ok_reply())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(bot_path("sendMessage")))
        .respond_with(ok_reply())
        .expect(1)
        .mount(&server)
        .await;

    // No /start first: the press lands on a session in its initial state.
    let bot = bot_against(&server.uri());
    bot.engine
        .handle_update(callback_update(1, 7, 99, CALLBACK_ANONYMOUS))
        .await;

    let session = bot.store.get(7).await.expect("session should persist");
    assert_eq!(session.state, SessionState::Init);
    server.verify().await;
}

#[tokio::test]
async fn session_survives_a_process_restart_mid_flow() {
    let server = MockServer::start().await;
    mount_chat_basics(&server).await;
    Mock::given(method("POST"))
        .and(path(bot_path("sendPoll")))
        .respond_with(ok_reply())
        .expect(1)
        .mount(&server)
        .await;

    let workspace = TempDir::new().expect("temp workspace should be created");
    let session_file = workspace.path().join("sessions.json");

    {
        let bot = bot_with_session_file(&server.uri(), &session_file);
        bot.engine
            .handle_update(message_update(1, 7, 99, "/start"))
            .await;
        bot.engine
            .handle_update(callback_update(2, 7, 99, CALLBACK_ANONYMOUS))
            .await;
    }

    // New engine over the surviving file picks the dialogue up where the
    // old process left it.
    let bot = bot_with_session_file(&server.uri(), &session_file);
    let resumed = bot.store.get(7).await.expect("session should survive");
    assert_eq!(resumed.state, SessionState::AwaitingQuizJson);
    assert_eq!(resumed.quiz_type, Some(QuizType::Anonymous));

    let payload = json!({"all_q": [{"q": "Q1", "o": ["a", "b"], "c": 0}]}).to_string();
    bot.engine
        .handle_update(message_update(3, 7, 99, &payload))
        .await;

    let session = bot.store.get(7).await.expect("session should persist");
    assert_eq!(session.state, SessionState::Complete);
    assert_eq!(session.quiz_count, 1);
    server.verify().await;
}
