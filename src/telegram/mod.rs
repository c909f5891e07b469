//! Telegram Bot API surface.
//!
//! Every call goes through [`ReliableClient`], so pooling, pacing, retries
//! and circuit breaking apply uniformly. Message and poll sends are marked
//! retry-safe: a duplicate delivery costs less than a silently dropped one.

pub mod types;

use std::sync::Arc;

use serde_json::json;

use crate::quiz::QuestionSpec;
use crate::transport::{ApiRequest, ClientError, ReliableClient};

pub use types::{CallbackQuery, Chat, Message, Update, User, WebhookInfo};

pub struct TelegramApi {
    client: Arc<ReliableClient>,
    bot_token: String,
    api_base: String,
}

impl TelegramApi {
    pub fn new(client: Arc<ReliableClient>, bot_token: impl Into<String>) -> Self {
        Self {
            client,
            bot_token: bot_token.into(),
            api_base: "https://api.telegram.org".to_string(),
        }
    }

    /// Points at a different Bot API host, e.g. a self-hosted server.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ClientError> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        self.client
            .request(ApiRequest::post(self.api_url("sendMessage"), body).retry_safe())
            .await?;
        Ok(())
    }

    pub async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: serde_json::Value,
    ) -> Result<(), ClientError> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "reply_markup": keyboard,
        });
        self.client
            .request(ApiRequest::post(self.api_url("sendMessage"), body).retry_safe())
            .await?;
        Ok(())
    }

    /// Sends one question as a native quiz poll.
    pub async fn send_quiz_poll(
        &self,
        chat_id: i64,
        question: &QuestionSpec,
        is_anonymous: bool,
    ) -> Result<(), ClientError> {
        let mut body = json!({
            "chat_id": chat_id,
            "question": question.text,
            "options": question.options,
            "type": "quiz",
            "correct_option_id": question.correct_index,
            "is_anonymous": is_anonymous,
        });
        if let Some(explanation) = &question.explanation
            && !explanation.is_empty()
        {
            body["explanation"] = json!(explanation);
        }
        self.client
            .request(ApiRequest::post(self.api_url("sendPoll"), body).retry_safe())
            .await?;
        Ok(())
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), ClientError> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        self.client
            .request(ApiRequest::post(self.api_url("editMessageText"), body).retry_safe())
            .await?;
        Ok(())
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut body = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.client
            .request(ApiRequest::post(self.api_url("answerCallbackQuery"), body).retry_safe())
            .await?;
        Ok(())
    }

    /// Identity check; the debug endpoint uses it to prove the token works.
    pub async fn get_me(&self) -> Result<serde_json::Value, ClientError> {
        let value = self
            .client
            .request(ApiRequest::get(self.api_url("getMe")))
            .await?;
        Ok(result_of(value))
    }

    pub async fn set_webhook(&self, url: &str) -> Result<(), ClientError> {
        // Updates queued against the old registration are stale by now.
        let body = json!({ "url": url, "drop_pending_updates": true });
        self.client
            .request(ApiRequest::post(self.api_url("setWebhook"), body).retry_safe())
            .await?;
        Ok(())
    }

    pub async fn webhook_info(&self) -> Result<WebhookInfo, ClientError> {
        let value = self
            .client
            .request(ApiRequest::get(self.api_url("getWebhookInfo")))
            .await?;
        serde_json::from_value(result_of(value))
            .map_err(|e| ClientError::Transient(format!("malformed getWebhookInfo reply: {e}")))
    }
}

/// Unwraps the Bot API `{"ok": true, "result": ...}` envelope.
///
/// Non-2xx replies never reach here, so a missing `result` means a bare
/// payload; pass it through rather than failing.
fn result_of(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) => match map.remove("result") {
            Some(result) => result,
            None => serde_json::Value::Object(map),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_unwraps_result() {
        let value = json!({"ok": true, "result": {"id": 7}});
        assert_eq!(result_of(value), json!({"id": 7}));
    }

    #[test]
    fn bare_payload_passes_through() {
        let value = json!({"id": 7});
        assert_eq!(result_of(value), json!({"id": 7}));
    }

    #[test]
    fn webhook_info_tolerates_missing_fields() {
        let info: WebhookInfo = serde_json::from_value(json!({"url": ""})).unwrap();
        assert_eq!(info.url, "");
        assert_eq!(info.pending_update_count, 0);
        assert!(info.last_error_message.is_none());
    }
}
