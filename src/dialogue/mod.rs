//! Per-user dialogue orchestration.
//!
//! [`DialogueEngine`] turns raw webhook updates into state-machine events,
//! runs them under the user's session lease and performs the resulting
//! effects against the Bot API. All delivery errors are absorbed here;
//! a webhook update never propagates a failure back to the gateway.

pub mod machine;

use std::sync::Arc;

use crate::health::{Metrics, MetricsSnapshot};
use crate::quiz::QuizDefinition;
use crate::session::{QuizType, SessionStore, UserSession};
use crate::telegram::{TelegramApi, Update};

pub use machine::{DialogueEvent, Effect};

pub struct DialogueEngine {
    api: Arc<TelegramApi>,
    store: Arc<SessionStore>,
    metrics: Arc<Metrics>,
    max_questions: usize,
}

impl DialogueEngine {
    pub fn new(
        api: Arc<TelegramApi>,
        store: Arc<SessionStore>,
        metrics: Arc<Metrics>,
        max_questions: usize,
    ) -> Self {
        Self {
            api,
            store,
            metrics,
            max_questions,
        }
    }

    /// Processes one update end to end.
    ///
    /// Holds the user's lease for the whole exchange, so two updates from
    /// the same user are applied strictly in arrival order.
    pub async fn handle_update(&self, update: Update) {
        self.metrics.record_request();

        let Some((user_id, chat_id, event)) = classify(&update) else {
            tracing::debug!(update_id = update.update_id, "update carries nothing actionable");
            return;
        };

        let _lease = self.store.acquire(user_id).await;

        let mut session = self
            .store
            .get(user_id)
            .await
            .unwrap_or_else(|| UserSession::new(user_id, chat_id));
        // Follow the user to whichever chat the update came from.
        session.chat_id = chat_id;
        session.touch();

        let effects = machine::apply(&mut session, &event, self.max_questions);
        // Persist before acting so a crash mid-delivery can resume from
        // Processing instead of losing the accepted payload.
        self.store.put(&session).await;

        for effect in effects {
            self.run_effect(&mut session, effect).await;
        }
    }

    async fn run_effect(&self, session: &mut UserSession, effect: Effect) {
        let chat_id = session.chat_id;
        match effect {
            Effect::Reply(text) => self.send(chat_id, &text).await,
            Effect::ReplyWithKeyboard { text, keyboard } => {
                if let Err(error) = self
                    .api
                    .send_message_with_keyboard(chat_id, &text, keyboard)
                    .await
                {
                    tracing::warn!(chat_id, error = %error, "keyboard reply failed");
                }
            }
            Effect::EditMessage { message_id, text } => {
                // Edits are cosmetic; a miss (message too old, already
                // edited) is not worth surfacing to the user.
                if let Err(error) = self.api.edit_message_text(chat_id, message_id, &text).await {
                    tracing::debug!(chat_id, message_id, error = %error, "message edit failed");
                }
            }
            Effect::AnswerCallback { callback_id, text } => {
                if let Err(error) = self
                    .api
                    .answer_callback_query(&callback_id, text.as_deref())
                    .await
                {
                    tracing::debug!(error = %error, "callback answer failed");
                }
            }
            Effect::SendStatus => {
                let text = render_status(&self.metrics.snapshot(), self.store.backend_name());
                self.send(chat_id, &text).await;
            }
            Effect::DeliverQuiz(definition) => self.deliver_quiz(session, definition).await,
        }
    }

    /// Sends every question in order, tolerating individual failures.
    async fn deliver_quiz(&self, session: &mut UserSession, definition: QuizDefinition) {
        let is_anonymous = !matches!(session.quiz_type, Some(QuizType::NonAnonymous));
        let total = definition.questions.len();
        let mut succeeded = 0usize;

        for (index, question) in definition.questions.iter().enumerate() {
            match self
                .api
                .send_quiz_poll(session.chat_id, question, is_anonymous)
                .await
            {
                Ok(()) => {
                    succeeded += 1;
                    self.metrics.record_successful_send();
                }
                Err(error) => {
                    tracing::warn!(
                        user_id = session.user_id,
                        question = index + 1,
                        total,
                        error = %error,
                        "quiz question delivery failed"
                    );
                }
            }
        }

        let failed = total - succeeded;
        let effects = machine::complete_delivery(session, succeeded, failed);
        self.store.put(session).await;

        for effect in effects {
            if let Effect::Reply(text) = effect {
                self.send(session.chat_id, &text).await;
            }
        }
        tracing::info!(
            user_id = session.user_id,
            succeeded,
            failed,
            "quiz delivery finished"
        );
    }

    async fn send(&self, chat_id: i64, text: &str) {
        if let Err(error) = self.api.send_message(chat_id, text).await {
            tracing::warn!(chat_id, error = %error, "reply delivery failed");
        }
    }
}

/// Maps an update to the user it belongs to and the event it represents.
///
/// Returns `None` for updates with no addressable user, e.g. channel posts
/// without a `from` or callbacks whose origin message is gone.
fn classify(update: &Update) -> Option<(i64, i64, DialogueEvent)> {
    if let Some(message) = &update.message {
        let user = message.from.as_ref()?;
        let text = message.text.as_deref().unwrap_or("").trim();

        let event = if text.is_empty() {
            DialogueEvent::Unsupported
        } else if let Some(rest) = text.strip_prefix('/') {
            let command = rest.split_whitespace().next().unwrap_or("");
            // Group chats suffix commands with the bot name.
            match command.split('@').next().unwrap_or(command) {
                "start" => DialogueEvent::Start {
                    user_name: user.first_name.clone(),
                },
                "help" => DialogueEvent::Help,
                "template" => DialogueEvent::Template,
                "status" => DialogueEvent::Status,
                _ => DialogueEvent::Unsupported,
            }
        } else {
            DialogueEvent::Payload {
                text: text.to_string(),
            }
        };
        return Some((user.id, message.chat.id, event));
    }

    if let Some(callback) = &update.callback_query {
        let chat_id = callback.message.as_ref().map(|m| m.chat.id)?;
        let message_id = callback.message.as_ref().map(|m| m.message_id);

        let event = match callback.data.as_deref() {
            Some(machine::CALLBACK_ANONYMOUS) => DialogueEvent::QuizTypeChosen {
                callback_id: callback.id.clone(),
                message_id,
                quiz_type: QuizType::Anonymous,
            },
            Some(machine::CALLBACK_NON_ANONYMOUS) => DialogueEvent::QuizTypeChosen {
                callback_id: callback.id.clone(),
                message_id,
                quiz_type: QuizType::NonAnonymous,
            },
            _ => DialogueEvent::UnknownCallback {
                callback_id: callback.id.clone(),
            },
        };
        return Some((callback.from.id, chat_id, event));
    }

    None
}

fn render_status(snapshot: &MetricsSnapshot, backend: &str) -> String {
    let hours = snapshot.uptime_seconds / 3600;
    let minutes = (snapshot.uptime_seconds % 3600) / 60;
    format!(
        "📊 *Bot status*\n\n\
         ⏱️ Uptime: {hours}h {minutes}m\n\
         📈 Requests: {}\n\
         🎯 Polls sent: {}\n\
         🔧 API calls: {}\n\
         ⚡ Rate limits: {}\n\
         🔁 Retries: {}\n\
         💾 Storage: {backend}",
        snapshot.total_requests,
        snapshot.successful_sends,
        snapshot.api_calls,
        snapshot.rate_limit_hits,
        snapshot.retry_attempts,
    )
}
