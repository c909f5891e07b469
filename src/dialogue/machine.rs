//! Pure dialogue transitions.
//!
//! [`apply`] mutates the session and returns the side effects the engine
//! must perform, in order. Nothing here touches the network or the store,
//! which keeps every transition unit-testable.

use serde_json::json;

use crate::quiz::{self, QuizDefinition};
use crate::session::{QuizType, SessionState, UserSession};

/// Callback payloads baked into the quiz-type keyboard. Stable wire
/// contract: old keyboards in chat history keep working across deploys.
pub const CALLBACK_ANONYMOUS: &str = "anon_true";
pub const CALLBACK_NON_ANONYMOUS: &str = "anon_false";

#[derive(Debug, Clone, PartialEq)]
pub enum DialogueEvent {
    Start { user_name: Option<String> },
    Help,
    Template,
    Status,
    QuizTypeChosen {
        callback_id: String,
        message_id: Option<i64>,
        quiz_type: QuizType,
    },
    UnknownCallback { callback_id: String },
    Payload { text: String },
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Reply(String),
    ReplyWithKeyboard {
        text: String,
        keyboard: serde_json::Value,
    },
    EditMessage { message_id: i64, text: String },
    AnswerCallback {
        callback_id: String,
        text: Option<String>,
    },
    SendStatus,
    DeliverQuiz(QuizDefinition),
}

/// Advances the session for one event.
pub fn apply(session: &mut UserSession, event: &DialogueEvent, max_questions: usize) -> Vec<Effect> {
    match event {
        DialogueEvent::Start { user_name } => {
            // Fresh flow; quiz_count survives as the user's running total.
            session.state = SessionState::AwaitingQuizType;
            session.quiz_type = None;
            session.pending_payload = None;
            vec![Effect::ReplyWithKeyboard {
                text: welcome(user_name.as_deref()),
                keyboard: quiz_type_keyboard(),
            }]
        }
        DialogueEvent::Help => vec![Effect::Reply(HELP_TEXT.to_string())],
        DialogueEvent::Template => vec![Effect::Reply(template_reply())],
        DialogueEvent::Status => vec![Effect::SendStatus],
        DialogueEvent::QuizTypeChosen {
            callback_id,
            message_id,
            quiz_type,
        } => match session.state {
            // Re-choosing while already waiting for JSON just updates the type.
            SessionState::AwaitingQuizType | SessionState::AwaitingQuizJson => {
                session.quiz_type = Some(*quiz_type);
                session.state = SessionState::AwaitingQuizJson;
                let mut effects = vec![Effect::AnswerCallback {
                    callback_id: callback_id.clone(),
                    text: None,
                }];
                if let Some(message_id) = *message_id {
                    effects.push(Effect::EditMessage {
                        message_id,
                        text: format!("✅ *{} quiz selected*", type_label(*quiz_type)),
                    });
                }
                effects.push(Effect::Reply(type_instructions(*quiz_type)));
                effects
            }
            _ => vec![
                Effect::AnswerCallback {
                    callback_id: callback_id.clone(),
                    text: Some("That keyboard has expired".to_string()),
                },
                Effect::Reply(START_HINT.to_string()),
            ],
        },
        DialogueEvent::UnknownCallback { callback_id } => vec![Effect::AnswerCallback {
            callback_id: callback_id.clone(),
            text: None,
        }],
        DialogueEvent::Payload { text } => match session.state {
            SessionState::AwaitingQuizJson => match quiz::parse_quiz(text, max_questions) {
                Ok(definition) => {
                    session.state = SessionState::Processing;
                    session.pending_payload = Some(text.clone());
                    vec![
                        Effect::Reply(format!(
                            "🔄 *Processing your quiz...* sending {} question(s).",
                            definition.questions.len()
                        )),
                        Effect::DeliverQuiz(definition),
                    ]
                }
                Err(error) => vec![Effect::Reply(format!(
                    "❌ {error}\n\nFix the payload and send it again, or use /template for a working example."
                ))],
            },
            SessionState::AwaitingQuizType => vec![Effect::Reply(
                "Pick a quiz type with the buttons above first, or send /start to begin again."
                    .to_string(),
            )],
            SessionState::Processing => vec![Effect::Reply(
                "Still delivering your previous quiz, one moment.".to_string(),
            )],
            SessionState::Init | SessionState::Complete | SessionState::Error => {
                vec![Effect::Reply(START_HINT.to_string())]
            }
        },
        DialogueEvent::Unsupported => vec![Effect::Reply(UNKNOWN_HINT.to_string())],
    }
}

/// Settles the session after a delivery pass.
pub fn complete_delivery(
    session: &mut UserSession,
    succeeded: usize,
    failed: usize,
) -> Vec<Effect> {
    session.quiz_count += 1;
    session.pending_payload = None;
    let label = type_label(session.quiz_type.unwrap_or(QuizType::Anonymous));
    if failed == 0 {
        session.state = SessionState::Complete;
        vec![Effect::Reply(format!(
            "🎯 *{succeeded} {label} quiz question(s) sent!* ✅\n\nCreate another? Use /start."
        ))]
    } else {
        session.state = SessionState::Error;
        vec![Effect::Reply(format!(
            "⚠️ Delivered {succeeded} question(s), {failed} failed.\n\nUse /start to try again."
        ))]
    }
}

pub fn quiz_type_keyboard() -> serde_json::Value {
    json!({
        "inline_keyboard": [
            [{"text": "🔒 Anonymous quiz (forwardable)", "callback_data": CALLBACK_ANONYMOUS}],
            [{"text": "👤 Non-anonymous quiz (shows voters)", "callback_data": CALLBACK_NON_ANONYMOUS}]
        ]
    })
}

const START_HINT: &str = "Use /start to begin creating a quiz. ✨";

const UNKNOWN_HINT: &str =
    "🎯 I build Telegram quizzes from JSON. Use /start to begin, /help for the full guide.";

const HELP_TEXT: &str = "🆘 *Quiz Bot Help*\n\n\
*Commands:*\n\
• /start - begin quiz creation\n\
• /template - get the JSON template\n\
• /status - bot health and counters\n\
• /help - this message\n\n\
*JSON format:*\n\
• `all_q` - array of questions\n\
• `q` - question text\n\
• `o` - answer options (2-10 choices)\n\
• `c` - correct answer index (0 = first option)\n\
• `e` - explanation, optional\n\n\
Quick start: /start 🚀";

fn welcome(user_name: Option<&str>) -> String {
    format!(
        "👋 Hello {}!\n\n\
         🎯 *Quiz Bot* turns JSON into ready-to-answer quizzes.\n\n\
         1️⃣ Choose a quiz type below\n\
         2️⃣ Grab the JSON template\n\
         3️⃣ Fill in your questions\n\
         4️⃣ Send it back and the quizzes appear\n",
        user_name.unwrap_or("there")
    )
}

fn template_reply() -> String {
    format!(
        "📋 *JSON template:*\n```\n{}\n```\nCustomize the questions and send the JSON back. 👇",
        quiz::TEMPLATE
    )
}

fn type_label(quiz_type: QuizType) -> &'static str {
    match quiz_type {
        QuizType::Anonymous => "🔒 anonymous",
        QuizType::NonAnonymous => "👤 non-anonymous",
    }
}

fn type_instructions(quiz_type: QuizType) -> String {
    format!(
        "✅ *{} quiz selected!*\n\n\
         Send your quiz JSON now. Need the format? Use /template.\n\
         Up to 25 questions per quiz, 2-10 options each. 👇",
        type_label(quiz_type)
    )
}
