//! Quiz payload parsing and bounds validation.
//!
//! The wire schema is the compact one quiz authors paste into the chat:
//! a top-level `all_q` array with `q` (question), `o` (options), `c`
//! (correct index) and optional `e` (explanation) per entry. Bounds match
//! what the poll API accepts; anything outside them is reported as the
//! first violated rule with its question number instead of being silently
//! clipped, so authors can fix the payload rather than guess why a poll
//! came out mangled.

use serde::{Deserialize, Serialize};

pub const MAX_QUESTION_CHARS: usize = 300;
pub const MAX_OPTION_CHARS: usize = 100;
pub const MAX_EXPLANATION_CHARS: usize = 200;
pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizDefinition {
    #[serde(rename = "all_q", default)]
    pub questions: Vec<QuestionSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSpec {
    #[serde(rename = "q")]
    pub text: String,
    #[serde(rename = "o")]
    pub options: Vec<String>,
    #[serde(rename = "c")]
    pub correct_index: usize,
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuizValidationError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),
    #[error("no questions found under \"all_q\"")]
    Empty,
    #[error("question {number}: text is empty")]
    EmptyQuestion { number: usize },
    #[error("question {number}: text exceeds 300 characters")]
    QuestionTooLong { number: usize },
    #[error("question {number}: needs 2 to 10 options, got {got}")]
    BadOptionCount { number: usize, got: usize },
    #[error("question {number}: option {option} exceeds 100 characters")]
    OptionTooLong { number: usize, option: usize },
    #[error("question {number}: correct answer {index} is out of range for {options} options")]
    CorrectIndexOutOfRange {
        number: usize,
        index: usize,
        options: usize,
    },
    #[error("question {number}: explanation exceeds 200 characters")]
    ExplanationTooLong { number: usize },
}

/// Parse a raw payload into a validated quiz.
///
/// Lists over `max_questions` are truncated to the cap before validation;
/// everything else must pass the bounds or the first violation comes back
/// as the error.
pub fn parse_quiz(
    payload: &str,
    max_questions: usize,
) -> Result<QuizDefinition, QuizValidationError> {
    let mut quiz: QuizDefinition = serde_json::from_str(payload)
        .map_err(|e| QuizValidationError::Malformed(e.to_string()))?;

    if quiz.questions.is_empty() {
        return Err(QuizValidationError::Empty);
    }
    if quiz.questions.len() > max_questions {
        tracing::warn!(
            submitted = quiz.questions.len(),
            max_questions,
            "quiz over question cap, truncating"
        );
        quiz.questions.truncate(max_questions);
    }

    for (i, question) in quiz.questions.iter().enumerate() {
        question.validate(i + 1)?;
    }
    Ok(quiz)
}

impl QuestionSpec {
    fn validate(&self, number: usize) -> Result<(), QuizValidationError> {
        if self.text.trim().is_empty() {
            return Err(QuizValidationError::EmptyQuestion { number });
        }
        if self.text.chars().count() > MAX_QUESTION_CHARS {
            return Err(QuizValidationError::QuestionTooLong { number });
        }
        if self.options.len() < MIN_OPTIONS || self.options.len() > MAX_OPTIONS {
            return Err(QuizValidationError::BadOptionCount {
                number,
                got: self.options.len(),
            });
        }
        for (i, option) in self.options.iter().enumerate() {
            if option.chars().count() > MAX_OPTION_CHARS {
                return Err(QuizValidationError::OptionTooLong {
                    number,
                    option: i + 1,
                });
            }
        }
        if self.correct_index >= self.options.len() {
            return Err(QuizValidationError::CorrectIndexOutOfRange {
                number,
                index: self.correct_index,
                options: self.options.len(),
            });
        }
        if let Some(explanation) = &self.explanation
            && explanation.chars().count() > MAX_EXPLANATION_CHARS
        {
            return Err(QuizValidationError::ExplanationTooLong { number });
        }
        Ok(())
    }
}

/// Example payload sent by the /template command. Kept parseable so the
/// copy in the chat always matches what the validator accepts.
pub const TEMPLATE: &str = r#"{
  "all_q": [
    {
      "q": "Which planet has the strongest recorded winds?",
      "o": ["Neptune", "Mars", "Venus"],
      "c": 0,
      "e": "Neptune's winds pass 2000 km/h"
    },
    {
      "q": "'Ephemeral' most nearly means:",
      "o": ["Short-lived", "Eternal"],
      "c": 0
    }
  ]
}"#;
