use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::{MaterialId, QuestionId};

//
// ─── RESPONSE TYPES ────────────────────────────────────────────────────────────
//

/// How the learner responds to a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    MultipleChoice,
    OpenResponse,
}

impl ResponseType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::MultipleChoice => "multiple_choice",
            ResponseType::OpenResponse => "open_response",
        }
    }

    /// Parses a stored response-type tag.
    #[must_use]
    pub fn from_str_opt(raw: &str) -> Option<Self> {
        match raw {
            "multiple_choice" => Some(ResponseType::MultipleChoice),
            "open_response" => Some(ResponseType::OpenResponse),
            _ => None,
        }
    }
}

/// Expected answer for a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Answer {
    /// Index into the ordered option list.
    Choice(usize),
    /// Ideal free-text answer for open-response items.
    Ideal(String),
}

//
// ─── FINGERPRINT ───────────────────────────────────────────────────────────────
//

/// Deduplication key: the exact trimmed question text, case-sensitive.
///
/// Identical text from two conceptually different questions collapses to one
/// fingerprint; paraphrases are not detected.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn of(text: &str) -> Self {
        Self(text.trim().to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:?})", self.0)
    }
}

//
// ─── ORIGIN ────────────────────────────────────────────────────────────────────
//

/// Attribution of a question to the material it was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub id: MaterialId,
    pub title: String,
}

impl Origin {
    #[must_use]
    pub fn new(id: MaterialId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }
}

//
// ─── VALIDATION ERRORS ─────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuestionValidationError {
    #[error("question text must not be blank")]
    BlankText,

    #[error("multiple-choice questions need at least two options")]
    TooFewOptions,

    #[error("correct option index {index} is out of range for {len} options")]
    OptionIndexOutOfRange { index: usize, len: usize },

    #[error("open-response questions must not carry options")]
    UnexpectedOptions,

    #[error("open-response questions need a non-blank ideal answer")]
    MissingIdealAnswer,

    #[error("answer kind does not match the {0:?} response type")]
    AnswerKindMismatch(ResponseType),

    #[error("spawned questions must point back to their seed")]
    MissingLineage,
}

//
// ─── DRAFT (unvalidated input) ─────────────────────────────────────────────────
//

/// Unvalidated question input, as returned by the generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub text: String,
    pub response_type: ResponseType,
    #[serde(default)]
    pub options: Vec<String>,
    pub answer: Answer,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub illustration_prompt: String,
    #[serde(default)]
    pub language: String,
}

impl QuestionDraft {
    /// Shorthand for a multiple-choice draft.
    #[must_use]
    pub fn multiple_choice(
        text: impl Into<String>,
        options: Vec<String>,
        correct_index: usize,
    ) -> Self {
        Self {
            text: text.into(),
            response_type: ResponseType::MultipleChoice,
            options,
            answer: Answer::Choice(correct_index),
            explanation: String::new(),
            illustration_prompt: String::new(),
            language: String::new(),
        }
    }

    /// Shorthand for an open-response draft.
    #[must_use]
    pub fn open_response(text: impl Into<String>, ideal: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            response_type: ResponseType::OpenResponse,
            options: Vec::new(),
            answer: Answer::Ideal(ideal.into()),
            explanation: String::new(),
            illustration_prompt: String::new(),
            language: String::new(),
        }
    }

    /// Validate the draft into a `Question` attributed to `origin`.
    ///
    /// # Errors
    ///
    /// Returns `QuestionValidationError` when the text is blank, the option
    /// list does not match the response type, or the answer kind disagrees
    /// with the response type.
    pub fn validate(
        self,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<Question, QuestionValidationError> {
        if self.text.trim().is_empty() {
            return Err(QuestionValidationError::BlankText);
        }

        match self.response_type {
            ResponseType::MultipleChoice => {
                if self.options.len() < 2 {
                    return Err(QuestionValidationError::TooFewOptions);
                }
                match &self.answer {
                    Answer::Choice(index) => {
                        if *index >= self.options.len() {
                            return Err(QuestionValidationError::OptionIndexOutOfRange {
                                index: *index,
                                len: self.options.len(),
                            });
                        }
                    }
                    Answer::Ideal(_) => {
                        return Err(QuestionValidationError::AnswerKindMismatch(
                            self.response_type,
                        ));
                    }
                }
            }
            ResponseType::OpenResponse => {
                if !self.options.is_empty() {
                    return Err(QuestionValidationError::UnexpectedOptions);
                }
                match &self.answer {
                    Answer::Ideal(ideal) => {
                        if ideal.trim().is_empty() {
                            return Err(QuestionValidationError::MissingIdealAnswer);
                        }
                    }
                    Answer::Choice(_) => {
                        return Err(QuestionValidationError::AnswerKindMismatch(
                            self.response_type,
                        ));
                    }
                }
            }
        }

        Ok(Question {
            id: QuestionId::generate(),
            text: self.text,
            response_type: self.response_type,
            options: self.options,
            answer: self.answer,
            explanation: self.explanation,
            illustration_prompt: self.illustration_prompt,
            language: self.language,
            origin_id: origin.id,
            origin_title: origin.title,
            liked: false,
            spawned: false,
            spawned_from: None,
            created_at: now,
        })
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A validated quiz item tied to its origin material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    text: String,
    response_type: ResponseType,
    options: Vec<String>,
    answer: Answer,
    explanation: String,
    illustration_prompt: String,
    language: String,
    origin_id: MaterialId,
    origin_title: String,
    liked: bool,
    spawned: bool,
    spawned_from: Option<String>,
    created_at: DateTime<Utc>,
}

impl Question {
    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn answer(&self) -> &Answer {
        &self.answer
    }

    #[must_use]
    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    #[must_use]
    pub fn illustration_prompt(&self) -> &str {
        &self.illustration_prompt
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub fn origin_id(&self) -> &MaterialId {
        &self.origin_id
    }

    #[must_use]
    pub fn origin_title(&self) -> &str {
        &self.origin_title
    }

    #[must_use]
    pub fn liked(&self) -> bool {
        self.liked
    }

    pub fn set_liked(&mut self, liked: bool) {
        self.liked = liked;
    }

    #[must_use]
    pub fn spawned(&self) -> bool {
        self.spawned
    }

    /// For spawned questions, the text of the seed question that triggered them.
    #[must_use]
    pub fn spawned_from(&self) -> Option<&str> {
        self.spawned_from.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Deduplication key for this question.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.text)
    }

    /// Marks this question as spawned from the given seed text.
    ///
    /// # Errors
    ///
    /// Returns `QuestionValidationError::MissingLineage` when the seed text is
    /// blank: every spawned question carries a non-empty lineage pointer.
    pub fn into_spawned(mut self, seed_text: &str) -> Result<Self, QuestionValidationError> {
        if seed_text.trim().is_empty() {
            return Err(QuestionValidationError::MissingLineage);
        }
        self.spawned = true;
        self.spawned_from = Some(seed_text.trim().to_owned());
        Ok(self)
    }

    /// Rebuilds a question from persisted state, bypassing draft validation.
    ///
    /// Storage rows were validated on the way in; this constructor only
    /// re-checks the lineage invariant.
    ///
    /// # Errors
    ///
    /// Returns `QuestionValidationError::MissingLineage` if the row is marked
    /// spawned without a seed pointer.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: QuestionId,
        text: String,
        response_type: ResponseType,
        options: Vec<String>,
        answer: Answer,
        explanation: String,
        illustration_prompt: String,
        language: String,
        origin_id: MaterialId,
        origin_title: String,
        liked: bool,
        spawned: bool,
        spawned_from: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, QuestionValidationError> {
        if spawned && spawned_from.as_deref().is_none_or(|s| s.trim().is_empty()) {
            return Err(QuestionValidationError::MissingLineage);
        }
        Ok(Self {
            id,
            text,
            response_type,
            options,
            answer,
            explanation,
            illustration_prompt,
            language,
            origin_id,
            origin_title,
            liked,
            spawned,
            spawned_from,
            created_at,
        })
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
