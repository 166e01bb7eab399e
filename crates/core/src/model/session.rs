use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{QuestionId, SessionId, TemplateId, UserId};
use crate::model::question::{OptionLetter, QuestionRef};
use crate::model::template::{ExamConfig, MIN_QUESTION_COUNT};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionModelError {
    #[error("a session needs at least {min} questions, got {got}")]
    TooFewQuestions { min: usize, got: usize },

    #[error("question {0} appears more than once")]
    DuplicateQuestion(QuestionId),

    #[error("expected {expected} answer records, found {found}")]
    AnswerCountMismatch { expected: usize, found: usize },

    #[error("answer record at slot {slot} claims position {position} / question {question_id}")]
    PositionMismatch {
        slot: usize,
        position: usize,
        question_id: QuestionId,
    },

    #[error("current index {index} is outside 0..{len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("a result must be present exactly when the session is completed")]
    ResultStateMismatch,

    #[error("unknown session state: {0}")]
    UnknownState(String),
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Lifecycle of a single attempt. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// # Errors
    ///
    /// Returns `SessionModelError::UnknownState` for unrecognised values.
    pub fn parse(raw: &str) -> Result<Self, SessionModelError> {
        match raw {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(SessionModelError::UnknownState(other.to_owned())),
        }
    }
}

//
// ─── QUESTION IDS ──────────────────────────────────────────────────────────────
//

/// Ordered question sequence of a session. Its length is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionIds(Box<[QuestionId]>);

impl QuestionIds {
    /// # Errors
    ///
    /// Returns `SessionModelError` if the list is shorter than the minimum
    /// exam size or contains a repeated id.
    pub fn new(ids: Vec<QuestionId>) -> Result<Self, SessionModelError> {
        if ids.len() < MIN_QUESTION_COUNT as usize {
            return Err(SessionModelError::TooFewQuestions {
                min: MIN_QUESTION_COUNT as usize,
                got: ids.len(),
            });
        }
        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(*id) {
                return Err(SessionModelError::DuplicateQuestion(*id));
            }
        }
        Ok(Self(ids.into_boxed_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<QuestionId> {
        self.0.get(position).copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[QuestionId] {
        &self.0
    }
}

//
// ─── ANSWERS ───────────────────────────────────────────────────────────────────
//

/// Per-position answer record, created alongside the session.
///
/// `correct_option` is a snapshot taken at start; later edits to the question
/// never change how this attempt is scored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question_id: QuestionId,
    pub position: usize,
    pub chosen_option: Option<OptionLetter>,
    pub correct_option: OptionLetter,
    pub is_correct: Option<bool>,
    pub question_shown_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<u32>,
    pub skipped: bool,
    pub flagged_for_review: bool,
}

impl QuestionAnswer {
    #[must_use]
    pub fn blank(position: usize, question: &QuestionRef) -> Self {
        Self {
            question_id: question.id,
            position,
            chosen_option: None,
            correct_option: question.correct_option,
            is_correct: None,
            question_shown_at: None,
            answered_at: None,
            time_spent_seconds: None,
            skipped: false,
            flagged_for_review: false,
        }
    }

    /// Neither answered nor skipped yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.chosen_option.is_none() && !self.skipped
    }

    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.chosen_option.is_some() && !self.skipped
    }
}

//
// ─── RESULT / COUNTERS ─────────────────────────────────────────────────────────
//

/// Final score, computed once at completion and stored with the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamResult {
    pub total_questions: u32,
    pub answered_count: u32,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub skipped_count: u32,
    pub score_percent: u8,
    pub pass_threshold_percent: u8,
    pub passed: bool,
    pub finished_at: DateTime<Utc>,
    pub elapsed_seconds: u32,
}

/// Running tallies derived from the answer records. Never used for scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub answered: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub skipped: u32,
    pub flagged: u32,
}

impl SessionCounters {
    #[must_use]
    pub fn from_answers(answers: &[QuestionAnswer]) -> Self {
        let mut counters = Self::default();
        for answer in answers {
            if answer.is_answered() {
                counters.answered += 1;
            }
            match answer.is_correct {
                Some(true) => counters.correct += 1,
                Some(false) => counters.incorrect += 1,
                None => {}
            }
            if answer.skipped {
                counters.skipped += 1;
            }
            if answer.flagged_for_review {
                counters.flagged += 1;
            }
        }
        counters
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// Column-level shape used by storage adapters to rebuild a session.
#[derive(Debug, Clone)]
pub struct SessionParts {
    pub id: SessionId,
    pub user_id: UserId,
    pub template_id: Option<TemplateId>,
    pub name: String,
    pub config: ExamConfig,
    pub state: SessionState,
    pub questions: QuestionIds,
    pub answers: Vec<QuestionAnswer>,
    pub current_index: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub option_seed: Option<u64>,
    pub result: Option<ExamResult>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

/// One attempt at an exam by one user, together with its answer records.
///
/// Mutation happens only through `NavigationController`, which enforces the
/// `(state, operation)` transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamSession {
    pub(crate) id: SessionId,
    pub(crate) user_id: UserId,
    pub(crate) template_id: Option<TemplateId>,
    pub(crate) name: String,
    pub(crate) config: ExamConfig,
    pub(crate) state: SessionState,
    pub(crate) questions: QuestionIds,
    pub(crate) answers: Vec<QuestionAnswer>,
    pub(crate) current_index: usize,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) option_seed: Option<u64>,
    pub(crate) result: Option<ExamResult>,
    pub(crate) version: u64,
    pub(crate) created_at: DateTime<Utc>,
}

impl ExamSession {
    /// Builds a `Pending` session with one blank answer record per drawn question.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError` if the draw is too small or repeats a question.
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        id: SessionId,
        user_id: UserId,
        template_id: Option<TemplateId>,
        name: impl Into<String>,
        config: ExamConfig,
        picks: &[QuestionRef],
        option_seed: Option<u64>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SessionModelError> {
        let questions = QuestionIds::new(picks.iter().map(|q| q.id).collect())?;
        let answers = picks
            .iter()
            .enumerate()
            .map(|(position, q)| QuestionAnswer::blank(position, q))
            .collect();

        Ok(Self {
            id,
            user_id,
            template_id,
            name: name.into(),
            config,
            state: SessionState::Pending,
            questions,
            answers,
            current_index: 0,
            started_at: None,
            finished_at: None,
            option_seed,
            result: None,
            version: 0,
            created_at,
        })
    }

    /// Rehydrate a session from persisted storage, re-checking its invariants.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError` if answer records do not line up with the
    /// question list, the index is out of range, or the result/state pairing
    /// is inconsistent.
    pub fn from_persisted(parts: SessionParts) -> Result<Self, SessionModelError> {
        let len = parts.questions.len();
        if parts.answers.len() != len {
            return Err(SessionModelError::AnswerCountMismatch {
                expected: len,
                found: parts.answers.len(),
            });
        }
        for (slot, answer) in parts.answers.iter().enumerate() {
            if answer.position != slot || parts.questions.get(slot) != Some(answer.question_id) {
                return Err(SessionModelError::PositionMismatch {
                    slot,
                    position: answer.position,
                    question_id: answer.question_id,
                });
            }
        }
        if parts.current_index >= len {
            return Err(SessionModelError::IndexOutOfRange {
                index: parts.current_index,
                len,
            });
        }
        if parts.result.is_some() != (parts.state == SessionState::Completed) {
            return Err(SessionModelError::ResultStateMismatch);
        }

        Ok(Self {
            id: parts.id,
            user_id: parts.user_id,
            template_id: parts.template_id,
            name: parts.name,
            config: parts.config,
            state: parts.state,
            questions: parts.questions,
            answers: parts.answers,
            current_index: parts.current_index,
            started_at: parts.started_at,
            finished_at: parts.finished_at,
            option_seed: parts.option_seed,
            result: parts.result,
            version: parts.version,
            created_at: parts.created_at,
        })
    }

    /// Returns the session stamped with the version the store committed.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn template_id(&self) -> Option<TemplateId> {
        self.template_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &ExamConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn questions(&self) -> &QuestionIds {
        &self.questions
    }

    #[must_use]
    pub fn answers(&self) -> &[QuestionAnswer] {
        &self.answers
    }

    #[must_use]
    pub fn answer(&self, position: usize) -> Option<&QuestionAnswer> {
        self.answers.get(position)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn current_question_id(&self) -> Option<QuestionId> {
        self.questions.get(self.current_index)
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    #[must_use]
    pub fn option_seed(&self) -> Option<u64> {
        self.option_seed
    }

    #[must_use]
    pub fn result(&self) -> Option<&ExamResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn counters(&self) -> SessionCounters {
        SessionCounters::from_answers(&self.answers)
    }

    #[must_use]
    pub fn is_last_position(&self) -> bool {
        self.current_index + 1 >= self.questions.len()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
