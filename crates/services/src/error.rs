//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{
    QuestionId, SessionModelError, SessionState, TemplateError, TemplateId,
};
use exam_core::navigation::NavigationError;
use exam_core::transition::TransitionError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `SessionManager` and `ExamHistoryService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExamError {
    #[error("not enough eligible questions: found {available}, need at least {minimum}")]
    InsufficientQuestions { available: usize, minimum: usize },

    #[error("session not found")]
    SessionNotFound,

    #[error("caller does not own this session")]
    NotAuthorized,

    #[error("session already finished ({0:?})")]
    SessionAlreadyFinished(SessionState),

    #[error("session has not been started")]
    SessionNotStarted,

    #[error("session is already in progress")]
    SessionAlreadyStarted,

    #[error("session has no result ({0:?})")]
    SessionNotCompleted(SessionState),

    #[error("invalid navigation: {0}")]
    InvalidNavigation(NavigationError),

    #[error("invalid answer: {0}")]
    InvalidAnswerFormat(String),

    #[error("answer at position {0} is locked once revealed")]
    AnswerLocked(usize),

    #[error("session was modified concurrently; reload and retry")]
    ConcurrentModification,

    #[error("template {0} not found")]
    TemplateNotFound(TemplateId),

    #[error("template {0} is inactive")]
    TemplateInactive(TemplateId),

    #[error("invalid exam parameters: {0}")]
    InvalidParams(#[from] TemplateError),

    #[error("question {0} is no longer available")]
    QuestionUnavailable(QuestionId),

    #[error(transparent)]
    Session(#[from] SessionModelError),

    /// Transient storage failure; nothing was written.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ExamError {
    /// True for failures where re-reading and retrying the same call is safe.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification | Self::Storage(_))
    }
}

impl From<TransitionError> for ExamError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::AlreadyFinished(state) => Self::SessionAlreadyFinished(state),
            TransitionError::NotStarted => Self::SessionNotStarted,
            TransitionError::AlreadyStarted => Self::SessionAlreadyStarted,
            TransitionError::NotCompleted(state) => Self::SessionNotCompleted(state),
            other => Self::InvalidNavigation(NavigationError::Transition(other)),
        }
    }
}

impl From<NavigationError> for ExamError {
    fn from(err: NavigationError) -> Self {
        match err {
            NavigationError::Transition(inner) => inner.into(),
            NavigationError::AnswerLocked(position) => Self::AnswerLocked(position),
            other => Self::InvalidNavigation(other),
        }
    }
}

/// Errors emitted by `TemplateService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TemplateServiceError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("template {0} not found")]
    NotFound(TemplateId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure reported by a post-commit event sink. Logged, never propagated.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Other(String),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
