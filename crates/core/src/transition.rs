//! The `(state, operation)` transition table for exam sessions.
//!
//! Every operation the engine performs on a session is named here, and the
//! match below is exhaustive over both axes, so adding a state or an operation
//! forces a decision for every pairing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::SessionState;

/// An operation requested against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOperation {
    /// `PENDING -> IN_PROGRESS`.
    Start,
    /// Read the session header or current question.
    Read,
    /// Record, change, skip or flag an answer.
    Answer,
    /// Change `current_index`.
    Move,
    /// Lazily applied consequence of an exhausted time budget.
    Expire,
    Finish,
    Cancel,
    /// Read the stored result.
    ViewResult,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransitionError {
    #[error("session has already finished ({0:?})")]
    AlreadyFinished(SessionState),

    #[error("session has not been started")]
    NotStarted,

    #[error("session is already in progress")]
    AlreadyStarted,

    #[error("session has no result yet ({0:?})")]
    NotCompleted(SessionState),
}

/// Returns the state a session ends up in after `op`, or why `op` is refused.
///
/// # Errors
///
/// Returns `TransitionError` for every pairing the lifecycle does not allow.
pub fn transition(
    state: SessionState,
    op: SessionOperation,
) -> Result<SessionState, TransitionError> {
    use SessionOperation as Op;
    use SessionState as S;

    match (state, op) {
        (S::Pending, Op::Start) => Ok(S::InProgress),
        (S::Pending, Op::Read) => Ok(S::Pending),
        (S::Pending, Op::Answer | Op::Move | Op::Expire | Op::Finish | Op::Cancel) => {
            Err(TransitionError::NotStarted)
        }
        (S::Pending, Op::ViewResult) => Err(TransitionError::NotCompleted(S::Pending)),

        (S::InProgress, Op::Start) => Err(TransitionError::AlreadyStarted),
        (S::InProgress, Op::Read | Op::Answer | Op::Move) => Ok(S::InProgress),
        (S::InProgress, Op::Expire | Op::Finish) => Ok(S::Completed),
        (S::InProgress, Op::Cancel) => Ok(S::Cancelled),
        (S::InProgress, Op::ViewResult) => Err(TransitionError::NotCompleted(S::InProgress)),

        (S::Completed, Op::Read | Op::ViewResult) => Ok(S::Completed),
        (
            S::Completed,
            Op::Start | Op::Answer | Op::Move | Op::Expire | Op::Finish | Op::Cancel,
        ) => Err(TransitionError::AlreadyFinished(S::Completed)),

        (S::Cancelled, Op::Read) => Ok(S::Cancelled),
        (S::Cancelled, Op::ViewResult) => Err(TransitionError::NotCompleted(S::Cancelled)),
        (
            S::Cancelled,
            Op::Start | Op::Answer | Op::Move | Op::Expire | Op::Finish | Op::Cancel,
        ) => Err(TransitionError::AlreadyFinished(S::Cancelled)),
    }
}
