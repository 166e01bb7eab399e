//! Remaining-time computation for the three timing regimes.
//!
//! Everything here is a pure function of stored timestamps and an instant
//! supplied by the caller's `Clock`. A client never reports how much time it
//! has left; the engine derives it.

use chrono::{DateTime, Duration, Utc};

use crate::model::{ExamSession, SessionState, Timing};
use crate::time::elapsed_secs;

/// What the timer says about a session at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    /// Practice mode, or the session is not in progress.
    Unbounded,
    /// Budget left on the running clock.
    Running { remaining_secs: u32 },
    /// The whole-exam budget ran out at `deadline`.
    TotalExpired { deadline: DateTime<Utc> },
    /// The current position's budget ran out at `deadline`.
    QuestionExpired {
        position: usize,
        deadline: DateTime<Utc>,
    },
}

impl TimerStatus {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(
            self,
            TimerStatus::TotalExpired { .. } | TimerStatus::QuestionExpired { .. }
        )
    }

    /// Seconds to show on a countdown; `None` when there is no countdown.
    #[must_use]
    pub fn remaining_secs(&self) -> Option<u32> {
        match self {
            TimerStatus::Unbounded => None,
            TimerStatus::Running { remaining_secs } => Some(*remaining_secs),
            TimerStatus::TotalExpired { .. } | TimerStatus::QuestionExpired { .. } => Some(0),
        }
    }
}

pub struct TimerPolicy;

impl TimerPolicy {
    /// Instant at which the whole-exam budget runs out.
    #[must_use]
    pub fn total_deadline(session: &ExamSession) -> Option<DateTime<Utc>> {
        let budget = session.config().timing.total_budget_secs()?;
        let started_at = session.started_at()?;
        Some(started_at + Duration::seconds(i64::from(budget)))
    }

    /// Instant at which the budget of the question at `position` runs out.
    #[must_use]
    pub fn question_deadline(session: &ExamSession, position: usize) -> Option<DateTime<Utc>> {
        let budget = session.config().timing.per_question_budget_secs()?;
        let shown_at = session.answer(position)?.question_shown_at?;
        Some(shown_at + Duration::seconds(i64::from(budget)))
    }

    /// `remaining = max(0, budget - elapsed)`, with zero remaining meaning expired.
    #[must_use]
    pub fn status(session: &ExamSession, now: DateTime<Utc>) -> TimerStatus {
        if session.state() != SessionState::InProgress {
            return TimerStatus::Unbounded;
        }

        match session.config().timing {
            Timing::Practice => TimerStatus::Unbounded,
            Timing::TotalTime { budget_secs } => {
                let Some(started_at) = session.started_at() else {
                    return TimerStatus::Unbounded;
                };
                Self::evaluate(budget_secs, started_at, now, |deadline| {
                    TimerStatus::TotalExpired { deadline }
                })
            }
            Timing::PerQuestionTime { budget_secs } => {
                let position = session.current_index();
                let Some(shown_at) = session
                    .answer(position)
                    .and_then(|answer| answer.question_shown_at)
                else {
                    // Not shown yet: the clock for this position has not started.
                    return TimerStatus::Running {
                        remaining_secs: budget_secs,
                    };
                };
                Self::evaluate(budget_secs, shown_at, now, |deadline| {
                    TimerStatus::QuestionExpired { position, deadline }
                })
            }
        }
    }

    /// Countdown value for views. `None` in practice mode or outside `IN_PROGRESS`.
    #[must_use]
    pub fn remaining_secs(session: &ExamSession, now: DateTime<Utc>) -> Option<u32> {
        Self::status(session, now).remaining_secs()
    }

    fn evaluate(
        budget_secs: u32,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        expired: impl FnOnce(DateTime<Utc>) -> TimerStatus,
    ) -> TimerStatus {
        let remaining_secs = budget_secs.saturating_sub(elapsed_secs(since, now));
        if remaining_secs == 0 {
            expired(since + Duration::seconds(i64::from(budget_secs)))
        } else {
            TimerStatus::Running { remaining_secs }
        }
    }
}
