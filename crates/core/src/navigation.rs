//! Applies lifecycle operations to an `ExamSession`.
//!
//! Every function first consults the transition table, then mutates the
//! session in place. Callers work on a loaded copy and persist it only when
//! the whole operation succeeded.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{ExamMode, ExamSession, OptionLetter, SessionState};
use crate::scoring::ScoringEngine;
use crate::time::elapsed_secs;
use crate::timer::{TimerPolicy, TimerStatus};
use crate::transition::{SessionOperation, TransitionError, transition};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NavigationError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("position {target} is outside 0..{len}")]
    OutOfRange { target: usize, len: usize },

    #[error("moving back from {from} to {to} is not allowed")]
    BacktrackDisabled { from: usize, to: usize },

    #[error("position {position} cannot be answered while at {current}")]
    PositionNotAnswerable { position: usize, current: usize },

    #[error("answer at position {0} is locked")]
    AnswerLocked(usize),
}

/// What a `submit_answer` call does to the targeted position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerAction {
    Choose(OptionLetter),
    Skip,
    /// Leave choice and skip untouched; only update the review flag.
    FlagOnly,
}

/// Outcome of the lazy per-question expiry check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expiry {
    /// Positions whose budget ran out during this check, in order.
    pub expired_positions: Vec<usize>,
    /// The last position ran out and the session was completed.
    pub finished: bool,
}

impl Expiry {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired_positions.is_empty() && !self.finished
    }

    #[must_use]
    pub fn covers(&self, position: usize) -> bool {
        self.expired_positions.contains(&position)
    }
}

pub struct NavigationController;

impl NavigationController {
    /// `PENDING -> IN_PROGRESS`. Position 0 becomes current and its clock starts.
    ///
    /// # Errors
    ///
    /// Returns `NavigationError::Transition` unless the session is pending.
    pub fn start(session: &mut ExamSession, now: DateTime<Utc>) -> Result<(), NavigationError> {
        session.state = transition(session.state, SessionOperation::Start)?;
        if session.started_at.is_none() {
            session.started_at = Some(now);
        }
        session.current_index = 0;
        mark_shown(session, 0, now);
        Ok(())
    }

    /// Makes `target` the current position.
    ///
    /// Forward moves are always allowed. Backward moves need `allow_backtrack`.
    /// Under per-question timing a revisited position keeps its original
    /// deadline, so the next expiry check moves past it once that has passed.
    ///
    /// # Errors
    ///
    /// Returns `NavigationError` for terminal sessions, out-of-range targets
    /// and disallowed backward moves. The session is left unchanged.
    pub fn move_to(
        session: &mut ExamSession,
        target: usize,
        now: DateTime<Utc>,
    ) -> Result<(), NavigationError> {
        transition(session.state, SessionOperation::Move)?;
        let len = session.len();
        if target >= len {
            return Err(NavigationError::OutOfRange { target, len });
        }
        let from = session.current_index;
        if target < from && !can_backtrack(session) {
            return Err(NavigationError::BacktrackDisabled { from, to: target });
        }

        session.current_index = target;
        mark_shown(session, target, now);
        tracing::debug!(session_id = %session.id, from, to = target, "moved");
        Ok(())
    }

    /// # Errors
    ///
    /// As `move_to`; fails with `OutOfRange` on the last position.
    pub fn next(session: &mut ExamSession, now: DateTime<Utc>) -> Result<(), NavigationError> {
        let target = session.current_index + 1;
        Self::move_to(session, target, now)
    }

    /// # Errors
    ///
    /// Fails with `BacktrackDisabled` whenever backtracking is off, even on
    /// position 0; otherwise as `move_to`.
    pub fn previous(session: &mut ExamSession, now: DateTime<Utc>) -> Result<(), NavigationError> {
        transition(session.state, SessionOperation::Move)?;
        let from = session.current_index;
        if !can_backtrack(session) {
            return Err(NavigationError::BacktrackDisabled {
                from,
                to: from.saturating_sub(1),
            });
        }
        let Some(target) = from.checked_sub(1) else {
            return Err(NavigationError::OutOfRange {
                target: 0,
                len: session.len(),
            });
        };
        Self::move_to(session, target, now)
    }

    /// Records a choice, a skip or a flag change at `position`.
    ///
    /// # Errors
    ///
    /// Returns `NavigationError` if the session is not in progress, the
    /// position is out of range or not answerable from the current one, or
    /// the answer is locked because correctness was already revealed.
    pub fn answer(
        session: &mut ExamSession,
        position: usize,
        action: AnswerAction,
        flagged: bool,
        now: DateTime<Utc>,
    ) -> Result<(), NavigationError> {
        transition(session.state, SessionOperation::Answer)?;
        let len = session.len();
        let current = session.current_index;
        if position >= len {
            return Err(NavigationError::OutOfRange {
                target: position,
                len,
            });
        }
        if position > current || (position < current && !can_answer_behind(session)) {
            return Err(NavigationError::PositionNotAnswerable { position, current });
        }

        let reveal = session.config.reveal_answers;
        let answer = &mut session.answers[position];
        if reveal && answer.chosen_option.is_some() && action != AnswerAction::FlagOnly {
            return Err(NavigationError::AnswerLocked(position));
        }

        match action {
            AnswerAction::Choose(letter) => {
                answer.chosen_option = Some(letter);
                answer.is_correct = Some(letter == answer.correct_option);
                answer.skipped = false;
                answer.answered_at = Some(now);
                answer.time_spent_seconds = answer
                    .question_shown_at
                    .map(|shown_at| elapsed_secs(shown_at, now));
            }
            AnswerAction::Skip => {
                answer.chosen_option = None;
                answer.is_correct = None;
                answer.skipped = true;
                answer.answered_at = None;
                answer.time_spent_seconds = None;
            }
            AnswerAction::FlagOnly => {}
        }
        answer.flagged_for_review = flagged;

        tracing::debug!(session_id = %session.id, position, ?action, flagged, "answer recorded");
        Ok(())
    }

    /// Folds every exhausted per-question budget into the session.
    ///
    /// Deadlines come from stored timestamps: an expired position is skipped
    /// if still open, and the next position inherits the deadline as its
    /// `question_shown_at`. Repeats until a position is within budget or the
    /// last one expires, which completes the session at that deadline.
    pub fn expire_questions(session: &mut ExamSession, now: DateTime<Utc>) -> Expiry {
        let mut expiry = Expiry::default();
        while let TimerStatus::QuestionExpired { position, deadline } =
            TimerPolicy::status(session, now)
        {
            let answer = &mut session.answers[position];
            if answer.is_open() {
                answer.skipped = true;
            }
            expiry.expired_positions.push(position);
            tracing::debug!(session_id = %session.id, position, %deadline, "question time expired");

            if position + 1 >= session.len() {
                // In progress, so completion cannot be refused.
                if complete(session, deadline, SessionOperation::Expire).is_ok() {
                    expiry.finished = true;
                }
                break;
            }
            session.current_index = position + 1;
            mark_shown(session, position + 1, deadline);
        }
        expiry
    }

    /// Completes the session at its total-time deadline if that has passed.
    /// Returns whether it did.
    pub fn finish_if_out_of_time(session: &mut ExamSession, now: DateTime<Utc>) -> bool {
        let TimerStatus::TotalExpired { deadline } = TimerPolicy::status(session, now) else {
            return false;
        };
        tracing::debug!(session_id = %session.id, %deadline, "total time expired");
        complete(session, deadline, SessionOperation::Expire).is_ok()
    }

    /// `IN_PROGRESS -> COMPLETED`: open positions become skipped and the result
    /// is computed once and stored on the session.
    ///
    /// # Errors
    ///
    /// Returns `NavigationError::Transition` unless the session is in progress.
    pub fn finish(session: &mut ExamSession, at: DateTime<Utc>) -> Result<(), NavigationError> {
        complete(session, at, SessionOperation::Finish)
    }

    /// `IN_PROGRESS -> CANCELLED`. No result is computed.
    ///
    /// # Errors
    ///
    /// Returns `NavigationError::Transition` unless the session is in progress.
    pub fn cancel(session: &mut ExamSession, at: DateTime<Utc>) -> Result<(), NavigationError> {
        session.state = transition(session.state, SessionOperation::Cancel)?;
        session.finished_at = Some(at);
        Ok(())
    }
}

fn can_backtrack(session: &ExamSession) -> bool {
    session.config.allow_backtrack
}

/// Per-question timing only takes answers for the position on screen.
fn can_answer_behind(session: &ExamSession) -> bool {
    can_backtrack(session) && session.config.mode() != ExamMode::PerQuestionTime
}

fn mark_shown(session: &mut ExamSession, position: usize, at: DateTime<Utc>) {
    if let Some(answer) = session.answers.get_mut(position) {
        answer.question_shown_at.get_or_insert(at);
    }
}

fn complete(
    session: &mut ExamSession,
    at: DateTime<Utc>,
    op: SessionOperation,
) -> Result<(), NavigationError> {
    let next = transition(session.state, op)?;
    for answer in &mut session.answers {
        if answer.is_open() {
            answer.skipped = true;
        }
    }
    let started_at = session.started_at.unwrap_or(at);
    session.result = Some(ScoringEngine::score(
        &session.answers,
        session.config.pass_threshold_percent,
        started_at,
        at,
    ));
    session.finished_at = Some(at);
    session.state = next;
    debug_assert_eq!(session.state, SessionState::Completed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Difficulty, DifficultyQuota, ExamConfig, QuestionFilter, QuestionId, QuestionRef,
        SessionId, Timing, UserId,
    };
    use crate::time::fixed_now;
    use chrono::Duration;

    fn config(timing: Timing, allow_backtrack: bool) -> ExamConfig {
        ExamConfig {
            timing,
            question_count: 5,
            quota: DifficultyQuota::balanced(),
            filter: QuestionFilter::any(),
            allow_backtrack,
            shuffle_questions: false,
            shuffle_options: false,
            reveal_answers: false,
            pass_threshold_percent: 60,
        }
    }

    fn started(config: ExamConfig) -> ExamSession {
        let picks: Vec<_> = (1..=5)
            .map(|i| QuestionRef {
                id: QuestionId::new(i),
                correct_option: OptionLetter::A,
                difficulty: Difficulty::Medium,
            })
            .collect();
        let mut session = ExamSession::new_pending(
            SessionId::generate(),
            UserId::new(7),
            None,
            "nav",
            config,
            &picks,
            None,
            fixed_now(),
        )
        .unwrap();
        NavigationController::start(&mut session, fixed_now()).unwrap();
        session
    }

    fn secs(n: i64) -> DateTime<Utc> {
        fixed_now() + Duration::seconds(n)
    }

    #[test]
    fn start_sets_clock_and_first_question() {
        let session = started(config(Timing::Practice, true));
        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(session.started_at(), Some(fixed_now()));
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.answer(0).unwrap().question_shown_at, Some(fixed_now()));
        assert!(session.answer(1).unwrap().question_shown_at.is_none());
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut session = started(config(Timing::Practice, true));
        assert_eq!(
            NavigationController::start(&mut session, secs(5)),
            Err(NavigationError::Transition(TransitionError::AlreadyStarted))
        );
        assert_eq!(session.started_at(), Some(fixed_now()));
    }

    #[test]
    fn backward_move_without_backtrack_keeps_index() {
        let mut session = started(config(Timing::Practice, false));
        NavigationController::move_to(&mut session, 3, secs(1)).unwrap();
        assert_eq!(
            NavigationController::move_to(&mut session, 1, secs(2)),
            Err(NavigationError::BacktrackDisabled { from: 3, to: 1 })
        );
        assert_eq!(session.current_index(), 3);
    }

    #[test]
    fn previous_fails_without_backtrack_even_at_zero() {
        let mut session = started(config(Timing::Practice, false));
        assert!(matches!(
            NavigationController::previous(&mut session, secs(1)),
            Err(NavigationError::BacktrackDisabled { .. })
        ));
        let mut session = started(config(Timing::Practice, true));
        assert!(matches!(
            NavigationController::previous(&mut session, secs(1)),
            Err(NavigationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn out_of_range_and_next_past_end() {
        let mut session = started(config(Timing::Practice, true));
        assert_eq!(
            NavigationController::move_to(&mut session, 5, secs(1)),
            Err(NavigationError::OutOfRange { target: 5, len: 5 })
        );
        NavigationController::move_to(&mut session, 4, secs(1)).unwrap();
        assert!(NavigationController::next(&mut session, secs(2)).is_err());
        assert_eq!(session.current_index(), 4);
    }

    #[test]
    fn first_visit_sets_shown_at_once() {
        let mut session = started(config(Timing::Practice, true));
        NavigationController::next(&mut session, secs(10)).unwrap();
        NavigationController::previous(&mut session, secs(20)).unwrap();
        NavigationController::next(&mut session, secs(30)).unwrap();
        assert_eq!(session.answer(1).unwrap().question_shown_at, Some(secs(10)));
    }

    #[test]
    fn answer_choice_skip_and_flag() {
        let mut session = started(config(Timing::Practice, true));
        NavigationController::answer(
            &mut session,
            0,
            AnswerAction::Choose(OptionLetter::A),
            false,
            secs(12),
        )
        .unwrap();
        let answer = session.answer(0).unwrap();
        assert_eq!(answer.is_correct, Some(true));
        assert_eq!(answer.time_spent_seconds, Some(12));

        NavigationController::answer(&mut session, 0, AnswerAction::Skip, true, secs(14)).unwrap();
        let answer = session.answer(0).unwrap();
        assert!(answer.skipped);
        assert!(answer.chosen_option.is_none());
        assert!(answer.is_correct.is_none());
        assert!(answer.flagged_for_review);

        NavigationController::answer(&mut session, 0, AnswerAction::FlagOnly, false, secs(15))
            .unwrap();
        assert!(session.answer(0).unwrap().skipped);
        assert!(!session.answer(0).unwrap().flagged_for_review);
    }

    #[test]
    fn answering_ahead_or_behind_without_backtrack_is_rejected() {
        let mut session = started(config(Timing::Practice, false));
        assert_eq!(
            NavigationController::answer(
                &mut session,
                2,
                AnswerAction::Choose(OptionLetter::A),
                false,
                secs(1)
            ),
            Err(NavigationError::PositionNotAnswerable {
                position: 2,
                current: 0
            })
        );
        NavigationController::next(&mut session, secs(2)).unwrap();
        assert!(matches!(
            NavigationController::answer(&mut session, 0, AnswerAction::Skip, false, secs(3)),
            Err(NavigationError::PositionNotAnswerable { .. })
        ));
    }

    #[test]
    fn revealed_answers_are_locked() {
        let mut cfg = config(Timing::Practice, true);
        cfg.reveal_answers = true;
        let mut session = started(cfg);
        let choose = AnswerAction::Choose(OptionLetter::B);
        NavigationController::answer(&mut session, 0, choose, false, secs(1)).unwrap();
        assert_eq!(
            NavigationController::answer(
                &mut session,
                0,
                AnswerAction::Choose(OptionLetter::A),
                false,
                secs(2)
            ),
            Err(NavigationError::AnswerLocked(0))
        );
        NavigationController::answer(&mut session, 0, AnswerAction::FlagOnly, true, secs(3))
            .unwrap();
        assert_eq!(session.answer(0).unwrap().chosen_option, Some(OptionLetter::B));
    }

    #[test]
    fn finish_freezes_open_positions_and_scores_once() {
        let mut session = started(config(Timing::Practice, true));
        for position in 0..3 {
            NavigationController::move_to(&mut session, position, secs(1)).unwrap();
            NavigationController::answer(
                &mut session,
                position,
                AnswerAction::Choose(OptionLetter::A),
                false,
                secs(2),
            )
            .unwrap();
        }
        NavigationController::finish(&mut session, secs(40)).unwrap();

        assert_eq!(session.state(), SessionState::Completed);
        assert!(session.answers()[3..].iter().all(|a| a.skipped));
        let result = session.result().unwrap().clone();
        assert_eq!(result.score_percent, 60);
        assert!(result.passed);
        assert_eq!(result.finished_at, secs(40));

        assert_eq!(
            NavigationController::finish(&mut session, secs(50)),
            Err(NavigationError::Transition(TransitionError::AlreadyFinished(
                SessionState::Completed
            )))
        );
        assert_eq!(session.result(), Some(&result));
    }

    #[test]
    fn cancel_records_no_result() {
        let mut session = started(config(Timing::Practice, true));
        NavigationController::cancel(&mut session, secs(9)).unwrap();
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(session.result().is_none());
        assert!(NavigationController::move_to(&mut session, 1, secs(10)).is_err());
    }

    #[test]
    fn total_time_expiry_finishes_at_deadline() {
        let mut session = started(config(Timing::TotalTime { budget_secs: 60 }, true));
        assert!(!NavigationController::finish_if_out_of_time(&mut session, secs(59)));
        assert!(NavigationController::finish_if_out_of_time(&mut session, secs(61)));
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.finished_at(), Some(secs(60)));
        assert_eq!(session.result().unwrap().elapsed_seconds, 60);
    }

    #[test]
    fn per_question_expiry_skips_and_advances() {
        let mut session = started(config(Timing::PerQuestionTime { budget_secs: 30 }, true));
        let expiry = NavigationController::expire_questions(&mut session, secs(31));
        assert_eq!(expiry.expired_positions, vec![0]);
        assert!(!expiry.finished);
        assert!(session.answer(0).unwrap().skipped);
        assert_eq!(session.current_index(), 1);
        assert_eq!(session.answer(1).unwrap().question_shown_at, Some(secs(30)));
    }

    #[test]
    fn per_question_expiry_cascades_to_finish() {
        let mut session = started(config(Timing::PerQuestionTime { budget_secs: 30 }, true));
        NavigationController::answer(
            &mut session,
            0,
            AnswerAction::Choose(OptionLetter::A),
            false,
            secs(5),
        )
        .unwrap();

        let expiry = NavigationController::expire_questions(&mut session, secs(500));
        assert_eq!(expiry.expired_positions, vec![0, 1, 2, 3, 4]);
        assert!(expiry.finished);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.finished_at(), Some(secs(150)));
        // The answered position keeps its answer.
        assert!(!session.answer(0).unwrap().skipped);
        assert_eq!(session.result().unwrap().correct_count, 1);
        assert_eq!(session.result().unwrap().score_percent, 20);
    }

    #[test]
    fn per_question_timing_goes_back_but_answers_only_on_screen() {
        let mut session = started(config(Timing::PerQuestionTime { budget_secs: 30 }, true));
        NavigationController::next(&mut session, secs(3)).unwrap();
        NavigationController::previous(&mut session, secs(4)).unwrap();
        assert_eq!(session.current_index(), 0);
        // Going back does not restart the clock of the revisited position.
        assert_eq!(session.answer(0).unwrap().question_shown_at, Some(secs(0)));

        NavigationController::next(&mut session, secs(5)).unwrap();
        assert_eq!(
            NavigationController::answer(&mut session, 0, AnswerAction::Skip, false, secs(6)),
            Err(NavigationError::PositionNotAnswerable {
                position: 0,
                current: 1
            })
        );

        NavigationController::previous(&mut session, secs(7)).unwrap();
        let expiry = NavigationController::expire_questions(&mut session, secs(31));
        assert_eq!(expiry.expired_positions, vec![0]);
        assert_eq!(session.current_index(), 1);
        assert_eq!(session.answer(1).unwrap().question_shown_at, Some(secs(3)));
    }

    #[test]
    fn per_question_timing_without_backtrack_stays_forward() {
        let mut session = started(config(Timing::PerQuestionTime { budget_secs: 30 }, false));
        NavigationController::next(&mut session, secs(3)).unwrap();
        assert!(matches!(
            NavigationController::previous(&mut session, secs(4)),
            Err(NavigationError::BacktrackDisabled { .. })
        ));
    }
}
