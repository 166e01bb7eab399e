use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

use exam_core::model::{
    Difficulty, ExamMode, ExamResult, ExamSession, OptionLetter, Question, QuestionAnswer,
    QuestionId, SessionCounters, SessionId, SessionState, TemplateId,
};
use exam_core::timer::TimerPolicy;

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Where a session stands right now, with the clock already applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatusView {
    pub session_id: SessionId,
    pub name: String,
    pub template_id: Option<TemplateId>,
    pub state: SessionState,
    pub mode: ExamMode,
    pub current_index: usize,
    pub total_questions: usize,
    pub counters: SessionCounters,
    /// Seconds left on whichever budget applies; `None` for practice or once finished.
    pub remaining_seconds: Option<u32>,
    pub allow_backtrack: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SessionStatusView {
    #[must_use]
    pub fn from_session(session: &ExamSession, now: DateTime<Utc>) -> Self {
        let config = session.config();
        Self {
            session_id: session.id(),
            name: session.name().to_owned(),
            template_id: session.template_id(),
            state: session.state(),
            mode: config.mode(),
            current_index: session.current_index(),
            total_questions: session.len(),
            counters: session.counters(),
            remaining_seconds: TimerPolicy::remaining_secs(session, now),
            allow_backtrack: config.allow_backtrack,
            started_at: session.started_at(),
            finished_at: session.finished_at(),
        }
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionView {
    pub letter: OptionLetter,
    pub text: String,
}

/// A question as shown to the candidate. Never carries the correct option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionDisplay {
    pub question_id: QuestionId,
    pub position: usize,
    pub title: String,
    pub scenario: String,
    pub prompt: String,
    pub difficulty: Difficulty,
    pub options: Vec<OptionView>,
}

impl QuestionDisplay {
    /// Options keep their letters; only their display order is permuted, and
    /// the same seed and position always give the same order.
    #[must_use]
    pub fn new(question: &Question, position: usize, option_seed: Option<u64>) -> Self {
        let mut options: Vec<OptionView> = question
            .options()
            .iter()
            .map(|o| OptionView {
                letter: o.letter,
                text: o.text.clone(),
            })
            .collect();
        if let Some(seed) = option_seed {
            let mut rng = StdRng::seed_from_u64(option_order_seed(seed, position));
            options.shuffle(&mut rng);
        }
        Self {
            question_id: question.id(),
            position,
            title: question.title().to_owned(),
            scenario: question.scenario().to_owned(),
            prompt: question.prompt().to_owned(),
            difficulty: question.difficulty(),
            options,
        }
    }
}

fn option_order_seed(seed: u64, position: usize) -> u64 {
    seed ^ (position as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// The candidate's own record for a position. Correctness shows up only when
/// the exam reveals answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerSnapshot {
    pub chosen_option: Option<OptionLetter>,
    pub skipped: bool,
    pub flagged_for_review: bool,
    pub is_correct: Option<bool>,
    pub correct_option: Option<OptionLetter>,
}

impl AnswerSnapshot {
    #[must_use]
    pub fn new(answer: &QuestionAnswer, reveal: bool) -> Self {
        let revealed = reveal && answer.chosen_option.is_some();
        Self {
            chosen_option: answer.chosen_option,
            skipped: answer.skipped,
            flagged_for_review: answer.flagged_for_review,
            is_correct: answer.is_correct.filter(|_| revealed),
            correct_option: revealed.then_some(answer.correct_option),
        }
    }
}

/// Status plus the current question, when the session is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    pub status: SessionStatusView,
    pub question: Option<QuestionDisplay>,
    pub answer: Option<AnswerSnapshot>,
}

//
// ─── ACKS / RESULTS ────────────────────────────────────────────────────────────
//

/// Outcome of `submit_answer`. `recorded` is false when the position's time
/// ran out before the submission was processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitAck {
    pub position: usize,
    pub recorded: bool,
    pub is_correct: Option<bool>,
    pub correct_option: Option<OptionLetter>,
    pub status: SessionStatusView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelAck {
    pub session_id: SessionId,
    pub state: SessionState,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Final score plus every answer record, in position order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultView {
    pub session_id: SessionId,
    pub name: String,
    pub template_id: Option<TemplateId>,
    pub result: ExamResult,
    pub answers: Vec<QuestionAnswer>,
}
