use chrono::{DateTime, Utc};

use crate::model::{ExamResult, QuestionAnswer, SessionCounters};
use crate::time::elapsed_secs;

/// Reduces a finished session's answer records into its final result.
pub struct ScoringEngine;

impl ScoringEngine {
    /// Scores against the full question count, so skipped and unanswered
    /// positions count as misses.
    #[must_use]
    pub fn score(
        answers: &[QuestionAnswer],
        pass_threshold_percent: u8,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> ExamResult {
        let counters = SessionCounters::from_answers(answers);
        let total = u32::try_from(answers.len()).unwrap_or(u32::MAX);
        let score_percent = percent(counters.correct, total);

        ExamResult {
            total_questions: total,
            answered_count: counters.answered,
            correct_count: counters.correct,
            incorrect_count: counters.incorrect,
            skipped_count: counters.skipped,
            score_percent,
            pass_threshold_percent,
            passed: score_percent >= pass_threshold_percent,
            finished_at,
            elapsed_seconds: elapsed_secs(started_at, finished_at),
        }
    }
}

/// `round(part * 100 / total)`, halves rounded up.
fn percent(part: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let part = u64::from(part.min(total));
    let total = u64::from(total);
    u8::try_from((part * 200 + total) / (total * 2)).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, OptionLetter, QuestionId, QuestionRef};
    use crate::time::fixed_now;
    use chrono::Duration;

    fn answers(n: usize) -> Vec<QuestionAnswer> {
        (0..n)
            .map(|i| {
                QuestionAnswer::blank(
                    i,
                    &QuestionRef {
                        id: QuestionId::new(i as u64 + 1),
                        correct_option: OptionLetter::C,
                        difficulty: Difficulty::Medium,
                    },
                )
            })
            .collect()
    }

    fn choose(answer: &mut QuestionAnswer, letter: OptionLetter) {
        answer.chosen_option = Some(letter);
        answer.is_correct = Some(letter == answer.correct_option);
    }

    #[test]
    fn all_correct_scores_one_hundred() {
        let mut records = answers(8);
        for answer in &mut records {
            choose(answer, OptionLetter::C);
        }
        let result = ScoringEngine::score(&records, 100, fixed_now(), fixed_now());
        assert_eq!(result.score_percent, 100);
        assert!(result.passed);
        assert_eq!(result.answered_count, 8);
    }

    #[test]
    fn all_skipped_scores_zero() {
        let mut records = answers(6);
        for answer in &mut records {
            answer.skipped = true;
        }
        let result = ScoringEngine::score(&records, 0, fixed_now(), fixed_now());
        assert_eq!(result.score_percent, 0);
        assert_eq!(result.skipped_count, 6);
        assert_eq!(result.answered_count, 0);
        // A zero threshold passes even an empty score.
        assert!(result.passed);
    }

    #[test]
    fn seven_of_ten_passes_at_sixty() {
        let mut records = answers(10);
        for (i, answer) in records.iter_mut().enumerate() {
            choose(answer, if i < 7 { OptionLetter::C } else { OptionLetter::A });
        }
        let finished = fixed_now() + Duration::seconds(95);
        let result = ScoringEngine::score(&records, 60, fixed_now(), finished);
        assert_eq!(result.score_percent, 70);
        assert_eq!(result.correct_count, 7);
        assert_eq!(result.incorrect_count, 3);
        assert!(result.passed);
        assert_eq!(result.elapsed_seconds, 95);
        assert_eq!(result.finished_at, finished);
    }

    #[test]
    fn skips_count_against_the_score() {
        let mut records = answers(6);
        choose(&mut records[0], OptionLetter::C);
        choose(&mut records[1], OptionLetter::C);
        for answer in &mut records[2..] {
            answer.skipped = true;
        }
        let result = ScoringEngine::score(&records, 50, fixed_now(), fixed_now());
        // 2 / 6 = 33.3
        assert_eq!(result.score_percent, 33);
        assert!(!result.passed);
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(percent(1, 8), 13); // 12.5
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(0, 0), 0);
    }
}
