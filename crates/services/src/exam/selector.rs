use rand::seq::SliceRandom;

use exam_core::model::{
    Difficulty, DifficultyQuota, MIN_QUESTION_COUNT, QuestionFilter, QuestionId, QuestionRef,
};
use storage::repository::QuestionRepository;

use crate::error::ExamError;

/// A drawn question set plus the per-tier shortfalls that were topped up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub picks: Vec<QuestionRef>,
    /// `(tier, missing)` for every tier that could not meet its target.
    pub shortfalls: Vec<(Difficulty, usize)>,
}

/// Draws a quota-balanced question set from the repository.
pub struct QuestionSelector<'a> {
    questions: &'a dyn QuestionRepository,
}

impl<'a> QuestionSelector<'a> {
    #[must_use]
    pub fn new(questions: &'a dyn QuestionRepository) -> Self {
        Self { questions }
    }

    /// Draws up to `count` distinct eligible questions.
    ///
    /// Each tier gets `round(count * percent / 100)` slots, capped so the
    /// running total never exceeds `count`. Missing slots are then filled from
    /// any tier. Unless `shuffle` is set the picks stay grouped easy, medium,
    /// hard.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InsufficientQuestions` if fewer than the minimum
    /// exam size could be drawn, or `ExamError::Storage` if the repository fails.
    pub async fn select(
        &self,
        count: usize,
        quota: &DifficultyQuota,
        filter: &QuestionFilter,
        shuffle: bool,
    ) -> Result<Selection, ExamError> {
        let mut picks: Vec<QuestionRef> = Vec::with_capacity(count);
        let mut shortfalls = Vec::new();

        for tier in Difficulty::ALL {
            let target = quota.target(tier, count).min(count - picks.len());
            if target == 0 {
                continue;
            }
            let taken = self.draw(filter, Some(tier), target, &picks).await?;
            if taken.len() < target {
                shortfalls.push((tier, target - taken.len()));
            }
            picks.extend(taken);
        }

        if picks.len() < count {
            let missing = count - picks.len();
            let extra = self.draw(filter, None, missing, &picks).await?;
            tracing::debug!(missing, filled = extra.len(), "topped up draw");
            picks.extend(extra);
        }

        let minimum = MIN_QUESTION_COUNT as usize;
        if picks.len() < minimum {
            return Err(ExamError::InsufficientQuestions {
                available: picks.len(),
                minimum,
            });
        }
        if picks.len() < count {
            tracing::warn!(requested = count, drawn = picks.len(), "question pool ran short");
        }

        if shuffle {
            picks.shuffle(&mut rand::rng());
        }
        Ok(Selection { picks, shortfalls })
    }

    async fn draw(
        &self,
        filter: &QuestionFilter,
        tier: Option<Difficulty>,
        limit: usize,
        already: &[QuestionRef],
    ) -> Result<Vec<QuestionRef>, ExamError> {
        let excluding: Vec<QuestionId> = already.iter().map(|q| q.id).collect();
        let mut drawn = self
            .questions
            .find_questions(filter, tier, limit, &excluding)
            .await?;
        drawn.truncate(limit);
        Ok(drawn)
    }
}
