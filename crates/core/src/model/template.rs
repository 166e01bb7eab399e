use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::TemplateId;
use crate::model::question::{Difficulty, QuestionFilter};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateError {
    #[error("template name cannot be empty")]
    EmptyName,

    #[error("question count must be between {min} and {max}, got {got}")]
    InvalidQuestionCount { min: u32, max: u32, got: u32 },

    #[error("total time budget must be at least {min} seconds")]
    InvalidTotalBudget { min: u32 },

    #[error("per-question time budget must be at least {min} seconds")]
    InvalidPerQuestionBudget { min: u32 },

    #[error("difficulty percentage must be between 0 and 100, got {0}")]
    InvalidPercentage(u8),

    #[error("difficulty quota must sum to about 100, got {0}")]
    QuotaOutOfBalance(u16),

    #[error("pass threshold must be between 0 and 100, got {0}")]
    InvalidPassThreshold(u8),

    #[error("unknown exam mode: {0}")]
    UnknownMode(String),
}

pub const MIN_QUESTION_COUNT: u32 = 5;
pub const MAX_TEMPLATE_QUESTIONS: u32 = 200;
pub const MAX_AD_HOC_QUESTIONS: u32 = 100;
pub const MIN_TOTAL_BUDGET_SECS: u32 = 60;
pub const MIN_PER_QUESTION_BUDGET_SECS: u32 = 30;

//
// ─── MODE / TIMING ─────────────────────────────────────────────────────────────
//

/// Which of the three timing regimes a session runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamMode {
    Practice,
    TotalTime,
    PerQuestionTime,
}

impl ExamMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Practice => "practice",
            Self::TotalTime => "total_time",
            Self::PerQuestionTime => "per_question_time",
        }
    }

    /// # Errors
    ///
    /// Returns `TemplateError::UnknownMode` for unrecognised values.
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        match raw {
            "practice" => Ok(Self::Practice),
            "total_time" => Ok(Self::TotalTime),
            "per_question_time" => Ok(Self::PerQuestionTime),
            other => Err(TemplateError::UnknownMode(other.to_owned())),
        }
    }
}

/// Timing regime together with the only budget that regime reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Timing {
    Practice,
    TotalTime { budget_secs: u32 },
    PerQuestionTime { budget_secs: u32 },
}

impl Timing {
    #[must_use]
    pub fn mode(&self) -> ExamMode {
        match self {
            Timing::Practice => ExamMode::Practice,
            Timing::TotalTime { .. } => ExamMode::TotalTime,
            Timing::PerQuestionTime { .. } => ExamMode::PerQuestionTime,
        }
    }

    /// Rebuilds the timing from its persisted columns.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` if the mode requires a budget that is missing.
    pub fn from_parts(
        mode: ExamMode,
        total_budget_secs: Option<u32>,
        per_question_budget_secs: Option<u32>,
    ) -> Result<Self, TemplateError> {
        match mode {
            ExamMode::Practice => Ok(Timing::Practice),
            ExamMode::TotalTime => total_budget_secs
                .map(|budget_secs| Timing::TotalTime { budget_secs })
                .ok_or(TemplateError::InvalidTotalBudget {
                    min: MIN_TOTAL_BUDGET_SECS,
                }),
            ExamMode::PerQuestionTime => per_question_budget_secs
                .map(|budget_secs| Timing::PerQuestionTime { budget_secs })
                .ok_or(TemplateError::InvalidPerQuestionBudget {
                    min: MIN_PER_QUESTION_BUDGET_SECS,
                }),
        }
    }

    #[must_use]
    pub fn total_budget_secs(&self) -> Option<u32> {
        match self {
            Timing::TotalTime { budget_secs } => Some(*budget_secs),
            _ => None,
        }
    }

    #[must_use]
    pub fn per_question_budget_secs(&self) -> Option<u32> {
        match self {
            Timing::PerQuestionTime { budget_secs } => Some(*budget_secs),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), TemplateError> {
        match *self {
            Timing::Practice => Ok(()),
            Timing::TotalTime { budget_secs } if budget_secs < MIN_TOTAL_BUDGET_SECS => {
                Err(TemplateError::InvalidTotalBudget {
                    min: MIN_TOTAL_BUDGET_SECS,
                })
            }
            Timing::PerQuestionTime { budget_secs }
                if budget_secs < MIN_PER_QUESTION_BUDGET_SECS =>
            {
                Err(TemplateError::InvalidPerQuestionBudget {
                    min: MIN_PER_QUESTION_BUDGET_SECS,
                })
            }
            _ => Ok(()),
        }
    }
}

//
// ─── QUOTA ─────────────────────────────────────────────────────────────────────
//

/// Easy/medium/hard percentages used to balance a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyQuota {
    easy: u8,
    medium: u8,
    hard: u8,
}

impl DifficultyQuota {
    /// # Errors
    ///
    /// Returns `TemplateError::InvalidPercentage` if any share exceeds 100, or
    /// `TemplateError::QuotaOutOfBalance` if the shares do not sum to 95-105.
    pub fn new(easy: u8, medium: u8, hard: u8) -> Result<Self, TemplateError> {
        let quota = Self { easy, medium, hard };
        quota.validate()?;
        Ok(quota)
    }

    /// Re-checks shares that arrived without going through `new`, e.g. from JSON.
    ///
    /// # Errors
    ///
    /// As `new`.
    pub fn validate(&self) -> Result<(), TemplateError> {
        for pct in [self.easy, self.medium, self.hard] {
            if pct > 100 {
                return Err(TemplateError::InvalidPercentage(pct));
            }
        }
        let sum = u16::from(self.easy) + u16::from(self.medium) + u16::from(self.hard);
        if !(95..=105).contains(&sum) {
            return Err(TemplateError::QuotaOutOfBalance(sum));
        }
        Ok(())
    }

    /// 30% easy, 50% medium, 20% hard.
    #[must_use]
    pub fn balanced() -> Self {
        Self {
            easy: 30,
            medium: 50,
            hard: 20,
        }
    }

    #[must_use]
    pub fn percent(&self, tier: Difficulty) -> u8 {
        match tier {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }

    /// `round(count * percent / 100)`, halves rounded away from zero.
    #[must_use]
    pub fn target(&self, tier: Difficulty, count: usize) -> usize {
        let pct = usize::from(self.percent(tier));
        (count * pct * 2 + 100) / 200
    }
}

impl Default for DifficultyQuota {
    fn default() -> Self {
        Self::balanced()
    }
}

//
// ─── CONFIG ────────────────────────────────────────────────────────────────────
//

/// Everything a session needs to know about how it should run.
///
/// Templates own one of these; sessions take a copy at start so later template
/// edits never reach an attempt that is already running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ExamConfig {
    pub timing: Timing,
    pub question_count: u32,
    pub quota: DifficultyQuota,
    pub filter: QuestionFilter,
    pub allow_backtrack: bool,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub reveal_answers: bool,
    pub pass_threshold_percent: u8,
}

impl ExamConfig {
    /// # Errors
    ///
    /// Returns `TemplateError` describing the first invalid field.
    pub fn validate(&self, max_questions: u32) -> Result<(), TemplateError> {
        if !(MIN_QUESTION_COUNT..=max_questions).contains(&self.question_count) {
            return Err(TemplateError::InvalidQuestionCount {
                min: MIN_QUESTION_COUNT,
                max: max_questions,
                got: self.question_count,
            });
        }
        self.timing.validate()?;
        self.quota.validate()?;
        if self.pass_threshold_percent > 100 {
            return Err(TemplateError::InvalidPassThreshold(
                self.pass_threshold_percent,
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn mode(&self) -> ExamMode {
        self.timing.mode()
    }
}

/// Ad hoc parameters for a session started without a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamParams {
    pub name: Option<String>,
    pub timing: Timing,
    pub question_count: u32,
    pub filter: QuestionFilter,
    pub shuffle_questions: bool,
    pub allow_backtrack: bool,
}

impl Default for ExamParams {
    fn default() -> Self {
        Self {
            name: None,
            timing: Timing::TotalTime { budget_secs: 1800 },
            question_count: 20,
            filter: QuestionFilter::any(),
            shuffle_questions: true,
            allow_backtrack: true,
        }
    }
}

impl ExamParams {
    pub const DEFAULT_PASS_THRESHOLD: u8 = 60;

    /// Expands the parameters into a full config using the fixed ad hoc defaults.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` if the count or budgets are out of range.
    pub fn into_config(self) -> Result<(Option<String>, ExamConfig), TemplateError> {
        let config = ExamConfig {
            timing: self.timing,
            question_count: self.question_count,
            quota: DifficultyQuota::balanced(),
            filter: self.filter,
            allow_backtrack: self.allow_backtrack,
            shuffle_questions: self.shuffle_questions,
            shuffle_options: false,
            reveal_answers: false,
            pass_threshold_percent: Self::DEFAULT_PASS_THRESHOLD,
        };
        config.validate(MAX_AD_HOC_QUESTIONS)?;
        Ok((self.name, config))
    }
}

//
// ─── TEMPLATE ──────────────────────────────────────────────────────────────────
//

/// Author-supplied fields for a new template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDraft {
    pub name: String,
    pub description: Option<String>,
    pub config: ExamConfig,
}

impl TemplateDraft {
    /// # Errors
    ///
    /// Returns `TemplateError` if the name is blank or the config is invalid.
    pub fn validate(self, id: TemplateId, now: DateTime<Utc>) -> Result<ExamTemplate, TemplateError> {
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(TemplateError::EmptyName);
        }
        self.config.validate(MAX_TEMPLATE_QUESTIONS)?;
        Ok(ExamTemplate {
            id,
            name,
            description: self.description,
            config: self.config,
            active: true,
            times_taken: 0,
            average_score: 0,
            created_at: now,
        })
    }
}

/// Immutable exam blueprint plus its running usage statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamTemplate {
    id: TemplateId,
    name: String,
    description: Option<String>,
    config: ExamConfig,
    active: bool,
    times_taken: u32,
    average_score: u8,
    created_at: DateTime<Utc>,
}

impl ExamTemplate {
    /// Rehydrate a template from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` if the stored config no longer validates.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: TemplateId,
        name: String,
        description: Option<String>,
        config: ExamConfig,
        active: bool,
        times_taken: u32,
        average_score: u8,
        created_at: DateTime<Utc>,
    ) -> Result<Self, TemplateError> {
        config.validate(MAX_TEMPLATE_QUESTIONS)?;
        Ok(Self {
            id,
            name,
            description,
            config,
            active,
            times_taken,
            average_score,
            created_at,
        })
    }

    /// The same template under the id the store assigned on insert.
    #[must_use]
    pub fn with_id(mut self, id: TemplateId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn id(&self) -> TemplateId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn config(&self) -> &ExamConfig {
        &self.config
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn times_taken(&self) -> u32 {
        self.times_taken
    }

    #[must_use]
    pub fn average_score(&self) -> u8 {
        self.average_score
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Folds one more completed attempt into the running average.
    pub fn record_completion(&mut self, score_percent: u8) {
        let taken = u64::from(self.times_taken) + 1;
        let total = u64::from(self.average_score) * (taken - 1) + u64::from(score_percent);
        self.average_score = u8::try_from((total * 2 + taken) / (taken * 2)).unwrap_or(100);
        self.times_taken = u32::try_from(taken).unwrap_or(u32::MAX);
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
