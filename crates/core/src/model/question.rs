use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::{CategoryId, QuestionId, SectionId};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("invalid answer option: {0:?} (expected A-D)")]
    InvalidOption(String),

    #[error("invalid difficulty: {0}")]
    InvalidDifficulty(String),

    #[error("question prompt cannot be empty")]
    EmptyPrompt,

    #[error("a question needs between 2 and 4 options, got {0}")]
    OptionCount(usize),

    #[error("duplicate option letter {0}")]
    DuplicateOption(OptionLetter),

    #[error("correct option {0} is not among the question's options")]
    MissingCorrectOption(OptionLetter),
}

//
// ─── OPTION LETTER ────────────────────────────────────────────────────────────
//

/// One of the four answer slots a question can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionLetter {
    A,
    B,
    C,
    D,
}

impl OptionLetter {
    pub const ALL: [OptionLetter; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// Parses client input. Case-insensitive; surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::InvalidOption` for anything outside `A`-`D`.
    pub fn parse(raw: &str) -> Result<Self, QuestionError> {
        match raw.trim() {
            "A" | "a" => Ok(Self::A),
            "B" | "b" => Ok(Self::B),
            "C" | "c" => Ok(Self::C),
            "D" | "d" => Ok(Self::D),
            _ => Err(QuestionError::InvalidOption(raw.to_owned())),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

impl fmt::Display for OptionLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── DIFFICULTY ───────────────────────────────────────────────────────────────
//

/// Difficulty tier. Tiers partition the question pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Self::Easy, Self::Medium, Self::Hard];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    /// # Errors
    ///
    /// Returns `QuestionError::InvalidDifficulty` for unknown tier names.
    pub fn parse(raw: &str) -> Result<Self, QuestionError> {
        match raw {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(QuestionError::InvalidDifficulty(other.to_owned())),
        }
    }
}

//
// ─── QUESTIONS ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub letter: OptionLetter,
    pub text: String,
}

impl QuestionOption {
    #[must_use]
    pub fn new(letter: OptionLetter, text: impl Into<String>) -> Self {
        Self {
            letter,
            text: text.into(),
        }
    }
}

/// A question as held by the question repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: QuestionId,
    category_id: CategoryId,
    section_id: SectionId,
    difficulty: Difficulty,
    title: String,
    scenario: String,
    prompt: String,
    options: Vec<QuestionOption>,
    correct_option: OptionLetter,
    active: bool,
    published: bool,
}

impl Question {
    /// Creates an active, published question after validating its options.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the prompt is blank, the option count is not
    /// 2-4, a letter repeats, or the correct option is not offered.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: QuestionId,
        category_id: CategoryId,
        section_id: SectionId,
        difficulty: Difficulty,
        title: impl Into<String>,
        scenario: impl Into<String>,
        prompt: impl Into<String>,
        options: Vec<QuestionOption>,
        correct_option: OptionLetter,
    ) -> Result<Self, QuestionError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt);
        }
        if !(2..=4).contains(&options.len()) {
            return Err(QuestionError::OptionCount(options.len()));
        }
        let mut seen = Vec::with_capacity(options.len());
        for option in &options {
            if seen.contains(&option.letter) {
                return Err(QuestionError::DuplicateOption(option.letter));
            }
            seen.push(option.letter);
        }
        if !seen.contains(&correct_option) {
            return Err(QuestionError::MissingCorrectOption(correct_option));
        }

        Ok(Self {
            id,
            category_id,
            section_id,
            difficulty,
            title: title.into(),
            scenario: scenario.into(),
            prompt,
            options,
            correct_option,
            active: true,
            published: true,
        })
    }

    /// Marks the question as retired or unpublished; such questions are never drawn.
    #[must_use]
    pub fn with_visibility(mut self, active: bool, published: bool) -> Self {
        self.active = active;
        self.published = published;
        self
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn category_id(&self) -> CategoryId {
        self.category_id
    }

    #[must_use]
    pub fn section_id(&self) -> SectionId {
        self.section_id
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[QuestionOption] {
        &self.options
    }

    #[must_use]
    pub fn correct_option(&self) -> OptionLetter {
        self.correct_option
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published
    }

    /// True when the question may be drawn into a session under `filter`.
    #[must_use]
    pub fn is_eligible(&self, filter: &QuestionFilter) -> bool {
        self.active && self.published && filter.matches(self.category_id, self.section_id)
    }

    #[must_use]
    pub fn as_ref_entry(&self) -> QuestionRef {
        QuestionRef {
            id: self.id,
            correct_option: self.correct_option,
            difficulty: self.difficulty,
        }
    }
}

/// What the selector needs from the repository: identity plus the answer
/// snapshot taken at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionRef {
    pub id: QuestionId,
    pub correct_option: OptionLetter,
    pub difficulty: Difficulty,
}

/// Optional scoping of the question pool. Empty lists mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionFilter {
    pub category_ids: Vec<CategoryId>,
    pub section_ids: Vec<SectionId>,
}

impl QuestionFilter {
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn matches(&self, category: CategoryId, section: SectionId) -> bool {
        (self.category_ids.is_empty() || self.category_ids.contains(&category))
            && (self.section_ids.is_empty() || self.section_ids.contains(&section))
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<QuestionOption> {
        vec![
            QuestionOption::new(OptionLetter::A, "one"),
            QuestionOption::new(OptionLetter::B, "two"),
            QuestionOption::new(OptionLetter::C, "three"),
        ]
    }

    #[test]
    fn option_letter_parsing_is_case_insensitive() {
        assert_eq!(OptionLetter::parse("b").unwrap(), OptionLetter::B);
        assert_eq!(OptionLetter::parse(" D ").unwrap(), OptionLetter::D);
        assert!(matches!(
            OptionLetter::parse("E"),
            Err(QuestionError::InvalidOption(_))
        ));
        assert!(OptionLetter::parse("").is_err());
        assert!(OptionLetter::parse("AB").is_err());
    }

    #[test]
    fn question_requires_offered_correct_option() {
        let err = Question::new(
            QuestionId::new(1),
            CategoryId::new(1),
            SectionId::new(1),
            Difficulty::Easy,
            "t",
            "s",
            "p",
            options(),
            OptionLetter::D,
        )
        .unwrap_err();
        assert_eq!(err, QuestionError::MissingCorrectOption(OptionLetter::D));
    }

    #[test]
    fn question_rejects_duplicate_letters() {
        let mut opts = options();
        opts.push(QuestionOption::new(OptionLetter::A, "again"));
        let err = Question::new(
            QuestionId::new(1),
            CategoryId::new(1),
            SectionId::new(1),
            Difficulty::Easy,
            "t",
            "s",
            "p",
            opts,
            OptionLetter::A,
        )
        .unwrap_err();
        assert_eq!(err, QuestionError::DuplicateOption(OptionLetter::A));
    }

    #[test]
    fn eligibility_honours_filter_and_visibility() {
        let q = Question::new(
            QuestionId::new(1),
            CategoryId::new(3),
            SectionId::new(9),
            Difficulty::Hard,
            "t",
            "s",
            "p",
            options(),
            OptionLetter::A,
        )
        .unwrap();

        assert!(q.is_eligible(&QuestionFilter::any()));
        let by_section = QuestionFilter {
            category_ids: Vec::new(),
            section_ids: vec![SectionId::new(9)],
        };
        assert!(q.is_eligible(&by_section));
        let other_category = QuestionFilter {
            category_ids: vec![CategoryId::new(4)],
            section_ids: Vec::new(),
        };
        assert!(!q.is_eligible(&other_category));
        assert!(!q.with_visibility(true, false).is_eligible(&QuestionFilter::any()));
    }
}
