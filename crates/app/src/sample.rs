//! A small built-in question bank for local runs.

use exam_core::model::{
    CategoryId, Difficulty, DifficultyQuota, ExamConfig, OptionLetter, Question, QuestionFilter,
    QuestionId, QuestionOption, SectionId, TemplateDraft, Timing,
};

const STEMS: [(&str, &str, &str); 6] = [
    (
        "Chest pain",
        "A 58-year-old man has crushing chest pain radiating to the left arm.",
        "Which investigation should be performed first?",
    ),
    (
        "Shortness of breath",
        "A 34-year-old woman develops sudden dyspnoea after a long flight.",
        "What is the most likely diagnosis?",
    ),
    (
        "Headache",
        "A 45-year-old describes the worst headache of her life, onset during exercise.",
        "What is the next best step?",
    ),
    (
        "Abdominal pain",
        "A 22-year-old has periumbilical pain migrating to the right iliac fossa.",
        "Which sign supports the diagnosis?",
    ),
    (
        "Fever",
        "A 70-year-old nursing home resident is confused with a temperature of 39.2 C.",
        "Which source should be investigated first?",
    ),
    (
        "Syncope",
        "A 19-year-old athlete collapses during a match and recovers within a minute.",
        "Which test is most important before return to play?",
    ),
];

const OPTIONS: [&str; 4] = [
    "Twelve-lead ECG",
    "CT pulmonary angiogram",
    "Non-contrast CT head",
    "Observation only",
];

/// Builds the `n`-th sample question. Ids start at 1; tiers, sections and
/// the correct letter rotate so draws exercise every quota tier.
///
/// # Errors
///
/// Returns `exam_core::Error` if the generated question fails validation.
pub fn question(n: u64) -> Result<Question, exam_core::Error> {
    let index = usize::try_from(n).unwrap_or(0);
    let (title, scenario, prompt) = STEMS[index % STEMS.len()];
    let difficulty = Difficulty::ALL[index % Difficulty::ALL.len()];
    let correct = OptionLetter::ALL[index % OptionLetter::ALL.len()];
    let options = OptionLetter::ALL
        .iter()
        .zip(OPTIONS)
        .map(|(letter, text)| QuestionOption::new(*letter, text))
        .collect();

    Ok(Question::new(
        QuestionId::new(n),
        CategoryId::new(1),
        SectionId::new(n % 3 + 1),
        difficulty,
        format!("{title} #{n}"),
        scenario,
        prompt,
        options,
        correct,
    )?)
}

/// A timed mock exam over the whole sample bank.
///
/// # Errors
///
/// Returns `exam_core::Error` if the quota is rejected.
pub fn mock_exam_template() -> Result<TemplateDraft, exam_core::Error> {
    Ok(TemplateDraft {
        name: "Emergency medicine mock".into(),
        description: Some("Twenty mixed-difficulty cases in thirty minutes.".into()),
        config: ExamConfig {
            timing: Timing::TotalTime { budget_secs: 1800 },
            question_count: 20,
            quota: DifficultyQuota::new(30, 50, 20)?,
            filter: QuestionFilter::any(),
            allow_backtrack: true,
            shuffle_questions: true,
            shuffle_options: true,
            reveal_answers: false,
            pass_threshold_percent: 70,
        },
    })
}
