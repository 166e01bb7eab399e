use std::str::FromStr;

use exam_core::model::{
    CategoryId, Difficulty, ExamConfig, ExamResult, ExamSession, ExamTemplate, OptionLetter,
    Question, QuestionAnswer, QuestionId, QuestionIds, QuestionOption, SectionId, SessionId,
    SessionParts, SessionState, TemplateId, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

/// Seeds use the full `u64` range; SQLite integers are signed, so the bits
/// are stored as-is.
pub(crate) fn seed_to_i64(seed: u64) -> i64 {
    i64::from_ne_bytes(seed.to_ne_bytes())
}

fn seed_from_i64(v: i64) -> u64 {
    u64::from_ne_bytes(v.to_ne_bytes())
}

pub(crate) fn config_to_json(config: &ExamConfig) -> Result<String, StorageError> {
    serde_json::to_string(config).map_err(ser)
}

pub(crate) fn result_to_json(result: Option<&ExamResult>) -> Result<Option<String>, StorageError> {
    result.map(|r| serde_json::to_string(r).map_err(ser)).transpose()
}

fn letter(raw: &str) -> Result<OptionLetter, StorageError> {
    OptionLetter::parse(raw).map_err(ser)
}

// ─── QUESTIONS ────────────────────────────────────────────────────────────────

/// Builds a question from its row and its `question_options` rows.
pub(crate) fn map_question_row(
    row: &SqliteRow,
    option_rows: &[SqliteRow],
) -> Result<Question, StorageError> {
    let mut options = Vec::with_capacity(option_rows.len());
    for option in option_rows {
        options.push(QuestionOption::new(
            letter(&option.try_get::<String, _>("letter").map_err(ser)?)?,
            option.try_get::<String, _>("text").map_err(ser)?,
        ));
    }

    let question = Question::new(
        QuestionId::new(i64_to_u64("id", row.try_get("id").map_err(ser)?)?),
        CategoryId::new(i64_to_u64(
            "category_id",
            row.try_get("category_id").map_err(ser)?,
        )?),
        SectionId::new(i64_to_u64(
            "section_id",
            row.try_get("section_id").map_err(ser)?,
        )?),
        Difficulty::parse(&row.try_get::<String, _>("difficulty").map_err(ser)?).map_err(ser)?,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<String, _>("scenario").map_err(ser)?,
        row.try_get::<String, _>("prompt").map_err(ser)?,
        options,
        letter(&row.try_get::<String, _>("correct_option").map_err(ser)?)?,
    )
    .map_err(ser)?;

    Ok(question.with_visibility(
        row.try_get("active").map_err(ser)?,
        row.try_get("published").map_err(ser)?,
    ))
}

// ─── TEMPLATES ────────────────────────────────────────────────────────────────

pub(crate) fn map_template_row(row: &SqliteRow) -> Result<ExamTemplate, StorageError> {
    let config: ExamConfig =
        serde_json::from_str(&row.try_get::<String, _>("config").map_err(ser)?).map_err(ser)?;
    let average: i64 = row.try_get("average_score").map_err(ser)?;
    let average_score = u8::try_from(average)
        .map_err(|_| StorageError::Serialization(format!("invalid average_score: {average}")))?;

    ExamTemplate::from_persisted(
        TemplateId::new(i64_to_u64("id", row.try_get("id").map_err(ser)?)?),
        row.try_get("name").map_err(ser)?,
        row.try_get("description").map_err(ser)?,
        config,
        row.try_get("active").map_err(ser)?,
        u32_from_i64("times_taken", row.try_get("times_taken").map_err(ser)?)?,
        average_score,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

// ─── SESSIONS ─────────────────────────────────────────────────────────────────

pub(crate) fn map_answer_row(row: &SqliteRow) -> Result<QuestionAnswer, StorageError> {
    let position: i64 = row.try_get("position").map_err(ser)?;
    let chosen: Option<String> = row.try_get("chosen_option").map_err(ser)?;
    let time_spent: Option<i64> = row.try_get("time_spent_seconds").map_err(ser)?;

    Ok(QuestionAnswer {
        question_id: QuestionId::new(i64_to_u64(
            "question_id",
            row.try_get("question_id").map_err(ser)?,
        )?),
        position: usize::try_from(position)
            .map_err(|_| StorageError::Serialization(format!("invalid position: {position}")))?,
        chosen_option: chosen.as_deref().map(letter).transpose()?,
        correct_option: letter(&row.try_get::<String, _>("correct_option").map_err(ser)?)?,
        is_correct: row.try_get("is_correct").map_err(ser)?,
        question_shown_at: row.try_get("question_shown_at").map_err(ser)?,
        answered_at: row.try_get("answered_at").map_err(ser)?,
        time_spent_seconds: time_spent
            .map(|v| u32_from_i64("time_spent_seconds", v))
            .transpose()?,
        skipped: row.try_get("skipped").map_err(ser)?,
        flagged_for_review: row.try_get("flagged_for_review").map_err(ser)?,
    })
}

/// Rebuilds a session from its header row and its answer rows ordered by position.
pub(crate) fn map_session_row(
    row: &SqliteRow,
    answer_rows: &[SqliteRow],
) -> Result<ExamSession, StorageError> {
    let mut answers = Vec::with_capacity(answer_rows.len());
    for answer in answer_rows {
        answers.push(map_answer_row(answer)?);
    }
    let questions = QuestionIds::new(answers.iter().map(|a| a.question_id).collect()).map_err(ser)?;

    let config: ExamConfig =
        serde_json::from_str(&row.try_get::<String, _>("config").map_err(ser)?).map_err(ser)?;
    let result: Option<ExamResult> = row
        .try_get::<Option<String>, _>("result")
        .map_err(ser)?
        .map(|raw| serde_json::from_str(&raw).map_err(ser))
        .transpose()?;
    let index: i64 = row.try_get("current_index").map_err(ser)?;
    let template_id: Option<i64> = row.try_get("template_id").map_err(ser)?;
    let seed: Option<i64> = row.try_get("option_seed").map_err(ser)?;

    let parts = SessionParts {
        id: SessionId::from_str(&row.try_get::<String, _>("id").map_err(ser)?).map_err(ser)?,
        user_id: UserId::new(i64_to_u64("user_id", row.try_get("user_id").map_err(ser)?)?),
        template_id: template_id
            .map(|v| i64_to_u64("template_id", v).map(TemplateId::new))
            .transpose()?,
        name: row.try_get("name").map_err(ser)?,
        config,
        state: SessionState::parse(&row.try_get::<String, _>("state").map_err(ser)?)
            .map_err(ser)?,
        questions,
        answers,
        current_index: usize::try_from(index)
            .map_err(|_| StorageError::Serialization(format!("invalid current_index: {index}")))?,
        started_at: row.try_get("started_at").map_err(ser)?,
        finished_at: row.try_get("finished_at").map_err(ser)?,
        option_seed: seed.map(seed_from_i64),
        result,
        version: i64_to_u64("version", row.try_get("version").map_err(ser)?)?,
        created_at: row.try_get("created_at").map_err(ser)?,
    };

    ExamSession::from_persisted(parts).map_err(ser)
}
