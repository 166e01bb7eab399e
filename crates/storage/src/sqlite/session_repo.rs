use exam_core::model::{ExamSession, QuestionAnswer, SessionId, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};

use super::SqliteRepository;
use super::mapping::{
    config_to_json, conn, id_i64, map_session_row, result_to_json, seed_to_i64, ser,
};
use crate::repository::{Page, SessionStore, StorageError};

const SESSION_COLUMNS: &str = "id, user_id, template_id, name, config, state, current_index, \
     started_at, finished_at, option_seed, result, version, created_at";

const ANSWER_COLUMNS: &str = "question_id, position, chosen_option, correct_option, is_correct, \
     question_shown_at, answered_at, time_spent_seconds, skipped, flagged_for_review";

fn position_i64(answer: &QuestionAnswer) -> Result<i64, StorageError> {
    i64::try_from(answer.position).map_err(ser)
}

async fn insert_answer(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
    answer: &QuestionAnswer,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        INSERT INTO exam_answers (
            session_id, position, question_id, chosen_option, correct_option, is_correct,
            question_shown_at, answered_at, time_spent_seconds, skipped, flagged_for_review
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ",
    )
    .bind(session_id)
    .bind(position_i64(answer)?)
    .bind(id_i64("question_id", answer.question_id.value())?)
    .bind(answer.chosen_option.map(|l| l.as_str()))
    .bind(answer.correct_option.as_str())
    .bind(answer.is_correct)
    .bind(answer.question_shown_at)
    .bind(answer.answered_at)
    .bind(answer.time_spent_seconds.map(i64::from))
    .bind(answer.skipped)
    .bind(answer.flagged_for_review)
    .execute(&mut **tx)
    .await
    .map_err(conn)?;
    Ok(())
}

async fn update_answer(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
    answer: &QuestionAnswer,
) -> Result<(), StorageError> {
    // question_id and correct_option are fixed at creation.
    sqlx::query(
        r"
        UPDATE exam_answers
        SET chosen_option = ?1,
            is_correct = ?2,
            question_shown_at = ?3,
            answered_at = ?4,
            time_spent_seconds = ?5,
            skipped = ?6,
            flagged_for_review = ?7
        WHERE session_id = ?8 AND position = ?9
        ",
    )
    .bind(answer.chosen_option.map(|l| l.as_str()))
    .bind(answer.is_correct)
    .bind(answer.question_shown_at)
    .bind(answer.answered_at)
    .bind(answer.time_spent_seconds.map(i64::from))
    .bind(answer.skipped)
    .bind(answer.flagged_for_review)
    .bind(session_id)
    .bind(position_i64(answer)?)
    .execute(&mut **tx)
    .await
    .map_err(conn)?;
    Ok(())
}

/// Runs on the caller's transaction so the answers match the header row read
/// just before them.
async fn answers_for(
    tx: &mut SqliteConnection,
    session_id: &str,
) -> Result<Vec<SqliteRow>, StorageError> {
    let sql = format!(
        "SELECT {ANSWER_COLUMNS} FROM exam_answers WHERE session_id = ?1 ORDER BY position ASC"
    );
    sqlx::query(&sql)
        .bind(session_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)
}

#[async_trait::async_trait]
impl SessionStore for SqliteRepository {
    async fn insert_session(&self, session: &ExamSession) -> Result<(), StorageError> {
        let id = session.id().to_string();
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO exam_sessions (
                id, user_id, template_id, name, config, state, current_index,
                started_at, finished_at, option_seed, result, version, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ",
        )
        .bind(id.as_str())
        .bind(id_i64("user_id", session.user_id().value())?)
        .bind(
            session
                .template_id()
                .map(|t| id_i64("template_id", t.value()))
                .transpose()?,
        )
        .bind(session.name())
        .bind(config_to_json(session.config())?)
        .bind(session.state().as_str())
        .bind(i64::try_from(session.current_index()).map_err(ser)?)
        .bind(session.started_at())
        .bind(session.finished_at())
        .bind(session.option_seed().map(seed_to_i64))
        .bind(result_to_json(session.result())?)
        .bind(id_i64("version", session.version())?)
        .bind(session.created_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                StorageError::Conflict
            } else {
                conn(e)
            }
        })?;

        for answer in session.answers() {
            insert_answer(&mut tx, &id, answer).await?;
        }

        tx.commit().await.map_err(conn)?;
        tracing::debug!(session_id = %id, "session inserted");
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> Result<ExamSession, StorageError> {
        let id = id.to_string();
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let sql = format!("SELECT {SESSION_COLUMNS} FROM exam_sessions WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        let answers = answers_for(&mut *tx, &id).await?;
        tx.commit().await.map_err(conn)?;
        map_session_row(&row, &answers)
    }

    async fn save_session(&self, session: &ExamSession) -> Result<u64, StorageError> {
        let id = session.id().to_string();
        let expected = id_i64("version", session.version())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let updated = sqlx::query(
            r"
            UPDATE exam_sessions
            SET state = ?1,
                current_index = ?2,
                started_at = ?3,
                finished_at = ?4,
                option_seed = ?5,
                result = ?6,
                version = version + 1
            WHERE id = ?7 AND version = ?8
            ",
        )
        .bind(session.state().as_str())
        .bind(i64::try_from(session.current_index()).map_err(ser)?)
        .bind(session.started_at())
        .bind(session.finished_at())
        .bind(session.option_seed().map(seed_to_i64))
        .bind(result_to_json(session.result())?)
        .bind(id.as_str())
        .bind(expected)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM exam_sessions WHERE id = ?1")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(conn)?
                .is_some();
            tx.rollback().await.map_err(conn)?;
            if exists {
                tracing::warn!(session_id = %id, expected, "stale session version");
                return Err(StorageError::Conflict);
            }
            return Err(StorageError::NotFound);
        }

        for answer in session.answers() {
            update_answer(&mut tx, &id, answer).await?;
        }

        tx.commit().await.map_err(conn)?;
        let version = session.version() + 1;
        tracing::debug!(session_id = %id, version, state = session.state().as_str(), "session saved");
        Ok(version)
    }

    async fn list_sessions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Page<ExamSession>, StorageError> {
        let user = id_i64("user_id", user_id.value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let total: i64 =
            sqlx::query("SELECT COUNT(*) AS total FROM exam_sessions WHERE user_id = ?1")
                .bind(user)
                .fetch_one(&mut *tx)
                .await
                .map_err(conn)?
                .try_get("total")
                .map_err(ser)?;

        let sql = format!(
            r"
            SELECT {SESSION_COLUMNS}
            FROM exam_sessions
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2 OFFSET ?3
            "
        );
        let rows = sqlx::query(&sql)
            .bind(user)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&mut *tx)
            .await
            .map_err(conn)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(ser)?;
            let answers = answers_for(&mut *tx, &id).await?;
            items.push(map_session_row(&row, &answers)?);
        }
        tx.commit().await.map_err(conn)?;
        Ok(Page {
            items,
            total: u64::try_from(total).map_err(ser)?,
        })
    }
}
