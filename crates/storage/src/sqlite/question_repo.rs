use exam_core::model::{
    Difficulty, OptionLetter, Question, QuestionFilter, QuestionId, QuestionRef,
};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, id_i64, map_question_row, ser};
use crate::repository::{QuestionRepository, StorageError};

/// Appends ` AND {column} IN (?, ?, ...)` / `NOT IN` and collects the binds.
fn push_in_clause(
    sql: &mut String,
    binds: &mut Vec<i64>,
    column: &str,
    negate: bool,
    values: &[i64],
) {
    if values.is_empty() {
        return;
    }
    sql.push_str(" AND ");
    sql.push_str(column);
    sql.push_str(if negate { " NOT IN (" } else { " IN (" });
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('?');
        binds.push(*value);
    }
    sql.push(')');
}

#[async_trait::async_trait]
impl QuestionRepository for SqliteRepository {
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let id = id_i64("question_id", question.id().value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO questions (
                id, category_id, section_id, difficulty, title, scenario, prompt,
                correct_option, active, published
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                category_id = excluded.category_id,
                section_id = excluded.section_id,
                difficulty = excluded.difficulty,
                title = excluded.title,
                scenario = excluded.scenario,
                prompt = excluded.prompt,
                correct_option = excluded.correct_option,
                active = excluded.active,
                published = excluded.published
            ",
        )
        .bind(id)
        .bind(id_i64("category_id", question.category_id().value())?)
        .bind(id_i64("section_id", question.section_id().value())?)
        .bind(question.difficulty().as_str())
        .bind(question.title())
        .bind(question.scenario())
        .bind(question.prompt())
        .bind(question.correct_option().as_str())
        .bind(question.is_active())
        .bind(question.is_published())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("DELETE FROM question_options WHERE question_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for option in question.options() {
            sqlx::query(
                r"
                INSERT INTO question_options (question_id, letter, text)
                VALUES (?1, ?2, ?3)
                ",
            )
            .bind(id)
            .bind(option.letter.as_str())
            .bind(option.text.as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn find_questions(
        &self,
        filter: &QuestionFilter,
        tier: Option<Difficulty>,
        limit: usize,
        excluding: &[QuestionId],
    ) -> Result<Vec<QuestionRef>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let categories = filter
            .category_ids
            .iter()
            .map(|id| id_i64("category_id", id.value()))
            .collect::<Result<Vec<_>, _>>()?;
        let sections = filter
            .section_ids
            .iter()
            .map(|id| id_i64("section_id", id.value()))
            .collect::<Result<Vec<_>, _>>()?;
        let excluded = excluding
            .iter()
            .map(|id| id_i64("question_id", id.value()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sql = String::from(
            r"
            SELECT id, correct_option, difficulty
            FROM questions
            WHERE active = 1 AND published = 1",
        );
        let mut binds = Vec::new();
        if tier.is_some() {
            sql.push_str(" AND difficulty = ?");
        }
        push_in_clause(&mut sql, &mut binds, "category_id", false, &categories);
        push_in_clause(&mut sql, &mut binds, "section_id", false, &sections);
        push_in_clause(&mut sql, &mut binds, "id", true, &excluded);
        sql.push_str("\n            ORDER BY RANDOM()\n            LIMIT ?");

        let mut q = sqlx::query(&sql);
        if let Some(tier) = tier {
            q = q.bind(tier.as_str());
        }
        for value in binds {
            q = q.bind(value);
        }
        q = q.bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = q.fetch_all(&self.pool).await.map_err(conn)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(ser)?;
            let correct: String = row.try_get("correct_option").map_err(ser)?;
            let difficulty: String = row.try_get("difficulty").map_err(ser)?;
            out.push(QuestionRef {
                id: QuestionId::new(u64::try_from(id).map_err(ser)?),
                correct_option: OptionLetter::parse(&correct).map_err(ser)?,
                difficulty: Difficulty::parse(&difficulty).map_err(ser)?,
            });
        }
        tracing::debug!(?tier, limit, drawn = out.len(), "drew questions");
        Ok(out)
    }

    async fn get_question_detail(&self, id: QuestionId) -> Result<Question, StorageError> {
        let qid = id_i64("question_id", id.value())?;
        let row = sqlx::query(
            r"
            SELECT
                id, category_id, section_id, difficulty, title, scenario, prompt,
                correct_option, active, published
            FROM questions
            WHERE id = ?1
            ",
        )
        .bind(qid)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        let options = sqlx::query(
            r"
            SELECT letter, text
            FROM question_options
            WHERE question_id = ?1
            ORDER BY letter ASC
            ",
        )
        .bind(qid)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        map_question_row(&row, &options)
    }
}
