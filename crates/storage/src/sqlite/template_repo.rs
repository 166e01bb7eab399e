use exam_core::model::{ExamTemplate, TemplateId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{config_to_json, conn, id_i64, map_template_row, ser};
use crate::repository::{Page, StorageError, TemplateRepository};

const TEMPLATE_COLUMNS: &str =
    "id, name, description, config, active, times_taken, average_score, created_at";

#[async_trait::async_trait]
impl TemplateRepository for SqliteRepository {
    async fn insert_new_template(&self, template: &ExamTemplate) -> Result<TemplateId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO exam_templates (
                name, description, config, active, times_taken, average_score, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(template.name())
        .bind(template.description())
        .bind(config_to_json(template.config())?)
        .bind(template.is_active())
        .bind(i64::from(template.times_taken()))
        .bind(i64::from(template.average_score()))
        .bind(template.created_at())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        let id = u64::try_from(res.last_insert_rowid()).map_err(ser)?;
        tracing::debug!(template_id = id, "template inserted");
        Ok(TemplateId::new(id))
    }

    async fn upsert_template(&self, template: &ExamTemplate) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO exam_templates (
                id, name, description, config, active, times_taken, average_score, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                -- created_at stays with the original insert
                name = excluded.name,
                description = excluded.description,
                config = excluded.config,
                active = excluded.active,
                times_taken = excluded.times_taken,
                average_score = excluded.average_score
            ",
        )
        .bind(id_i64("template_id", template.id().value())?)
        .bind(template.name())
        .bind(template.description())
        .bind(config_to_json(template.config())?)
        .bind(template.is_active())
        .bind(i64::from(template.times_taken()))
        .bind(i64::from(template.average_score()))
        .bind(template.created_at())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn get_template(&self, id: TemplateId) -> Result<ExamTemplate, StorageError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM exam_templates WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("template_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        map_template_row(&row)
    }

    async fn list_templates(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Page<ExamTemplate>, StorageError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM exam_templates WHERE active = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?
            .try_get("total")
            .map_err(ser)?;

        let sql = format!(
            r"
            SELECT {TEMPLATE_COLUMNS}
            FROM exam_templates
            WHERE active = 1
            ORDER BY created_at DESC, id DESC
            LIMIT ?1 OFFSET ?2
            "
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(map_template_row(&row)?);
        }
        Ok(Page {
            items,
            total: u64::try_from(total).map_err(ser)?,
        })
    }

    async fn record_completion(
        &self,
        id: TemplateId,
        score_percent: u8,
    ) -> Result<ExamTemplate, StorageError> {
        // Right-hand sides read the row as it was before this update.
        let sql = format!(
            r"
            UPDATE exam_templates
            SET average_score = (2 * (average_score * times_taken + ?1) + times_taken + 1)
                    / (2 * (times_taken + 1)),
                times_taken = times_taken + 1
            WHERE id = ?2
            RETURNING {TEMPLATE_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(i64::from(score_percent))
            .bind(id_i64("template_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        map_template_row(&row)
    }
}
