use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS questions (
            id INTEGER PRIMARY KEY,
            category_id INTEGER NOT NULL,
            section_id INTEGER NOT NULL,
            difficulty TEXT NOT NULL CHECK (difficulty IN ('easy', 'medium', 'hard')),
            title TEXT NOT NULL,
            scenario TEXT NOT NULL,
            prompt TEXT NOT NULL,
            correct_option TEXT NOT NULL CHECK (correct_option IN ('A', 'B', 'C', 'D')),
            active INTEGER NOT NULL,
            published INTEGER NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS question_options (
            question_id INTEGER NOT NULL,
            letter TEXT NOT NULL CHECK (letter IN ('A', 'B', 'C', 'D')),
            text TEXT NOT NULL,
            PRIMARY KEY (question_id, letter),
            FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS exam_templates (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            config TEXT NOT NULL,
            active INTEGER NOT NULL,
            times_taken INTEGER NOT NULL CHECK (times_taken >= 0),
            average_score INTEGER NOT NULL CHECK (average_score BETWEEN 0 AND 100),
            created_at TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS exam_sessions (
            id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            template_id INTEGER,
            name TEXT NOT NULL,
            config TEXT NOT NULL,
            state TEXT NOT NULL
                CHECK (state IN ('pending', 'in_progress', 'completed', 'cancelled')),
            current_index INTEGER NOT NULL CHECK (current_index >= 0),
            started_at TEXT,
            finished_at TEXT,
            option_seed INTEGER,
            result TEXT,
            version INTEGER NOT NULL CHECK (version >= 0),
            created_at TEXT NOT NULL,
            FOREIGN KEY (template_id) REFERENCES exam_templates(id) ON DELETE SET NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS exam_answers (
            session_id TEXT NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            question_id INTEGER NOT NULL,
            chosen_option TEXT,
            correct_option TEXT NOT NULL,
            is_correct INTEGER,
            question_shown_at TEXT,
            answered_at TEXT,
            time_spent_seconds INTEGER,
            skipped INTEGER NOT NULL,
            flagged_for_review INTEGER NOT NULL,
            PRIMARY KEY (session_id, position),
            FOREIGN KEY (session_id) REFERENCES exam_sessions(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_questions_pool
            ON questions (difficulty, active, published, category_id, section_id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_exam_sessions_user_created
            ON exam_sessions (user_id, created_at);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_exam_templates_active_created
            ON exam_templates (active, created_at);
    ",
];

/// Runs the versioned schema migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: questions, templates, sessions and answers.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied schema migration");
    }

    Ok(())
}
