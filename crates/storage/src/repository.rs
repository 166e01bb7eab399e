use async_trait::async_trait;
use exam_core::model::{
    Difficulty, ExamSession, ExamTemplate, Question, QuestionFilter, QuestionId, QuestionRef,
    SessionId, TemplateId, UserId,
};
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// The record changed since it was read (stale version) or already exists.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One page of a listing plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Read side of the question bank. The exam engine never mutates questions;
/// `upsert_question` exists for seeding and tests.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Persist or update a question together with its options.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the question cannot be stored.
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError>;

    /// Random draw of up to `limit` distinct eligible questions.
    ///
    /// Only active, published questions matching `filter` are considered.
    /// `tier = None` draws across all tiers. Ids in `excluding` are never returned.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the pool cannot be read.
    async fn find_questions(
        &self,
        filter: &QuestionFilter,
        tier: Option<Difficulty>,
        limit: usize,
        excluding: &[QuestionId],
    ) -> Result<Vec<QuestionRef>, StorageError>;

    /// Full question content for display.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_question_detail(&self, id: QuestionId) -> Result<Question, StorageError>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Stores a new template under a fresh id and returns that id. The
    /// template's own id is ignored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the template cannot be stored.
    async fn insert_new_template(&self, template: &ExamTemplate) -> Result<TemplateId, StorageError>;

    /// Persist or update a template.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the template cannot be stored.
    async fn upsert_template(&self, template: &ExamTemplate) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_template(&self, id: TemplateId) -> Result<ExamTemplate, StorageError>;

    /// Active templates, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the listing cannot be read.
    async fn list_templates(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Page<ExamTemplate>, StorageError>;

    /// Folds one completed attempt into the template's usage statistics.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the template is missing, or other
    /// storage errors.
    async fn record_completion(
        &self,
        id: TemplateId,
        score_percent: u8,
    ) -> Result<ExamTemplate, StorageError>;
}

/// Persistence boundary for exam sessions and their answer records.
///
/// Writes are guarded by the session's `version`: a save only commits if the
/// stored version still equals the version the caller loaded.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session and all of its answer records in one write.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id is already taken.
    async fn insert_session(&self, session: &ExamSession) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn load_session(&self, id: SessionId) -> Result<ExamSession, StorageError>;

    /// Atomically replace the session and its answers, returning the new version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the stored version moved on since
    /// `session` was loaded, `StorageError::NotFound` if it vanished. Nothing
    /// is written in either case.
    async fn save_session(&self, session: &ExamSession) -> Result<u64, StorageError>;

    /// A user's sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the listing cannot be read.
    async fn list_sessions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Page<ExamSession>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    questions: Arc<Mutex<HashMap<QuestionId, Question>>>,
    templates: Arc<Mutex<HashMap<TemplateId, ExamTemplate>>>,
    sessions: Arc<Mutex<HashMap<SessionId, ExamSession>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            questions: Arc::new(Mutex::new(HashMap::new())),
            templates: Arc::new(Mutex::new(HashMap::new())),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn lock_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn window<T>(items: Vec<T>, offset: u32, limit: u32) -> Page<T> {
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    Page { items, total }
}

#[async_trait]
impl QuestionRepository for InMemoryRepository {
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let mut guard = self.questions.lock().map_err(lock_err)?;
        guard.insert(question.id(), question.clone());
        Ok(())
    }

    async fn find_questions(
        &self,
        filter: &QuestionFilter,
        tier: Option<Difficulty>,
        limit: usize,
        excluding: &[QuestionId],
    ) -> Result<Vec<QuestionRef>, StorageError> {
        let guard = self.questions.lock().map_err(lock_err)?;
        let mut rng = rand::rng();
        let picked = guard
            .values()
            .filter(|q| q.is_eligible(filter))
            .filter(|q| tier.is_none_or(|t| q.difficulty() == t))
            .filter(|q| !excluding.contains(&q.id()))
            .map(Question::as_ref_entry)
            .choose_multiple(&mut rng, limit);
        Ok(picked)
    }

    async fn get_question_detail(&self, id: QuestionId) -> Result<Question, StorageError> {
        let guard = self.questions.lock().map_err(lock_err)?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl TemplateRepository for InMemoryRepository {
    async fn insert_new_template(&self, template: &ExamTemplate) -> Result<TemplateId, StorageError> {
        let mut guard = self.templates.lock().map_err(lock_err)?;
        let max = guard.keys().map(TemplateId::value).max().unwrap_or(0);
        let id = TemplateId::new(max + 1);
        guard.insert(id, template.clone().with_id(id));
        Ok(id)
    }

    async fn upsert_template(&self, template: &ExamTemplate) -> Result<(), StorageError> {
        let mut guard = self.templates.lock().map_err(lock_err)?;
        guard.insert(template.id(), template.clone());
        Ok(())
    }

    async fn get_template(&self, id: TemplateId) -> Result<ExamTemplate, StorageError> {
        let guard = self.templates.lock().map_err(lock_err)?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_templates(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Page<ExamTemplate>, StorageError> {
        let guard = self.templates.lock().map_err(lock_err)?;
        let mut active: Vec<ExamTemplate> =
            guard.values().filter(|t| t.is_active()).cloned().collect();
        active.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(window(active, offset, limit))
    }

    async fn record_completion(
        &self,
        id: TemplateId,
        score_percent: u8,
    ) -> Result<ExamTemplate, StorageError> {
        let mut guard = self.templates.lock().map_err(lock_err)?;
        let template = guard.get_mut(&id).ok_or(StorageError::NotFound)?;
        template.record_completion(score_percent);
        Ok(template.clone())
    }
}

#[async_trait]
impl SessionStore for InMemoryRepository {
    async fn insert_session(&self, session: &ExamSession) -> Result<(), StorageError> {
        let mut guard = self.sessions.lock().map_err(lock_err)?;
        if guard.contains_key(&session.id()) {
            return Err(StorageError::Conflict);
        }
        guard.insert(session.id(), session.clone());
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> Result<ExamSession, StorageError> {
        let guard = self.sessions.lock().map_err(lock_err)?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn save_session(&self, session: &ExamSession) -> Result<u64, StorageError> {
        let mut guard = self.sessions.lock().map_err(lock_err)?;
        let stored = guard.get(&session.id()).ok_or(StorageError::NotFound)?;
        if stored.version() != session.version() {
            return Err(StorageError::Conflict);
        }
        let version = session.version() + 1;
        guard.insert(session.id(), session.clone().with_version(version));
        Ok(version)
    }

    async fn list_sessions(
        &self,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> Result<Page<ExamSession>, StorageError> {
        let guard = self.sessions.lock().map_err(lock_err)?;
        let mut owned: Vec<ExamSession> = guard
            .values()
            .filter(|s| s.user_id() == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().to_string().cmp(&a.id().to_string()))
        });
        Ok(window(owned, offset, limit))
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub questions: Arc<dyn QuestionRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let questions: Arc<dyn QuestionRepository> = Arc::new(repo.clone());
        let templates: Arc<dyn TemplateRepository> = Arc::new(repo.clone());
        let sessions: Arc<dyn SessionStore> = Arc::new(repo);
        Self {
            questions,
            templates,
            sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{
        CategoryId, DifficultyQuota, ExamConfig, OptionLetter, QuestionOption, SectionId,
        TemplateDraft, Timing,
    };
    use exam_core::navigation::NavigationController;
    use exam_core::time::fixed_now;

    fn question(id: u64, difficulty: Difficulty, category: u64) -> Question {
        Question::new(
            QuestionId::new(id),
            CategoryId::new(category),
            SectionId::new(1),
            difficulty,
            format!("Q{id}"),
            "",
            "Which one?",
            vec![
                QuestionOption::new(OptionLetter::A, "a"),
                QuestionOption::new(OptionLetter::B, "b"),
            ],
            OptionLetter::A,
        )
        .unwrap()
    }

    fn config() -> ExamConfig {
        ExamConfig {
            timing: Timing::Practice,
            question_count: 5,
            quota: DifficultyQuota::balanced(),
            filter: QuestionFilter::any(),
            allow_backtrack: true,
            shuffle_questions: false,
            shuffle_options: false,
            reveal_answers: false,
            pass_threshold_percent: 60,
        }
    }

    fn session(repo_picks: &[QuestionRef]) -> ExamSession {
        ExamSession::new_pending(
            SessionId::generate(),
            UserId::new(1),
            None,
            "s",
            config(),
            repo_picks,
            None,
            fixed_now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn find_questions_respects_tier_filter_and_exclusions() {
        let repo = InMemoryRepository::new();
        for id in 1..=6 {
            repo.upsert_question(&question(id, Difficulty::Easy, 1))
                .await
                .unwrap();
        }
        repo.upsert_question(&question(7, Difficulty::Hard, 1))
            .await
            .unwrap();
        repo.upsert_question(&question(8, Difficulty::Easy, 2))
            .await
            .unwrap();
        repo.upsert_question(&question(9, Difficulty::Easy, 1).with_visibility(false, true))
            .await
            .unwrap();

        let filter = QuestionFilter {
            category_ids: vec![CategoryId::new(1)],
            section_ids: Vec::new(),
        };
        let excluding = [QuestionId::new(1), QuestionId::new(2)];
        let picked = repo
            .find_questions(&filter, Some(Difficulty::Easy), 10, &excluding)
            .await
            .unwrap();

        let mut ids: Vec<u64> = picked.iter().map(|q| q.id.value()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![3, 4, 5, 6]);

        let limited = repo
            .find_questions(&QuestionFilter::any(), None, 3, &[])
            .await
            .unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[tokio::test]
    async fn save_session_rejects_stale_versions() {
        let repo = InMemoryRepository::new();
        let picks: Vec<_> = (1..=5)
            .map(|i| question(i, Difficulty::Medium, 1).as_ref_entry())
            .collect();
        let mut pending = session(&picks);
        repo.insert_session(&pending).await.unwrap();
        assert!(matches!(
            repo.insert_session(&pending).await,
            Err(StorageError::Conflict)
        ));

        NavigationController::start(&mut pending, fixed_now()).unwrap();
        let stale = pending.clone();
        assert_eq!(repo.save_session(&pending).await.unwrap(), 1);
        assert!(matches!(
            repo.save_session(&stale).await,
            Err(StorageError::Conflict)
        ));

        let loaded = repo.load_session(pending.id()).await.unwrap();
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.started_at(), Some(fixed_now()));
    }

    #[tokio::test]
    async fn template_stats_and_listing() {
        let repo = InMemoryRepository::new();
        let template = TemplateDraft {
            name: "Cardiology".into(),
            description: None,
            config: config(),
        }
        .validate(TemplateId::new(99), fixed_now())
        .unwrap();
        let id = repo.insert_new_template(&template).await.unwrap();
        assert_eq!(id, TemplateId::new(1));
        assert_eq!(repo.get_template(id).await.unwrap().id(), id);
        let second = repo.insert_new_template(&template).await.unwrap();
        assert_eq!(second, TemplateId::new(2));

        repo.record_completion(id, 80).await.unwrap();
        let updated = repo.record_completion(id, 60).await.unwrap();
        assert_eq!(updated.times_taken(), 2);
        assert_eq!(updated.average_score(), 70);

        let page = repo.list_templates(0, 10).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id(), second);
        assert_eq!(page.items[1].times_taken(), 2);
    }
}
