use std::sync::Arc;

use storage::repository::{QuestionRepository, Storage};

use crate::Clock;
use crate::error::AppServicesError;
use crate::exam::SessionManager;
use crate::history::ExamHistoryService;
use crate::template_service::TemplateService;

/// Assembles the app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    questions: Arc<dyn QuestionRepository>,
    sessions: Arc<SessionManager>,
    templates: Arc<TemplateService>,
    history: Arc<ExamHistoryService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(clock, &storage))
    }

    #[must_use]
    pub fn in_memory(clock: Clock) -> Self {
        Self::from_storage(clock, &Storage::in_memory())
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage) -> Self {
        let manager = SessionManager::from_storage(clock, storage);
        let history = ExamHistoryService::new(Arc::clone(&storage.sessions), manager.clone());
        let templates = TemplateService::new(clock, Arc::clone(&storage.templates));
        Self {
            questions: Arc::clone(&storage.questions),
            sessions: Arc::new(manager),
            templates: Arc::new(templates),
            history: Arc::new(history),
        }
    }

    /// Direct access to the question bank, for seeding and administration.
    #[must_use]
    pub fn questions(&self) -> Arc<dyn QuestionRepository> {
        Arc::clone(&self.questions)
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn templates(&self) -> Arc<TemplateService> {
        Arc::clone(&self.templates)
    }

    #[must_use]
    pub fn history(&self) -> Arc<ExamHistoryService> {
        Arc::clone(&self.history)
    }
}
