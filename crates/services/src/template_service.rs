use std::sync::Arc;

use serde::Serialize;

use exam_core::model::{ExamTemplate, TemplateDraft, TemplateId};
use storage::repository::{StorageError, TemplateRepository};

use crate::Clock;
use crate::error::TemplateServiceError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// One page of a listing. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u64,
}

/// Normalizes a 1-based page request into `(page, per_page, offset)`.
pub(crate) fn page_window(page: u32, per_page: u32) -> (u32, u32, u32) {
    let page = page.max(1);
    let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
    (page, per_page, (page - 1).saturating_mul(per_page))
}

pub(crate) fn paged<T>(items: Vec<T>, page: u32, per_page: u32, total: u64) -> Paged<T> {
    Paged {
        items,
        page,
        per_page,
        total,
        total_pages: total.div_ceil(u64::from(per_page)),
    }
}

/// Creates and lists exam templates.
#[derive(Clone)]
pub struct TemplateService {
    clock: Clock,
    templates: Arc<dyn TemplateRepository>,
}

impl TemplateService {
    #[must_use]
    pub fn new(clock: Clock, templates: Arc<dyn TemplateRepository>) -> Self {
        Self { clock, templates }
    }

    /// Validates the draft and stores it; the store assigns the id.
    ///
    /// # Errors
    ///
    /// Returns `TemplateServiceError::Template` for invalid drafts or
    /// `TemplateServiceError::Storage` if persistence fails.
    pub async fn create_template(
        &self,
        draft: TemplateDraft,
    ) -> Result<ExamTemplate, TemplateServiceError> {
        let template = draft.validate(TemplateId::new(1), self.clock.now())?;
        let id = self.templates.insert_new_template(&template).await?;
        let template = template.with_id(id);
        tracing::info!(
            template_id = %id,
            name = template.name(),
            mode = template.config().mode().as_str(),
            "template created"
        );
        Ok(template)
    }

    /// # Errors
    ///
    /// Returns `TemplateServiceError::NotFound` for unknown ids.
    pub async fn get_template(&self, id: TemplateId) -> Result<ExamTemplate, TemplateServiceError> {
        self.templates.get_template(id).await.map_err(|e| match e {
            StorageError::NotFound => TemplateServiceError::NotFound(id),
            other => other.into(),
        })
    }

    /// Active templates, newest first.
    ///
    /// # Errors
    ///
    /// Returns `TemplateServiceError::Storage` if the listing fails.
    pub async fn list_templates(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Paged<ExamTemplate>, TemplateServiceError> {
        let (page, per_page, offset) = page_window(page, per_page);
        let listing = self.templates.list_templates(offset, per_page).await?;
        Ok(paged(listing.items, page, per_page, listing.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{
        DifficultyQuota, ExamConfig, QuestionFilter, TemplateError, Timing,
    };
    use exam_core::time::fixed_clock;
    use storage::repository::InMemoryRepository;

    fn draft(name: &str) -> TemplateDraft {
        TemplateDraft {
            name: name.into(),
            description: None,
            config: ExamConfig {
                timing: Timing::TotalTime { budget_secs: 900 },
                question_count: 10,
                quota: DifficultyQuota::balanced(),
                filter: QuestionFilter::any(),
                allow_backtrack: true,
                shuffle_questions: true,
                shuffle_options: false,
                reveal_answers: false,
                pass_threshold_percent: 70,
            },
        }
    }

    #[test]
    fn page_window_clamps_inputs() {
        assert_eq!(page_window(0, 0), (1, 1, 0));
        assert_eq!(page_window(3, 20), (3, 20, 40));
        assert_eq!(page_window(1, 500), (1, MAX_PAGE_SIZE, 0));
    }

    #[tokio::test]
    async fn creates_and_lists_templates() {
        let service = TemplateService::new(fixed_clock(), Arc::new(InMemoryRepository::new()));
        let first = service.create_template(draft("Cardiology")).await.unwrap();
        let second = service.create_template(draft("Neurology")).await.unwrap();
        assert_ne!(first.id(), second.id());

        let page = service.list_templates(1, 1).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 1);

        assert_eq!(service.get_template(first.id()).await.unwrap(), first);
        assert!(matches!(
            service.get_template(TemplateId::new(99)).await,
            Err(TemplateServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_drafts_are_not_stored() {
        let service = TemplateService::new(fixed_clock(), Arc::new(InMemoryRepository::new()));
        let mut bad = draft("Too short");
        bad.config.question_count = 3;
        assert!(matches!(
            service.create_template(bad).await,
            Err(TemplateServiceError::Template(
                TemplateError::InvalidQuestionCount { got: 3, .. }
            ))
        ));
        assert_eq!(service.list_templates(1, 10).await.unwrap().total, 0);
    }
}
