use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use exam_core::model::{QuestionId, SessionId, TemplateId, UserId};
use storage::repository::{StorageError, TemplateRepository};

use crate::error::SinkError;

/// Facts published after a session write has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamEvent {
    AnswerRecorded {
        session_id: SessionId,
        user_id: UserId,
        position: usize,
        question_id: QuestionId,
        is_correct: Option<bool>,
    },
    SessionCompleted {
        session_id: SessionId,
        user_id: UserId,
        template_id: Option<TemplateId>,
        score_percent: u8,
        passed: bool,
        finished_at: DateTime<Utc>,
    },
}

/// Post-commit consumer of exam events (statistics, leaderboards, analytics).
///
/// Sinks run after the session is stored. Their failures are logged and never
/// roll back or fail the operation that produced the event.
#[async_trait]
pub trait ExamEventSink: Send + Sync {
    /// # Errors
    ///
    /// Returns `SinkError` if the event could not be applied.
    async fn handle(&self, event: &ExamEvent) -> Result<(), SinkError>;
}

/// Folds completed template-based attempts into the template's usage stats.
pub struct TemplateStatsSink {
    templates: Arc<dyn TemplateRepository>,
}

impl TemplateStatsSink {
    #[must_use]
    pub fn new(templates: Arc<dyn TemplateRepository>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl ExamEventSink for TemplateStatsSink {
    async fn handle(&self, event: &ExamEvent) -> Result<(), SinkError> {
        let ExamEvent::SessionCompleted {
            template_id: Some(template_id),
            score_percent,
            ..
        } = event
        else {
            return Ok(());
        };
        match self
            .templates
            .record_completion(*template_id, *score_percent)
            .await
        {
            Ok(template) => {
                tracing::debug!(
                    template_id = %template_id,
                    times_taken = template.times_taken(),
                    average_score = template.average_score(),
                    "template stats updated"
                );
                Ok(())
            }
            // Template removed since the attempt began.
            Err(StorageError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) async fn dispatch(sinks: &[Arc<dyn ExamEventSink>], events: &[ExamEvent]) {
    for event in events {
        for sink in sinks {
            if let Err(err) = sink.handle(event).await {
                tracing::warn!(error = %err, ?event, "event sink failed");
            }
        }
    }
}
