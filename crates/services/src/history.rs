use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use exam_core::model::{ExamMode, ExamSession, SessionId, SessionState, TemplateId, UserId};
use storage::repository::SessionStore;

use crate::error::ExamError;
use crate::exam::SessionManager;
use crate::template_service::{Paged, page_window, paged};

const STATS_BATCH: u32 = 200;

/// One row of a user's session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummaryItem {
    pub session_id: SessionId,
    pub name: String,
    pub template_id: Option<TemplateId>,
    pub state: SessionState,
    pub mode: ExamMode,
    pub total_questions: usize,
    pub score_percent: Option<u8>,
    pub passed: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SessionSummaryItem {
    fn from_session(session: &ExamSession) -> Self {
        let result = session.result();
        Self {
            session_id: session.id(),
            name: session.name().to_owned(),
            template_id: session.template_id(),
            state: session.state(),
            mode: session.config().mode(),
            total_questions: session.len(),
            score_percent: result.map(|r| r.score_percent),
            passed: result.map(|r| r.passed),
            created_at: session.created_at(),
            finished_at: session.finished_at(),
        }
    }
}

/// Aggregate performance across a user's sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExamStatistics {
    pub total_sessions: u64,
    pub completed: u64,
    pub passed: u64,
    pub failed: u64,
    /// Mean of completed scores, one decimal; `None` before any completion.
    pub average_score: Option<f64>,
    pub best_score: Option<u8>,
    /// Lowest completed score above zero.
    pub worst_nonzero_score: Option<u8>,
}

impl ExamStatistics {
    fn fold(&mut self, session: &ExamSession, score_sum: &mut u64) {
        self.total_sessions += 1;
        let Some(result) = session.result() else {
            return;
        };
        self.completed += 1;
        if result.passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        let score = result.score_percent;
        *score_sum += u64::from(score);
        self.best_score = Some(self.best_score.map_or(score, |b| b.max(score)));
        if score > 0 {
            self.worst_nonzero_score =
                Some(self.worst_nonzero_score.map_or(score, |w| w.min(score)));
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn one_decimal_mean(sum: u64, count: u64) -> Option<f64> {
    if count == 0 {
        return None;
    }
    let mean = sum as f64 / count as f64;
    Some((mean * 10.0).round() / 10.0)
}

/// Read-side views over a user's past and running sessions.
#[derive(Clone)]
pub struct ExamHistoryService {
    sessions: Arc<dyn SessionStore>,
    manager: SessionManager,
}

impl ExamHistoryService {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>, manager: SessionManager) -> Self {
        Self { sessions, manager }
    }

    /// The user's sessions, newest first. Running sessions on the page are
    /// brought up to date with the clock before they are summarised.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::Storage` if the listing or an expiry write fails.
    pub async fn list_sessions(
        &self,
        user: UserId,
        page: u32,
        per_page: u32,
    ) -> Result<Paged<SessionSummaryItem>, ExamError> {
        let (page, per_page, offset) = page_window(page, per_page);
        let listing = self.sessions.list_sessions(user, offset, per_page).await?;
        let now = self.manager.clock().now();

        let mut items = Vec::with_capacity(listing.items.len());
        for session in listing.items {
            let session = self.manager.refresh(session, now).await?;
            items.push(SessionSummaryItem::from_session(&session));
        }
        Ok(paged(items, page, per_page, listing.total))
    }

    /// # Errors
    ///
    /// Returns `ExamError::Storage` if the sessions cannot be read.
    pub async fn statistics(&self, user: UserId) -> Result<ExamStatistics, ExamError> {
        let now = self.manager.clock().now();
        let mut stats = ExamStatistics::default();
        let mut score_sum = 0;
        let mut offset = 0;
        loop {
            let batch = self.sessions.list_sessions(user, offset, STATS_BATCH).await?;
            let fetched = u32::try_from(batch.items.len()).unwrap_or(u32::MAX);
            for session in batch.items {
                let session = self.manager.refresh(session, now).await?;
                stats.fold(&session, &mut score_sum);
            }
            offset = offset.saturating_add(fetched);
            if fetched < STATS_BATCH || u64::from(offset) >= batch.total {
                break;
            }
        }
        stats.average_score = one_decimal_mean(score_sum, stats.completed);
        tracing::debug!(user_id = %user, sessions = stats.total_sessions, "statistics computed");
        Ok(stats)
    }
}
