use std::sync::Arc;

use chrono::{DateTime, Utc};

use exam_core::model::{
    ExamParams, ExamSession, OptionLetter, SessionId, SessionState, TemplateId, UserId,
};
use exam_core::navigation::{AnswerAction, Expiry, NavigationController, NavigationError};
use exam_core::transition::{SessionOperation, transition};
use storage::repository::{
    QuestionRepository, SessionStore, Storage, StorageError, TemplateRepository,
};

use super::events::{self, ExamEvent, ExamEventSink, TemplateStatsSink};
use super::selector::QuestionSelector;
use super::view::{
    AnswerSnapshot, CancelAck, QuestionDisplay, QuestionView, ResultView, SessionStatusView,
    SubmitAck,
};
use crate::Clock;
use crate::error::ExamError;
use crate::identity::{OwnershipVerifier, SameUserVerifier};

//
// ─── INPUTS ────────────────────────────────────────────────────────────────────
//

/// What a new session is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamSource {
    Template(TemplateId),
    AdHoc(ExamParams),
}

/// Raw client input for `submit_answer`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerSubmission {
    pub position: usize,
    pub choice: Option<String>,
    pub skip: bool,
    pub flagged: bool,
}

impl AnswerSubmission {
    #[must_use]
    pub fn choose(position: usize, letter: &str) -> Self {
        Self {
            position,
            choice: Some(letter.to_owned()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn skip(position: usize) -> Self {
        Self {
            position,
            skip: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn flagged(mut self, flagged: bool) -> Self {
        self.flagged = flagged;
        self
    }

    fn action(&self) -> Result<AnswerAction, ExamError> {
        match (self.choice.as_deref(), self.skip) {
            (Some(_), true) => Err(ExamError::InvalidAnswerFormat(
                "choose an option or skip, not both".into(),
            )),
            (Some(raw), false) => OptionLetter::parse(raw)
                .map(AnswerAction::Choose)
                .map_err(|e| ExamError::InvalidAnswerFormat(e.to_string())),
            (None, true) => Ok(AnswerAction::Skip),
            (None, false) => Ok(AnswerAction::FlagOnly),
        }
    }
}

struct Committed<T> {
    session: ExamSession,
    value: T,
    now: DateTime<Utc>,
}

//
// ─── MANAGER ───────────────────────────────────────────────────────────────────
//

/// Orchestrates exam sessions on top of the pure navigation, timer and
/// scoring rules.
///
/// Every call is one read-modify-write: load, apply expiry, apply the
/// operation to a copy, then save once with the version check. Events go out
/// only after that save has committed.
#[derive(Clone)]
pub struct SessionManager {
    clock: Clock,
    questions: Arc<dyn QuestionRepository>,
    templates: Arc<dyn TemplateRepository>,
    sessions: Arc<dyn SessionStore>,
    identity: Arc<dyn OwnershipVerifier>,
    sinks: Vec<Arc<dyn ExamEventSink>>,
}

impl SessionManager {
    /// Same-user ownership checks and template statistics are wired by default.
    #[must_use]
    pub fn new(
        clock: Clock,
        questions: Arc<dyn QuestionRepository>,
        templates: Arc<dyn TemplateRepository>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let stats: Arc<dyn ExamEventSink> =
            Arc::new(TemplateStatsSink::new(Arc::clone(&templates)));
        Self {
            clock,
            questions,
            templates,
            sessions,
            identity: Arc::new(SameUserVerifier),
            sinks: vec![stats],
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.questions),
            Arc::clone(&storage.templates),
            Arc::clone(&storage.sessions),
        )
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn OwnershipVerifier>) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ExamEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Same repositories, different clock.
    #[must_use]
    pub fn with_clock(&self, clock: Clock) -> Self {
        let mut manager = self.clone();
        manager.clock = clock;
        manager
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    //
    // ─── OPERATIONS ────────────────────────────────────────────────────────────
    //

    /// Draws questions, creates the session and starts it in one write.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::TemplateNotFound`/`TemplateInactive` for unusable
    /// templates, `InvalidParams` for bad ad hoc parameters,
    /// `InsufficientQuestions` if the pool is too small, or `Storage`.
    pub async fn start_session(
        &self,
        caller: UserId,
        source: ExamSource,
    ) -> Result<QuestionView, ExamError> {
        let now = self.clock.now();
        let (template_id, name, config) = match source {
            ExamSource::Template(id) => {
                let template = self.templates.get_template(id).await.map_err(|e| match e {
                    StorageError::NotFound => ExamError::TemplateNotFound(id),
                    other => other.into(),
                })?;
                if !template.is_active() {
                    return Err(ExamError::TemplateInactive(id));
                }
                (
                    Some(id),
                    template.name().to_owned(),
                    template.config().clone(),
                )
            }
            ExamSource::AdHoc(params) => {
                let (name, config) = params.into_config()?;
                let name = name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| format!("Exam {}", now.format("%Y-%m-%d %H:%M")));
                (None, name, config)
            }
        };

        let count = usize::try_from(config.question_count).unwrap_or(usize::MAX);
        let selection = QuestionSelector::new(self.questions.as_ref())
            .select(
                count,
                &config.quota,
                &config.filter,
                config.shuffle_questions,
            )
            .await?;
        let option_seed = config.shuffle_options.then(rand::random::<u64>);

        let mut session = ExamSession::new_pending(
            SessionId::generate(),
            caller,
            template_id,
            name,
            config,
            &selection.picks,
            option_seed,
            now,
        )?;
        NavigationController::start(&mut session, now)?;
        self.sessions
            .insert_session(&session)
            .await
            .map_err(|e| match e {
                StorageError::Conflict => ExamError::ConcurrentModification,
                other => other.into(),
            })?;

        tracing::info!(
            session_id = %session.id(),
            user_id = %caller,
            template_id = ?template_id,
            mode = session.config().mode().as_str(),
            questions = session.len(),
            "exam session started"
        );
        self.question_view(&session, now).await
    }

    /// # Errors
    ///
    /// Returns `ExamError::SessionNotFound`, `NotAuthorized`,
    /// `QuestionUnavailable`, `ConcurrentModification` or `Storage`.
    pub async fn current_question(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<QuestionView, ExamError> {
        let committed = self
            .run(session_id, caller, |session, _, now, _| {
                NavigationController::finish_if_out_of_time(session, now);
                transition(session.state(), SessionOperation::Read)?;
                Ok(())
            })
            .await?;
        self.question_view(&committed.session, committed.now).await
    }

    /// Records a choice, a skip or a flag change.
    ///
    /// A submission for a position whose time ran out before it was processed
    /// is acknowledged with `recorded = false` and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidAnswerFormat` for malformed input,
    /// `InvalidNavigation` for unanswerable positions, `AnswerLocked`,
    /// `SessionAlreadyFinished`, or the load/save errors of any operation.
    pub async fn submit_answer(
        &self,
        session_id: SessionId,
        caller: UserId,
        submission: AnswerSubmission,
    ) -> Result<SubmitAck, ExamError> {
        let action = submission.action()?;
        let position = submission.position;
        let flagged = submission.flagged;

        let committed = self
            .run(session_id, caller, move |session, expiry, now, events| {
                if expiry.covers(position) {
                    return Ok(false);
                }
                NavigationController::answer(session, position, action, flagged, now)?;
                if action == AnswerAction::FlagOnly {
                    return Ok(true);
                }
                if let Some(answer) = session.answer(position) {
                    events.push(ExamEvent::AnswerRecorded {
                        session_id: session.id(),
                        user_id: session.user_id(),
                        position,
                        question_id: answer.question_id,
                        is_correct: answer.is_correct,
                    });
                }
                Ok(true)
            })
            .await?;

        let session = &committed.session;
        let recorded = committed.value;
        let snapshot = session
            .answer(position)
            .filter(|_| recorded)
            .map(|a| AnswerSnapshot::new(a, session.config().reveal_answers));
        if !recorded {
            tracing::info!(session_id = %session_id, position, "late answer ignored");
        }
        Ok(SubmitAck {
            position,
            recorded,
            is_correct: snapshot.as_ref().and_then(|s| s.is_correct),
            correct_option: snapshot.and_then(|s| s.correct_option),
            status: SessionStatusView::from_session(session, committed.now),
        })
    }

    /// # Errors
    ///
    /// Returns `ExamError::InvalidNavigation` for out-of-range or disallowed
    /// backward targets, or the load/save errors of any operation.
    pub async fn move_to(
        &self,
        session_id: SessionId,
        caller: UserId,
        target: usize,
    ) -> Result<QuestionView, ExamError> {
        self.navigate(session_id, caller, move |session, now| {
            NavigationController::move_to(session, target, now)
        })
        .await
    }

    /// # Errors
    ///
    /// As `move_to`; fails on the last position.
    pub async fn next(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<QuestionView, ExamError> {
        self.navigate(session_id, caller, NavigationController::next)
            .await
    }

    /// # Errors
    ///
    /// As `move_to`; fails whenever backtracking is disabled.
    pub async fn previous(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<QuestionView, ExamError> {
        self.navigate(session_id, caller, NavigationController::previous)
            .await
    }

    /// Completes the session and returns its result. If a time budget already
    /// ran out, the session completes at that deadline instead.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::SessionAlreadyFinished` for terminal sessions, or
    /// the load/save errors of any operation.
    pub async fn finish(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<ResultView, ExamError> {
        let committed = self
            .run(session_id, caller, |session, expiry, now, _| {
                if expiry.finished || NavigationController::finish_if_out_of_time(session, now) {
                    return Ok(());
                }
                NavigationController::finish(session, now)?;
                Ok(())
            })
            .await?;
        let view = result_view(&committed.session)?;
        tracing::info!(
            session_id = %session_id,
            score = view.result.score_percent,
            passed = view.result.passed,
            "exam finished"
        );
        Ok(view)
    }

    /// # Errors
    ///
    /// Returns `ExamError::SessionAlreadyFinished` for terminal sessions, or
    /// the load/save errors of any operation.
    pub async fn cancel(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<CancelAck, ExamError> {
        let committed = self
            .run(session_id, caller, |session, _, now, _| {
                NavigationController::cancel(session, now)?;
                Ok(())
            })
            .await?;
        tracing::info!(session_id = %session_id, "exam cancelled");
        Ok(CancelAck {
            session_id,
            state: committed.session.state(),
            cancelled_at: committed.session.finished_at(),
        })
    }

    /// # Errors
    ///
    /// Returns `ExamError::SessionNotCompleted` unless the session has been
    /// completed, or the load/save errors of any operation.
    pub async fn get_result(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<ResultView, ExamError> {
        let committed = self
            .run(session_id, caller, |session, _, now, _| {
                NavigationController::finish_if_out_of_time(session, now);
                transition(session.state(), SessionOperation::ViewResult)?;
                Ok(())
            })
            .await?;
        result_view(&committed.session)
    }

    /// # Errors
    ///
    /// Returns the load/save errors of any operation.
    pub async fn session_status(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<SessionStatusView, ExamError> {
        let committed = self
            .run(session_id, caller, |session, _, now, _| {
                NavigationController::finish_if_out_of_time(session, now);
                Ok(())
            })
            .await?;
        Ok(SessionStatusView::from_session(
            &committed.session,
            committed.now,
        ))
    }

    /// Folds elapsed time into a session read outside the normal call path.
    /// A concurrent writer wins; its stored copy is returned instead.
    pub(crate) async fn refresh(
        &self,
        session: ExamSession,
        now: DateTime<Utc>,
    ) -> Result<ExamSession, ExamError> {
        if session.state() != SessionState::InProgress {
            return Ok(session);
        }
        let mut working = session.clone();
        NavigationController::expire_questions(&mut working, now);
        NavigationController::finish_if_out_of_time(&mut working, now);
        if working == session {
            return Ok(session);
        }
        match self.persist(&working).await {
            Ok(version) => {
                let working = working.with_version(version);
                if let Some(event) = completion_event(&session, &working) {
                    events::dispatch(&self.sinks, &[event]).await;
                }
                Ok(working)
            }
            Err(ExamError::ConcurrentModification) => self.load(session.id()).await,
            Err(other) => Err(other),
        }
    }

    //
    // ─── INTERNALS ─────────────────────────────────────────────────────────────
    //

    async fn navigate<F>(
        &self,
        session_id: SessionId,
        caller: UserId,
        step: F,
    ) -> Result<QuestionView, ExamError>
    where
        F: FnOnce(&mut ExamSession, DateTime<Utc>) -> Result<(), NavigationError> + Send,
    {
        let committed = self
            .run(session_id, caller, move |session, _, now, _| {
                step(session, now)?;
                Ok(())
            })
            .await?;
        self.question_view(&committed.session, committed.now).await
    }

    /// Runs one operation under the load/expire/apply/save cycle.
    ///
    /// On failure the operation's changes are dropped, but expiry found while
    /// loading is still persisted so later reads agree with the clock.
    async fn run<T, F>(
        &self,
        session_id: SessionId,
        caller: UserId,
        op: F,
    ) -> Result<Committed<T>, ExamError>
    where
        T: Send,
        F: FnOnce(&mut ExamSession, &Expiry, DateTime<Utc>, &mut Vec<ExamEvent>) -> Result<T, ExamError>
            + Send,
    {
        let now = self.clock.now();
        let loaded = self.load(session_id).await?;
        if !self
            .identity
            .verify_owner(loaded.user_id(), caller)
            .await
        {
            tracing::warn!(session_id = %session_id, caller = %caller, "ownership check failed");
            return Err(ExamError::NotAuthorized);
        }

        let mut working = loaded.clone();
        let expiry = NavigationController::expire_questions(&mut working, now);
        let mut pending_events = Vec::new();
        let mut attempt = working.clone();

        let (candidate, outcome) = match op(&mut attempt, &expiry, now, &mut pending_events) {
            Ok(value) => {
                // A move back may land on a position whose budget already ran out.
                NavigationController::expire_questions(&mut attempt, now);
                NavigationController::finish_if_out_of_time(&mut attempt, now);
                (attempt, Ok(value))
            }
            Err(err) => {
                pending_events.clear();
                NavigationController::finish_if_out_of_time(&mut working, now);
                (working, Err(err))
            }
        };

        let session = if candidate == loaded {
            candidate
        } else {
            let version = self.persist(&candidate).await?;
            let saved = candidate.with_version(version);
            pending_events.extend(completion_event(&loaded, &saved));
            events::dispatch(&self.sinks, &pending_events).await;
            saved
        };

        if let Err(err) = &outcome {
            tracing::debug!(session_id = %session_id, error = %err, "operation rejected");
        }
        outcome.map(|value| Committed {
            session,
            value,
            now,
        })
    }

    async fn load(&self, session_id: SessionId) -> Result<ExamSession, ExamError> {
        self.sessions
            .load_session(session_id)
            .await
            .map_err(|e| match e {
                StorageError::NotFound => ExamError::SessionNotFound,
                other => other.into(),
            })
    }

    async fn persist(&self, session: &ExamSession) -> Result<u64, ExamError> {
        self.sessions.save_session(session).await.map_err(|e| match e {
            StorageError::Conflict => {
                tracing::warn!(
                    session_id = %session.id(),
                    version = session.version(),
                    "concurrent session update rejected"
                );
                ExamError::ConcurrentModification
            }
            StorageError::NotFound => ExamError::SessionNotFound,
            other => other.into(),
        })
    }

    async fn question_view(
        &self,
        session: &ExamSession,
        now: DateTime<Utc>,
    ) -> Result<QuestionView, ExamError> {
        let status = SessionStatusView::from_session(session, now);
        let current = session.current_question_id();
        let (SessionState::InProgress, Some(question_id)) = (session.state(), current) else {
            return Ok(QuestionView {
                status,
                question: None,
                answer: None,
            });
        };

        let question = self
            .questions
            .get_question_detail(question_id)
            .await
            .map_err(|e| match e {
                StorageError::NotFound => ExamError::QuestionUnavailable(question_id),
                other => other.into(),
            })?;
        let position = session.current_index();
        Ok(QuestionView {
            status,
            question: Some(QuestionDisplay::new(
                &question,
                position,
                session.option_seed(),
            )),
            answer: session
                .answer(position)
                .map(|a| AnswerSnapshot::new(a, session.config().reveal_answers)),
        })
    }
}

fn result_view(session: &ExamSession) -> Result<ResultView, ExamError> {
    let result = session
        .result()
        .cloned()
        .ok_or(ExamError::SessionNotCompleted(session.state()))?;
    Ok(ResultView {
        session_id: session.id(),
        name: session.name().to_owned(),
        template_id: session.template_id(),
        result,
        answers: session.answers().to_vec(),
    })
}

fn completion_event(before: &ExamSession, after: &ExamSession) -> Option<ExamEvent> {
    if before.state() == SessionState::Completed || after.state() != SessionState::Completed {
        return None;
    }
    let result = after.result()?;
    Some(ExamEvent::SessionCompleted {
        session_id: after.id(),
        user_id: after.user_id(),
        template_id: after.template_id(),
        score_percent: result.score_percent,
        passed: result.passed,
        finished_at: result.finished_at,
    })
}
