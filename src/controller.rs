//! Quiz session lifecycle.
//!
//! [`SessionController`] drives a session from `start` through answer toggles
//! and cursor moves to `finish`. Every operation on one session key runs under
//! that key's lock, commits to the [`SessionStore`] first and renders second,
//! so what the user sees never runs ahead of what is stored. Rendering stays
//! inside the lock: edits of one question message are applied in commit order,
//! and a slow render only delays presses on the same key. Timeouts arrive
//! from the [`TimeoutSupervisor`] and go through the same `finish` path, which
//! is a no-op once the session is gone.
//!
//! [`SessionStore`]: crate::database::connection::SessionStore

use std::{
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    database::connection::{corrupt, Completion, Storage, StoreError},
    locks::KeyedLocks,
    registry::{Difficulty, Registry},
    render::{Notifier, QuestionView, Renderer, ResultSummary},
    scoring::Score,
    session::{FinishReason, MessageRef, ResultRecord, Session, SessionKey, Stats, UserProfile},
    timeout::{Expiry, TimeoutSupervisor},
};

/// Attempts per store operation before giving up.
const STORE_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("test '{specialization}' is unavailable: {reason}")]
    QuestionBankUnavailable {
        specialization: String,
        reason: String,
    },

    #[error("failed to persist session state: {0}")]
    Persistence(#[source] StoreError),
}

/// What a chat-driven operation did.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The change was committed and the question re-rendered.
    Updated,
    /// The button pointed at a question or option that does not exist.
    Ignored,
    Finished(Box<ResultSummary>),
    /// No active session under the key; nothing was changed.
    NoActiveSession,
}

pub struct SessionController {
    registry: Arc<Registry>,
    storage: Storage,
    renderer: Arc<dyn Renderer>,
    notifier: Arc<dyn Notifier>,
    timeouts: TimeoutSupervisor,
    locks: KeyedLocks,
}

async fn with_retries<T, F, Fut>(op: &'static str, key: &SessionKey, mut run: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match run().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < STORE_ATTEMPTS => {
                tracing::warn!(op, session = %key, attempt, error = %e, "Store operation failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(op, session = %key, attempts = attempt, error = %e, "Store operation failed");
                return Err(e);
            }
        }
    }
}

async fn watch_expiries(controller: Weak<SessionController>, mut expired: mpsc::UnboundedReceiver<Expiry>) {
    while let Some(expiry) = expired.recv().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        tokio::spawn(async move {
            if let Err(e) = controller.finish_expired(&expiry).await {
                tracing::error!(session = %expiry.key, error = %e, "Failed to finish expired session");
            }
        });
    }
}

impl SessionController {
    /// Builds the controller and starts listening for timer expiries.
    /// Must be called inside a tokio runtime.
    pub fn new(
        registry: Arc<Registry>,
        storage: Storage,
        renderer: Arc<dyn Renderer>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let (timeouts, expired) = TimeoutSupervisor::new();
        let controller = Arc::new(Self {
            registry,
            storage,
            renderer,
            notifier,
            timeouts,
            locks: KeyedLocks::new(),
        });

        tokio::spawn(watch_expiries(Arc::downgrade(&controller), expired));
        controller
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Starts a new session, superseding any earlier one under the same key,
    /// and renders its first question into `origin` when given.
    ///
    /// The question count is clamped to what the bank holds.
    #[instrument(level = "info", skip(self, origin))]
    pub async fn start(
        &self,
        user_id: i64,
        specialization: &str,
        difficulty: Difficulty,
        origin: Option<MessageRef>,
    ) -> Result<Session, ControllerError> {
        let unavailable = |reason: String| ControllerError::QuestionBankUnavailable {
            specialization: specialization.to_owned(),
            reason,
        };

        let bank = self
            .registry
            .bank(specialization)
            .map_err(|e| unavailable(e.to_string()))?;
        let policy = self
            .registry
            .policy(specialization, difficulty)
            .map_err(|e| unavailable(e.to_string()))?;

        let count = policy.question_count.min(bank.count());
        if count < policy.question_count {
            tracing::warn!(
                specialization,
                %difficulty,
                required = policy.question_count,
                available = bank.count(),
                "Clamping question count to the bank size"
            );
        }
        if count == 0 {
            return Err(unavailable("no questions for this tier".to_owned()));
        }

        let questions = &bank.sample(count).map_err(|e| unavailable(e.to_string()))?;
        let time_limit = TimeDelta::from_std(policy.time_limit)
            .map_err(|_| unavailable("time limit out of range".to_owned()))?;

        let key = &SessionKey::new(user_id, specialization);
        let _guard = self.locks.lock(key).await;

        self.timeouts.cancel(key);

        let started_at = Utc::now();
        let deadline_at = started_at + time_limit;
        let sessions = &self.storage.sessions;
        let session = with_retries("create", key, move || {
            sessions.create(key, difficulty, questions.clone(), started_at, deadline_at)
        })
        .await
        .map_err(ControllerError::Persistence)?;

        self.timeouts.arm(key, session.id, policy.time_limit);
        tracing::info!(
            session = %key,
            id = %session.id,
            questions = session.questions.len(),
            deadline = %deadline_at,
            "Session started"
        );

        self.render_current(&session, origin).await;
        Ok(session)
    }

    /// Flips one option of one question of the session tagged `session_tag`.
    /// Stale presses after a finish, or from a superseded session's message,
    /// are reported as [`Outcome::NoActiveSession`].
    #[instrument(level = "debug", skip(self))]
    pub async fn toggle_answer(
        &self,
        user_id: i64,
        specialization: &str,
        session_tag: &str,
        question_index: usize,
        option_index: usize,
    ) -> Result<Outcome, ControllerError> {
        let key = &SessionKey::new(user_id, specialization);
        let _guard = self.locks.lock(key).await;

        let Some(session) = self.tagged_session(key, session_tag).await? else {
            tracing::debug!(session = %key, session_tag, "Toggle without a matching session");
            return Ok(Outcome::NoActiveSession);
        };
        if session.is_expired(Utc::now()) {
            return self.finish_locked(key, FinishReason::Timeout, Some(session.id)).await;
        }

        let valid = session
            .questions
            .get(question_index)
            .is_some_and(|q| option_index < q.options().len());
        if !valid {
            tracing::debug!(session = %key, question_index, option_index, "Ignoring out-of-range selection");
            return Ok(Outcome::Ignored);
        }

        let sessions = &self.storage.sessions;
        let updated = with_retries("mutate_answers", key, move || {
            sessions.mutate_answers(key, question_index, option_index)
        })
        .await
        .map_err(ControllerError::Persistence)?;

        let Some(session) = updated else {
            return Ok(Outcome::NoActiveSession);
        };

        self.render_current(&session, None).await;
        Ok(Outcome::Updated)
    }

    /// Moves on from question `from_index`, or finishes when it is the last
    /// one. A press drawn for any other question is [`Outcome::Ignored`], so a
    /// double tap advances once.
    #[instrument(level = "debug", skip(self))]
    pub async fn advance(
        &self,
        user_id: i64,
        specialization: &str,
        session_tag: &str,
        from_index: usize,
    ) -> Result<Outcome, ControllerError> {
        let key = &SessionKey::new(user_id, specialization);
        let _guard = self.locks.lock(key).await;

        let Some(session) = self.tagged_session(key, session_tag).await? else {
            tracing::debug!(session = %key, session_tag, "Advance without a matching session");
            return Ok(Outcome::NoActiveSession);
        };
        if session.is_expired(Utc::now()) {
            return self.finish_locked(key, FinishReason::Timeout, Some(session.id)).await;
        }
        if session.current_index != from_index {
            tracing::debug!(
                session = %key,
                from_index,
                current = session.current_index,
                "Ignoring advance from a question no longer shown"
            );
            return Ok(Outcome::Ignored);
        }
        if session.is_last_question() {
            return self.finish_locked(key, FinishReason::User, Some(session.id)).await;
        }

        let next = session.current_index + 1;
        let sessions = &self.storage.sessions;
        let updated = with_retries("advance_cursor", key, move || sessions.advance_cursor(key, next))
            .await
            .map_err(ControllerError::Persistence)?;

        let Some(session) = updated else {
            return Ok(Outcome::NoActiveSession);
        };

        self.render_current(&session, None).await;
        Ok(Outcome::Updated)
    }

    /// Finishes whatever session is active under the key. Idempotent: a second
    /// call finds nothing and returns [`Outcome::NoActiveSession`].
    #[instrument(level = "info", skip(self))]
    pub async fn finish(
        &self,
        user_id: i64,
        specialization: &str,
        reason: FinishReason,
    ) -> Result<Outcome, ControllerError> {
        let key = &SessionKey::new(user_id, specialization);
        let _guard = self.locks.lock(key).await;
        self.finish_locked(key, reason, None).await
    }

    /// Finish button: only finishes the session tagged `session_tag`.
    #[instrument(level = "info", skip(self))]
    pub async fn finish_shown(
        &self,
        user_id: i64,
        specialization: &str,
        session_tag: &str,
    ) -> Result<Outcome, ControllerError> {
        let key = &SessionKey::new(user_id, specialization);
        let _guard = self.locks.lock(key).await;

        let Some(session) = self.tagged_session(key, session_tag).await? else {
            tracing::debug!(session = %key, session_tag, "Finish without a matching session");
            return Ok(Outcome::NoActiveSession);
        };
        let reason = if session.is_expired(Utc::now()) {
            FinishReason::Timeout
        } else {
            FinishReason::User
        };
        self.finish_locked(key, reason, Some(session.id)).await
    }

    /// Timer path: only finishes the exact session the timer was armed for.
    pub async fn finish_expired(&self, expiry: &Expiry) -> Result<Outcome, ControllerError> {
        let _guard = self.locks.lock(&expiry.key).await;
        self.finish_locked(&expiry.key, FinishReason::Timeout, Some(expiry.session_id))
            .await
    }

    /// Re-arms timers for sessions persisted before a restart and finishes the
    /// ones whose deadline already passed. Returns how many were re-armed.
    pub async fn resume(&self) -> Result<usize, ControllerError> {
        let sessions = self
            .storage
            .sessions
            .list_active()
            .await
            .map_err(ControllerError::Persistence)?;

        let now = Utc::now();
        let mut rearmed = 0;
        for session in sessions {
            if session.is_expired(now) {
                let _guard = self.locks.lock(&session.key).await;
                if let Err(e) = self
                    .finish_locked(&session.key, FinishReason::Timeout, Some(session.id))
                    .await
                {
                    tracing::error!(session = %session.key, error = %e, "Failed to finish overdue session");
                }
            } else {
                self.timeouts
                    .arm(&session.key, session.id, session.time_remaining(now));
                rearmed += 1;
            }
        }

        tracing::info!(rearmed, "Resumed persisted sessions");
        Ok(rearmed)
    }

    pub async fn session(&self, user_id: i64, specialization: &str) -> Result<Option<Session>, ControllerError> {
        let key = &SessionKey::new(user_id, specialization);
        self.active_session(key).await
    }

    /// Session id the timeout timer for this key is armed for.
    pub fn armed_timer(&self, user_id: i64, specialization: &str) -> Option<Uuid> {
        self.timeouts
            .armed_for(&SessionKey::new(user_id, specialization))
    }

    pub async fn stats(&self, user_id: i64, specialization: Option<&str>) -> Result<Stats, ControllerError> {
        self.storage
            .results
            .stats(user_id, specialization)
            .await
            .map_err(ControllerError::Persistence)
    }

    pub async fn profile(&self, user_id: i64) -> Result<Option<UserProfile>, ControllerError> {
        self.storage
            .profiles
            .get_profile(user_id)
            .await
            .map_err(ControllerError::Persistence)
    }

    pub async fn save_profile(&self, profile: &UserProfile) -> Result<(), ControllerError> {
        tracing::info!(user = profile.user_id, "Saving profile");
        self.storage
            .profiles
            .save_profile(profile)
            .await
            .map_err(ControllerError::Persistence)
    }

    /// Summary of the most recent finished attempt, used for certificates.
    pub async fn latest_summary(
        &self,
        user_id: i64,
        specialization: &str,
    ) -> Result<Option<ResultSummary>, ControllerError> {
        let record = self
            .storage
            .results
            .latest(user_id, specialization)
            .await
            .map_err(ControllerError::Persistence)?;

        let Some(record) = record else {
            return Ok(None);
        };
        let score = Score::from_counts(record.score, record.total)
            .map_err(|e| ControllerError::Persistence(corrupt(e)))?;
        Ok(Some(self.summarize(&record, score).await))
    }

    pub fn shutdown(&self) {
        self.timeouts.shutdown();
    }

    async fn active_session(&self, key: &SessionKey) -> Result<Option<Session>, ControllerError> {
        let sessions = &self.storage.sessions;
        with_retries("get", key, move || sessions.get(key))
            .await
            .map_err(ControllerError::Persistence)
    }

    /// The active session, if it is the one `tag` was drawn for.
    async fn tagged_session(&self, key: &SessionKey, tag: &str) -> Result<Option<Session>, ControllerError> {
        Ok(self.active_session(key).await?.filter(|session| session.tag() == tag))
    }

    /// Caller holds the key lock.
    async fn finish_locked(
        &self,
        key: &SessionKey,
        reason: FinishReason,
        session_id: Option<Uuid>,
    ) -> Result<Outcome, ControllerError> {
        if reason == FinishReason::User {
            self.timeouts.cancel(key);
        }

        let finished_at = Utc::now();
        let sessions = &self.storage.sessions;
        let completed = with_retries("complete", key, move || {
            sessions.complete(key, session_id, reason, finished_at)
        })
        .await;

        let completion = match completed {
            Ok(Some(completion)) => completion,
            Ok(None) => {
                tracing::debug!(session = %key, %reason, "Nothing to finish");
                if let Some(id) = session_id {
                    self.timeouts.disarm(key, id);
                }
                return Ok(Outcome::NoActiveSession);
            }
            Err(e) => return self.recover_unrecorded(key, session_id, reason, finished_at, e).await,
        };

        self.timeouts.disarm(key, completion.session.id);
        Ok(self.deliver(completion).await)
    }

    /// The result row could not be committed. The attempt is logged in full for
    /// manual recovery, dropped from the store and still shown to the user.
    async fn recover_unrecorded(
        &self,
        key: &SessionKey,
        session_id: Option<Uuid>,
        reason: FinishReason,
        finished_at: DateTime<Utc>,
        error: StoreError,
    ) -> Result<Outcome, ControllerError> {
        let snapshot = match self.storage.sessions.get(key).await {
            Ok(Some(session)) if session_id.is_none_or(|id| id == session.id) => session,
            _ => return Err(ControllerError::Persistence(error)),
        };

        tracing::error!(
            session = %key,
            id = %snapshot.id,
            %reason,
            error = %error,
            snapshot = %serde_json::to_string(&snapshot).unwrap_or_default(),
            "Result record lost: attempt needs manual recovery"
        );

        if let Err(e) = self.storage.sessions.remove(key).await {
            tracing::error!(session = %key, error = %e, "Failed to drop unrecorded session");
        }
        self.timeouts.disarm(key, snapshot.id);

        let completion = Completion::build(snapshot, reason, finished_at)
            .map_err(|e| ControllerError::Persistence(corrupt(e)))?;
        Ok(self.deliver(completion).await)
    }

    async fn deliver(&self, completion: Completion) -> Outcome {
        let summary = self.summarize(&completion.record, completion.score).await;
        tracing::info!(
            session = %summary.key,
            id = %completion.session.id,
            score = summary.score.correct,
            total = summary.score.total,
            grade = %summary.grade,
            reason = %summary.reason,
            "Session finished"
        );

        if let Err(e) = self
            .renderer
            .render_result(&summary.key, &summary, completion.session.message_ref)
            .await
        {
            tracing::warn!(session = %summary.key, error = %e, "Failed to render result");
        }

        let notifier = self.notifier.clone();
        let notified = summary.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&notified).await {
                tracing::warn!(session = %notified.key, error = %e, "Failed to deliver result notification");
            }
        });

        Outcome::Finished(Box::new(summary))
    }

    async fn summarize(&self, record: &ResultRecord, score: Score) -> ResultSummary {
        let profile = match self.storage.profiles.get_profile(record.user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => UserProfile::placeholder(record.user_id),
            Err(e) => {
                tracing::warn!(user = record.user_id, error = %e, "Profile lookup failed");
                UserProfile::placeholder(record.user_id)
            }
        };

        let specialization_title = self
            .registry
            .get(&record.specialization)
            .map(|s| s.title().to_owned())
            .unwrap_or_else(|| record.specialization.clone());

        ResultSummary {
            key: SessionKey::new(record.user_id, &record.specialization),
            specialization_title,
            difficulty: record.difficulty,
            score,
            grade: score.grade(),
            time_taken: Duration::from_secs(u64::try_from(record.time_taken_secs).unwrap_or_default()),
            reason: record.reason,
            completed_at: record.completed_at,
            profile,
        }
    }

    /// Renders the question under the cursor. Caller holds the key lock.
    /// Render failures never undo the committed state.
    async fn render_current(&self, session: &Session, target: Option<MessageRef>) {
        let Some(question) = session.current_question() else {
            return;
        };

        let view = QuestionView {
            session_tag: session.tag(),
            index: session.current_index,
            total: session.questions.len(),
            question: question.clone(),
            selections: session.selections(session.current_index),
            time_remaining: session.time_remaining(Utc::now()),
            is_last: session.is_last_question(),
        };

        let target = target.or(session.message_ref);
        match self.renderer.render_question(&session.key, &view, target).await {
            Ok(rendered) if Some(rendered) != session.message_ref => {
                if let Err(e) = self
                    .storage
                    .sessions
                    .set_message_ref(&session.key, session.id, rendered)
                    .await
                {
                    tracing::warn!(session = %session.key, error = %e, "Failed to store message reference");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session = %session.key, error = %e, "Failed to render question");
            }
        }
    }
}
