use std::{str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    bank::Question,
    registry::Difficulty,
    scoring::{self, Score},
    session::{FinishReason, MessageRef, ResultRecord, Session, SessionKey, SessionStatus, Stats, UserProfile},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("session {0} kept changing underneath the update")]
    Contention(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether repeating the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Contention(_))
    }
}

pub(crate) fn corrupt<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

#[derive(Clone)]
pub struct Connection {
    pub(crate) pool: SqlitePool,
}

impl Connection {
    pub async fn connect(connection_string: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(connection_string)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// A private in-memory database on a single pinned connection, migrated.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let connection = Self { pool };
        connection.perform_migrations().await?;
        Ok(connection)
    }

    pub async fn perform_migrations(&self) -> Result<(), StoreError> {
        tracing::debug!("Running migrations");
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }
}

/// A removed session together with the result row committed for it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub session: Session,
    pub score: Score,
    pub record: ResultRecord,
}

impl Completion {
    pub fn build(
        mut session: Session,
        reason: FinishReason,
        finished_at: DateTime<Utc>,
    ) -> Result<Self, scoring::ScoringError> {
        let score = scoring::score(&session.questions, &session.answers)?;
        session.status = SessionStatus::Finished;

        let record = ResultRecord {
            session_id: session.id,
            user_id: session.key.user_id,
            specialization: session.key.specialization.clone(),
            difficulty: session.difficulty,
            score: score.correct,
            total: score.total,
            time_taken_secs: session.elapsed(finished_at).as_secs() as i64,
            reason,
            completed_at: finished_at,
        };

        Ok(Self {
            session,
            score,
            record,
        })
    }
}

/// Durable active sessions, one per key. Every mutation is a single atomic
/// store operation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session, replacing any earlier one under the same key.
    async fn create(
        &self,
        key: &SessionKey,
        difficulty: Difficulty,
        questions: Vec<Question>,
        started_at: DateTime<Utc>,
        deadline_at: DateTime<Utc>,
    ) -> Result<Session, StoreError>;

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, StoreError>;

    async fn list_active(&self) -> Result<Vec<Session>, StoreError>;

    /// Flips membership of `option_index` in the selection of `question_index`.
    /// Returns the updated session, or `None` when no session exists.
    async fn mutate_answers(
        &self,
        key: &SessionKey,
        question_index: usize,
        option_index: usize,
    ) -> Result<Option<Session>, StoreError>;

    async fn advance_cursor(
        &self,
        key: &SessionKey,
        new_index: usize,
    ) -> Result<Option<Session>, StoreError>;

    /// Returns `false` when the session is gone or was superseded.
    async fn set_message_ref(
        &self,
        key: &SessionKey,
        session_id: Uuid,
        message_ref: MessageRef,
    ) -> Result<bool, StoreError>;

    async fn remove(&self, key: &SessionKey) -> Result<Option<Session>, StoreError>;

    /// Removes the session and appends its result row in one transaction.
    /// With `session_id` set, only that exact session is completed.
    async fn complete(
        &self,
        key: &SessionKey,
        session_id: Option<Uuid>,
        reason: FinishReason,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Completion>, StoreError>;
}

#[async_trait]
pub trait ResultLog: Send + Sync {
    async fn append(&self, record: &ResultRecord) -> Result<i64, StoreError>;

    async fn latest(
        &self,
        user_id: i64,
        specialization: &str,
    ) -> Result<Option<ResultRecord>, StoreError>;

    async fn history(
        &self,
        user_id: i64,
        specialization: &str,
    ) -> Result<Vec<ResultRecord>, StoreError>;

    /// Aggregates over every result row of the user, optionally narrowed to
    /// one specialization.
    async fn stats(&self, user_id: i64, specialization: Option<&str>)
        -> Result<Stats, StoreError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: i64) -> Result<Option<UserProfile>, StoreError>;

    async fn save_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;
}

/// The storage seams the controller depends on.
#[derive(Clone)]
pub struct Storage {
    pub sessions: Arc<dyn SessionStore>,
    pub results: Arc<dyn ResultLog>,
    pub profiles: Arc<dyn ProfileStore>,
}

impl Storage {
    pub fn sqlite(connection: Connection) -> Self {
        let connection = Arc::new(connection);
        Self {
            sessions: connection.clone(),
            results: connection.clone(),
            profiles: connection,
        }
    }
}
