use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use super::{
    connection::{corrupt, Completion, Connection, SessionStore, StoreError},
    results::insert_result,
};
use crate::{
    bank::Question,
    registry::Difficulty,
    session::{Answers, FinishReason, MessageRef, Session, SessionKey, SessionStatus},
};

const SESSION_COLUMNS: &str = "session_id, user_id, specialization, difficulty, questions_json, \
     answers_json, current_index, started_at, deadline_at, message_ref, version";

/// Compare-and-swap rounds before a toggle gives up.
const CAS_ROUNDS: usize = 16;

fn storage_key(key: &SessionKey) -> String {
    key.to_string()
}

fn map_session_row(row: &SqliteRow) -> Result<(Session, i64), StoreError> {
    let session_id: String = row.try_get("session_id")?;
    let difficulty: String = row.try_get("difficulty")?;
    let questions_json: String = row.try_get("questions_json")?;
    let answers_json: String = row.try_get("answers_json")?;
    let current_index: i64 = row.try_get("current_index")?;
    let message_ref: Option<String> = row.try_get("message_ref")?;

    let session = Session {
        id: Uuid::parse_str(&session_id).map_err(corrupt)?,
        key: SessionKey::new(row.try_get("user_id")?, row.try_get::<String, _>("specialization")?),
        difficulty: difficulty.parse::<Difficulty>().map_err(corrupt)?,
        questions: serde_json::from_str::<Vec<Question>>(&questions_json).map_err(corrupt)?,
        answers: serde_json::from_str::<Answers>(&answers_json).map_err(corrupt)?,
        current_index: usize::try_from(current_index).map_err(corrupt)?,
        started_at: row.try_get("started_at")?,
        deadline_at: row.try_get("deadline_at")?,
        message_ref: message_ref
            .map(|r| serde_json::from_str::<MessageRef>(&r))
            .transpose()
            .map_err(corrupt)?,
        status: SessionStatus::Active,
    };

    Ok((session, row.try_get("version")?))
}

impl Connection {
    async fn fetch_session(&self, key: &SessionKey) -> Result<Option<(Session, i64)>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_key = ?1"
        ))
        .bind(storage_key(key))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_session_row).transpose()
    }
}

#[async_trait]
impl SessionStore for Connection {
    async fn create(
        &self,
        key: &SessionKey,
        difficulty: Difficulty,
        questions: Vec<Question>,
        started_at: DateTime<Utc>,
        deadline_at: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let session = Session {
            id: Uuid::new_v4(),
            key: key.clone(),
            difficulty,
            questions,
            answers: Answers::new(),
            current_index: 0,
            started_at,
            deadline_at,
            message_ref: None,
            status: SessionStatus::Active,
        };

        tracing::debug!(session = %key, id = %session.id, "Creating session");
        sqlx::query(
            "INSERT OR REPLACE INTO sessions (session_key, session_id, user_id, specialization, \
             difficulty, questions_json, answers_json, current_index, started_at, deadline_at, \
             message_ref, version) VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{}', 0, ?7, ?8, NULL, 0)",
        )
        .bind(storage_key(key))
        .bind(session.id.to_string())
        .bind(key.user_id)
        .bind(&key.specialization)
        .bind(difficulty.key())
        .bind(serde_json::to_string(&session.questions).map_err(corrupt)?)
        .bind(started_at)
        .bind(deadline_at)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        Ok(self.fetch_session(key).await?.map(|(session, _)| session))
    }

    async fn list_active(&self) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY deadline_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| map_session_row(row).map(|(session, _)| session))
            .collect()
    }

    async fn mutate_answers(
        &self,
        key: &SessionKey,
        question_index: usize,
        option_index: usize,
    ) -> Result<Option<Session>, StoreError> {
        for _ in 0..CAS_ROUNDS {
            let Some((mut session, version)) = self.fetch_session(key).await? else {
                return Ok(None);
            };

            session.toggle(question_index, option_index);
            let answers_json = serde_json::to_string(&session.answers).map_err(corrupt)?;

            let updated = sqlx::query(
                "UPDATE sessions SET answers_json = ?1, version = version + 1 \
                 WHERE session_key = ?2 AND session_id = ?3 AND version = ?4",
            )
            .bind(answers_json)
            .bind(storage_key(key))
            .bind(session.id.to_string())
            .bind(version)
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 1 {
                return Ok(Some(session));
            }
            tracing::debug!(session = %key, version, "Lost answer update race, retrying");
        }

        Err(StoreError::Contention(key.to_string()))
    }

    async fn advance_cursor(
        &self,
        key: &SessionKey,
        new_index: usize,
    ) -> Result<Option<Session>, StoreError> {
        let new_index = i64::try_from(new_index).map_err(corrupt)?;
        let row = sqlx::query(&format!(
            "UPDATE sessions SET current_index = ?1, version = version + 1 \
             WHERE session_key = ?2 RETURNING {SESSION_COLUMNS}"
        ))
        .bind(new_index)
        .bind(storage_key(key))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .as_ref()
            .map(map_session_row)
            .transpose()?
            .map(|(session, _)| session))
    }

    async fn set_message_ref(
        &self,
        key: &SessionKey,
        session_id: Uuid,
        message_ref: MessageRef,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE sessions SET message_ref = ?1 WHERE session_key = ?2 AND session_id = ?3",
        )
        .bind(serde_json::to_string(&message_ref).map_err(corrupt)?)
        .bind(storage_key(key))
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    async fn remove(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM sessions WHERE session_key = ?1 RETURNING {SESSION_COLUMNS}"
        ))
        .bind(storage_key(key))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_session_row).transpose()?.map(|(mut session, _)| {
            session.status = SessionStatus::Finished;
            session
        }))
    }

    async fn complete(
        &self,
        key: &SessionKey,
        session_id: Option<Uuid>,
        reason: FinishReason,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Completion>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "DELETE FROM sessions WHERE session_key = ?1 AND (?2 IS NULL OR session_id = ?2) \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(storage_key(key))
        .bind(session_id.map(|id| id.to_string()))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let (session, _) = map_session_row(&row)?;
        let completion = Completion::build(session, reason, finished_at).map_err(corrupt)?;
        insert_result(&mut *tx, &completion.record).await?;

        tx.commit().await?;
        tracing::debug!(session = %key, id = %completion.session.id, %reason, "Session completed");

        Ok(Some(completion))
    }
}
