use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, Sqlite};
use uuid::Uuid;

use super::connection::{corrupt, Connection, ResultLog, StoreError};
use crate::{
    registry::Difficulty,
    scoring::PASS_THRESHOLD,
    session::{FinishReason, ResultRecord, Stats},
};

const RESULT_COLUMNS: &str = "session_id, user_id, specialization, difficulty, score, total, \
     time_taken, finish_reason, completed_at";

fn parse_reason(reason: &str) -> Result<FinishReason, StoreError> {
    match reason {
        "user" => Ok(FinishReason::User),
        "timeout" => Ok(FinishReason::Timeout),
        other => Err(StoreError::Corrupt(format!("unknown finish reason '{other}'"))),
    }
}

fn map_result_row(row: &SqliteRow) -> Result<ResultRecord, StoreError> {
    let session_id: String = row.try_get("session_id")?;
    let difficulty: String = row.try_get("difficulty")?;
    let reason: String = row.try_get("finish_reason")?;

    Ok(ResultRecord {
        session_id: Uuid::parse_str(&session_id).map_err(corrupt)?,
        user_id: row.try_get("user_id")?,
        specialization: row.try_get("specialization")?,
        difficulty: difficulty.parse::<Difficulty>().map_err(corrupt)?,
        score: u32::try_from(row.try_get::<i64, _>("score")?).map_err(corrupt)?,
        total: u32::try_from(row.try_get::<i64, _>("total")?).map_err(corrupt)?,
        time_taken_secs: row.try_get("time_taken")?,
        reason: parse_reason(&reason)?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Inserts one result row on any executor, so it can join an open transaction.
pub(crate) async fn insert_result<'e, E>(executor: E, record: &ResultRecord) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let inserted = sqlx::query(&format!(
        "INSERT INTO results ({RESULT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    ))
    .bind(record.session_id.to_string())
    .bind(record.user_id)
    .bind(&record.specialization)
    .bind(record.difficulty.key())
    .bind(i64::from(record.score))
    .bind(i64::from(record.total))
    .bind(record.time_taken_secs)
    .bind(record.reason.to_string())
    .bind(record.completed_at)
    .execute(executor)
    .await?;

    Ok(inserted.last_insert_rowid())
}

#[async_trait]
impl ResultLog for Connection {
    async fn append(&self, record: &ResultRecord) -> Result<i64, StoreError> {
        insert_result(&self.pool, record).await
    }

    async fn latest(
        &self,
        user_id: i64,
        specialization: &str,
    ) -> Result<Option<ResultRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM results WHERE user_id = ?1 AND specialization = ?2 \
             ORDER BY completed_at DESC, id DESC LIMIT 1"
        ))
        .bind(user_id)
        .bind(specialization)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_result_row).transpose()
    }

    async fn history(
        &self,
        user_id: i64,
        specialization: &str,
    ) -> Result<Vec<ResultRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESULT_COLUMNS} FROM results WHERE user_id = ?1 AND specialization = ?2 \
             ORDER BY id"
        ))
        .bind(user_id)
        .bind(specialization)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_result_row).collect()
    }

    async fn stats(
        &self,
        user_id: i64,
        specialization: Option<&str>,
    ) -> Result<Stats, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS attempts, \
                    COALESCE(SUM(CASE WHEN score * 100.0 / total >= ?3 THEN 1 ELSE 0 END), 0) AS passed, \
                    COALESCE(MAX(score * 100.0 / total), 0.0) AS best, \
                    COALESCE(AVG(score * 100.0 / total), 0.0) AS average \
             FROM results WHERE user_id = ?1 AND (?2 IS NULL OR specialization = ?2)",
        )
        .bind(user_id)
        .bind(specialization)
        .bind(PASS_THRESHOLD)
        .fetch_one(&self.pool)
        .await?;

        Ok(Stats {
            attempts: u32::try_from(row.try_get::<i64, _>("attempts")?).map_err(corrupt)?,
            passed: u32::try_from(row.try_get::<i64, _>("passed")?).map_err(corrupt)?,
            best_percentage: row.try_get("best")?,
            average_percentage: row.try_get("average")?,
        })
    }
}
