use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use super::connection::{Connection, ProfileStore, StoreError};
use crate::session::UserProfile;

#[async_trait]
impl ProfileStore for Connection {
    async fn get_profile(&self, user_id: i64) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, full_name, position, department FROM users WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(UserProfile {
                user_id: row.try_get("user_id")?,
                full_name: row.try_get("full_name")?,
                position: row.try_get("position")?,
                department: row.try_get("department")?,
            })),
            None => Ok(None),
        }
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (user_id, full_name, position, department, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(user_id) DO UPDATE SET full_name = excluded.full_name, \
             position = excluded.position, department = excluded.department, \
             updated_at = excluded.updated_at",
        )
        .bind(profile.user_id)
        .bind(&profile.full_name)
        .bind(&profile.position)
        .bind(&profile.department)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
