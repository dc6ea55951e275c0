//! Key/value documents: the persisted harvest state lives here.

use crate::error::DatabaseError;
use crate::store::StateStore;
use crate::{Error, Result};
use serde_json::Value;

use super::Database;

impl Database {
    /// Raw JSON text stored under `key`
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read key {}: {}",
                    key, e
                )))
            })
    }

    /// Upsert raw JSON text under `key`
    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write key {}: {}",
                key, e
            )))
        })?;

        Ok(())
    }

    /// Remove `key`; returns whether it existed
    pub async fn delete_value(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete key {}: {}",
                    key, e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl StateStore for Database {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.get_value(key).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.set_value(key, &serde_json::to_string(value)?).await
    }
}
