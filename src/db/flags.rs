//! Reschedule flags in `dispatch_reschedule_flags`.
//!
//! Every write commits in its own transaction on a pooled connection, never
//! inside a caller's transaction: a flag must be visible to the lock holder
//! as soon as the trigger returns.

use crate::dispatch::{FlagCreate, FlagStore, RescheduleFlag};
use crate::error::Result;
use crate::telemetry::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

#[async_trait]
impl FlagStore for super::Db {
    async fn create(&self, name: &str) -> Result<FlagCreate> {
        let mut tx = self.pool.begin().await?;
        let inserted: Option<(String,)> = sqlx::query_as(
            "INSERT INTO dispatch_reschedule_flags (name) VALUES ($1)
             ON CONFLICT (name) DO NOTHING
             RETURNING name",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(if inserted.is_some() {
            FlagCreate::Created
        } else {
            FlagCreate::AlreadyExists
        })
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM dispatch_reschedule_flags WHERE name = $1)",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM dispatch_reschedule_flags WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RescheduleFlag>> {
        let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT name, created_at FROM dispatch_reschedule_flags ORDER BY created_at, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(name, created_at)| RescheduleFlag { name, created_at })
            .collect())
    }
}

impl super::Db {
    /// Remove a flag by hand. Returns whether a row was deleted.
    ///
    /// Clearing a flag drops the pending trigger it stands for.
    pub async fn clear_flag(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dispatch_reschedule_flags WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        let cleared = result.rows_affected() > 0;
        if cleared {
            metrics::flag_operations().add(1, &[KeyValue::new("operation", "clear")]);
        }
        Ok(cleared)
    }
}
