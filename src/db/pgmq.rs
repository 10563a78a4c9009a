//! pgmq queue operations via direct SQLx, and the pgmq [`Broker`].
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.archive, pgmq.delete, pgmq.list_queues.
//!
//! A broadcast exchange named `X` is the set of queues named `X__<suffix>`.
//! Each consumer that wants every broadcast creates its own such queue.

use super::READY_CHANNEL;
use crate::dispatch::Broker;
use crate::error::Result;
use crate::model::{ExchangeKind, TaskMessage};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use sqlx::PgConnection;

/// Separator between a broadcast exchange name and a bound queue's suffix.
pub const BROADCAST_SEPARATOR: &str = "__";

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub vt: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

/// Queue name bound to broadcast `exchange` for one consumer.
pub fn broadcast_queue(exchange: &str, suffix: &str) -> String {
    format!("{exchange}{BROADCAST_SEPARATOR}{suffix}")
}

fn record(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

async fn send_on(conn: &mut PgConnection, queue_name: &str, payload: &serde_json::Value) -> Result<i64> {
    sqlx::query("SELECT pgmq.create($1)")
        .bind(queue_name)
        .execute(&mut *conn)
        .await?;
    let (msg_id,): (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2)")
        .bind(queue_name)
        .bind(payload)
        .fetch_one(&mut *conn)
        .await?;
    // NOTIFY is transactional: only fires on commit
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(READY_CHANNEL)
        .bind(queue_name)
        .execute(&mut *conn)
        .await?;
    record(queue_name, "send");
    Ok(msg_id)
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        record(queue_name, "create");
        Ok(())
    }

    /// Send a message, creating the queue if needed, and notify listeners.
    /// Returns the message ID.
    pub async fn send_to_queue(&self, queue_name: &str, payload: &serde_json::Value) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let msg_id = send_on(&mut tx, queue_name, payload).await?;
        tx.commit().await?;
        Ok(msg_id)
    }

    /// Names of all queues, or only those starting with `prefix`.
    pub async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT queue_name::text FROM pgmq.list_queues() ORDER BY queue_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(name,)| name)
            .filter(|name| prefix.is_none_or(|p| name.starts_with(p)))
            .collect())
    }

    /// Read the next message from a queue (visibility timeout in seconds).
    /// Returns None if queue is empty.
    pub async fn read_from_queue(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)")
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(&self.pool)
        .await?;

        let msg = row.map(|(msg_id, read_ct, enqueued_at, vt, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            vt,
            message,
        });

        record(
            queue_name,
            if msg.is_some() { "read" } else { "read_empty" },
        );
        Ok(msg)
    }

    /// Archive a message (moves to archive table, preserves for audit).
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        record(queue_name, "archive");
        Ok(())
    }

    /// Delete a message permanently.
    pub async fn delete_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        record(queue_name, "delete");
        Ok(())
    }
}

#[async_trait]
impl Broker for super::Db {
    async fn publish(
        &self,
        queue: &str,
        exchange: ExchangeKind,
        message: &TaskMessage,
    ) -> Result<()> {
        let payload = message.to_json();
        match exchange {
            ExchangeKind::Direct => {
                self.send_to_queue(queue, &payload).await?;
            }
            ExchangeKind::Broadcast => {
                let prefix = format!("{queue}{BROADCAST_SEPARATOR}");
                let bound = self.list_queues(Some(&prefix)).await?;
                if bound.is_empty() {
                    tracing::debug!(exchange = %queue, id = %message.id, "no queues bound to broadcast exchange");
                    return Ok(());
                }
                // All bound queues receive the message or none do.
                let mut tx = self.pool.begin().await?;
                for bound_queue in &bound {
                    send_on(&mut tx, bound_queue, &payload).await?;
                }
                tx.commit().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_queue_names_share_the_exchange_prefix() {
        let name = broadcast_queue("tower_broadcast_all", "node1");
        assert_eq!(name, "tower_broadcast_all__node1");
        assert!(name.starts_with(&format!("tower_broadcast_all{BROADCAST_SEPARATOR}")));
    }
}
