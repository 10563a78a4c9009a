//! Session advisory locks on dedicated pool connections.
//!
//! A lock is taken with `pg_try_advisory_lock` on a connection checked out
//! for the lifetime of the handle. Lock names are hashed to the 64-bit key
//! space with `hashtextextended`. If a handle is dropped without release the
//! connection is closed instead of returned, so the session ends and Postgres
//! frees the lock.

use crate::dispatch::{AdvisoryLocks, HeldLock, LockHandle};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::Postgres;
use sqlx::pool::PoolConnection;
use tracing::warn;

#[async_trait]
impl AdvisoryLocks for super::Db {
    async fn try_acquire(&self, name: &str) -> Result<Option<LockHandle>> {
        let mut conn = self.pool.acquire().await?;
        let (acquired,): (bool,) =
            sqlx::query_as("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
                .bind(name)
                .fetch_one(&mut *conn)
                .await?;
        if !acquired {
            return Ok(None);
        }
        let held = PgHeldLock {
            name: name.to_string(),
            conn: Some(conn),
        };
        Ok(Some(LockHandle::new(name, Box::new(held))))
    }
}

struct PgHeldLock {
    name: String,
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl HeldLock for PgHeldLock {
    async fn release(mut self: Box<Self>) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let unlocked: std::result::Result<(bool,), sqlx::Error> =
            sqlx::query_as("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                .bind(&self.name)
                .fetch_one(&mut *conn)
                .await;
        match unlocked {
            Ok((true,)) => Ok(()),
            Ok((false,)) => {
                warn!(lock = %self.name, "advisory lock was not held at release, closing session");
                conn.close_on_drop();
                Ok(())
            }
            Err(e) => {
                // The session may still hold the lock; never return it to the pool.
                conn.close_on_drop();
                Err(e.into())
            }
        }
    }
}

impl Drop for PgHeldLock {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            warn!(lock = %self.name, "advisory lock dropped without release, closing session");
            conn.close_on_drop();
        }
    }
}
