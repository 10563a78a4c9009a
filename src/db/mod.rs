//! Postgres backend: connection pool, migrations, health check.
//!
//! `Db` implements all three dispatch ports. Advisory locks live in
//! [`locks`], reschedule flags in [`flags`], the pgmq broker in [`pgmq`].

pub mod flags;
pub mod locks;
pub mod pgmq;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Channel notified after every publish. Payload is the queue name.
pub const READY_CHANNEL: &str = "dispatch_ready";

/// Database handle. Owns the connection pool shared by locks, flags and queues.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    ///
    /// Every held advisory lock pins one pooled connection until released,
    /// so size the pool above the number of tasks a process runs at once.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
