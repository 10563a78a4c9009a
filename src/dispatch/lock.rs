//! Lock coordinator: non-blocking named advisory locks with scoped release.
//!
//! There is deliberately no waiting variant. A handle is released exactly
//! once: `release` consumes it, and a handle dropped without release (panic,
//! cancelled future) lets the backend free the lock on its own.

use crate::error::Result;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;

/// Backend for session-scoped advisory locks.
#[async_trait]
pub trait AdvisoryLocks: Send + Sync {
    /// Try to take the lock without waiting. `None` means someone else holds it.
    async fn try_acquire(&self, name: &str) -> Result<Option<LockHandle>>;
}

/// Backend-specific state of one held lock.
#[async_trait]
pub trait HeldLock: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

/// A held advisory lock.
pub struct LockHandle {
    name: String,
    held: Box<dyn HeldLock>,
}

impl LockHandle {
    pub fn new(name: impl Into<String>, held: Box<dyn HeldLock>) -> Self {
        Self {
            name: name.into(),
            held,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn release(self) -> Result<()> {
        tracing::trace!(lock = %self.name, "releasing advisory lock");
        self.held.release().await
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle").field("name", &self.name).finish()
    }
}

/// Attempt the lock, recording the outcome under `phase`.
pub(crate) async fn try_acquire(
    locks: &dyn AdvisoryLocks,
    name: &str,
    phase: &'static str,
) -> Result<Option<LockHandle>> {
    let handle = locks.try_acquire(name).await?;
    metrics::lock_attempts().add(
        1,
        &[
            KeyValue::new("phase", phase),
            KeyValue::new(
                "result",
                if handle.is_some() { "acquired" } else { "contended" },
            ),
        ],
    );
    Ok(handle)
}

/// Check whether the lock is free right now: acquire and release at once.
pub(crate) async fn probe(
    locks: &dyn AdvisoryLocks,
    name: &str,
    phase: &'static str,
) -> Result<bool> {
    match try_acquire(locks, name, phase).await? {
        Some(handle) => {
            handle.release().await?;
            Ok(true)
        }
        None => Ok(false),
    }
}
