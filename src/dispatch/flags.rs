//! Reschedule flag store port.
//!
//! A flag row keyed by lock name means "someone asked this identity to run
//! again since the current holder last looked". Creation is insert-if-absent;
//! losing the race is the expected, benign outcome.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagCreate {
    Created,
    /// Another caller already registered the same intent.
    AlreadyExists,
}

/// A stored flag row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleFlag {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Insert the flag unless it exists.
    ///
    /// Implementations must commit independently of any transaction the
    /// caller has open, so a later rollback cannot erase a flag that other
    /// processes may already have acted on.
    async fn create(&self, name: &str) -> Result<FlagCreate>;

    async fn exists(&self, name: &str) -> Result<bool>;

    /// Remove the flag. Absent rows are not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// All current flags, oldest first.
    async fn list(&self) -> Result<Vec<RescheduleFlag>>;
}
