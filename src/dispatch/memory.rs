//! Process-local backends.
//!
//! Same contracts as the Postgres/pgmq ones, scoped to one process. Used by
//! tests and by single-process embedders that don't need cross-process
//! exclusion.

use crate::dispatch::flags::{FlagCreate, FlagStore, RescheduleFlag};
use crate::dispatch::lock::{AdvisoryLocks, HeldLock, LockHandle};
use crate::dispatch::publisher::Broker;
use crate::error::Result;
use crate::model::{ExchangeKind, TaskMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        guard(&self.held).contains(name)
    }

    pub fn held_count(&self) -> usize {
        guard(&self.held).len()
    }
}

#[async_trait]
impl AdvisoryLocks for MemoryLocks {
    async fn try_acquire(&self, name: &str) -> Result<Option<LockHandle>> {
        if !guard(&self.held).insert(name.to_string()) {
            return Ok(None);
        }
        let held = MemoryHeldLock {
            name: name.to_string(),
            table: Arc::clone(&self.held),
        };
        Ok(Some(LockHandle::new(name, Box::new(held))))
    }
}

/// Removing the entry on drop mirrors a session dying with its lock.
struct MemoryHeldLock {
    name: String,
    table: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl HeldLock for MemoryHeldLock {
    async fn release(self: Box<Self>) -> Result<()> {
        drop(self);
        Ok(())
    }
}

impl Drop for MemoryHeldLock {
    fn drop(&mut self) {
        guard(&self.table).remove(&self.name);
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryFlags {
    rows: Arc<Mutex<BTreeMap<String, DateTime<Utc>>>>,
    create_attempts: Arc<AtomicUsize>,
    inserts: Arc<AtomicUsize>,
}

impl MemoryFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        guard(&self.rows).contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        guard(&self.rows).keys().cloned().collect()
    }

    /// Every call to `create`, including ones that found an existing row.
    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    /// Calls to `create` that actually inserted a row.
    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlagStore for MemoryFlags {
    async fn create(&self, name: &str) -> Result<FlagCreate> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        let mut rows = guard(&self.rows);
        if rows.contains_key(name) {
            return Ok(FlagCreate::AlreadyExists);
        }
        rows.insert(name.to_string(), Utc::now());
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(FlagCreate::Created)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.contains(name))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        guard(&self.rows).remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RescheduleFlag>> {
        let mut flags: Vec<RescheduleFlag> = guard(&self.rows)
            .iter()
            .map(|(name, created_at)| RescheduleFlag {
                name: name.clone(),
                created_at: *created_at,
            })
            .collect();
        flags.sort_by_key(|flag| flag.created_at);
        Ok(flags)
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// A message captured by [`MemoryBroker`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub queue: String,
    pub exchange: ExchangeKind,
    pub message: TaskMessage,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Delivery> {
        guard(&self.deliveries).clone()
    }

    /// Drain everything published so far.
    pub fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut *guard(&self.deliveries))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(
        &self,
        queue: &str,
        exchange: ExchangeKind,
        message: &TaskMessage,
    ) -> Result<()> {
        guard(&self.deliveries).push(Delivery {
            queue: queue.to_string(),
            exchange,
            message: message.clone(),
        });
        Ok(())
    }
}
