//! Coalescing dispatch: locks, reschedule flags, registry, publisher,
//! lazy executor, and crash-recovery sweeper.
//!
//! Backends plug in through three ports: [`AdvisoryLocks`], [`FlagStore`]
//! and [`Broker`]. `crate::db::Db` implements all three on Postgres/pgmq;
//! [`memory`] has process-local versions.

pub mod dispatcher;
pub mod executor;
pub mod flags;
pub mod lock;
pub mod memory;
pub mod publisher;
pub mod registry;
pub mod sweeper;

pub use dispatcher::{Dispatcher, DispatcherBuilder, SWEEP_TASK};
pub use executor::{Execution, LazyExecutor};
pub use flags::{FlagCreate, FlagStore, RescheduleFlag};
pub use lock::{AdvisoryLocks, HeldLock, LockHandle};
pub use publisher::{Broker, PublishOptions, Published, Publisher};
pub use registry::{QueueRoute, RouteOverrides, TaskArgs, TaskFuture, TaskRegistry, TaskSpec};
pub use sweeper::{SweepReport, Sweeper};

use crate::config::{DEFAULT_LOCAL_CYCLES, DEFAULT_QUEUE};

/// Where a dispatch call is being made from.
///
/// Callers running inside a database transaction must say so: an idempotent
/// task that runs and is then rolled back with its caller would leave
/// "the work ran" and "the work is durable" disagreeing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchContext {
    pub in_transaction: bool,
}

impl DispatchContext {
    pub fn autocommit() -> Self {
        Self {
            in_transaction: false,
        }
    }

    pub fn in_transaction() -> Self {
        Self {
            in_transaction: true,
        }
    }
}

/// Runtime knobs shared by the executor, publisher and sweeper.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub default_queue: String,
    pub local_cycles: u32,
    pub strict: bool,
    pub bypass_broker: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_queue: DEFAULT_QUEUE.to_string(),
            local_cycles: DEFAULT_LOCAL_CYCLES,
            strict: true,
            bypass_broker: false,
        }
    }
}
