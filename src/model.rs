//! Core data model.
//!
//! A task identity is a task name plus its positional arguments. It derives
//! the lock name that keys both the advisory lock and the reschedule flag.
//! A task message is the wire record handed to the broker.

pub mod identity;
pub mod message;

pub use identity::{TaskIdentity, validate_task_name};
pub use message::{ExchangeKind, TaskMessage};

/// Keyword arguments passed through to a task, never part of its identity.
pub type Kwargs = serde_json::Map<String, serde_json::Value>;
