//! Error types for lazy-dispatch.

use thiserror::Error;

/// Boxed error returned by a task function. Carried through unmodified.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("invalid task name {name:?}: {reason}")]
    InvalidTaskName { name: String, reason: &'static str },

    #[error("malformed lock name {name:?}: {reason}")]
    MalformedLockName { name: String, reason: String },

    /// Raised in strict mode before any lock or flag work is attempted.
    #[error("lazy task {task} must not be dispatched inside a transaction; defer it until commit")]
    InsideTransaction { task: String },

    #[error("task {task} failed: {source}")]
    Task {
        task: String,
        #[source]
        source: TaskError,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The task function's own error, if this is a task failure.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            Error::Task { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
