//! # lazy-dispatch
//!
//! Coalescing dispatch for idempotent tasks triggered from many worker
//! processes at once.
//!
//! Provides a cross-process lazy executor (Postgres advisory locks plus a
//! durable reschedule-flag table), a task registry and publisher (pgmq),
//! a crash-recovery sweeper, worker loops, and OpenTelemetry observability.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod model;
pub mod telemetry;
