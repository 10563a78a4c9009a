//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments come from the `"lazy-dispatch"` meter.

use super::SERVICE_NAME;
use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter(SERVICE_NAME)
}

/// Counter: advisory lock attempts.
/// Labels: `phase` ("initial" | "recheck" | "sweep"), `result` ("acquired" | "contended").
pub fn lock_attempts() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.lock.attempts")
        .with_description("Advisory lock acquisition attempts")
        .build()
}

/// Counter: reschedule flag writes.
/// Labels: `operation` ("create" | "duplicate" | "delete" | "clear").
pub fn flag_operations() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.flag.operations")
        .with_description("Reschedule flag operations")
        .build()
}

/// Counter: local task invocations.
/// Labels: `task`, `status` ("ok" | "error").
pub fn task_runs() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.task.runs")
        .with_description("Task function invocations")
        .build()
}

/// Histogram: task invocation duration.
/// Labels: `task`.
pub fn run_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("dispatch.task.duration_ms")
        .with_description("Task invocation duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: publishes made on behalf of work that could not run here.
/// Labels: `reason` ("lost_wakeup" | "cycles_exhausted" | "failed_run" | "orphaned").
pub fn resubmissions() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.resubmissions")
        .with_description("Tasks resubmitted to the broker")
        .build()
}

/// Counter: messages handed to the publisher.
/// Labels: `queue`, `exchange`, `delivered` ("true" | "false").
pub fn messages_published() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.messages.published")
        .with_description("Task messages published")
        .build()
}

/// Counter: queue-level operations (send, read, archive, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: completed sweeps.
pub fn sweeps() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.sweeps")
        .with_description("Crash-recovery sweeps completed")
        .build()
}
