//! Span helpers for dispatches, sweeps and consumed messages.

use tracing::Span;

/// Span covering one trigger, from the lock attempt to the final outcome.
///
/// `dispatch.outcome` starts empty and is filled by [`record_outcome`].
pub fn start_dispatch_span(task: &str, lock_name: &str) -> Span {
    tracing::info_span!(
        "dispatch.execute",
        "dispatch.task" = task,
        "dispatch.lock" = lock_name,
        "dispatch.outcome" = tracing::field::Empty,
    )
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("dispatch.outcome", outcome);
}

pub fn start_sweep_span() -> Span {
    tracing::info_span!("dispatch.sweep")
}

/// Span for a message consumed by a worker.
pub fn start_message_span(queue: &str, msg_id: i64) -> Span {
    tracing::info_span!(
        "dispatch.consume",
        "queue.name" = queue,
        "queue.msg_id" = msg_id,
        "dispatch.task" = tracing::field::Empty,
    )
}
