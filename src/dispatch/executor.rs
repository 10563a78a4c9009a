//! Lazy executor: decides whether a trigger runs now, loops, or defers.
//!
//! Lock held → claim the flag, run, re-check the flag; loop while new
//! triggers keep arriving, up to `local_cycles`, then hand off to a fresh
//! dispatch. Lock busy → leave a reschedule flag for the holder, then probe
//! the lock once more in case the holder finished before the flag was
//! visible (the lost-wakeup window).
//!
//! The lock is released on every path before anything is published.

use crate::dispatch::flags::{FlagCreate, FlagStore};
use crate::dispatch::lock::{self, AdvisoryLocks};
use crate::dispatch::publisher::{PublishOptions, Published, Publisher};
use crate::dispatch::registry::{TaskArgs, TaskSpec};
use crate::dispatch::{DispatchContext, DispatchSettings};
use crate::error::{Error, Result};
use crate::model::TaskIdentity;
use crate::telemetry::dispatch::{record_outcome, start_dispatch_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use serde_json::Value;
use std::time::Instant;
use tracing::{Instrument, debug, error, info, warn};

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// Ran locally until no reschedule flag remained.
    Completed { result: Value, cycles: u32 },
    /// Flags kept reappearing for `cycles` runs; handed off to a new dispatch.
    /// `published` is `None` if that publish failed and the flag was left
    /// for the sweeper.
    Requeued {
        result: Value,
        cycles: u32,
        published: Option<Published>,
    },
    /// Lock busy and the same intent was already recorded. Nothing written.
    Coalesced,
    /// Lock busy; flag recorded for the running holder to pick up.
    Deferred,
    /// Lock busy, flag recorded, but the holder was already gone.
    Resubmitted { published: Published },
}

impl Execution {
    pub fn label(&self) -> &'static str {
        match self {
            Execution::Completed { .. } => "completed",
            Execution::Requeued { .. } => "requeued",
            Execution::Coalesced => "coalesced",
            Execution::Deferred => "deferred",
            Execution::Resubmitted { .. } => "resubmitted",
        }
    }

    /// The task's return value, if it ran here.
    pub fn result(&self) -> Option<&Value> {
        match self {
            Execution::Completed { result, .. } | Execution::Requeued { result, .. } => {
                Some(result)
            }
            _ => None,
        }
    }

    pub fn ran_locally(&self) -> bool {
        self.result().is_some()
    }
}

enum RunLoop {
    CaughtUp { result: Value, cycles: u32 },
    Exhausted { result: Value, cycles: u32 },
}

pub struct LazyExecutor<'a> {
    locks: &'a dyn AdvisoryLocks,
    flags: &'a dyn FlagStore,
    publisher: &'a Publisher,
    settings: &'a DispatchSettings,
}

impl<'a> LazyExecutor<'a> {
    pub fn new(
        locks: &'a dyn AdvisoryLocks,
        flags: &'a dyn FlagStore,
        publisher: &'a Publisher,
        settings: &'a DispatchSettings,
    ) -> Self {
        Self {
            locks,
            flags,
            publisher,
            settings,
        }
    }

    /// Run `spec` for `args` here if nobody else is, otherwise leave word.
    pub async fn execute(
        &self,
        ctx: DispatchContext,
        spec: &TaskSpec,
        args: TaskArgs,
    ) -> Result<Execution> {
        self.check_context(ctx, spec.name())?;

        let lock_name = TaskIdentity::new(spec.name(), args.args.clone()).lock_name();
        let span = start_dispatch_span(spec.name(), &lock_name);

        async {
            let Some(handle) = lock::try_acquire(self.locks, &lock_name, "initial").await? else {
                debug!(lock = %lock_name, "another process is running this task, registering reschedule");
                return self.register_intent(spec, &lock_name, args).await;
            };

            debug!(lock = %lock_name, "obtained lock, now obligated to perform the work");
            let looped = self.run_loop(spec, &lock_name, &args).await;

            if let Err(e) = handle.release().await {
                error!(lock = %lock_name, error = %e, "failed to release advisory lock");
            }

            match looped {
                Ok(RunLoop::CaughtUp { result, cycles }) => {
                    Ok(Execution::Completed { result, cycles })
                }
                Ok(RunLoop::Exhausted { result, cycles }) => {
                    info!(
                        lock = %lock_name,
                        cycles,
                        "reschedule flags kept arriving, handing off to a new dispatch"
                    );
                    let published = self
                        .resubmit(spec, &lock_name, args, "cycles_exhausted")
                        .await
                        .map_err(|e| {
                            error!(
                                lock = %lock_name,
                                error = %e,
                                "requeue failed, flag left for the sweeper"
                            );
                        })
                        .ok();
                    Ok(Execution::Requeued {
                        result,
                        cycles,
                        published,
                    })
                }
                Err(e) => {
                    self.resubmit_after_failure(spec, &lock_name, args).await;
                    Err(e)
                }
            }
        }
        .instrument(span.clone())
        .await
        .inspect(|execution| record_outcome(&span, execution.label()))
    }

    /// Record intent without trying to run: flag first, then probe the lock
    /// and publish only if nobody is holding it.
    pub async fn request(
        &self,
        ctx: DispatchContext,
        spec: &TaskSpec,
        args: TaskArgs,
    ) -> Result<Execution> {
        self.check_context(ctx, spec.name())?;

        let lock_name = TaskIdentity::new(spec.name(), args.args.clone()).lock_name();
        let span = start_dispatch_span(spec.name(), &lock_name);

        self.register_intent(spec, &lock_name, args)
            .instrument(span.clone())
            .await
            .inspect(|execution| record_outcome(&span, execution.label()))
    }

    fn check_context(&self, ctx: DispatchContext, task: &str) -> Result<()> {
        if !ctx.in_transaction {
            return Ok(());
        }
        if self.settings.strict {
            return Err(Error::InsideTransaction {
                task: task.to_string(),
            });
        }
        warn!(task, "lazy task dispatched inside a transaction");
        Ok(())
    }

    async fn register_intent(
        &self,
        spec: &TaskSpec,
        lock_name: &str,
        args: TaskArgs,
    ) -> Result<Execution> {
        match self.flags.create(lock_name).await? {
            FlagCreate::AlreadyExists => {
                metrics::flag_operations().add(1, &[KeyValue::new("operation", "duplicate")]);
                debug!(lock = %lock_name, "reschedule already planned, no-op");
                Ok(Execution::Coalesced)
            }
            FlagCreate::Created => {
                metrics::flag_operations().add(1, &[KeyValue::new("operation", "create")]);
                if lock::probe(self.locks, lock_name, "recheck").await? {
                    info!(lock = %lock_name, "holder finished before the flag was visible, resubmitting");
                    let published = self.resubmit(spec, lock_name, args, "lost_wakeup").await?;
                    Ok(Execution::Resubmitted { published })
                } else {
                    debug!(lock = %lock_name, "holder still running, it will see the flag");
                    Ok(Execution::Deferred)
                }
            }
        }
    }

    async fn run_loop(&self, spec: &TaskSpec, lock_name: &str, args: &TaskArgs) -> Result<RunLoop> {
        let bound = self.settings.local_cycles.max(1);
        let mut cycles = 0;

        loop {
            cycles += 1;

            // Claim this round of intent.
            match self.flags.delete(lock_name).await {
                Ok(()) => {
                    metrics::flag_operations().add(1, &[KeyValue::new("operation", "delete")]);
                }
                Err(e) => {
                    warn!(lock = %lock_name, error = %e, "could not clear reschedule flag before run");
                }
            }

            let started = Instant::now();
            let outcome = spec.invoke(args.clone()).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            let status = if outcome.is_ok() { "ok" } else { "error" };
            metrics::task_runs().add(
                1,
                &[
                    KeyValue::new("task", spec.name().to_string()),
                    KeyValue::new("status", status),
                ],
            );
            metrics::run_duration_ms().record(
                elapsed_ms,
                &[KeyValue::new("task", spec.name().to_string())],
            );

            let result = outcome.map_err(|source| Error::Task {
                task: spec.name().to_string(),
                source,
            })?;

            match self.flags.exists(lock_name).await {
                Ok(false) => return Ok(RunLoop::CaughtUp { result, cycles }),
                Ok(true) if cycles >= bound => return Ok(RunLoop::Exhausted { result, cycles }),
                Ok(true) => {
                    debug!(lock = %lock_name, cycles, "triggered again during run, looping");
                }
                Err(e) => {
                    warn!(
                        lock = %lock_name,
                        error = %e,
                        "resubmission check failed, unexecuted work may remain until the next sweep"
                    );
                    return Ok(RunLoop::CaughtUp { result, cycles });
                }
            }
        }
    }

    async fn resubmit(
        &self,
        spec: &TaskSpec,
        lock_name: &str,
        args: TaskArgs,
        reason: &'static str,
    ) -> Result<Published> {
        let published = self
            .publisher
            .apply_async(spec, args.args, args.kwargs, PublishOptions::default())
            .await?;
        metrics::resubmissions().add(1, &[KeyValue::new("reason", reason)]);
        debug!(lock = %lock_name, id = %published.message.id, queue = %published.queue, reason, "resubmitted");
        Ok(published)
    }

    /// A failed run still owes any trigger that arrived while it ran.
    async fn resubmit_after_failure(&self, spec: &TaskSpec, lock_name: &str, args: TaskArgs) {
        let pending = match self.flags.exists(lock_name).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(lock = %lock_name, error = %e, "resubmission check after failed run failed");
                return;
            }
        };
        if pending {
            if let Err(e) = self.resubmit(spec, lock_name, args, "failed_run").await {
                warn!(lock = %lock_name, error = %e, "resubmission after failed run failed, flag left for the sweeper");
            }
        }
    }
}
