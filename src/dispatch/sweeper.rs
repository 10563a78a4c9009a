//! Crash-recovery sweep.
//!
//! A flag whose lock is free has no holder left to honor it: the holder
//! crashed, or the flag landed after its last check. The sweeper resolves
//! such flags through the registry and republishes them. It never runs task
//! logic itself.

use crate::dispatch::flags::FlagStore;
use crate::dispatch::lock::{self, AdvisoryLocks};
use crate::dispatch::publisher::{PublishOptions, Publisher};
use crate::dispatch::registry::TaskRegistry;
use crate::error::Result;
use crate::model::{Kwargs, TaskIdentity};
use crate::telemetry::dispatch::start_sweep_span;
use crate::telemetry::metrics;
use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{Instrument, debug, info, warn};

/// What one sweep saw and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    /// Lock names that were republished.
    pub resubmitted: Vec<String>,
    /// Flags whose lock is held; the holder will see them.
    pub busy: usize,
    /// Flags that could not be mapped back to a registered task. Left in place.
    pub unresolved: Vec<String>,
    /// Flags whose republish failed. Left in place for the next sweep.
    pub failed: Vec<String>,
}

pub struct Sweeper<'a> {
    locks: &'a dyn AdvisoryLocks,
    flags: &'a dyn FlagStore,
    registry: &'a TaskRegistry,
    publisher: &'a Publisher,
}

impl<'a> Sweeper<'a> {
    pub fn new(
        locks: &'a dyn AdvisoryLocks,
        flags: &'a dyn FlagStore,
        registry: &'a TaskRegistry,
        publisher: &'a Publisher,
    ) -> Self {
        Self {
            locks,
            flags,
            registry,
            publisher,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_inner().instrument(start_sweep_span()).await
    }

    async fn sweep_inner(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = Utc::now();

        for flag in self.flags.list().await? {
            report.scanned += 1;
            let age_secs = (now - flag.created_at).num_seconds();

            if !lock::probe(self.locks, &flag.name, "sweep").await? {
                debug!(lock = %flag.name, age_secs, "flag has a live holder, skipping");
                report.busy += 1;
                continue;
            }

            let identity = match TaskIdentity::parse(&flag.name) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(lock = %flag.name, error = %e, "unparsable reschedule flag left for inspection");
                    report.unresolved.push(flag.name);
                    continue;
                }
            };

            let Some(spec) = self.registry.get(&identity.task) else {
                warn!(
                    lock = %flag.name,
                    task = %identity.task,
                    "no registered task for orphaned flag, left for inspection"
                );
                report.unresolved.push(flag.name);
                continue;
            };

            match self
                .publisher
                .apply_async(spec, identity.args, Kwargs::new(), PublishOptions::default())
                .await
            {
                Ok(published) => {
                    info!(
                        lock = %flag.name,
                        age_secs,
                        id = %published.message.id,
                        queue = %published.queue,
                        "resubmitted orphaned task"
                    );
                    metrics::resubmissions().add(1, &[KeyValue::new("reason", "orphaned")]);
                    report.resubmitted.push(flag.name);
                }
                Err(e) => {
                    warn!(lock = %flag.name, error = %e, "failed to resubmit orphaned task");
                    report.failed.push(flag.name);
                }
            }
        }

        if !report.resubmitted.is_empty() || !report.unresolved.is_empty() {
            info!(
                scanned = report.scanned,
                resubmitted = report.resubmitted.len(),
                busy = report.busy,
                unresolved = report.unresolved.len(),
                "sweep finished"
            );
        }
        metrics::sweeps().add(1, &[]);
        Ok(report)
    }
}
