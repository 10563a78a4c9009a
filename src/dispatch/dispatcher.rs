//! Dispatcher: the entry point that owns the registry and the backends.
//!
//! One per process, built at startup. Every trigger, queue message and
//! sweep goes through here.

use crate::dispatch::executor::{Execution, LazyExecutor};
use crate::dispatch::flags::FlagStore;
use crate::dispatch::lock::AdvisoryLocks;
use crate::dispatch::publisher::{Broker, PublishOptions, Published, Publisher};
use crate::dispatch::registry::{RouteOverrides, TaskArgs, TaskRegistry, TaskSpec};
use crate::dispatch::sweeper::{SweepReport, Sweeper};
use crate::dispatch::{DispatchContext, DispatchSettings};
use crate::error::{Error, Result, TaskError};
use crate::model::{Kwargs, TaskMessage};
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Name of the built-in crash-recovery task. It is dispatched like any other
/// lazy task, so at most one sweep runs at a time across all processes.
pub const SWEEP_TASK: &str = "dispatch.resubmit_lazy_tasks";

pub struct Dispatcher {
    registry: TaskRegistry,
    locks: Arc<dyn AdvisoryLocks>,
    flags: Arc<dyn FlagStore>,
    publisher: Publisher,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn builder(
        locks: Arc<dyn AdvisoryLocks>,
        flags: Arc<dyn FlagStore>,
        broker: Arc<dyn Broker>,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            locks,
            flags,
            broker,
            settings: DispatchSettings::default(),
            tasks: Vec::new(),
            overrides: None,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn executor(&self) -> LazyExecutor<'_> {
        LazyExecutor::new(
            self.locks.as_ref(),
            self.flags.as_ref(),
            &self.publisher,
            &self.settings,
        )
    }

    /// Trigger `task(args)` and run it here unless another process already is.
    pub async fn delay(
        &self,
        ctx: DispatchContext,
        task: &str,
        args: Vec<Value>,
    ) -> Result<Execution> {
        self.execute(
            ctx,
            task,
            TaskArgs {
                args,
                kwargs: Kwargs::new(),
            },
        )
        .await
    }

    pub async fn execute(
        &self,
        ctx: DispatchContext,
        task: &str,
        args: TaskArgs,
    ) -> Result<Execution> {
        let spec = self.registry.resolve(task)?;
        self.executor().execute(ctx, spec, args).await
    }

    /// Trigger `task(args)` without running it here: record the intent and
    /// publish only if no process currently holds the lock.
    pub async fn lazy_delay(
        &self,
        ctx: DispatchContext,
        task: &str,
        args: Vec<Value>,
    ) -> Result<Execution> {
        let spec = self.registry.resolve(task)?;
        let args = TaskArgs {
            args,
            kwargs: Kwargs::new(),
        };
        self.executor().request(ctx, spec, args).await
    }

    /// Publish unconditionally, bypassing the lazy machinery.
    pub async fn apply_async(
        &self,
        task: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        options: PublishOptions,
    ) -> Result<Published> {
        let spec = self.registry.resolve(task)?;
        self.publisher.apply_async(spec, args, kwargs, options).await
    }

    /// Run a message consumed from a queue.
    pub async fn handle_message(&self, message: TaskMessage) -> Result<Execution> {
        let args = TaskArgs {
            args: message.args,
            kwargs: message.kwargs,
        };
        self.execute(DispatchContext::autocommit(), &message.task, args)
            .await
    }

    /// Trigger the crash-recovery sweep through the lazy executor.
    pub async fn run_sweep(&self, ctx: DispatchContext) -> Result<Execution> {
        self.delay(ctx, SWEEP_TASK, Vec::new()).await
    }

    /// The sweep body. Called by the built-in sweep task; calling it
    /// directly skips the cross-process exclusion.
    pub async fn sweep(&self) -> Result<SweepReport> {
        Sweeper::new(
            self.locks.as_ref(),
            self.flags.as_ref(),
            &self.registry,
            &self.publisher,
        )
        .sweep()
        .await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tasks", &self.registry.names())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

pub struct DispatcherBuilder {
    locks: Arc<dyn AdvisoryLocks>,
    flags: Arc<dyn FlagStore>,
    broker: Arc<dyn Broker>,
    settings: DispatchSettings,
    tasks: Vec<TaskSpec>,
    overrides: Option<RouteOverrides>,
}

impl DispatcherBuilder {
    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn task(mut self, spec: TaskSpec) -> Self {
        self.tasks.push(spec);
        self
    }

    pub fn route_overrides(mut self, overrides: RouteOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn build(self) -> Result<Arc<Dispatcher>> {
        let mut registry = TaskRegistry::empty();
        for spec in self.tasks {
            if spec.name() == SWEEP_TASK {
                return Err(Error::InvalidTaskName {
                    name: SWEEP_TASK.to_string(),
                    reason: "reserved for the built-in sweep",
                });
            }
            registry.register(spec)?;
        }
        if let Some(overrides) = &self.overrides {
            let unknown = overrides
                .routes
                .keys()
                .find(|task| task.as_str() != SWEEP_TASK && !registry.contains(task));
            if let Some(task) = unknown {
                return Err(Error::Config(format!(
                    "route override for unregistered task {task}"
                )));
            }
        }

        let publisher = Publisher::new(
            self.broker,
            self.settings.default_queue.clone(),
            self.settings.bypass_broker,
        );

        Ok(Arc::new_cyclic(|weak| {
            registry.register_builtin(sweep_task(weak.clone()));
            if let Some(overrides) = &self.overrides {
                registry.pin_routes(overrides);
            }
            Dispatcher {
                registry,
                locks: self.locks,
                flags: self.flags,
                publisher,
                settings: self.settings,
            }
        }))
    }
}

fn sweep_task(dispatcher: Weak<Dispatcher>) -> TaskSpec {
    TaskSpec::new(SWEEP_TASK, move |_args| {
        let dispatcher = dispatcher.upgrade();
        async move {
            let dispatcher = dispatcher.ok_or("dispatcher dropped before the sweep ran")?;
            let report = dispatcher.sweep().await?;
            Ok::<_, TaskError>(serde_json::to_value(report)?)
        }
    })
}
