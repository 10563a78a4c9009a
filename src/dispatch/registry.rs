//! Task registry.
//!
//! Built once at startup from explicit [`TaskSpec`] registrations and
//! immutable afterwards. Maps a task name back to its function so a process
//! that only holds a name and serialized arguments (a flag row, a queue
//! message) can invoke the real work.

use crate::error::{Error, Result, TaskError};
use crate::model::{ExchangeKind, Kwargs, validate_task_name};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

/// Arguments handed to a task function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskArgs {
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, TaskError>> + Send>>;

type TaskFn = Arc<dyn Fn(TaskArgs) -> TaskFuture + Send + Sync>;
type QueueFn = Arc<dyn Fn(&[Value]) -> String + Send + Sync>;

/// Where a task's messages go.
#[derive(Clone, Default)]
pub enum QueueRoute {
    /// The dispatcher's default queue.
    #[default]
    Default,
    Static(String),
    /// Computed at publish time from the task's positional args.
    Computed(QueueFn),
}

impl QueueRoute {
    pub fn resolve(&self, args: &[Value], default_queue: &str) -> String {
        match self {
            QueueRoute::Default => default_queue.to_string(),
            QueueRoute::Static(queue) => queue.clone(),
            QueueRoute::Computed(f) => f(args),
        }
    }
}

impl std::fmt::Debug for QueueRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueRoute::Default => write!(f, "Default"),
            QueueRoute::Static(queue) => f.debug_tuple("Static").field(queue).finish(),
            QueueRoute::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// A registered task: name, function, routing.
#[derive(Clone)]
pub struct TaskSpec {
    name: String,
    func: TaskFn,
    route: QueueRoute,
    exchange: ExchangeKind,
}

impl TaskSpec {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, TaskError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |args| Box::pin(f(args))),
            route: QueueRoute::Default,
            exchange: ExchangeKind::Direct,
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.route = QueueRoute::Static(queue.into());
        self
    }

    pub fn computed_queue<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Value]) -> String + Send + Sync + 'static,
    {
        self.route = QueueRoute::Computed(Arc::new(f));
        self
    }

    /// Publish to every queue bound under the routed name instead of one.
    pub fn broadcast(mut self) -> Self {
        self.exchange = ExchangeKind::Broadcast;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route(&self) -> &QueueRoute {
        &self.route
    }

    pub fn exchange(&self) -> ExchangeKind {
        self.exchange
    }

    /// Call the underlying function. No locking happens here.
    pub fn invoke(&self, args: TaskArgs) -> TaskFuture {
        (self.func)(args)
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("route", &self.route)
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}

/// Registry of tasks, indexed by name.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskSpec>,
}

impl TaskRegistry {
    /// Create an empty registry with no tasks.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a task. Names are validated and must be unique.
    pub fn register(&mut self, spec: TaskSpec) -> Result<()> {
        validate_task_name(spec.name())?;
        if self.tasks.contains_key(spec.name()) {
            return Err(Error::InvalidTaskName {
                name: spec.name().to_string(),
                reason: "already registered",
            });
        }
        self.tasks.insert(spec.name().to_string(), spec);
        Ok(())
    }

    /// Insert without validation. Reserved for tasks the dispatcher owns.
    pub(crate) fn register_builtin(&mut self, spec: TaskSpec) {
        self.tasks.insert(spec.name().to_string(), spec);
    }

    /// Look up a task by name.
    pub fn get(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.get(name)
    }

    pub fn resolve(&self, name: &str) -> Result<&TaskSpec> {
        self.get(name)
            .ok_or_else(|| Error::UnknownTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pin tasks to the queues named in `overrides`. Unknown names fail and
    /// leave every route untouched.
    pub fn apply_overrides(&mut self, overrides: &RouteOverrides) -> Result<()> {
        if let Some(task) = overrides.routes.keys().find(|task| !self.contains(task)) {
            return Err(Error::Config(format!(
                "route override for unregistered task {task}"
            )));
        }
        self.pin_routes(overrides);
        Ok(())
    }

    /// Apply overrides for registered tasks, skipping the rest.
    pub(crate) fn pin_routes(&mut self, overrides: &RouteOverrides) {
        for (task, queue) in &overrides.routes {
            if let Some(spec) = self.tasks.get_mut(task) {
                spec.route = QueueRoute::Static(queue.clone());
            }
        }
    }
}

/// Operator-supplied queue overrides, read from TOML:
///
/// ```toml
/// [routes]
/// "awx.main.scheduler.run_task_manager" = "tower_scheduler"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteOverrides {
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
}

impl RouteOverrides {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("bad route overrides: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read route overrides {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }
}
