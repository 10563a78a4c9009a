//! Publisher: turns a task invocation into a durable queue message.

use crate::dispatch::registry::TaskSpec;
use crate::error::Result;
use crate::model::{ExchangeKind, Kwargs, TaskMessage};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

const RESERVED_FIELDS: [&str; 4] = ["id", "task", "args", "kwargs"];

/// Message transport. Delivery must be durable.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, queue: &str, exchange: ExchangeKind, message: &TaskMessage)
    -> Result<()>;
}

/// Per-call knobs for [`Publisher::apply_async`].
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Overrides the task's route.
    pub queue: Option<String>,
    /// Message id; a fresh v4 UUID when absent.
    pub id: Option<String>,
    /// Merged into the message. Core field names are ignored.
    pub extra: Map<String, Value>,
}

/// Descriptor of a publish, returned even when the broker is bypassed.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub message: TaskMessage,
    pub queue: String,
    pub exchange: ExchangeKind,
    /// False when bypass mode skipped the broker.
    pub delivered: bool,
}

#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    default_queue: String,
    bypass: bool,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, default_queue: impl Into<String>, bypass: bool) -> Self {
        Self {
            broker,
            default_queue: default_queue.into(),
            bypass,
        }
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Build `{id, task, args, kwargs}` for `spec` and hand it to the broker.
    pub async fn apply_async(
        &self,
        spec: &TaskSpec,
        args: Vec<Value>,
        kwargs: Kwargs,
        options: PublishOptions,
    ) -> Result<Published> {
        let queue = match options.queue {
            Some(queue) => queue,
            None => spec.route().resolve(&args, &self.default_queue),
        };
        let extra = options
            .extra
            .into_iter()
            .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
            .collect();

        let message = TaskMessage {
            id: options.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            task: spec.name().to_string(),
            args,
            kwargs,
            extra,
        };
        let exchange = spec.exchange();

        if self.bypass {
            tracing::debug!(
                task = %message.task,
                id = %message.id,
                %queue,
                "broker bypassed, not publishing"
            );
        } else {
            tracing::debug!(task = %message.task, id = %message.id, %queue, %exchange, "publish");
            self.broker.publish(&queue, exchange, &message).await?;
        }

        metrics::messages_published().add(
            1,
            &[
                KeyValue::new("queue", queue.clone()),
                KeyValue::new("exchange", exchange.to_string()),
                KeyValue::new("delivered", !self.bypass),
            ],
        );

        Ok(Published {
            message,
            queue,
            exchange,
            delivered: !self.bypass,
        })
    }
}
