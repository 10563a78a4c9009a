//! Queue worker: consumes task messages from one pgmq queue and runs them
//! through the dispatcher.

use crate::db::{Db, READY_CHANNEL};
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::model::TaskMessage;
use crate::telemetry::dispatch::start_message_span;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue: String,
    /// Visibility timeout (seconds) for pgmq reads. A message that is neither
    /// archived nor deleted in this window becomes readable again.
    pub visibility_timeout: i32,
    /// Poll interval fallback when no NOTIFY arrives.
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub fn for_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Self::default()
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: crate::config::DEFAULT_QUEUE.to_string(),
            visibility_timeout: 60,
            poll_interval: Duration::from_secs(5),
        }
    }
}

pub struct Worker {
    db: Arc<Db>,
    dispatcher: Arc<Dispatcher>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl Clone for Worker {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            dispatcher: Arc::clone(&self.dispatcher),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Worker {
    pub fn new(db: Arc<Db>, dispatcher: Arc<Dispatcher>, config: WorkerConfig) -> Self {
        Self {
            db,
            dispatcher,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    /// Signal the worker to stop after the message in hand.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Consume until shutdown.
    pub async fn run(&self) -> Result<()> {
        self.db.create_queue(&self.config.queue).await?;

        let mut listener = sqlx::postgres::PgListener::connect_with(self.db.pool()).await?;
        listener.listen(READY_CHANNEL).await?;

        info!(queue = %self.config.queue, "worker started");

        loop {
            // Drain first: messages may predate the listener.
            loop {
                match self.process_next().await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        error!(queue = %self.config.queue, "process error: {e}");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(queue = %self.config.queue, "worker shutting down");
                    return Ok(());
                }
                notif = listener.recv() => {
                    match notif {
                        Ok(n) if n.payload() == self.config.queue => {
                            debug!(queue = n.payload(), "notified of new messages");
                        }
                        Ok(_) => {}
                        Err(e) => warn!("PgListener error: {e}, falling back to poll"),
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Read and handle one message. Returns false when the queue is empty.
    pub async fn process_next(&self) -> Result<bool> {
        let queue = self.config.queue.as_str();
        let Some(msg) = self
            .db
            .read_from_queue(queue, self.config.visibility_timeout)
            .await?
        else {
            return Ok(false);
        };

        let span = start_message_span(queue, msg.msg_id);
        async {
            let message = match TaskMessage::from_json(msg.message.clone()) {
                Ok(message) => message,
                Err(e) => {
                    error!(msg_id = msg.msg_id, error = %e, "malformed task message, archiving");
                    self.db.archive_message(queue, msg.msg_id).await?;
                    return Ok(true);
                }
            };
            tracing::Span::current().record("dispatch.task", message.task.as_str());
            let id = message.id.clone();

            match self.dispatcher.handle_message(message).await {
                Ok(execution) => {
                    debug!(%id, outcome = execution.label(), "message handled");
                    self.db.archive_message(queue, msg.msg_id).await?;
                }
                Err(e @ Error::Task { .. }) => {
                    // Task failures are not retried by redelivery.
                    error!(%id, read_ct = msg.read_ct, error = %e, "task failed");
                    self.db.archive_message(queue, msg.msg_id).await?;
                }
                Err(Error::UnknownTask(task)) => {
                    // Possibly published by a newer deployment; leave it for a
                    // worker that knows the task.
                    warn!(%id, %task, "no registered task for message, leaving it on the queue");
                }
                Err(e) => {
                    // Lock or flag infrastructure failed; redelivery retries.
                    return Err(e);
                }
            }
            Ok(true)
        }
        .instrument(span)
        .await
    }
}
