//! Periodic trigger for the crash-recovery sweep.
//!
//! Every tick dispatches the built-in sweep task through the lazy executor,
//! so processes ticking at the same moment coalesce into one sweep.

use crate::dispatch::{DispatchContext, Dispatcher, Execution};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct SweepLoop {
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl SweepLoop {
    /// Fails on a zero interval, which `tokio::time::interval` rejects.
    pub fn new(dispatcher: Arc<Dispatcher>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config("sweep interval must be non-zero".to_string()));
        }
        Ok(Self {
            dispatcher,
            interval,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "sweep loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("sweep loop shutting down");
                    return;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    pub async fn tick(&self) {
        match self.dispatcher.run_sweep(DispatchContext::autocommit()).await {
            Ok(Execution::Completed { result, .. }) => debug!(report = %result, "sweep ran"),
            Ok(other) => debug!(outcome = other.label(), "sweep dispatched"),
            Err(e) => warn!(error = %e, "sweep failed"),
        }
    }
}
