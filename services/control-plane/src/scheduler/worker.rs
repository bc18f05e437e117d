//! Recurring background worker.
//!
//! Runs a service pass immediately and then on a periodic interval. Each
//! pass runs on its own task, so an error or a panic in one pass is logged
//! and the next pass still happens.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use super::Service;

/// How a single pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    Failed,
    Panicked,
}

/// Worker that runs a service on an interval.
pub struct RecurringWorker {
    service: Arc<dyn Service>,
    interval: Duration,
}

impl RecurringWorker {
    pub fn new(service: Arc<dyn Service>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run until shutdown is signaled or the shutdown sender is dropped.
    ///
    /// A pass in progress is finished before shutdown is observed.
    #[instrument(skip(self, shutdown), fields(service = %self.service.name()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting recurring worker");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Recurring worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single pass.
    pub async fn tick(&self) -> TickOutcome {
        let service = self.service.clone();
        let pass = tokio::spawn(async move { service.perform().await });

        match pass.await {
            Ok(Ok(())) => {
                debug!(service = %self.service.name(), "Recurring pass complete");
                TickOutcome::Completed
            }
            Ok(Err(e)) => {
                error!(service = %self.service.name(), error = %e, "Recurring pass failed");
                TickOutcome::Failed
            }
            Err(e) if e.is_panic() => {
                error!(service = %self.service.name(), error = %e, "Recovered from panic in recurring pass");
                TickOutcome::Panicked
            }
            Err(e) => {
                error!(service = %self.service.name(), error = %e, "Recurring pass aborted");
                TickOutcome::Failed
            }
        }
    }
}
