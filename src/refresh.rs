//! Background refresh scheduler
//!
//! Owns an [`Aggregator`] in a tokio task that runs one pass immediately, then
//! one per interval or whenever a refresh is requested. Summaries are sent to
//! the handle's receiver. Dropping the handle (or calling `shutdown`) stops the
//! task once the pass in progress, if any, has finished.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::aggregate::{AggregateSummary, Aggregator};
use crate::config::RefreshConfig;

/// Messages sent from the background task
#[derive(Debug, Clone)]
pub enum RefreshMessage {
    /// A pass is starting
    RefreshStarted { pass: u64 },
    /// A pass finished with a new summary
    SummaryUpdated(Arc<AggregateSummary>),
}

/// Handle for controlling the background refresh task
#[derive(Debug)]
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    refresh_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Spawns the refresh task; the first pass starts immediately
    pub fn spawn(mut aggregator: Aggregator, config: &RefreshConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (refresh_tx, mut refresh_rx) = mpsc::channel::<()>(1);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let period = config.interval().max(Duration::from_secs(1));

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut pass: u64 = 0;

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    Some(()) = refresh_rx.recv() => {
                        debug!("Refresh requested");
                        interval.reset();
                    }
                    _ = shutdown_rx.recv() => break,
                }

                pass += 1;
                if msg_tx.send(RefreshMessage::RefreshStarted { pass }).await.is_err() {
                    break;
                }
                let summary = aggregator.fetch_summary().await;
                if msg_tx
                    .send(RefreshMessage::SummaryUpdated(Arc::new(summary)))
                    .await
                    .is_err()
                {
                    break;
                }
            }

            info!(passes = pass, "Refresh task stopped");
        });

        Self {
            receiver: msg_rx,
            refresh_tx,
            shutdown_tx,
            task,
        }
    }

    /// Requests an immediate pass
    ///
    /// Requests made while one is already pending are coalesced. Returns
    /// `false` if the task has stopped.
    pub fn request_refresh(&self) -> bool {
        match self.refresh_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the task and waits for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        drop(self.receiver);
        let _ = self.task.await;
    }
}
