//! Prediction backend liveness probe

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Timeouts;
use crate::data::PredictionClient;

/// Runs `attempt` once per stage budget until one succeeds
///
/// Returns `true` on the first successful attempt and `false` once every
/// stage has failed. Stages run sequentially; no attempt overlaps another.
pub async fn probe_stages<F, Fut>(stages: &[Duration], mut attempt: F) -> bool
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = bool>,
{
    for (index, budget) in stages.iter().enumerate() {
        if attempt(*budget).await {
            debug!(attempt = index + 1, budget_ms = budget.as_millis() as u64, "Probe succeeded");
            return true;
        }
        debug!(attempt = index + 1, budget_ms = budget.as_millis() as u64, "Probe attempt failed");
    }
    false
}

/// Two-stage health check: a long first attempt, then a shorter retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    stages: [Duration; 2],
}

impl HealthProbe {
    pub fn new(first: Duration, retry: Duration) -> Self {
        Self {
            stages: [first, retry],
        }
    }

    pub fn from_timeouts(timeouts: &Timeouts) -> Self {
        Self::new(timeouts.probe_first(), timeouts.probe_retry())
    }

    pub fn stages(&self) -> &[Duration] {
        &self.stages
    }

    /// Whether the backend answers 2xx with `status == "healthy"`
    ///
    /// Any transport, status or parse error counts as a failed attempt.
    pub async fn is_live(&self, client: &PredictionClient) -> bool {
        let live = probe_stages(&self.stages, |budget| async move {
            match client.health(budget).await {
                Ok(health) if health.is_healthy() => true,
                Ok(health) => {
                    debug!(status = %health.status, "Backend reachable but not healthy");
                    false
                }
                Err(err) => {
                    debug!(error = %err, "Health check failed");
                    false
                }
            }
        })
        .await;

        if !live {
            warn!(backend = %client.base_url(), "Prediction backend is not live");
        }
        live
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::from_timeouts(&Timeouts::default())
    }
}
