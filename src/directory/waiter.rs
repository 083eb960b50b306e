//! Polling waiter for run completion
//!
//! Independent of the log stream: polls the run listing until the run
//! reaches a terminal status. Absence at the deadline is data, not an
//! error — `Ok(None)` is returned and the caller decides whether a run
//! that never finished fails the test.

use std::time::{Duration, Instant};

use crate::api::types::Run;
use crate::common::Result;

use super::handle::ProjectHandle;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls run status until terminal or deadline
#[derive(Debug, Clone)]
pub struct RunWaiter {
    interval: Duration,
}

impl Default for RunWaiter {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl RunWaiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Poll `get_run` until the run's status is `Finished(_)` or
    /// `timeout` elapses. Transient errors (including the run not being
    /// listed yet) are swallowed and retried until the deadline.
    pub async fn wait_for_terminal(
        &self,
        handle: &ProjectHandle,
        pipeline_id: &str,
        run_id: &str,
        timeout: Duration,
    ) -> Result<Option<Run>> {
        let deadline = Instant::now() + timeout;

        loop {
            match handle.get_run(pipeline_id, run_id).await {
                Ok(Some(run)) if run.is_terminal() => return Ok(Some(run)),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(run_id, "run poll failed, retrying: {err}");
                }
            }

            if Instant::now() >= deadline {
                tracing::debug!(run_id, "run did not reach a terminal status in time");
                return Ok(None);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
