//! Health gate for freshly launched instances
//!
//! The backend offers no readiness push mechanism, so this is a busy
//! poll of the liveness endpoint. Network errors while polling are
//! swallowed and retried until the deadline.

use std::time::{Duration, Instant};

use crate::common::{Error, Result};

/// Poll `GET {base_url}/ping` every `interval` until it answers 200 or
/// `timeout` elapses
pub async fn wait_ready(base_url: &str, timeout: Duration, interval: Duration) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{base_url}/ping");
    let deadline = Instant::now() + timeout;

    loop {
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => {
                tracing::debug!(status = %response.status(), "backend not ready yet");
            }
            Err(err) => {
                tracing::debug!("waiting for backend to start: {err}");
            }
        }

        if Instant::now() >= deadline {
            return Err(Error::timeout("health check", timeout));
        }
        tokio::time::sleep(interval).await;
    }
}
