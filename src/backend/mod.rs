//! Backend instance lifecycle management
//!
//! The [`Supervisor`] brings up one backend (subprocess or container),
//! blocks on the health gate, and hands out an [`Instance`] whose
//! address is fixed for its lifetime. Teardown always drains diagnostic
//! output, and failed startups carry the captured output with them.

pub mod container;
pub mod health;
pub mod launcher;
pub mod process;

use std::path::Path;
use std::time::Duration;

use crate::api::ApiClient;
use crate::common::{Error, Result};

pub use container::ContainerLauncher;
pub use launcher::{Launched, Launcher, Runtime};
pub use process::ProcessLauncher;

const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Stopped,
}

/// Starts and stops backend instances
pub struct Supervisor {
    launcher: Box<dyn Launcher>,
    health_timeout: Duration,
    health_interval: Duration,
    stop_grace: Duration,
}

impl Supervisor {
    pub fn new(launcher: Box<dyn Launcher>) -> Self {
        Self {
            launcher,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Supervisor for subprocess mode (`--port`/`--config` contract)
    pub fn process(executable: impl Into<std::path::PathBuf>) -> Self {
        Self::new(Box::new(ProcessLauncher::new(executable)))
    }

    /// Supervisor for container mode (config dir bind-mounted read-only)
    pub fn container(image: impl Into<String>) -> Self {
        Self::new(Box::new(ContainerLauncher::new(image)))
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Launch the backend with `config_dir` and block until it answers
    /// the liveness probe. On any failure the instance is torn down and
    /// its captured output is attached to the error.
    pub async fn start(&self, config_dir: &Path) -> Result<Instance> {
        tracing::info!(mode = self.launcher.mode(), "starting backend instance");
        let Launched {
            address,
            mut runtime,
        } = self.launcher.launch(config_dir).await?;

        let gated = tokio::select! {
            ready = health::wait_ready(&address, self.health_timeout, self.health_interval) => ready,
            exit = runtime.wait_exit() => {
                let status = match exit {
                    Ok(status) => format!("exited with {status}"),
                    Err(err) => format!("wait failed: {err}"),
                };
                Err(Error::startup_failed(
                    format!("backend {status} before becoming healthy"),
                    String::new(),
                ))
            }
        };

        match gated {
            Ok(()) => {
                tracing::info!(%address, "backend instance is healthy");
                Ok(Instance {
                    address,
                    state: LifecycleState::Running,
                    runtime,
                    stop_grace: self.stop_grace,
                })
            }
            Err(err) => {
                let _ = runtime.terminate(Duration::from_secs(1)).await;
                let diagnostics = runtime.collect_diagnostics().await;
                runtime.cleanup().await;

                let message = match err {
                    Error::Timeout { .. } => "backend never became healthy".to_string(),
                    Error::StartupFailed { message, .. } => message,
                    other => other.to_string(),
                };
                Err(Error::StartupFailed {
                    message,
                    diagnostics,
                })
            }
        }
    }

    /// Stop an instance; equivalent to [`Instance::stop`] and safe to
    /// call again after a failed start
    pub async fn stop(&self, instance: &mut Instance) -> Result<()> {
        instance.stop().await
    }
}

/// One running copy of the backend under test
#[derive(Debug)]
pub struct Instance {
    address: String,
    state: LifecycleState,
    runtime: Runtime,
    stop_grace: Duration,
}

impl Instance {
    /// HTTP base URL of this instance; read-only once running
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Control-plane client bound to this instance
    pub fn api(&self) -> ApiClient {
        ApiClient::new(&self.address)
    }

    /// Snapshot of the instance's captured output, for dumping after a
    /// failed test before teardown
    pub async fn diagnostics(&mut self) -> String {
        self.runtime.collect_diagnostics().await
    }

    /// Request graceful termination, escalate to a kill after the grace
    /// period, then drain and discard remaining output. Idempotent;
    /// cleanup runs even when termination errors.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == LifecycleState::Stopped {
            return Ok(());
        }
        self.state = LifecycleState::Stopped;

        if let Err(err) = self.runtime.terminate(self.stop_grace).await {
            tracing::warn!("backend termination failed: {err}");
        }
        let discarded = self.runtime.collect_diagnostics().await;
        tracing::debug!(bytes = discarded.len(), "discarded instance output");
        self.runtime.cleanup().await;
        Ok(())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // Best-effort: an instance that was never stopped must not
        // outlive the harness process.
        if self.state != LifecycleState::Stopped {
            self.runtime.abandon();
        }
    }
}
