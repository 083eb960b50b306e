//! Launcher seam between the supervisor and the two launch modes
//!
//! A [`Launcher`] brings up one backend and reports its address; the
//! resulting [`Runtime`] handle is what the supervisor terminates and
//! drains diagnostics from. Process and container modes differ in every
//! one of those steps, so they meet here behind a trait.

use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;

use crate::common::Result;

use super::container;

/// Launches one backend instance in a particular mode
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Mode name for logs and error messages ("process" / "container")
    fn mode(&self) -> &'static str;

    /// Bring up the backend with `config_dir` as its configuration
    /// directory and report how to reach it. Does not wait for health.
    async fn launch(&self, config_dir: &Path) -> Result<Launched>;
}

/// Result of a successful launch: where the backend listens plus the
/// handle needed to tear it down again
pub struct Launched {
    /// HTTP base URL of the instance (read-only once running)
    pub address: String,
    pub runtime: Runtime,
}

/// Handle to the live process or container behind an instance
#[derive(Debug)]
pub enum Runtime {
    Process {
        child: Child,
        output: OutputCapture,
    },
    Container {
        id: String,
        docker: std::path::PathBuf,
    },
}

impl Runtime {
    /// Wait until the underlying process exits. Containers are detached,
    /// so in container mode this never resolves; the health gate is the
    /// only startup arbiter there.
    pub async fn wait_exit(&mut self) -> std::io::Result<ExitStatus> {
        match self {
            Runtime::Process { child, .. } => child.wait().await,
            Runtime::Container { .. } => std::future::pending().await,
        }
    }

    /// Request graceful termination, escalating to a forceful kill after
    /// `grace`. Errors are reported but the instance is considered gone
    /// either way.
    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        match self {
            Runtime::Process { child, .. } => {
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    // SAFETY: plain signal send to a pid we own
                    unsafe {
                        libc::kill(pid as i32, libc::SIGTERM);
                    }
                    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                        return Ok(());
                    }
                    tracing::warn!("backend ignored SIGTERM, killing");
                }
                if let Err(err) = child.kill().await {
                    tracing::debug!("kill failed (backend already exited?): {err}");
                }
                Ok(())
            }
            Runtime::Container { id, docker } => {
                container::stop_container(docker, id, grace).await
            }
        }
    }

    /// Drain whatever diagnostic output the instance produced so far
    pub async fn collect_diagnostics(&mut self) -> String {
        match self {
            Runtime::Process { output, .. } => output.snapshot(),
            Runtime::Container { id, docker } => container::container_logs(docker, id).await,
        }
    }

    /// Release remaining resources (container removal); safe to call
    /// after a failed termination
    pub async fn cleanup(&mut self) {
        if let Runtime::Container { id, docker } = self {
            container::remove_container(docker, id).await;
        }
    }

    /// Best-effort synchronous teardown for `Drop`
    pub(crate) fn abandon(&mut self) {
        match self {
            Runtime::Process { child, .. } => {
                let _ = child.start_kill();
            }
            Runtime::Container { id, docker } => {
                let _ = std::process::Command::new(docker)
                    .args(["rm", "-f", id.as_str()])
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .spawn();
            }
        }
    }
}

/// Captures a child's stdout/stderr into a shared buffer so startup
/// failures can attach the output to the error
#[derive(Debug)]
pub struct OutputCapture {
    buffer: Arc<Mutex<String>>,
}

impl OutputCapture {
    /// Take the child's stdout/stderr pipes and drain them in the
    /// background. Must be called once, right after spawn.
    pub fn attach(child: &mut Child) -> Self {
        let buffer = Arc::new(Mutex::new(String::new()));

        if let Some(stdout) = child.stdout.take() {
            Self::drain(stdout, Arc::clone(&buffer));
        }
        if let Some(stderr) = child.stderr.take() {
            Self::drain(stderr, Arc::clone(&buffer));
        }

        Self { buffer }
    }

    fn drain<R>(pipe: R, buffer: Arc<Mutex<String>>)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut buffer = buffer.lock().expect("output buffer lock poisoned");
                buffer.push_str(&line);
                buffer.push('\n');
            }
        });
    }

    /// Copy of everything captured so far
    pub fn snapshot(&self) -> String {
        self.buffer.lock().expect("output buffer lock poisoned").clone()
    }
}
