//! Subprocess launch mode
//!
//! Launch contract: the backend executable accepts `--port <port>` and
//! `--config <path>`. The harness picks a free ephemeral port and reads
//! or writes no other process state.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::common::{Error, Result};

use super::launcher::{Launched, Launcher, OutputCapture, Runtime};

/// Starts the backend as a local subprocess on an ephemeral port
pub struct ProcessLauncher {
    executable: PathBuf,
    extra_args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            extra_args: Vec::new(),
        }
    }

    /// Additional arguments appended after `--port`/`--config`
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn resolve_executable(&self) -> Result<PathBuf> {
        // Bare names go through PATH; anything with a separator is used
        // as given so tests can point at target/debug binaries.
        if self.executable.components().count() > 1 {
            return Ok(self.executable.clone());
        }
        which::which(&self.executable).map_err(|err| {
            Error::startup_failed(
                format!(
                    "backend executable '{}' not found: {err}",
                    self.executable.display()
                ),
                String::new(),
            )
        })
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    fn mode(&self) -> &'static str {
        "process"
    }

    async fn launch(&self, config_dir: &Path) -> Result<Launched> {
        let executable = self.resolve_executable()?;
        let port = free_port()?;

        tracing::debug!(
            executable = %executable.display(),
            port,
            config = %config_dir.display(),
            "spawning backend process"
        );

        let mut child = Command::new(&executable)
            .arg("--port")
            .arg(port.to_string())
            .arg("--config")
            .arg(config_dir)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                Error::startup_failed(
                    format!("failed to spawn '{}': {err}", executable.display()),
                    String::new(),
                )
            })?;

        let output = OutputCapture::attach(&mut child);

        Ok(Launched {
            address: format!("http://127.0.0.1:{port}"),
            runtime: Runtime::Process { child, output },
        })
    }
}

/// Pick a free ephemeral port by binding to port 0 and releasing it.
/// The small window before the backend binds it is accepted at test
/// scale.
fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_ports_are_distinct_enough() {
        let first = free_port().unwrap();
        let second = free_port().unwrap();
        assert!(first > 0);
        assert!(second > 0);
    }

    #[test]
    fn bare_names_are_resolved_through_path() {
        // `sh` exists on any unix test machine
        #[cfg(unix)]
        {
            let launcher = ProcessLauncher::new("sh");
            let resolved = launcher.resolve_executable().unwrap();
            assert!(resolved.is_absolute());
        }
    }

    #[test]
    fn missing_executable_is_a_startup_failure() {
        let launcher = ProcessLauncher::new("definitely-not-a-real-backend-binary");
        let err = launcher.resolve_executable().unwrap_err();
        assert!(matches!(err, Error::StartupFailed { .. }));
    }
}
