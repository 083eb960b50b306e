//! Container launch mode
//!
//! Drives the `docker` CLI directly: the backend image is started with
//! the config directory bind-mounted read-only at a fixed in-container
//! path, and the instance address is discovered through `docker inspect`
//! rather than a fixed host port.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::common::{Error, Result};

use super::launcher::{Launched, Launcher, Runtime};

/// Default path the backend image expects its configuration at
const DEFAULT_CONFIG_MOUNT: &str = "/app/config";

/// Port the backend listens on inside the container
const DEFAULT_CONTAINER_PORT: u16 = 3002;

/// Starts the backend as a detached docker container
pub struct ContainerLauncher {
    image: String,
    config_mount: String,
    container_port: u16,
    extra_flags: Vec<String>,
}

impl ContainerLauncher {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            config_mount: DEFAULT_CONFIG_MOUNT.to_string(),
            container_port: DEFAULT_CONTAINER_PORT,
            extra_flags: Vec::new(),
        }
    }

    /// Override the in-container config path
    pub fn with_config_mount(mut self, mount: impl Into<String>) -> Self {
        self.config_mount = mount.into();
        self
    }

    /// Override the port the backend listens on inside the container
    pub fn with_container_port(mut self, port: u16) -> Self {
        self.container_port = port;
        self
    }

    /// Additional flags passed to `docker run`
    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_flags = flags.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Launcher for ContainerLauncher {
    fn mode(&self) -> &'static str {
        "container"
    }

    async fn launch(&self, config_dir: &Path) -> Result<Launched> {
        let docker = find_docker()?;
        let config_dir = config_dir.canonicalize()?;

        let mount = format!("{}:{}:ro", config_dir.display(), self.config_mount);
        let mut args: Vec<String> = vec!["run".into(), "-d".into(), "-v".into(), mount];
        args.extend(self.extra_flags.iter().cloned());
        args.push(self.image.clone());

        tracing::debug!(image = %self.image, "starting backend container");
        let id = docker_output(&docker, &args).await.map_err(|err| {
            Error::startup_failed(format!("docker run failed for '{}'", self.image), err)
        })?;
        let id = id.trim().to_string();

        // The container detaches immediately; make sure it did not die
        // on entry before going through the health gate.
        let running = docker_output(
            &docker,
            &["inspect", "-f", "{{.State.Running}}", id.as_str()].map(String::from),
        )
        .await
        .unwrap_or_default();

        if running.trim() != "true" {
            let logs = container_logs(&docker, &id).await;
            remove_container(&docker, &id).await;
            return Err(Error::startup_failed(
                format!("container {id} exited during startup"),
                logs,
            ));
        }

        let ip = docker_output(
            &docker,
            &[
                "inspect",
                "-f",
                "{{range.NetworkSettings.Networks}}{{.IPAddress}}{{end}}",
                id.as_str(),
            ]
            .map(String::from),
        )
        .await
        .unwrap_or_default();
        let ip = ip.trim().to_string();

        if ip.is_empty() {
            let logs = container_logs(&docker, &id).await;
            remove_container(&docker, &id).await;
            return Err(Error::startup_failed(
                format!("could not discover the address of container {id}"),
                logs,
            ));
        }

        Ok(Launched {
            address: format!("http://{ip}:{}", self.container_port),
            runtime: Runtime::Container { id, docker },
        })
    }
}

fn find_docker() -> Result<PathBuf> {
    which::which("docker").map_err(|err| {
        Error::startup_failed(format!("docker executable not found: {err}"), String::new())
    })
}

/// Run a docker subcommand and return its stdout, or the stderr text as
/// the error value
async fn docker_output(docker: &Path, args: &[String]) -> std::result::Result<String, String> {
    let output = Command::new(docker)
        .args(args)
        .output()
        .await
        .map_err(|err| format!("failed to run docker: {err}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

/// Stop a container, letting docker escalate to SIGKILL after the grace
/// period
pub(crate) async fn stop_container(docker: &Path, id: &str, grace: Duration) -> Result<()> {
    let grace_secs = grace.as_secs().max(1).to_string();
    let args = ["stop", "-t", grace_secs.as_str(), id].map(String::from);
    if let Err(stderr) = docker_output(docker, &args).await {
        tracing::warn!(container = id, "docker stop failed: {}", stderr.trim());
        let _ = docker_output(docker, &["kill", id].map(String::from)).await;
    }
    Ok(())
}

/// Fetch combined container logs for diagnostics
pub(crate) async fn container_logs(docker: &Path, id: &str) -> String {
    let output = Command::new(docker).args(["logs", id]).output().await;
    match output {
        Ok(output) => format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
        Err(err) => format!("<failed to fetch container logs: {err}>"),
    }
}

/// Remove a container, tolerating one that is already gone
pub(crate) async fn remove_container(docker: &Path, id: &str) {
    if let Err(stderr) = docker_output(docker, &["rm", "-f", id].map(String::from)).await {
        if !stderr.contains("No such container") {
            tracing::warn!(container = id, "docker rm failed: {}", stderr.trim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_image_contract() {
        let launcher = ContainerLauncher::new("runner-backend:test");
        assert_eq!(launcher.config_mount, DEFAULT_CONFIG_MOUNT);
        assert_eq!(launcher.container_port, DEFAULT_CONTAINER_PORT);
        assert_eq!(launcher.mode(), "container");
    }

    #[test]
    fn builders_override_defaults() {
        let launcher = ContainerLauncher::new("img")
            .with_config_mount("/etc/runner")
            .with_container_port(8080)
            .with_flags(["--network", "runner-test"]);
        assert_eq!(launcher.config_mount, "/etc/runner");
        assert_eq!(launcher.container_port, 8080);
        assert_eq!(launcher.extra_flags, vec!["--network", "runner-test"]);
    }
}
