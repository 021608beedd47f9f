//! Container engines.
//!
//! [`ContainerEngine`] is the seam between the sandbox lifecycle and whatever
//! actually runs the container. [`DockerCli`] drives the `docker` binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::command::CommandResult;
use super::process::output_to_result;

/// Everything needed to create one sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host path bind-mounted read-only at `source_mount`.
    pub source: PathBuf,
    pub source_mount: String,
    pub workdir: String,
    pub env: Vec<(String, String)>,
}

/// Runs and manages containers.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Creates a container and returns its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, container: &str) -> Result<()>;

    /// Runs `script` with bash inside the container.
    ///
    /// A non-zero exit is returned as data; `Err` means the engine itself failed.
    async fn exec(&self, container: &str, workdir: &str, script: &str) -> Result<CommandResult>;

    async fn stop(&self, container: &str) -> Result<()>;

    /// Force-removes the container.
    async fn remove(&self, container: &str) -> Result<()>;

    /// Synchronous best-effort removal, used when a sandbox is dropped unstopped.
    fn release_blocking(&self, _container: &str) {}

    /// Where the source repository is visible from inside the container.
    fn source_path_in_container(&self, _source: &Path, mount: &str) -> String {
        mount.to_string()
    }
}

/// Engine backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    cli_path: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    /// Creates an engine using `docker` from `PATH`.
    pub fn new() -> Self {
        Self {
            cli_path: "docker".to_string(),
        }
    }

    /// Creates an engine with a custom CLI path (e.g. `podman`).
    pub fn with_cli_path(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
        }
    }

    pub fn cli_path(&self) -> &str {
        &self.cli_path
    }

    pub(crate) async fn run(&self, args: &[String]) -> Result<CommandResult> {
        tracing::debug!(cli = %self.cli_path, args = ?args, "running container CLI");
        let output = Command::new(&self.cli_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(output_to_result(output))
    }
}

/// Arguments for `docker create`.
fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--mount".to_string(),
        format!(
            "type=bind,source={},target={},readonly",
            spec.source.display(),
            spec.source_mount
        ),
        "-w".to_string(),
        spec.workdir.clone(),
    ];
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(spec.image.clone());
    args.push("sleep".to_string());
    args.push("infinity".to_string());
    args
}

/// Arguments for `docker exec`.
fn exec_args(container: &str, workdir: &str, script: &str) -> Vec<String> {
    vec![
        "exec".to_string(),
        "-w".to_string(),
        workdir.to_string(),
        container.to_string(),
        "bash".to_string(),
        "-c".to_string(),
        script.to_string(),
    ]
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl ContainerEngine for DockerCli {
    fn name(&self) -> &str {
        "docker"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let result = self
            .run(&create_args(spec))
            .await
            .map_err(|e| Error::SandboxCreation(e.to_string()))?;
        if !result.is_success() {
            return Err(Error::SandboxCreation(format!(
                "docker create failed: {}",
                result.combined_output
            )));
        }
        let id = result.stdout.trim().to_string();
        tracing::info!(container = %id, image = %spec.image, "created container");
        Ok(id)
    }

    async fn start(&self, container: &str) -> Result<()> {
        let result = self
            .run(&args(&["start", container]))
            .await
            .map_err(|e| Error::SandboxCreation(e.to_string()))?;
        if !result.is_success() {
            return Err(Error::SandboxCreation(format!(
                "docker start failed: {}",
                result.combined_output
            )));
        }
        Ok(())
    }

    async fn exec(&self, container: &str, workdir: &str, script: &str) -> Result<CommandResult> {
        self.run(&exec_args(container, workdir, script)).await
    }

    async fn stop(&self, container: &str) -> Result<()> {
        let result = self.run(&args(&["stop", "-t", "5", container])).await?;
        if !result.is_success() {
            return Err(Error::SandboxCleanup {
                container: container.to_string(),
                reason: result.combined_output,
            });
        }
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let result = self.run(&args(&["rm", "-f", container])).await?;
        if !result.is_success() {
            return Err(Error::SandboxCleanup {
                container: container.to_string(),
                reason: result.combined_output,
            });
        }
        tracing::info!(container = %container, "removed container");
        Ok(())
    }

    fn release_blocking(&self, container: &str) {
        let output = std::process::Command::new(&self.cli_path)
            .args(["rm", "-f", container])
            .stdin(Stdio::null())
            .output();
        match output {
            Ok(out) if out.status.success() => {
                tracing::info!(container = %container, "released container on drop");
            }
            Ok(out) => {
                tracing::error!(
                    container = %container,
                    stderr = %String::from_utf8_lossy(&out.stderr),
                    "failed to release container on drop"
                );
            }
            Err(e) => {
                tracing::error!(container = %container, error = %e, "failed to release container on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "turnstile-1".to_string(),
            image: "mcr.microsoft.com/dotnet/sdk:8.0".to_string(),
            source: PathBuf::from("/home/dev/repo"),
            source_mount: "/mnt/source".to_string(),
            workdir: "/workspace".to_string(),
            env: vec![("DOTNET_NOLOGO".to_string(), "1".to_string())],
        }
    }

    #[test]
    fn create_mounts_source_read_only() {
        let args = create_args(&spec());
        assert_eq!(args[0], "create");
        assert!(args.contains(
            &"type=bind,source=/home/dev/repo,target=/mnt/source,readonly".to_string()
        ));
        assert!(args.contains(&"DOTNET_NOLOGO=1".to_string()));
        assert_eq!(
            &args[args.len() - 3..],
            &["mcr.microsoft.com/dotnet/sdk:8.0", "sleep", "infinity"]
        );
    }

    #[test]
    fn exec_runs_bash_in_workdir() {
        let args = exec_args("abc", "/workspace", "git status");
        assert_eq!(
            args,
            vec!["exec", "-w", "/workspace", "abc", "bash", "-c", "git status"]
        );
    }

    #[test]
    fn custom_cli_path() {
        let engine = DockerCli::with_cli_path("/usr/bin/podman");
        assert_eq!(engine.cli_path(), "/usr/bin/podman");
        assert_eq!(DockerCli::default().cli_path(), "docker");
    }

    #[test]
    fn default_source_path_is_the_mount() {
        let engine = DockerCli::new();
        assert_eq!(
            engine.source_path_in_container(Path::new("/home/dev/repo"), "/mnt/source"),
            "/mnt/source"
        );
    }
}
