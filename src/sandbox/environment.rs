//! Reachability checks for container engines, run before `start()`.

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::engine::DockerCli;
use super::local::LocalEngine;
use super::process::run_bash;

/// Validates that an engine can run containers.
#[async_trait]
pub trait EnvironmentCheck: Send + Sync {
    /// Returns a short version string on success.
    async fn check(&self) -> Result<String>;
}

#[async_trait]
impl EnvironmentCheck for DockerCli {
    async fn check(&self) -> Result<String> {
        let args: Vec<String> = ["version", "--format", "{{.Server.Version}}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let result = self
            .run(&args)
            .await
            .map_err(|e| Error::Environment(format!("{} is not runnable: {}", self.cli_path(), e)))?;
        if !result.is_success() {
            return Err(Error::Environment(format!(
                "{} daemon is not reachable: {}",
                self.cli_path(),
                result.combined_output
            )));
        }
        let version = result.stdout.trim().to_string();
        tracing::info!(version = %version, "container engine reachable");
        Ok(version)
    }
}

#[async_trait]
impl EnvironmentCheck for LocalEngine {
    async fn check(&self) -> Result<String> {
        tokio::fs::create_dir_all(self.root()).await?;
        let result = run_bash(self.root(), &[], "git --version")
            .await
            .map_err(|e| Error::Environment(format!("bash is not runnable: {}", e)))?;
        if !result.is_success() {
            return Err(Error::Environment(format!(
                "git is not available: {}",
                result.combined_output
            )));
        }
        Ok(result.stdout.trim().to_string())
    }
}
