//! Host-process engine.
//!
//! [`LocalEngine`] runs every command directly on the host under a private
//! root directory. It provides no isolation at all: use it for tests and for
//! trusted local runs where docker is unavailable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::command::CommandResult;
use super::engine::{ContainerEngine, ContainerSpec};
use super::process::run_bash;
use super::settings::SandboxConfig;

/// Engine that runs "containers" as plain host processes.
#[derive(Debug)]
pub struct LocalEngine {
    root: PathBuf,
    /// Environment of every created container, keyed by id.
    containers: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl LocalEngine {
    /// Creates an engine rooted at `root`. The directory is created on demand.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            containers: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sandbox configuration whose directories live under the engine root.
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            image: "local".to_string(),
            workspace_dir: self.root.join("workspace").display().to_string(),
            scratch_dir: self.root.join("scratch").display().to_string(),
            ..SandboxConfig::default()
        }
    }

    fn home(&self) -> PathBuf {
        self.root.join("home")
    }

    fn env_for(&self, container: &str) -> Result<Vec<(String, String)>> {
        let containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        containers
            .get(container)
            .cloned()
            .ok_or_else(|| Error::Environment(format!("no such container: {}", container)))
    }

    pub fn is_known(&self, container: &str) -> bool {
        let containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        containers.contains_key(container)
    }
}

#[async_trait]
impl ContainerEngine for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let home = self.home();
        tokio::fs::create_dir_all(&home)
            .await
            .map_err(|e| Error::SandboxCreation(e.to_string()))?;

        let id = format!("local-{}", Uuid::new_v4());
        // HOME is private so `git config --global` never touches the real user config.
        let mut env = spec.env.clone();
        env.push(("HOME".to_string(), home.display().to_string()));
        env.push(("GIT_CONFIG_NOSYSTEM".to_string(), "1".to_string()));

        let mut containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        containers.insert(id.clone(), env);
        tracing::info!(container = %id, root = ?self.root, "created local container");
        Ok(id)
    }

    async fn start(&self, container: &str) -> Result<()> {
        if !self.is_known(container) {
            return Err(Error::SandboxCreation(format!(
                "no such container: {}",
                container
            )));
        }
        Ok(())
    }

    async fn exec(&self, container: &str, workdir: &str, script: &str) -> Result<CommandResult> {
        let env = self.env_for(container)?;
        Ok(run_bash(Path::new(workdir), &env, script).await?)
    }

    async fn stop(&self, _container: &str) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        containers.remove(container);
        Ok(())
    }

    fn release_blocking(&self, container: &str) {
        let mut containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        containers.remove(container);
    }

    fn source_path_in_container(&self, source: &Path, _mount: &str) -> String {
        source.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(source: &Path) -> ContainerSpec {
        ContainerSpec {
            name: "unused".to_string(),
            image: "local".to_string(),
            source: source.to_path_buf(),
            source_mount: "/mnt/source".to_string(),
            workdir: "/".to_string(),
            env: vec![("STEP_FLAG".to_string(), "on".to_string())],
        }
    }

    #[tokio::test]
    async fn exec_uses_private_home_and_spec_env() {
        let root = TempDir::new().unwrap();
        let engine = LocalEngine::new(root.path());
        let id = engine.create(&spec(root.path())).await.unwrap();
        engine.start(&id).await.unwrap();

        let result = engine
            .exec(&id, "/", "echo \"$HOME|$STEP_FLAG\"")
            .await
            .unwrap();
        assert_eq!(
            result.stdout.trim(),
            format!("{}|on", root.path().join("home").display())
        );
    }

    #[tokio::test]
    async fn removed_containers_cannot_exec() {
        let root = TempDir::new().unwrap();
        let engine = LocalEngine::new(root.path());
        let id = engine.create(&spec(root.path())).await.unwrap();
        engine.remove(&id).await.unwrap();
        assert!(matches!(
            engine.exec(&id, "/", "true").await,
            Err(Error::Environment(_))
        ));
    }

    #[test]
    fn config_paths_live_under_root() {
        let engine = LocalEngine::new("/tmp/ts-root");
        let config = engine.sandbox_config();
        assert_eq!(config.workspace_dir, "/tmp/ts-root/workspace");
        assert_eq!(config.scratch_dir, "/tmp/ts-root/scratch");
    }

    #[test]
    fn source_is_used_in_place() {
        let engine = LocalEngine::new("/tmp/ts-root");
        assert_eq!(
            engine.source_path_in_container(Path::new("/src/repo"), "/mnt/source"),
            "/src/repo"
        );
    }
}
