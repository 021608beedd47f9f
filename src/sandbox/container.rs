//! Container-backed sandbox for one run.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::step::StepAction;

use super::command::{CommandResult, StagedResult, Stage};
use super::engine::{ContainerEngine, ContainerSpec};
use super::patch::{apply_command, apply_stage, normalize_patch, PatchTarget};
use super::process::shell_quote;
use super::result_file::{parse_step_report, StepReport};
use super::settings::{SandboxConfig, SandboxSettings};

/// Base64 characters sent per exec, well under the argv limit.
const TRANSPORT_CHUNK: usize = 48 * 1024;

/// Lifecycle of the sandbox. Each non-idle state owns the container id.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    /// Container exists but the workspace is not ready yet.
    Provisioning { container: String },
    Ready { container: String },
    Stopped,
}

/// Outcome of running one step body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepExecution {
    pub result: CommandResult,
    /// Action reported by the runtime; `Unknown` if the report was unusable.
    pub action: StepAction,
    pub report: Option<StepReport>,
}

/// One disposable container with a writable copy of the source repository.
pub struct ContainerSandbox<E: ContainerEngine> {
    engine: E,
    config: SandboxConfig,
    state: Lifecycle,
}

impl<E: ContainerEngine> ContainerSandbox<E> {
    pub fn new(engine: E, config: SandboxConfig) -> Self {
        Self {
            engine,
            config,
            state: Lifecycle::Idle,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, Lifecycle::Ready { .. })
    }

    /// Id of the owned container, if one exists.
    pub fn container_id(&self) -> Option<&str> {
        match &self.state {
            Lifecycle::Provisioning { container } | Lifecycle::Ready { container } => {
                Some(container)
            }
            Lifecycle::Idle | Lifecycle::Stopped => None,
        }
    }

    fn ready_container(&self) -> Result<&str> {
        match &self.state {
            Lifecycle::Ready { container } => Ok(container),
            _ => Err(Error::NotStarted),
        }
    }

    /// Creates the container and prepares the workspace.
    ///
    /// On a setup failure the container is kept so [`stop`](Self::stop) can remove it.
    pub async fn start(&mut self, settings: &SandboxSettings) -> Result<()> {
        if self.state != Lifecycle::Idle {
            return Err(Error::AlreadyStarted);
        }
        if !settings.source_path.exists() {
            return Err(Error::InvalidPath(settings.source_path.clone()));
        }
        let source = settings.source_path.canonicalize()?;

        let spec = ContainerSpec {
            name: format!("turnstile-{}", Uuid::new_v4()),
            image: self.config.image.clone(),
            source: source.clone(),
            source_mount: self.config.source_mount.clone(),
            workdir: self.config.workspace_dir.clone(),
            env: self.config.env_pairs(),
        };
        let container = self.engine.create(&spec).await?;
        self.state = Lifecycle::Provisioning {
            container: container.clone(),
        };
        self.engine.start(&container).await?;

        let workspace = shell_quote(&self.config.workspace_dir);
        let mount = shell_quote(
            &self
                .engine
                .source_path_in_container(&source, &self.config.source_mount),
        );
        let copy = format!(
            "rm -rf {ws} && mkdir -p {ws} {scratch} && cp -a {mount}/. {ws}/",
            ws = workspace,
            scratch = shell_quote(&self.config.scratch_dir),
            mount = mount,
        );
        self.setup_stage(&container, "copy", "/", &copy).await?;

        let trust = format!("git config --global --add safe.directory {}", workspace);
        self.setup_stage(&container, "trust", "/", &trust).await?;

        let clean = settings.clean_workspace || settings.base_revision.is_some();
        if let Some((script, stage)) = reset_plan(settings.base_revision.as_deref(), clean) {
            self.setup_stage(&container, stage.as_str(), &self.config.workspace_dir, &script)
                .await?;
        }

        if let Some(build) = self.config.runtime_build_command() {
            self.setup_stage(&container, "runtime_build", &self.config.workspace_dir, &build)
                .await?;
        }

        tracing::info!(
            container = %container,
            engine = %self.engine.name(),
            base_revision = ?settings.base_revision,
            "sandbox ready"
        );
        self.state = Lifecycle::Ready { container };
        Ok(())
    }

    async fn setup_stage(
        &self,
        container: &str,
        stage: &str,
        workdir: &str,
        script: &str,
    ) -> Result<()> {
        tracing::debug!(container = %container, stage, "running setup stage");
        match self.engine.exec(container, workdir, script).await {
            Ok(result) if result.is_success() => Ok(()),
            Ok(result) => {
                tracing::error!(
                    container = %container,
                    stage,
                    exit_code = result.exit_code,
                    "sandbox setup failed"
                );
                Err(Error::SandboxSetup {
                    stage: stage.to_string(),
                    detail: result.combined_output,
                })
            }
            Err(e) => Err(Error::SandboxSetup {
                stage: stage.to_string(),
                detail: e.to_string(),
            }),
        }
    }

    /// Runs `script` and turns engine failures into an exit code of -1.
    async fn exec(&self, container: &str, workdir: &str, script: &str) -> CommandResult {
        match self.engine.exec(container, workdir, script).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(container = %container, error = %e, "engine exec failed");
                CommandResult::failure(-1, e.to_string())
            }
        }
    }

    /// Runs an arbitrary bash command in the workspace.
    pub async fn execute_command(&self, command: &str) -> Result<CommandResult> {
        let container = self.ready_container()?;
        let result = self
            .exec(container, &self.config.workspace_dir, command)
            .await;
        tracing::debug!(container = %container, exit_code = result.exit_code, "executed command");
        Ok(result)
    }

    /// Writes `bytes` to `path` inside the container through base64 chunks.
    async fn write_file(&self, container: &str, path: &str, bytes: &[u8]) -> CommandResult {
        let encoded = BASE64_STANDARD.encode(bytes);
        let staging = shell_quote(&format!("{}.b64", path));
        let target = shell_quote(path);

        let prepare = format!(
            "mkdir -p \"$(dirname {target})\" && : > {staging}",
            target = target,
            staging = staging
        );
        let result = self.exec(container, "/", &prepare).await;
        if !result.is_success() {
            return result;
        }
        for chunk in encoded.as_bytes().chunks(TRANSPORT_CHUNK) {
            let append = format!(
                "printf '%s' '{}' >> {}",
                String::from_utf8_lossy(chunk),
                staging
            );
            let result = self.exec(container, "/", &append).await;
            if !result.is_success() {
                return result;
            }
        }
        let decode = format!(
            "base64 -d {staging} > {target} && rm -f {staging}",
            staging = staging,
            target = target
        );
        self.exec(container, "/", &decode).await
    }

    /// Runs one step body through the in-sandbox runtime.
    ///
    /// The result file is read whatever the exit code. An unusable result file
    /// adds a warning to the combined output and yields an `Unknown` action.
    pub async fn execute_step_body(&self, body: &str) -> Result<StepExecution> {
        let container = self.ready_container()?;
        let script_path = self.config.script_path();
        let result_path = self.config.result_path();

        let staged = self.write_file(container, &script_path, body.as_bytes()).await;
        if !staged.is_success() {
            let mut result = staged;
            result.append_warning("failed to stage the step body");
            return Ok(StepExecution {
                result,
                action: StepAction::unknown(),
                report: None,
            });
        }

        let invoke = format!(
            "rm -f {}; {}",
            shell_quote(&result_path),
            self.config.invoke_command()
        );
        let mut result = self
            .exec(container, &self.config.workspace_dir, &invoke)
            .await;

        let read = self
            .exec(container, "/", &format!("cat {}", shell_quote(&result_path)))
            .await;
        let (action, report) = if !read.is_success() {
            result.append_warning("step runtime wrote no result file");
            (StepAction::unknown(), None)
        } else {
            match parse_step_report(&read.stdout) {
                Ok((action, report)) => (action, Some(report)),
                Err(warning) => {
                    result.append_warning(&warning);
                    (StepAction::unknown(), None)
                }
            }
        };

        tracing::info!(
            container = %container,
            exit_code = result.exit_code,
            action = %action.kind,
            "executed step body"
        );
        Ok(StepExecution {
            result,
            action,
            report,
        })
    }

    /// Hard-resets and/or cleans the workspace.
    pub async fn reset_workspace(
        &self,
        base_revision: Option<&str>,
        clean_workspace: bool,
    ) -> Result<StagedResult> {
        let container = self.ready_container()?;
        let Some((script, stage)) = reset_plan(base_revision, clean_workspace) else {
            return Ok(StagedResult::ok(CommandResult::success("")));
        };
        let result = self
            .exec(container, &self.config.workspace_dir, &script)
            .await;
        Ok(StagedResult::tagged(result, stage))
    }

    /// Stops and removes the container. Safe to call any number of times.
    pub async fn stop(&mut self) -> Result<()> {
        let container = match &self.state {
            Lifecycle::Idle | Lifecycle::Stopped => return Ok(()),
            Lifecycle::Provisioning { container } | Lifecycle::Ready { container } => {
                container.clone()
            }
        };
        self.state = Lifecycle::Stopped;

        if let Err(e) = self.engine.stop(&container).await {
            tracing::warn!(container = %container, error = %e, "failed to stop container, removing anyway");
        }
        self.engine.remove(&container).await?;
        tracing::info!(container = %container, "sandbox stopped");
        Ok(())
    }
}

/// Reset script and its failure tag; `None` when nothing was requested.
fn reset_plan(base_revision: Option<&str>, clean_workspace: bool) -> Option<(String, Stage)> {
    match (base_revision, clean_workspace) {
        (Some(revision), true) => Some((
            format!(
                "git reset --hard {} && git clean -fdx",
                shell_quote(revision)
            ),
            Stage::ResetAndClean,
        )),
        (Some(revision), false) => Some((
            format!("git reset --hard {}", shell_quote(revision)),
            Stage::Reset,
        )),
        (None, true) => Some(("git clean -fdx".to_string(), Stage::Clean)),
        (None, false) => None,
    }
}

#[async_trait]
impl<E: ContainerEngine> PatchTarget for ContainerSandbox<E> {
    async fn apply_patch(&self, patch: &str, check_only: bool) -> Result<StagedResult> {
        let container = self.ready_container()?;
        let Some(patch) = normalize_patch(patch) else {
            return Ok(StagedResult::ok(CommandResult::success("")));
        };

        let patch_file = format!("{}/patch-{}.diff", self.config.scratch_dir, Uuid::new_v4());
        let written = self.write_file(container, &patch_file, patch.as_bytes()).await;
        let staged = if written.is_success() {
            let result = self
                .exec(
                    container,
                    &self.config.workspace_dir,
                    &apply_command(&patch_file, check_only),
                )
                .await;
            StagedResult::tagged(result, apply_stage(check_only))
        } else {
            StagedResult::tagged(written, Stage::WritePatch)
        };

        let remove = format!("rm -f {0} {0}.b64", shell_quote(&patch_file));
        let removed = self.exec(container, "/", &remove).await;
        if !removed.is_success() {
            tracing::warn!(container = %container, file = %patch_file, "failed to remove patch file");
        }
        Ok(staged)
    }

    fn describe(&self) -> String {
        match self.container_id() {
            Some(id) => format!("sandbox container {}", id),
            None => "sandbox (no container)".to_string(),
        }
    }
}

impl<E: ContainerEngine> Drop for ContainerSandbox<E> {
    fn drop(&mut self) {
        if let Some(container) = self.container_id() {
            tracing::warn!(container = %container, "sandbox dropped without stop, releasing container");
            self.engine.release_blocking(container);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_plan_tags() {
        assert_eq!(reset_plan(None, false), None);
        assert_eq!(
            reset_plan(None, true),
            Some(("git clean -fdx".to_string(), Stage::Clean))
        );
        assert_eq!(
            reset_plan(Some("abc"), false),
            Some(("git reset --hard 'abc'".to_string(), Stage::Reset))
        );
        assert_eq!(
            reset_plan(Some("abc"), true).map(|(_, stage)| stage),
            Some(Stage::ResetAndClean)
        );
    }
}
