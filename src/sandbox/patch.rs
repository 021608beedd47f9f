//! Tolerant patch application.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::command::{CommandResult, StagedResult, Stage};
use super::process::{run_bash, shell_quote};

/// Something a unified diff can be applied to.
#[async_trait]
pub trait PatchTarget: Send + Sync {
    /// Applies `patch` with `git apply`, or only checks it when `check_only` is set.
    ///
    /// A blank patch is a successful no-op. Failures are tagged with the stage
    /// that failed; only misuse is an `Err`.
    async fn apply_patch(&self, patch: &str, check_only: bool) -> Result<StagedResult>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// The `git apply` command for a patch file.
pub fn apply_command(patch_file: &str, check_only: bool) -> String {
    let mut command = "git apply --ignore-whitespace --whitespace=nowarn".to_string();
    if check_only {
        command.push_str(" --check");
    }
    command.push(' ');
    command.push_str(&shell_quote(patch_file));
    command
}

/// Returns the patch ready for `git apply`, or `None` if there is nothing to apply.
pub(crate) fn normalize_patch(patch: &str) -> Option<String> {
    if patch.trim().is_empty() {
        return None;
    }
    let mut patch = patch.to_string();
    if !patch.ends_with('\n') {
        patch.push('\n');
    }
    Some(patch)
}

pub(crate) fn apply_stage(check_only: bool) -> Stage {
    if check_only {
        Stage::ApplyCheck
    } else {
        Stage::Apply
    }
}

/// The real checkout on the host, outside any sandbox.
#[derive(Debug, Clone)]
pub struct HostWorkspace {
    path: PathBuf,
}

impl HostWorkspace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PatchTarget for HostWorkspace {
    async fn apply_patch(&self, patch: &str, check_only: bool) -> Result<StagedResult> {
        let Some(patch) = normalize_patch(patch) else {
            return Ok(StagedResult::ok(CommandResult::success("")));
        };
        if !self.path.is_dir() {
            return Err(Error::InvalidPath(self.path.clone()));
        }

        let patch_file = std::env::temp_dir().join(format!("turnstile-patch-{}.diff", Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&patch_file, patch).await {
            return Ok(StagedResult::tagged(
                CommandResult::failure(-1, e.to_string()),
                Stage::WritePatch,
            ));
        }

        let command = apply_command(&patch_file.display().to_string(), check_only);
        let result = run_bash(&self.path, &[], &command).await;
        if let Err(e) = tokio::fs::remove_file(&patch_file).await {
            tracing::warn!(file = ?patch_file, error = %e, "failed to remove patch file");
        }
        let result = result?;

        tracing::info!(
            path = ?self.path,
            check_only,
            exit_code = result.exit_code,
            "applied patch to host workspace"
        );
        Ok(StagedResult::tagged(result, apply_stage(check_only)))
    }

    fn describe(&self) -> String {
        format!("host workspace {}", self.path.display())
    }
}
