//! Sandbox settings and configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::process::shell_quote;

/// Per-run setup parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Host path of the repository snapshot to copy in.
    pub source_path: PathBuf,
    /// Revision to hard-reset the workspace to before the first turn.
    #[serde(default)]
    pub base_revision: Option<String>,
    /// Run `git clean -fdx` during setup even without a base revision.
    #[serde(default)]
    pub clean_workspace: bool,
}

impl SandboxSettings {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            base_revision: None,
            clean_workspace: false,
        }
    }

    pub fn with_base_revision(mut self, revision: impl Into<String>) -> Self {
        self.base_revision = Some(revision.into());
        self
    }

    pub fn with_clean_workspace(mut self, clean: bool) -> Self {
        self.clean_workspace = clean;
        self
    }
}

/// Engine-wide sandbox configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container image with the toolchain the step runtime needs.
    #[serde(default = "default_image")]
    pub image: String,
    /// Read-only mount point of the source repository.
    #[serde(default = "default_source_mount")]
    pub source_mount: String,
    /// Writable copy of the repository; every step runs here.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
    /// Step bodies, result files and patches live here, outside the workspace.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Extra environment for the container.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_image() -> String {
    "mcr.microsoft.com/dotnet/sdk:8.0".to_string()
}

fn default_source_mount() -> String {
    "/mnt/source".to_string()
}

fn default_workspace_dir() -> String {
    "/workspace".to_string()
}

fn default_scratch_dir() -> String {
    "/tmp/turnstile".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            source_mount: default_source_mount(),
            workspace_dir: default_workspace_dir(),
            scratch_dir: default_scratch_dir(),
            runtime: RuntimeConfig::default(),
            env: BTreeMap::new(),
        }
    }
}

impl SandboxConfig {
    pub fn script_path(&self) -> String {
        format!("{}/step.csx", self.scratch_dir)
    }

    pub fn result_path(&self) -> String {
        format!("{}/step-result.json", self.scratch_dir)
    }

    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Runtime build command with placeholders filled in.
    pub fn runtime_build_command(&self) -> Option<String> {
        self.runtime
            .build_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(|c| self.expand(c))
    }

    /// Command that runs the step runtime on the staged script.
    pub fn invoke_command(&self) -> String {
        self.expand(&self.runtime.invoke_template)
            .replace("{script}", &shell_quote(&self.script_path()))
            .replace("{result}", &shell_quote(&self.result_path()))
    }

    fn expand(&self, template: &str) -> String {
        template
            .replace("{scratch}", &self.scratch_dir)
            .replace("{workspace}", &self.workspace_dir)
    }
}

/// How the in-sandbox step runtime is built and invoked.
///
/// Both commands accept `{scratch}` and `{workspace}` placeholders. The invoke
/// template must also contain `{script}` and `{result}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_build_command")]
    pub build_command: Option<String>,
    #[serde(default = "default_invoke_template")]
    pub invoke_template: String,
}

fn default_build_command() -> Option<String> {
    Some(
        "dotnet build tools/StepRunner/StepRunner.csproj -c Release -o {scratch}/runner --nologo"
            .to_string(),
    )
}

fn default_invoke_template() -> String {
    "dotnet {scratch}/runner/StepRunner.dll {script} {result}".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            build_command: default_build_command(),
            invoke_template: default_invoke_template(),
        }
    }
}
