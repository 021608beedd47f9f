//! Turn execution.
//!
//! [`TurnExecutor::run_turn`] validates one step, runs it in the sandbox and
//! derives the turn's observation from sandbox state: the diff, the changed
//! files and the verification result. Nothing the step reports about itself
//! is trusted for these.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sandbox::{CommandResult, ContainerEngine, ContainerSandbox};
use crate::step::{analyze_step, ActionKind, StepAction, StepAnalysis};

/// Stages untracked files as intent-to-add so they show up in the diff.
pub const DIFF_COMMAND: &str = "git ls-files --others --exclude-standard -z | xargs -0 -r git add --intent-to-add -- && git diff --no-color HEAD";

pub const CHANGED_FILES_COMMAND: &str = "git diff --name-only HEAD";

/// Default commands for verification steps that name none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_build_command")]
    pub build_command: String,
    #[serde(default = "default_test_command")]
    pub test_command: String,
}

fn default_build_command() -> String {
    "dotnet build".to_string()
}

fn default_test_command() -> String {
    "dotnet test".to_string()
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            build_command: default_build_command(),
            test_command: default_test_command(),
        }
    }
}

impl VerificationConfig {
    /// Command to run for `action`, or `None` if it is not a verification.
    pub fn command_for(&self, action: &StepAction) -> Option<String> {
        let default = match action.kind {
            ActionKind::VerificationBuild => &self.build_command,
            ActionKind::VerificationTest => &self.test_command,
            _ => return None,
        };
        if action.command.trim().is_empty() {
            Some(default.clone())
        } else {
            Some(action.command.clone())
        }
    }
}

/// Ground truth of one executed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnObservation {
    pub turn: usize,
    /// RFC 3339 time the turn started.
    pub started_at: String,
    pub step_plan: Option<String>,
    pub tool_call: Option<String>,
    pub script_execution: CommandResult,
    pub diff_execution: CommandResult,
    pub changed_files_execution: CommandResult,
    /// Skipped unless the step was a verification.
    pub build_execution: CommandResult,
    pub changed_files: Vec<String>,
    pub has_changes: bool,
    pub build_passed: bool,
    pub action: StepAction,
}

impl TurnObservation {
    pub fn script_succeeded(&self) -> bool {
        self.script_execution.is_success()
    }

    /// True if verification ran and failed.
    pub fn build_failed(&self) -> bool {
        !self.build_execution.skipped && !self.build_passed
    }
}

/// Outcome of one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The step broke the protocol and never reached the sandbox.
    Rejected(StepAnalysis),
    Observed(Box<TurnObservation>),
}

/// Diff and changed files of the workspace against `HEAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffCapture {
    pub diff_execution: CommandResult,
    pub changed_files_execution: CommandResult,
}

impl DiffCapture {
    pub fn diff(&self) -> &str {
        &self.diff_execution.stdout
    }

    pub fn has_changes(&self) -> bool {
        !self.diff_execution.stdout.trim().is_empty()
    }

    pub fn changed_files(&self) -> Vec<String> {
        parse_changed_files(&self.changed_files_execution.stdout)
    }
}

/// Captures the workspace diff, including untracked files.
pub async fn capture_diff<E: ContainerEngine>(sandbox: &ContainerSandbox<E>) -> Result<DiffCapture> {
    let diff_execution = sandbox.execute_command(DIFF_COMMAND).await?;
    let changed_files_execution = sandbox.execute_command(CHANGED_FILES_COMMAND).await?;
    Ok(DiffCapture {
        diff_execution,
        changed_files_execution,
    })
}

fn parse_changed_files(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Runs validated steps against a started sandbox.
pub struct TurnExecutor<'a, E: ContainerEngine> {
    sandbox: &'a ContainerSandbox<E>,
    verification: &'a VerificationConfig,
}

impl<'a, E: ContainerEngine> TurnExecutor<'a, E> {
    pub fn new(sandbox: &'a ContainerSandbox<E>, verification: &'a VerificationConfig) -> Self {
        Self {
            sandbox,
            verification,
        }
    }

    /// Validates and runs one step.
    ///
    /// Only misuse (a sandbox that is not started) is an error.
    pub async fn run_turn(&self, turn: usize, step: &str) -> Result<TurnOutcome> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let analysis = analyze_step(step);
        if !analysis.is_accepted() {
            tracing::info!(turn, violations = analysis.violations.len(), "step rejected");
            return Ok(TurnOutcome::Rejected(analysis));
        }

        let execution = self.sandbox.execute_step_body(step).await?;
        let capture = capture_diff(self.sandbox).await?;

        if execution.action.kind != analysis.action.kind {
            tracing::warn!(
                turn,
                reported = %execution.action.kind,
                validated = %analysis.action.kind,
                "runtime reported a different action; using the validated one"
            );
        }

        // The verification command comes from the validated step, never from the report.
        let build_execution = match self.verification.command_for(&analysis.action) {
            Some(command) => {
                tracing::info!(turn, command = %command, "running verification");
                self.sandbox.execute_command(&command).await?
            }
            None => CommandResult::skipped(format!(
                "no verification for action {}",
                analysis.action.kind
            )),
        };
        let build_passed = !build_execution.skipped && build_execution.is_success();

        let report = execution.report.as_ref();
        let step_plan = analysis
            .step_plan
            .clone()
            .or_else(|| report.and_then(|r| r.step_plan.clone()));
        let tool_call = analysis
            .tool_call
            .clone()
            .or_else(|| report.and_then(|r| r.tool_call.clone()));

        let observation = TurnObservation {
            turn,
            started_at,
            step_plan,
            tool_call,
            changed_files: capture.changed_files(),
            has_changes: capture.has_changes(),
            script_execution: execution.result,
            diff_execution: capture.diff_execution,
            changed_files_execution: capture.changed_files_execution,
            build_execution,
            build_passed,
            action: analysis.action,
        };
        tracing::info!(
            turn,
            exit_code = observation.script_execution.exit_code,
            action = %observation.action.kind,
            has_changes = observation.has_changes,
            build_passed = observation.build_passed,
            "turn observed"
        );
        Ok(TurnOutcome::Observed(Box::new(observation)))
    }
}
