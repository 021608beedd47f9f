//! Command results returned by sandbox operations.

use serde::{Deserialize, Serialize};

/// Outcome of one command run inside the sandbox.
///
/// A failing command is data, not an error: callers inspect `exit_code`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Stdout and stderr joined, plus any warnings appended by the engine.
    pub combined_output: String,
    /// True when the command was deliberately not run.
    #[serde(default)]
    pub skipped: bool,
}

impl CommandResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let stdout = stdout.into();
        let stderr = stderr.into();
        let combined_output = combine(&stdout, &stderr);
        Self {
            exit_code,
            stdout,
            stderr,
            combined_output,
            skipped: false,
        }
    }

    /// A successful result with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// A failed result carrying `message` as stderr.
    pub fn failure(exit_code: i32, message: impl Into<String>) -> Self {
        Self::new(exit_code, "", message)
    }

    /// Sentinel for a command that was not run.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            combined_output: reason.into(),
            skipped: true,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Appends a warning line to the combined output.
    pub fn append_warning(&mut self, warning: &str) {
        if !self.combined_output.is_empty() && !self.combined_output.ends_with('\n') {
            self.combined_output.push('\n');
        }
        self.combined_output.push_str("[warning] ");
        self.combined_output.push_str(warning);
    }
}

fn combine(stdout: &str, stderr: &str) -> String {
    let out = stdout.trim_end();
    let err = stderr.trim_end();
    match (out.is_empty(), err.is_empty()) {
        (true, true) => String::new(),
        (false, true) => out.to_string(),
        (true, false) => err.to_string(),
        (false, false) => format!("{}\n{}", out, err),
    }
}

/// Stage of a multi-step workspace operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reset,
    Clean,
    ResetAndClean,
    Apply,
    ApplyCheck,
    WritePatch,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reset => "reset",
            Stage::Clean => "clean",
            Stage::ResetAndClean => "reset_and_clean",
            Stage::Apply => "apply",
            Stage::ApplyCheck => "apply_check",
            Stage::WritePatch => "write_patch",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a staged workspace operation, tagged with the stage that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedResult {
    pub result: CommandResult,
    pub failed_stage: Option<Stage>,
}

impl StagedResult {
    pub fn ok(result: CommandResult) -> Self {
        Self {
            result,
            failed_stage: None,
        }
    }

    /// Tags `result` with `stage` if it failed.
    pub fn tagged(result: CommandResult, stage: Stage) -> Self {
        let failed_stage = (!result.is_success()).then_some(stage);
        Self {
            result,
            failed_stage,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_stage.is_none() && self.result.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_output_joins_both_streams() {
        let result = CommandResult::new(1, "built\n", "error CS1002\n");
        assert_eq!(result.combined_output, "built\nerror CS1002");
    }

    #[test]
    fn combined_output_uses_whichever_stream_is_present() {
        assert_eq!(CommandResult::new(0, "", "warn").combined_output, "warn");
        assert_eq!(CommandResult::new(0, "ok", "").combined_output, "ok");
    }

    #[test]
    fn skipped_results_are_marked() {
        let result = CommandResult::skipped("not a verification step");
        assert!(result.skipped);
        assert!(result.is_success());
        assert_eq!(result.combined_output, "not a verification step");
    }

    #[test]
    fn warnings_are_appended_on_their_own_line() {
        let mut result = CommandResult::success("done");
        result.append_warning("result file missing");
        assert_eq!(result.combined_output, "done\n[warning] result file missing");
    }

    #[test]
    fn staged_results_only_tag_failures() {
        let ok = StagedResult::tagged(CommandResult::success(""), Stage::Apply);
        assert_eq!(ok.failed_stage, None);
        let failed = StagedResult::tagged(CommandResult::failure(1, "corrupt patch"), Stage::Apply);
        assert_eq!(failed.failed_stage, Some(Stage::Apply));
        assert!(!failed.is_success());
    }

    #[test]
    fn stage_tags_serialize_in_snake_case() {
        let json = serde_json::to_string(&Stage::ResetAndClean).unwrap();
        assert_eq!(json, "\"reset_and_clean\"");
        assert_eq!(Stage::ApplyCheck.as_str(), "apply_check");
    }
}
