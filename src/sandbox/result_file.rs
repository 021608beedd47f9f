//! Result file written by the in-sandbox step runtime.
//!
//! The runtime writes one JSON object after running a step:
//!
//! ```json
//! {"action": "mutation_write", "command": "src/App.cs", "step_plan": "...", "tool_call": "..."}
//! ```
//!
//! Only `action` is required.

use serde::{Deserialize, Serialize};

use crate::step::{ActionKind, StepAction};

/// Metadata reported by the step runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    #[serde(alias = "kind")]
    pub action: String,
    #[serde(default)]
    pub command: String,
    #[serde(default, alias = "stepPlan")]
    pub step_plan: Option<String>,
    #[serde(default, alias = "toolCall")]
    pub tool_call: Option<String>,
}

/// Parses the raw result file.
///
/// The error is a human-readable warning for the combined output.
pub fn parse_step_report(raw: &str) -> std::result::Result<(StepAction, StepReport), String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("step result file is empty".to_string());
    }
    let report: StepReport = serde_json::from_str(raw)
        .map_err(|e| format!("step result file is not valid JSON: {}", e))?;
    let kind = ActionKind::from_token(&report.action)
        .ok_or_else(|| format!("unrecognized action token `{}`", report.action))?;
    Ok((StepAction::new(kind, report.command.clone()), report))
}
