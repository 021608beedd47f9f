//! Host process helpers shared by the engines.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use super::command::CommandResult;

/// Runs `script` with `bash -c` in `dir`, capturing both streams.
pub async fn run_bash(
    dir: &Path,
    env: &[(String, String)],
    script: &str,
) -> std::io::Result<CommandResult> {
    let output = Command::new("bash")
        .arg("-c")
        .arg(script)
        .current_dir(dir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .output()
        .await?;
    Ok(output_to_result(output))
}

/// Converts a finished process into a [`CommandResult`].
///
/// A process killed by a signal has no exit code and is reported as -1.
pub fn output_to_result(output: std::process::Output) -> CommandResult {
    CommandResult::new(
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    )
}

/// Quotes `value` for safe interpolation into a bash command line.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
