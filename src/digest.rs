//! Failure digests fed back to the step generator.
//!
//! A digest is a short summary of what went wrong: the exit code followed by
//! the most telling output lines, bounded in lines and characters.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sandbox::CommandResult;
use crate::step::StepAnalysis;

/// Lines that look like diagnostics.
static SALIENT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(error|exception|failed|failure|fatal|unhandled)\b|\b[A-Z]{2,4}\d{3,5}\b")
        .expect("salient line regex is valid")
});

/// Size limits of a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

fn default_max_chars() -> usize {
    1500
}

fn default_max_lines() -> usize {
    30
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            max_lines: default_max_lines(),
        }
    }
}

/// Digest of a step whose script exited non-zero.
pub fn failure_digest(result: &CommandResult, config: &DigestConfig) -> String {
    summarize(
        &format!("Step failed with exit code {}", result.exit_code),
        &result.combined_output,
        config,
    )
}

/// Digest of a verification build or test run that failed.
pub fn build_digest(result: &CommandResult, config: &DigestConfig) -> String {
    summarize(
        &format!("Verification failed with exit code {}", result.exit_code),
        &result.combined_output,
        config,
    )
}

/// Digest of a rejected step.
pub fn rejection_digest(analysis: &StepAnalysis, config: &DigestConfig) -> String {
    let message = analysis.validation_error.as_deref().unwrap_or_default();
    summarize("Step rejected by the protocol", message, config)
}

fn summarize(header: &str, output: &str, config: &DigestConfig) -> String {
    let lines = salient_lines(output, config.max_lines);
    let mut digest = header.to_string();
    for line in lines {
        digest.push('\n');
        digest.push_str(line);
    }
    truncate_chars(&digest, config.max_chars)
}

/// Picks diagnostic lines, or the tail of the output when none stand out.
fn salient_lines(output: &str, max_lines: usize) -> Vec<&str> {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();

    let mut salient: Vec<&str> = Vec::new();
    for line in lines.iter().copied().filter(|l| SALIENT_LINE.is_match(l)) {
        if !salient.contains(&line) {
            salient.push(line);
        }
        if salient.len() == max_lines {
            break;
        }
    }
    if !salient.is_empty() {
        return salient;
    }
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].to_vec()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}
