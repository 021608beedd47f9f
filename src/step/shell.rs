//! Shell sub-rules of the step protocol.
//!
//! A shell command is verification when it matches the build/test command
//! shape, discovery when every segment is on the read-only allow-list, and
//! rejected otherwise.

use std::sync::LazyLock;

use regex::Regex;

use super::capability::VerificationKind;

/// Build/test command shape of one segment.
static VERIFICATION_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(dotnet\s+(?:build|test)|cargo\s+(?:build|test|check)|npm\s+(?:run\s+)?(?:build|test)|go\s+(?:build|test|vet)|pytest)(?:\s|$)",
    )
    .expect("verification shape regex is valid")
});

/// `make` with at most one recognized target and nothing else but a descriptor duplication.
static MAKE_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*make(?:\s+(?:build|test|check|all))?(?:\s+[12]?>&[12])?\s*$")
        .expect("make shape regex is valid")
});

/// Segment prefixes that only read the workspace.
const READ_ONLY_PREFIXES: &[&str] = &[
    "ls", "find", "grep", "rg", "cat", "head", "tail", "wc", "sort", "uniq", "tree", "cut",
    "stat", "file", "du", "df", "diff", "echo", "printenv", "which", "uname", "sed -n",
    "git status", "git log", "git show", "git diff", "git ls-files", "git grep", "git blame",
    "git rev-parse", "git branch --list", "git branch --show-current", "dotnet --info",
    "dotnet --version", "dotnet --list-sdks", "dotnet list", "cd",
];

/// Commands allowed only without arguments.
const READ_ONLY_EXACT: &[&str] = &["env", "pwd", "whoami", "date", "git branch"];

/// Programs that mutate the filesystem or reach outside the sandbox.
const DENIED_PROGRAMS: &[&str] = &[
    "rm", "rmdir", "mv", "cp", "mkdir", "touch", "chmod", "chown", "ln", "tee", "dd",
    "truncate", "shred", "install", "patch", "curl", "wget", "sudo", "su", "kill", "pkill",
    "docker", "apt", "apt-get", "pip", "xargs",
];

/// Program + subcommand pairs that mutate the workspace or repository.
const DENIED_SUBCOMMANDS: &[(&str, &[&str])] = &[
    (
        "git",
        &[
            "push", "commit", "reset", "checkout", "switch", "clean", "apply", "add", "stash",
            "merge", "rebase", "clone", "pull", "fetch", "am", "cherry-pick", "revert",
            "restore", "rm", "mv", "tag", "init", "config", "submodule", "worktree", "gc",
        ],
    ),
    ("dotnet", &["add", "new", "remove", "nuget", "tool", "format"]),
    ("npm", &["install", "i", "ci", "uninstall", "publish", "update"]),
    ("cargo", &["add", "install", "remove", "publish", "fmt", "update"]),
];

/// Argument fragments that turn an otherwise read-only program into a writer.
const DENIED_FRAGMENTS: &[&str] = &[
    " -delete", " -exec", " -execdir", " -fprint", " -fls", " -ok ", "sed -i", " --in-place",
    " --output",
];

/// Programs whose short option cluster containing the given letter names an output file.
const DENIED_SHORT_OPTIONS: &[(&str, char)] = &[("sort", 'o'), ("tree", 'o')];

/// Outcome of classifying a shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellVerdict {
    Verification(VerificationKind),
    Discovery,
    Rejected(String),
}

/// Classifies a literal shell command.
///
/// A verification command must be the first segment, optionally after `cd`
/// segments, and every other segment must be read-only.
pub fn classify_command(command: &str) -> ShellVerdict {
    let command = command.trim();
    if command.is_empty() {
        return ShellVerdict::Rejected("empty shell command".to_string());
    }
    if has_command_substitution(command) {
        return ShellVerdict::Rejected("command substitution is not allowed".to_string());
    }
    if has_output_redirection(command) {
        return ShellVerdict::Rejected("output redirection is not allowed".to_string());
    }

    let segments = split_segments(command);
    for segment in &segments {
        if let Some(reason) = denied(segment) {
            return ShellVerdict::Rejected(reason);
        }
    }

    let mut verification = None;
    for (index, segment) in segments.iter().enumerate() {
        if let Some(kind) = verification_kind(segment) {
            if verification.is_some() {
                return ShellVerdict::Rejected(
                    "only one build or test command is allowed per shell call".to_string(),
                );
            }
            if segments[..index].iter().any(|s| !is_cd(s)) {
                return ShellVerdict::Rejected(format!(
                    "`{}` must be the first command, after an optional `cd`",
                    segment
                ));
            }
            verification = Some(kind);
        } else if !is_read_only(segment) {
            return ShellVerdict::Rejected(format!(
                "`{}` is not on the read-only allow-list",
                segment
            ));
        }
    }
    verification.map_or(ShellVerdict::Discovery, ShellVerdict::Verification)
}

/// Returns the verification kind if one segment has the build/test shape.
pub fn verification_kind(segment: &str) -> Option<VerificationKind> {
    let tool = match VERIFICATION_SHAPE.captures(segment) {
        Some(captures) => captures.get(1)?.as_str(),
        None if MAKE_SHAPE.is_match(segment) => segment,
        None => return None,
    };
    if tool.contains("test") || tool.contains("check") {
        Some(VerificationKind::Test)
    } else {
        Some(VerificationKind::Build)
    }
}

fn is_cd(segment: &str) -> bool {
    segment == "cd" || segment.starts_with("cd ")
}

fn denied(segment: &str) -> Option<String> {
    let lowered = segment.to_lowercase();
    let mut words = lowered.split_whitespace();
    let program = words.next()?;
    let subcommand = words.next().unwrap_or_default();

    if DENIED_PROGRAMS.contains(&program) {
        return Some(format!("`{}` mutates the workspace", segment));
    }
    for (denied_program, subcommands) in DENIED_SUBCOMMANDS {
        if program == *denied_program && subcommands.contains(&subcommand) {
            let reason = if program == "git" {
                format!(
                    "`{}` writes to version control; change files with WriteFile or DeleteFile instead",
                    segment
                )
            } else {
                format!("`{}` mutates the workspace", segment)
            };
            return Some(reason);
        }
    }
    for (denied_program, letter) in DENIED_SHORT_OPTIONS {
        let writes = program == *denied_program
            && segment.split_whitespace().skip(1).any(|word| {
                word.len() > 1
                    && word.starts_with('-')
                    && !word.starts_with("--")
                    && word.contains(*letter)
            });
        if writes {
            return Some(format!("`{}` writes an output file", segment));
        }
    }
    let padded = format!(" {} ", lowered);
    DENIED_FRAGMENTS
        .iter()
        .find(|f| padded.contains(*f))
        .map(|f| format!("`{}` uses `{}`", segment, f.trim()))
}

fn is_read_only(segment: &str) -> bool {
    let segment = segment.trim();
    if READ_ONLY_EXACT.contains(&segment) {
        return true;
    }
    READ_ONLY_PREFIXES.iter().any(|prefix| {
        segment == *prefix
            || segment
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with(char::is_whitespace))
    })
}

/// Returns true if the command runs a nested command through `$(...)`,
/// backticks or process substitution. Single quotes make these literal.
pub fn has_command_substitution(command: &str) -> bool {
    let chars: Vec<char> = command.chars().collect();
    let (mut single, mut double) = (false, false);
    for (i, c) in chars.iter().enumerate() {
        let next = chars.get(i + 1);
        match c {
            '\'' if !double => single = !single,
            '"' if !single => double = !double,
            '`' if !single => return true,
            '$' if !single && next == Some(&'(') => return true,
            '<' | '>' if !single && !double && next == Some(&'(') => return true,
            _ => {}
        }
    }
    false
}

/// Returns true if the command writes output to a file.
///
/// Descriptor duplication (`2>&1`, `>&2`), closing (`>&-`) and `/dev/null`
/// targets are allowed.
pub fn has_output_redirection(command: &str) -> bool {
    let chars: Vec<char> = command.chars().collect();
    let (mut single, mut double) = (false, false);
    for (i, c) in chars.iter().enumerate() {
        match c {
            '\'' if !double => single = !single,
            '"' if !single => double = !double,
            '>' if !single && !double => {
                let rest: String = chars[i + 1..].iter().collect();
                let rest = rest.trim_start_matches('>');
                let target = match rest.strip_prefix('&') {
                    Some(dup) if dup.starts_with(|d: char| d.is_ascii_digit() || d == '-') => {
                        continue;
                    }
                    Some(dup) => dup,
                    None => rest,
                };
                if !target.trim_start().starts_with("/dev/null") {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Splits a command on `&&`, `||`, `;`, `|`, background `&` and newlines,
/// ignoring separators inside quotes.
fn split_segments(command: &str) -> Vec<String> {
    let chars: Vec<char> = command.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let (mut single, mut double) = (false, false);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let separator = !single
            && !double
            && match c {
                ';' | '|' | '\n' => true,
                '&' => {
                    let after_redirect = i > 0 && chars[i - 1] == '>';
                    let before_redirect = chars.get(i + 1) == Some(&'>');
                    !after_redirect && !before_redirect
                }
                _ => false,
            };
        if separator {
            if chars.get(i + 1) == Some(&c) && c != '\n' {
                i += 1;
            }
            segments.push(std::mem::take(&mut current));
        } else {
            match c {
                '\'' if !double => single = !single,
                '"' if !single => double = !double,
                _ => {}
            }
            current.push(c);
        }
        i += 1;
    }
    segments.push(current);
    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
