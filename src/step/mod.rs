//! Step validation.
//!
//! A step is a C# script body proposed by the engineer. [`analyze_step`] checks
//! it against the single-action protocol and classifies the action it will
//! perform. Violations are returned as data; nothing in here touches a sandbox.

pub mod capability;
pub mod enrich;
pub mod lexer;
pub mod shell;
pub mod syntax;

use std::fmt;

use serde::{Deserialize, Serialize};

use capability::{CapabilityClass, MutationKind, VerificationKind};
use shell::ShellVerdict;
use syntax::{CallSite, DeclarationKind, ScriptSyntax};

pub use syntax::parse;

/// Kind of effect a step has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    MutationWrite,
    MutationDelete,
    VerificationBuild,
    VerificationTest,
    DiscoveryShell,
    Complete,
    #[default]
    Unknown,
}

impl ActionKind {
    const ALL: [ActionKind; 7] = [
        ActionKind::MutationWrite,
        ActionKind::MutationDelete,
        ActionKind::VerificationBuild,
        ActionKind::VerificationTest,
        ActionKind::DiscoveryShell,
        ActionKind::Complete,
        ActionKind::Unknown,
    ];

    /// Wire token, as written by the step runtime.
    pub fn as_token(&self) -> &'static str {
        match self {
            ActionKind::MutationWrite => "mutation_write",
            ActionKind::MutationDelete => "mutation_delete",
            ActionKind::VerificationBuild => "verification_build",
            ActionKind::VerificationTest => "verification_test",
            ActionKind::DiscoveryShell => "discovery_shell",
            ActionKind::Complete => "complete",
            ActionKind::Unknown => "unknown",
        }
    }

    /// Parses a token in snake_case, PascalCase or any casing thereof.
    pub fn from_token(token: &str) -> Option<Self> {
        let wanted = normalize_token(token);
        if wanted.is_empty() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|kind| normalize_token(kind.as_token()) == wanted)
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, ActionKind::MutationWrite | ActionKind::MutationDelete)
    }

    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            ActionKind::VerificationBuild | ActionKind::VerificationTest
        )
    }
}

fn normalize_token(token: &str) -> String {
    token
        .trim()
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl From<MutationKind> for ActionKind {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Write => ActionKind::MutationWrite,
            MutationKind::Delete => ActionKind::MutationDelete,
        }
    }
}

impl From<VerificationKind> for ActionKind {
    fn from(kind: VerificationKind) -> Self {
        match kind {
            VerificationKind::Build => ActionKind::VerificationBuild,
            VerificationKind::Test => ActionKind::VerificationTest,
        }
    }
}

/// Classified effect of a step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepAction {
    pub kind: ActionKind,
    /// Path for file mutations, command text for shell and verification calls.
    #[serde(default)]
    pub command: String,
}

impl StepAction {
    pub fn new(kind: ActionKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

/// A single protocol violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    EmptyBody,
    MarkdownFence { line: usize },
    ImportDirective { text: String, line: usize },
    Declaration { what: String, name: String, line: usize },
    NoExecutableStatement,
    RepositoryMutation { call: String, line: usize },
    ShellRejected { command: String, reason: String, line: usize },
    MutationInLoop { call: String, line: usize },
    MultipleMutations { count: usize },
    MultipleVerifications { count: usize },
    MixedMutationAndVerification,
    CompletionNotAlone,
    NoAction,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::EmptyBody => write!(f, "step body is empty"),
            Violation::MarkdownFence { line } => write!(
                f,
                "line {}: markdown code fences are not allowed; submit raw C# statements only",
                line
            ),
            Violation::ImportDirective { text, line } => write!(
                f,
                "line {}: `{}` is not allowed; the sandbox API is already in scope and no references or imports may be added",
                line, text
            ),
            Violation::Declaration { what, name, line } => write!(
                f,
                "line {}: declaring {} `{}` is not allowed; write top-level statements only",
                line, what, name
            ),
            Violation::NoExecutableStatement => {
                write!(f, "step has no top-level executable statement")
            }
            Violation::RepositoryMutation { call, line } => write!(
                f,
                "line {}: `{}` writes to version control; change files with WriteFile or DeleteFile instead",
                line, call
            ),
            Violation::ShellRejected {
                command,
                reason,
                line,
            } => write!(
                f,
                "line {}: shell command `{}` rejected: {}",
                line, command, reason
            ),
            Violation::MutationInLoop { call, line } => write!(
                f,
                "line {}: mutation `{}` inside a loop; perform one mutation per step without loops",
                line, call
            ),
            Violation::MultipleMutations { count } => write!(
                f,
                "step contains multiple mutation actions ({}); submit exactly one WriteFile or DeleteFile per step",
                count
            ),
            Violation::MultipleVerifications { count } => write!(
                f,
                "step contains multiple verification actions ({}); run one build or test per step",
                count
            ),
            Violation::MixedMutationAndVerification => write!(
                f,
                "step mixes mutation and verification; change files and verify them in separate steps"
            ),
            Violation::CompletionNotAlone => {
                write!(f, "Complete() must be the only action in its step")
            }
            Violation::NoAction => write!(
                f,
                "step has no action; call exactly one of WriteFile, DeleteFile, RunBuild, RunTests, Shell or Complete"
            ),
        }
    }
}

/// Outcome of validating one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepAnalysis {
    /// Joined violation messages; `None` when the step is accepted.
    pub validation_error: Option<String>,
    pub violations: Vec<Violation>,
    pub action: StepAction,
    pub step_plan: Option<String>,
    pub tool_call: Option<String>,
}

impl StepAnalysis {
    pub fn is_accepted(&self) -> bool {
        self.validation_error.is_none()
    }

    fn rejected(violations: Vec<Violation>) -> Self {
        let message = violations
            .iter()
            .map(Violation::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            validation_error: Some(message),
            violations,
            action: StepAction::unknown(),
            step_plan: None,
            tool_call: None,
        }
    }
}

/// Validates a step body and classifies its action.
pub fn analyze_step(text: &str) -> StepAnalysis {
    if text.trim().is_empty() {
        return StepAnalysis::rejected(vec![Violation::EmptyBody]);
    }

    let mut violations = Vec::new();

    for (index, line) in text.lines().enumerate() {
        if line.contains("```") || line.contains("~~~") {
            violations.push(Violation::MarkdownFence { line: index + 1 });
        }
    }

    let syntax = parse(text);
    check_imports(&syntax, &mut violations);
    check_declarations(&syntax, &mut violations);
    if !syntax.has_executable_statement() {
        violations.push(Violation::NoExecutableStatement);
    }

    let tally = ActionTally::collect(&syntax, &mut violations);
    let action = tally.check(&mut violations);

    if !violations.is_empty() {
        return StepAnalysis::rejected(violations);
    }

    StepAnalysis {
        validation_error: None,
        violations,
        action: action.unwrap_or_default(),
        step_plan: enrich::step_plan(&syntax),
        tool_call: enrich::tool_call(&syntax),
    }
}

fn is_reference_directive(text: &str) -> bool {
    ["#r", "#load"].iter().any(|name| {
        text.strip_prefix(name)
            .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric()))
    })
}

fn check_imports(syntax: &ScriptSyntax, violations: &mut Vec<Violation>) {
    let directives = syntax
        .directives
        .iter()
        .filter(|d| is_reference_directive(&d.text))
        .map(|d| (d.text.clone(), d.line));
    let imports = syntax.imports.iter().map(|i| (i.text.clone(), i.line));
    let mut found: Vec<(String, usize)> = directives.chain(imports).collect();
    found.sort_by_key(|(_, line)| *line);
    violations.extend(
        found
            .into_iter()
            .map(|(text, line)| Violation::ImportDirective { text, line }),
    );
}

fn check_declarations(syntax: &ScriptSyntax, violations: &mut Vec<Violation>) {
    for declaration in &syntax.declarations {
        let what = match &declaration.kind {
            DeclarationKind::Type(keyword) => keyword.clone(),
            DeclarationKind::Namespace => "namespace".to_string(),
            DeclarationKind::Member => "member".to_string(),
        };
        violations.push(Violation::Declaration {
            what,
            name: declaration.name.clone(),
            line: declaration.line,
        });
    }
}

/// Actionable calls of a step, grouped by protocol class.
#[derive(Default)]
struct ActionTally<'a> {
    mutations: Vec<(&'a CallSite, MutationKind)>,
    verifications: Vec<(VerificationKind, String)>,
    completions: Vec<&'a CallSite>,
    discoveries: Vec<String>,
    /// Set when a call was rejected outright, which makes `NoAction` redundant.
    rejected_calls: bool,
}

impl<'a> ActionTally<'a> {
    fn collect(syntax: &'a ScriptSyntax, violations: &mut Vec<Violation>) -> Self {
        let mut tally = Self::default();
        for call in &syntax.calls {
            let Some(found) = capability::lookup(call) else {
                continue;
            };
            match found.class {
                CapabilityClass::Mutation(kind) => {
                    if call.in_loop {
                        violations.push(Violation::MutationInLoop {
                            call: call.qualified_name(),
                            line: call.line,
                        });
                    }
                    tally.mutations.push((call, kind));
                }
                CapabilityClass::Verification(kind) => {
                    // Only a recognized build or test command replaces the default.
                    let command = call
                        .first_literal()
                        .filter(|c| {
                            matches!(shell::classify_command(c), ShellVerdict::Verification(_))
                        })
                        .unwrap_or_default()
                        .to_string();
                    tally.verifications.push((kind, command));
                }
                CapabilityClass::RepositoryMutation => {
                    tally.rejected_calls = true;
                    violations.push(Violation::RepositoryMutation {
                        call: call.qualified_name(),
                        line: call.line,
                    });
                }
                CapabilityClass::Shell => tally.shell(call, violations),
                CapabilityClass::Completion => tally.completions.push(call),
                CapabilityClass::ReadOnly => {}
            }
        }
        tally
    }

    fn shell(&mut self, call: &CallSite, violations: &mut Vec<Violation>) {
        let Some(command) = call.first_literal() else {
            self.rejected_calls = true;
            violations.push(Violation::ShellRejected {
                command: call
                    .arguments
                    .first()
                    .map(|a| a.render())
                    .unwrap_or_default(),
                reason: "the command must be a string literal".to_string(),
                line: call.line,
            });
            return;
        };
        match shell::classify_command(command) {
            ShellVerdict::Verification(kind) => {
                self.verifications.push((kind, command.to_string()));
            }
            ShellVerdict::Discovery => self.discoveries.push(command.to_string()),
            ShellVerdict::Rejected(reason) => {
                self.rejected_calls = true;
                violations.push(Violation::ShellRejected {
                    command: command.to_string(),
                    reason,
                    line: call.line,
                });
            }
        }
    }

    /// Applies the counting rules and resolves the step's action.
    ///
    /// Precedence: mutation, verification, completion, discovery.
    fn check(&self, violations: &mut Vec<Violation>) -> Option<StepAction> {
        let mutations = self.mutations.len();
        let verifications = self.verifications.len();

        if mutations > 1 {
            violations.push(Violation::MultipleMutations { count: mutations });
        }
        if verifications > 1 {
            violations.push(Violation::MultipleVerifications {
                count: verifications,
            });
        }
        if mutations > 0 && verifications > 0 {
            violations.push(Violation::MixedMutationAndVerification);
        }
        if !self.completions.is_empty() && mutations + verifications > 0 {
            violations.push(Violation::CompletionNotAlone);
        }
        let actionable =
            mutations + verifications + self.completions.len() + self.discoveries.len();
        if actionable == 0 && !self.rejected_calls {
            violations.push(Violation::NoAction);
        }

        if let Some((call, kind)) = self.mutations.first() {
            let path = call.first_literal().unwrap_or_default();
            return Some(StepAction::new((*kind).into(), path));
        }
        if let Some((kind, command)) = self.verifications.first() {
            return Some(StepAction::new((*kind).into(), command.clone()));
        }
        if !self.completions.is_empty() {
            return Some(StepAction::new(ActionKind::Complete, ""));
        }
        self.discoveries
            .first()
            .map(|command| StepAction::new(ActionKind::DiscoveryShell, command.clone()))
    }
}
