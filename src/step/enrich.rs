//! Best-effort enrichment of accepted steps.
//!
//! Nothing here influences acceptance. Every function returns `None` when the
//! information is not there in a recognizable shape.

use super::capability;
use super::syntax::{Argument, CallSite, ScriptSyntax};

/// Variable names that carry the engineer's plan for the step.
const PLAN_VARIABLES: &[&str] = &["stepplan", "step_plan", "plan"];

/// Longest literal argument rendered into a tool call.
const MAX_RENDERED_LITERAL: usize = 120;

/// Returns the literal assigned to `stepPlan`, `step_plan` or `plan`.
pub fn step_plan(syntax: &ScriptSyntax) -> Option<String> {
    syntax
        .assignments
        .iter()
        .filter(|a| PLAN_VARIABLES.contains(&a.target.to_lowercase().as_str()))
        .filter_map(|a| a.literal.as_deref())
        .map(str::trim)
        .find(|plan| !plan.is_empty())
        .map(str::to_string)
}

/// Renders the tool call when exactly one capability call exists.
pub fn tool_call(syntax: &ScriptSyntax) -> Option<String> {
    let mut calls = syntax
        .calls
        .iter()
        .filter(|call| capability::lookup(call).is_some());
    let only = calls.next()?;
    if calls.next().is_some() {
        return None;
    }
    Some(render_call(only))
}

fn render_call(call: &CallSite) -> String {
    let arguments: Vec<String> = call.arguments.iter().map(render_argument).collect();
    format!("{}({})", call.qualified_name(), arguments.join(", "))
}

fn render_argument(argument: &Argument) -> String {
    match argument {
        Argument::Literal(value) if value.chars().count() > MAX_RENDERED_LITERAL => {
            let head: String = value.chars().take(MAX_RENDERED_LITERAL).collect();
            format!("{:?}", format!("{}...", head))
        }
        other => other.render(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::syntax::parse;

    #[test]
    fn plan_is_read_from_a_literal_assignment() {
        let syntax = parse(
            "var stepPlan = \"add the null check\";\nWriteFile(\"a.cs\", \"x\");",
        );
        assert_eq!(step_plan(&syntax).as_deref(), Some("add the null check"));
    }

    #[test]
    fn plan_name_is_case_insensitive() {
        let syntax = parse("var PLAN = \"inspect\";\nShell(\"ls\");");
        assert_eq!(step_plan(&syntax).as_deref(), Some("inspect"));
    }

    #[test]
    fn non_literal_plan_is_ignored() {
        let syntax = parse("var plan = Describe();\nShell(\"ls\");");
        assert_eq!(step_plan(&syntax), None);
    }

    #[test]
    fn single_capability_call_is_rendered() {
        let syntax = parse("var p = \"src/a.cs\";\nWriteFile(p, \"body\");");
        assert_eq!(tool_call(&syntax).as_deref(), Some("WriteFile(p, \"body\")"));
    }

    #[test]
    fn untracked_calls_do_not_count() {
        let syntax = parse("Console.WriteLine(\"x\");\nShell(\"git status\");");
        assert_eq!(tool_call(&syntax).as_deref(), Some("Shell(\"git status\")"));
    }

    #[test]
    fn read_only_helpers_count_as_capability_calls() {
        let syntax = parse("var t = ReadFile(\"a.cs\");\nShell(\"ls\");");
        assert_eq!(tool_call(&syntax), None);
    }

    #[test]
    fn long_literals_are_truncated() {
        let body = "x".repeat(400);
        let syntax = parse(&format!("WriteFile(\"a.cs\", \"{}\");", body));
        let rendered = tool_call(&syntax).unwrap();
        assert!(rendered.ends_with("...\")"));
        assert!(rendered.len() < 200);
    }
}
