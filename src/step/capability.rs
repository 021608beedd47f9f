//! Capability table for the pre-provisioned sandbox API.
//!
//! Every call in a step body is looked up here. Calls that are not in the
//! table are untracked and never count towards the single-action protocol.

use serde::{Deserialize, Serialize};

use super::syntax::CallSite;

/// Which file mutation a call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Write,
    Delete,
}

/// Which verification a call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationKind {
    Build,
    Test,
}

/// Protocol class of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityClass {
    Mutation(MutationKind),
    Verification(VerificationKind),
    /// Version-control writes. Always rejected.
    RepositoryMutation,
    /// Shell command; further classified by its command text.
    Shell,
    /// Signals that the engineer is done.
    Completion,
    /// Read-only helper. Untracked by the protocol.
    ReadOnly,
}

/// One entry of the capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    /// Bare method name, or `Type.Method` for qualified entries.
    pub name: &'static str,
    pub class: CapabilityClass,
}

impl Capability {
    const fn new(name: &'static str, class: CapabilityClass) -> Self {
        Self { name, class }
    }

    fn is_qualified(&self) -> bool {
        self.name.contains('.')
    }
}

use CapabilityClass::{Completion, ReadOnly, RepositoryMutation, Shell};

const WRITE: CapabilityClass = CapabilityClass::Mutation(MutationKind::Write);
const DELETE: CapabilityClass = CapabilityClass::Mutation(MutationKind::Delete);
const BUILD: CapabilityClass = CapabilityClass::Verification(VerificationKind::Build);
const TEST: CapabilityClass = CapabilityClass::Verification(VerificationKind::Test);

/// The full capability table.
pub const CAPABILITIES: &[Capability] = &[
    // Sandbox file mutations
    Capability::new("WriteFile", WRITE),
    Capability::new("ReplaceInFile", WRITE),
    Capability::new("AppendToFile", WRITE),
    Capability::new("DeleteFile", DELETE),
    // Direct filesystem mutations through the base library
    Capability::new("File.WriteAllText", WRITE),
    Capability::new("File.WriteAllLines", WRITE),
    Capability::new("File.WriteAllBytes", WRITE),
    Capability::new("File.AppendAllText", WRITE),
    Capability::new("File.Copy", WRITE),
    Capability::new("File.Move", WRITE),
    Capability::new("File.Delete", DELETE),
    Capability::new("Directory.Delete", DELETE),
    // Verification
    Capability::new("RunBuild", BUILD),
    Capability::new("RunTests", TEST),
    // Version control
    Capability::new("GitAdd", RepositoryMutation),
    Capability::new("GitApply", RepositoryMutation),
    Capability::new("GitCheckout", RepositoryMutation),
    Capability::new("GitClean", RepositoryMutation),
    Capability::new("GitClone", RepositoryMutation),
    Capability::new("GitCommit", RepositoryMutation),
    Capability::new("GitMerge", RepositoryMutation),
    Capability::new("GitPull", RepositoryMutation),
    Capability::new("GitPush", RepositoryMutation),
    Capability::new("GitRebase", RepositoryMutation),
    Capability::new("GitReset", RepositoryMutation),
    Capability::new("GitStash", RepositoryMutation),
    Capability::new("Repository.Clone", RepositoryMutation),
    // Shell
    Capability::new("Shell", Shell),
    Capability::new("RunShell", Shell),
    // Completion
    Capability::new("Complete", Completion),
    Capability::new("Done", Completion),
    // Read-only helpers
    Capability::new("ReadFile", ReadOnly),
    Capability::new("ListFiles", ReadOnly),
    Capability::new("FileExists", ReadOnly),
    Capability::new("SearchFiles", ReadOnly),
    Capability::new("File.ReadAllText", ReadOnly),
    Capability::new("File.Exists", ReadOnly),
];

/// Looks up the capability a call site invokes.
///
/// Qualified entries match on the last receiver segment (`System.IO.File.Delete`
/// matches `File.Delete`). Bare entries match on the method name alone.
pub fn lookup(call: &CallSite) -> Option<&'static Capability> {
    if let Some(receiver) = &call.receiver {
        let owner = receiver.rsplit('.').next().unwrap_or(receiver);
        let qualified = format!("{}.{}", owner, call.name);
        if let Some(found) = CAPABILITIES
            .iter()
            .find(|c| c.is_qualified() && c.name == qualified)
        {
            return Some(found);
        }
    }
    CAPABILITIES
        .iter()
        .find(|c| !c.is_qualified() && c.name == call.name)
}

/// Looks up a capability by its table name.
pub fn by_name(name: &str) -> Option<&'static Capability> {
    CAPABILITIES.iter().find(|c| c.name == name)
}
