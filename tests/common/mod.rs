//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use turnstile::sandbox::{ContainerSandbox, LocalEngine, RuntimeConfig, SandboxConfig};

/// Runs git in `dir` and returns trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A temp git repo with two commits.
pub struct TestRepo {
    pub dir: TempDir,
    /// Commit that added README.md only.
    pub first_commit: String,
    /// Commit that added src/App.cs on top.
    pub second_commit: String,
}

impl TestRepo {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Helper to create a temp git repo.
pub fn create_temp_git_repo() -> TestRepo {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path();

    git(path, &["init", "-q"]);
    git(path, &["config", "user.email", "test@test.com"]);
    git(path, &["config", "user.name", "Test User"]);

    std::fs::write(path.join("README.md"), "# Test\n").expect("failed to create readme");
    git(path, &["add", "."]);
    git(path, &["commit", "-q", "-m", "initial"]);
    let first_commit = git(path, &["rev-parse", "HEAD"]);

    std::fs::create_dir_all(path.join("src")).expect("failed to create src");
    std::fs::write(path.join("src/App.cs"), "class App {}\n").expect("failed to create app");
    git(path, &["add", "."]);
    git(path, &["commit", "-q", "-m", "add app"]);
    let second_commit = git(path, &["rev-parse", "HEAD"]);

    TestRepo {
        dir,
        first_commit,
        second_commit,
    }
}

/// Bash stand-in for the in-sandbox step runtime.
///
/// Lines with an odd number of double quotes fail like an unterminated
/// literal. `Complete(`, `RunBuild(`, `WriteFile("p", "c")` and `Shell("cmd")`
/// are recognized and reported in the result file.
pub const FAKE_RUNTIME: &str = r#"#!/usr/bin/env bash
script="$1"
result="$2"

bad=$(awk -F'"' 'NF > 0 && NF % 2 == 0 { print NR; exit }' "$script")
if [ -n "$bad" ]; then
  echo "step.csx($bad,1): error CS1010: Newline in constant" >&2
  exit 1
fi

if grep -q 'Complete(' "$script"; then
  printf '{"action":"complete"}' > "$result"
  exit 0
fi

if grep -q 'RunBuild(' "$script"; then
  printf '{"action":"verification_build"}' > "$result"
  exit 0
fi

call=$(grep -o 'WriteFile("[^"]*", *"[^"]*")' "$script" | head -n 1)
if [ -n "$call" ]; then
  path=$(printf '%s' "$call" | sed -E 's/WriteFile\("([^"]*)", *"([^"]*)"\)/\1/')
  content=$(printf '%s' "$call" | sed -E 's/WriteFile\("([^"]*)", *"([^"]*)"\)/\2/')
  mkdir -p "$(dirname "$path")"
  printf '%s\n' "$content" > "$path"
  printf '{"action":"mutation_write","command":"%s"}' "$path" > "$result"
  exit 0
fi

cmd=$(grep -o 'Shell("[^"]*")' "$script" | head -n 1 | sed -E 's/Shell\("([^"]*)"\)/\1/')
if [ -n "$cmd" ]; then
  bash -c "$cmd"
  code=$?
  printf '{"action":"discovery_shell","command":"%s"}' "$cmd" > "$result"
  exit $code
fi

printf '{"action":"unknown"}' > "$result"
"#;

/// Engine root plus the fake runtime, kept alive for the test.
pub struct LocalSetup {
    pub root: TempDir,
    pub runtime: PathBuf,
}

impl LocalSetup {
    pub fn new() -> Self {
        let root = TempDir::new().expect("failed to create engine root");
        let runtime = root.path().join("runner.sh");
        std::fs::write(&runtime, FAKE_RUNTIME).expect("failed to write runtime");
        Self { root, runtime }
    }

    pub fn engine_root(&self) -> PathBuf {
        self.root.path().join("engine")
    }

    /// Config whose runtime is the fake bash runner.
    pub fn config(&self) -> SandboxConfig {
        let engine = LocalEngine::new(self.engine_root());
        let runtime = self.runtime.display();
        SandboxConfig {
            runtime: RuntimeConfig {
                build_command: Some(format!("bash -n '{}'", runtime)),
                invoke_template: format!("bash '{}' {{script}} {{result}}", runtime),
            },
            ..engine.sandbox_config()
        }
    }

    pub fn sandbox(&self) -> ContainerSandbox<LocalEngine> {
        self.sandbox_with(self.config())
    }

    pub fn sandbox_with(&self, config: SandboxConfig) -> ContainerSandbox<LocalEngine> {
        ContainerSandbox::new(LocalEngine::new(self.engine_root()), config)
    }
}
