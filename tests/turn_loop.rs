//! End-to-end runs of the turn loop on the local engine.

mod common;

use common::{create_temp_git_repo, LocalSetup};

use turnstile::generator::Feedback;
use turnstile::recorder::{RunEndReason, RunStatus};
use turnstile::sandbox::{HostWorkspace, SandboxSettings};
use turnstile::turn_loop::LoopConfig;
use turnstile::{Error, MemoryRecorder, RunRecorder, ScriptedGenerator, TurnLoop, VerificationConfig};

#[tokio::test]
async fn failed_step_is_retried_with_a_digest() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let recorder = MemoryRecorder::new();
    let generator = ScriptedGenerator::new([
        r#"WriteFile("notes.txt", "hello);"#,
        r#"var stepPlan = "add notes";
WriteFile("notes.txt", "hello");"#,
        "Complete();",
    ]);
    let mut turn_loop = TurnLoop::new(setup.sandbox(), generator, recorder.clone());

    let artifacts = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap();

    assert_eq!(artifacts.status, RunStatus::Completed);
    assert_eq!(artifacts.reason, RunEndReason::CompletionSignaled);
    assert_eq!(artifacts.turns, 3);
    assert!(artifacts.has_changes);
    assert_eq!(artifacts.changed_files, vec!["notes.txt".to_string()]);
    assert!(artifacts.final_diff.contains("+hello"));
    assert!(artifacts
        .last_failure_digest
        .as_deref()
        .unwrap()
        .contains("CS1010"));

    let requests = turn_loop.generator().requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1].attempt, 2);
    match &requests[1].feedback {
        Some(Feedback::Failed { digest }) => {
            assert!(digest.starts_with("Step failed with exit code 1"));
            assert!(digest.contains("error CS1010"));
        }
        other => panic!("unexpected feedback {:?}", other),
    }
    assert_eq!(requests[2].attempt, 1);
    assert_eq!(requests[2].feedback, None);

    let run = recorder.snapshot();
    assert_eq!(run.observations.len(), 3);
    assert!(run.rejections.is_empty());
    assert_eq!(run.observations[1].step_plan.as_deref(), Some("add notes"));
    assert_eq!(run.observations[1].changed_files, vec!["notes.txt".to_string()]);
    assert_eq!(run.final_artifacts, Some(artifacts));
    assert!(turn_loop.sandbox().container_id().is_none());
}

#[tokio::test]
async fn immediate_completion_has_no_changes() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let mut turn_loop = TurnLoop::new(
        setup.sandbox(),
        ScriptedGenerator::new(["Complete();"]),
        MemoryRecorder::new(),
    );

    let artifacts = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap();

    assert_eq!(artifacts.turns, 1);
    assert!(!artifacts.has_changes);
    assert!(artifacts.final_diff.is_empty());
    assert!(artifacts.changed_files.is_empty());
    assert_eq!(artifacts.last_build, None);

    let json = serde_json::to_value(&artifacts).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(json["reason"]["reason"], "completion_signaled");
}

#[tokio::test]
async fn repeated_rejections_exhaust_retries() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let recorder = MemoryRecorder::new();
    let generator = ScriptedGenerator::new([
        r#"Shell("git push origin main");"#,
        r#"GitCommit("wip");"#,
        "```csharp\nComplete();\n```",
        "Complete();",
    ]);
    let mut turn_loop = TurnLoop::new(setup.sandbox(), generator, recorder.clone());

    let artifacts = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap();

    assert_eq!(artifacts.status, RunStatus::Failed);
    assert_eq!(artifacts.reason, RunEndReason::RetriesExhausted);
    assert_eq!(artifacts.turns, 3);
    assert!(!artifacts.has_changes);

    let run = recorder.snapshot();
    assert_eq!(run.rejections.len(), 3);
    assert!(run.observations.is_empty());
    assert_eq!(
        run.rejections.iter().map(|(turn, _)| *turn).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let requests = turn_loop.generator().requests();
    assert!(matches!(
        &requests[1].feedback,
        Some(Feedback::Rejected { message }) if message.starts_with("Step rejected by the protocol")
    ));
    assert_eq!(requests[2].attempt, 3);
    assert_eq!(turn_loop.generator().remaining(), 1);
    assert!(turn_loop.sandbox().container_id().is_none());
}

#[tokio::test]
async fn setup_fault_is_recorded_and_returned() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let recorder = MemoryRecorder::new();
    let mut turn_loop = TurnLoop::new(
        setup.sandbox(),
        ScriptedGenerator::new(["Complete();"]),
        recorder.clone(),
    );

    let settings = SandboxSettings::new(repo.path()).with_base_revision("no-such-revision");
    let err = turn_loop.run(&settings).await.unwrap_err();
    assert!(matches!(&err, Error::SandboxSetup { stage, .. } if stage == "reset_and_clean"));

    let artifacts = recorder.snapshot().final_artifacts.unwrap();
    assert_eq!(artifacts.status, RunStatus::Failed);
    assert!(matches!(artifacts.reason, RunEndReason::SetupFault(_)));
    assert_eq!(artifacts.base_revision.as_deref(), Some("no-such-revision"));
    assert_eq!(artifacts.turns, 0);

    assert!(turn_loop.generator().requests().is_empty());
    assert!(turn_loop.sandbox().container_id().is_none());
}

#[tokio::test]
async fn final_diff_is_applied_to_the_host_checkout() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let generator = ScriptedGenerator::new([
        r#"WriteFile("notes.txt", "hello");"#,
        r#"WriteFile("src/App.cs", "class App { }");"#,
        "Complete();",
    ]);
    let mut turn_loop = TurnLoop::new(setup.sandbox(), generator, MemoryRecorder::new())
        .with_patch_target(HostWorkspace::new(repo.path()));

    let artifacts = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap();

    let applied = artifacts.patch_application.unwrap();
    assert!(applied.is_success(), "{:?}", applied);
    assert_eq!(
        std::fs::read_to_string(repo.path().join("notes.txt")).unwrap(),
        "hello\n"
    );
    assert_eq!(
        std::fs::read_to_string(repo.path().join("src/App.cs")).unwrap(),
        "class App { }\n"
    );
    assert_eq!(
        artifacts.changed_files,
        vec!["notes.txt".to_string(), "src/App.cs".to_string()]
    );
}

#[tokio::test]
async fn disabled_patch_application_leaves_the_host_alone() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let generator = ScriptedGenerator::new([r#"WriteFile("notes.txt", "hello");"#, "Complete();"]);
    let config = LoopConfig {
        apply_patch: false,
        ..LoopConfig::default()
    };
    let mut turn_loop = TurnLoop::new(setup.sandbox(), generator, MemoryRecorder::new())
        .with_config(config)
        .with_patch_target(HostWorkspace::new(repo.path()));

    let artifacts = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap();

    assert!(artifacts.has_changes);
    assert_eq!(artifacts.patch_application, None);
    assert!(!repo.path().join("notes.txt").exists());
}

#[tokio::test]
async fn failed_build_is_feedback_not_a_retry() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let recorder = MemoryRecorder::new();
    let generator = ScriptedGenerator::new(["RunBuild();", "RunBuild();", "RunBuild();", "Complete();"]);
    let verification = VerificationConfig {
        build_command: "echo 'error CS0103: missing name' >&2; false".to_string(),
        ..VerificationConfig::default()
    };
    let mut turn_loop = TurnLoop::new(setup.sandbox(), generator, recorder.clone())
        .with_verification(verification);

    let artifacts = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap();

    assert_eq!(artifacts.reason, RunEndReason::CompletionSignaled);
    assert_eq!(artifacts.turns, 4);
    let last_build = artifacts.last_build.unwrap();
    assert_eq!(last_build.exit_code, 1);

    let requests = turn_loop.generator().requests();
    match &requests[3].feedback {
        Some(Feedback::BuildFailed { digest }) => {
            assert!(digest.starts_with("Verification failed with exit code 1"));
            assert!(digest.contains("CS0103"));
        }
        other => panic!("unexpected feedback {:?}", other),
    }
    assert!(requests.iter().all(|r| r.attempt == 1));

    let run = recorder.snapshot();
    assert!(run.observations[..3].iter().all(|o| o.build_failed()));
}

#[tokio::test]
async fn generator_failure_ends_the_run() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let mut turn_loop = TurnLoop::new(
        setup.sandbox(),
        ScriptedGenerator::new([r#"Shell("ls");"#]),
        MemoryRecorder::new(),
    );

    let artifacts = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap();

    assert_eq!(artifacts.status, RunStatus::Failed);
    assert!(matches!(
        &artifacts.reason,
        RunEndReason::GeneratorFailed(msg) if msg.contains("turn 2")
    ));
    assert_eq!(artifacts.turns, 1);
}

#[tokio::test]
async fn turn_budget_ends_the_run() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let generator = ScriptedGenerator::new([r#"Shell("ls");"#, r#"Shell("pwd");"#, "Complete();"]);
    let config = LoopConfig {
        max_turns: 2,
        ..LoopConfig::default()
    };
    let mut turn_loop =
        TurnLoop::new(setup.sandbox(), generator, MemoryRecorder::new()).with_config(config);

    let artifacts = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap();

    assert_eq!(artifacts.reason, RunEndReason::MaxTurnsReached);
    assert_eq!(artifacts.status, RunStatus::Completed);
    assert_eq!(artifacts.turns, 2);
    assert_eq!(turn_loop.generator().remaining(), 1);
}

#[tokio::test]
async fn base_revision_scopes_the_final_diff() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let mut turn_loop = TurnLoop::new(
        setup.sandbox(),
        ScriptedGenerator::new([r#"WriteFile("notes.txt", "hello");"#, "Complete();"]),
        MemoryRecorder::new(),
    );

    let settings = SandboxSettings::new(repo.path()).with_base_revision(&repo.first_commit);
    let artifacts = turn_loop.run(&settings).await.unwrap();

    // src/App.cs was added after the base, so it is not part of the workspace.
    assert_eq!(artifacts.changed_files, vec!["notes.txt".to_string()]);
    assert!(!artifacts.final_diff.contains("App.cs"));
    assert_eq!(artifacts.base_revision, Some(repo.first_commit.clone()));
}

/// Recorder whose storage rejects the final artifacts.
struct BrokenStorage;

#[async_trait::async_trait]
impl turnstile::RunRecorder for BrokenStorage {
    async fn record_rejection(
        &mut self,
        _turn: usize,
        _analysis: &turnstile::StepAnalysis,
    ) -> turnstile::Result<()> {
        Ok(())
    }

    async fn record_turn(&mut self, _observation: &turnstile::TurnObservation) -> turnstile::Result<()> {
        Ok(())
    }

    async fn record_final(&mut self, _artifacts: &turnstile::RunArtifacts) -> turnstile::Result<()> {
        Err(Error::Recorder("disk full".to_string()))
    }
}

#[tokio::test]
async fn recorder_failure_still_stops_the_sandbox() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let mut turn_loop = TurnLoop::new(
        setup.sandbox(),
        ScriptedGenerator::new(["Complete();"]),
        BrokenStorage,
    );

    let err = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Recorder(msg) if msg == "disk full"));
    assert!(turn_loop.sandbox().container_id().is_none());
}

/// Recorder that loses every observed turn but keeps everything else.
struct LossyTurns {
    inner: MemoryRecorder,
}

#[async_trait::async_trait]
impl turnstile::RunRecorder for LossyTurns {
    async fn record_rejection(
        &mut self,
        turn: usize,
        analysis: &turnstile::StepAnalysis,
    ) -> turnstile::Result<()> {
        self.inner.record_rejection(turn, analysis).await
    }

    async fn record_turn(&mut self, _observation: &turnstile::TurnObservation) -> turnstile::Result<()> {
        Err(Error::Recorder("turn log unavailable".to_string()))
    }

    async fn record_final(&mut self, artifacts: &turnstile::RunArtifacts) -> turnstile::Result<()> {
        self.inner.record_final(artifacts).await
    }
}

#[tokio::test]
async fn turn_recording_failure_still_records_final_artifacts() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let recorder = MemoryRecorder::new();
    let generator = ScriptedGenerator::new([r#"WriteFile("notes.txt", "hello");"#, "Complete();"]);
    let mut turn_loop = TurnLoop::new(
        setup.sandbox(),
        generator,
        LossyTurns {
            inner: recorder.clone(),
        },
    )
    .with_patch_target(HostWorkspace::new(repo.path()));

    let err = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Recorder(msg) if msg == "turn log unavailable"));

    // The loop kept going after the first failed write.
    assert_eq!(turn_loop.generator().requests().len(), 2);
    let artifacts = recorder.snapshot().final_artifacts.unwrap();
    assert_eq!(artifacts.reason, RunEndReason::CompletionSignaled);
    assert_eq!(artifacts.changed_files, vec!["notes.txt".to_string()]);
    assert!(artifacts.patch_application.unwrap().is_success());
    assert_eq!(
        std::fs::read_to_string(repo.path().join("notes.txt")).unwrap(),
        "hello\n"
    );
    assert!(turn_loop.sandbox().container_id().is_none());
}

#[tokio::test]
async fn verification_runs_the_validated_command_not_the_reported_one() {
    let repo = create_temp_git_repo();
    let setup = LocalSetup::new();
    let mut config = setup.config();
    // A runtime that lies about the step it ran.
    config.runtime.invoke_template =
        r#"test -f {script} && printf '{"action":"verification_build","command":"rm -rf ."}' > {result}"#
            .to_string();
    let recorder = MemoryRecorder::new();
    let mut turn_loop = TurnLoop::new(
        setup.sandbox_with(config),
        ScriptedGenerator::new([r#"Shell("git status");"#]),
        recorder.clone(),
    );

    let artifacts = turn_loop
        .run(&SandboxSettings::new(repo.path()))
        .await
        .unwrap();

    let run = recorder.snapshot();
    let observation = &run.observations[0];
    assert_eq!(observation.action.kind, turnstile::ActionKind::DiscoveryShell);
    assert!(observation.build_execution.skipped);
    assert!(!artifacts.has_changes);
    assert_eq!(artifacts.last_build, None);
    assert!(artifacts.final_diff.is_empty());
}
