//! The turn loop.
//!
//! Drives turns until the engineer signals completion, the turn budget runs
//! out, or too many consecutive attempts fail. The sandbox is stopped on every
//! exit path and the run always ends with recorded artifacts.

use serde::{Deserialize, Serialize};

use crate::digest::{build_digest, failure_digest, rejection_digest, DigestConfig};
use crate::error::{Error, Result};
use crate::executor::{capture_diff, DiffCapture, TurnExecutor, TurnOutcome, VerificationConfig};
use crate::generator::{Feedback, StepGenerator, StepRequest};
use crate::recorder::{RunArtifacts, RunEndReason, RunRecorder, RunStatus};
use crate::sandbox::{
    CommandResult, ContainerEngine, ContainerSandbox, PatchTarget, SandboxSettings, StagedResult,
    Stage,
};
use crate::step::ActionKind;

/// Loop limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Consecutive failed attempts (rejections and failing scripts) before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default)]
    pub digest: DigestConfig,
    /// Apply the final diff to the host patch target, when one is configured.
    #[serde(default = "default_apply_patch")]
    pub apply_patch: bool,
}

fn default_max_turns() -> usize {
    20
}

fn default_max_attempts() -> usize {
    3
}

fn default_apply_patch() -> bool {
    true
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_attempts: default_max_attempts(),
            digest: DigestConfig::default(),
            apply_patch: default_apply_patch(),
        }
    }
}

/// Where the loop is. Used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingStep,
    Validating,
    Executing,
    Deciding,
    Completed,
    Failed,
}

/// What happens after a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Finish(RunEndReason),
}

/// Decision for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    /// Feedback for the next step request.
    pub feedback: Option<Feedback>,
    pub consecutive_failures: usize,
}

/// Decides what follows a turn, given the failures before it.
pub fn decide(outcome: &TurnOutcome, failures_before: usize, config: &LoopConfig) -> Decision {
    let failed = |feedback: Feedback| {
        let consecutive_failures = failures_before + 1;
        let verdict = if consecutive_failures >= config.max_attempts {
            Verdict::Finish(RunEndReason::RetriesExhausted)
        } else {
            Verdict::Continue
        };
        Decision {
            verdict,
            feedback: Some(feedback),
            consecutive_failures,
        }
    };

    let observation = match outcome {
        TurnOutcome::Rejected(analysis) => {
            return failed(Feedback::Rejected {
                message: rejection_digest(analysis, &config.digest),
            });
        }
        TurnOutcome::Observed(observation) => observation,
    };

    if !observation.script_succeeded() {
        return failed(Feedback::Failed {
            digest: failure_digest(&observation.script_execution, &config.digest),
        });
    }
    if observation.action.kind == ActionKind::Complete {
        return Decision {
            verdict: Verdict::Finish(RunEndReason::CompletionSignaled),
            feedback: None,
            consecutive_failures: 0,
        };
    }
    let feedback = observation.build_failed().then(|| Feedback::BuildFailed {
        digest: build_digest(&observation.build_execution, &config.digest),
    });
    Decision {
        verdict: Verdict::Continue,
        feedback,
        consecutive_failures: 0,
    }
}

/// Runs one engineering run against one sandbox.
pub struct TurnLoop<E: ContainerEngine, G: StepGenerator, R: RunRecorder> {
    sandbox: ContainerSandbox<E>,
    generator: G,
    recorder: R,
    config: LoopConfig,
    verification: VerificationConfig,
    patch_target: Option<Box<dyn PatchTarget>>,
}

impl<E: ContainerEngine, G: StepGenerator, R: RunRecorder> TurnLoop<E, G, R> {
    pub fn new(sandbox: ContainerSandbox<E>, generator: G, recorder: R) -> Self {
        Self {
            sandbox,
            generator,
            recorder,
            config: LoopConfig::default(),
            verification: VerificationConfig::default(),
            patch_target: None,
        }
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_verification(mut self, verification: VerificationConfig) -> Self {
        self.verification = verification;
        self
    }

    /// Where the final diff is applied after the run.
    pub fn with_patch_target(mut self, target: impl PatchTarget + 'static) -> Self {
        self.patch_target = Some(Box::new(target));
        self
    }

    pub fn sandbox(&self) -> &ContainerSandbox<E> {
        &self.sandbox
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Runs the loop to the end.
    ///
    /// Returns `Err` for sandbox setup faults, misuse and recorder failures.
    /// Once setup succeeded, the final artifacts are captured and recorded
    /// before any error is returned. A run that fails for any other reason
    /// returns artifacts with a failed status.
    pub async fn run(&mut self, settings: &SandboxSettings) -> Result<RunArtifacts> {
        if let Err(e) = self.sandbox.start(settings).await {
            tracing::error!(error = %e, "sandbox setup failed");
            if !matches!(e, Error::AlreadyStarted) {
                if let Err(stop_err) = self.sandbox.stop().await {
                    tracing::warn!(error = %stop_err, "failed to stop sandbox after setup fault");
                }
            }
            let artifacts = RunArtifacts::empty(
                RunEndReason::SetupFault(e.to_string()),
                settings.base_revision.clone(),
            );
            if let Err(record_err) = self.recorder.record_final(&artifacts).await {
                tracing::warn!(error = %record_err, "failed to record setup fault");
            }
            return Err(e);
        }

        let result = self.drive(settings).await;
        if let Err(e) = self.sandbox.stop().await {
            tracing::warn!(error = %e, "failed to stop sandbox");
        }
        result
    }

    /// Runs turns, then always captures and records the final artifacts.
    ///
    /// The first per-turn error is returned after `record_final`.
    async fn drive(&mut self, settings: &SandboxSettings) -> Result<RunArtifacts> {
        let mut deferred: Option<Error> = None;
        let mut turns = 0;
        let mut failures = 0;
        let mut feedback: Option<Feedback> = None;
        let mut last_failure_digest: Option<String> = None;
        let mut last_build: Option<CommandResult> = None;
        let mut reason = RunEndReason::MaxTurnsReached;

        for turn in 1..=self.config.max_turns {
            tracing::debug!(turn, state = ?LoopState::AwaitingStep, "awaiting step");
            let request = StepRequest {
                turn,
                attempt: failures + 1,
                feedback: feedback.take(),
            };
            let step = match self.generator.next_step(&request).await {
                Ok(step) => step,
                Err(e) => {
                    tracing::error!(turn, error = %e, "step generator failed");
                    reason = RunEndReason::GeneratorFailed(e.to_string());
                    break;
                }
            };
            turns = turn;

            tracing::debug!(turn, state = ?LoopState::Validating, "validating step");
            let outcome = match TurnExecutor::new(&self.sandbox, &self.verification)
                .run_turn(turn, &step)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(turn, error = %e, "turn could not be executed");
                    reason = RunEndReason::TurnFault(e.to_string());
                    deferred = Some(e);
                    break;
                }
            };
            let recorded = match &outcome {
                TurnOutcome::Rejected(analysis) => {
                    self.recorder.record_rejection(turn, analysis).await
                }
                TurnOutcome::Observed(observation) => {
                    tracing::debug!(turn, state = ?LoopState::Executing, "step executed");
                    if !observation.build_execution.skipped {
                        last_build = Some(observation.build_execution.clone());
                    }
                    self.recorder.record_turn(observation).await
                }
            };
            if let Err(e) = recorded {
                tracing::warn!(turn, error = %e, "failed to record turn");
                deferred = deferred.or(Some(e));
            }

            tracing::debug!(turn, state = ?LoopState::Deciding, "deciding");
            let decision = decide(&outcome, failures, &self.config);
            failures = decision.consecutive_failures;
            if let Some(next) = &decision.feedback {
                last_failure_digest = Some(next.text().to_string());
            }
            feedback = decision.feedback;
            if let Verdict::Finish(end) = decision.verdict {
                reason = end;
                break;
            }
        }

        let status = reason.status();
        let terminal = match status {
            RunStatus::Completed => LoopState::Completed,
            RunStatus::Failed => LoopState::Failed,
        };
        tracing::info!(turns, state = ?terminal, reason = ?reason, "turn loop finished");

        let capture = match capture_diff(&self.sandbox).await {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!(error = %e, "failed to capture the final diff");
                let failed = CommandResult::failure(-1, e.to_string());
                deferred = deferred.or(Some(e));
                DiffCapture {
                    diff_execution: failed.clone(),
                    changed_files_execution: failed,
                }
            }
        };
        let patch_application = self.apply_final_patch(capture.diff()).await;

        let artifacts = RunArtifacts {
            status,
            reason,
            turns,
            base_revision: settings.base_revision.clone(),
            final_diff: capture.diff().to_string(),
            changed_files: capture.changed_files(),
            has_changes: capture.has_changes(),
            last_build,
            last_failure_digest,
            patch_application,
        };
        self.recorder.record_final(&artifacts).await?;
        match deferred {
            Some(e) => Err(e),
            None => Ok(artifacts),
        }
    }

    async fn apply_final_patch(&self, diff: &str) -> Option<StagedResult> {
        if !self.config.apply_patch {
            return None;
        }
        let target = self.patch_target.as_ref()?;
        let staged = match target.apply_patch(diff, false).await {
            Ok(staged) => staged,
            Err(e) => StagedResult::tagged(CommandResult::failure(-1, e.to_string()), Stage::Apply),
        };
        tracing::info!(
            target = %target.describe(),
            failed_stage = ?staged.failed_stage,
            "applied final diff"
        );
        Some(staged)
    }
}
