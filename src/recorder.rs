//! Run recording.
//!
//! The turn loop hands every rejection, every observation and the final
//! artifacts to a [`RunRecorder`]. Storage formats are the recorder's business.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::executor::TurnObservation;
use crate::sandbox::{CommandResult, StagedResult};
use crate::step::StepAnalysis;

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RunEndReason {
    CompletionSignaled,
    MaxTurnsReached,
    RetriesExhausted,
    GeneratorFailed(String),
    SetupFault(String),
    /// A turn could not be executed against the sandbox.
    TurnFault(String),
}

impl RunEndReason {
    pub fn status(&self) -> RunStatus {
        match self {
            RunEndReason::CompletionSignaled | RunEndReason::MaxTurnsReached => {
                RunStatus::Completed
            }
            RunEndReason::RetriesExhausted
            | RunEndReason::GeneratorFailed(_)
            | RunEndReason::SetupFault(_)
            | RunEndReason::TurnFault(_) => RunStatus::Failed,
        }
    }
}

/// Everything a run leaves behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunArtifacts {
    pub status: RunStatus,
    pub reason: RunEndReason,
    /// Turns that produced a step, including rejected ones.
    pub turns: usize,
    pub base_revision: Option<String>,
    pub final_diff: String,
    pub changed_files: Vec<String>,
    pub has_changes: bool,
    /// Most recent verification that actually ran.
    pub last_build: Option<CommandResult>,
    pub last_failure_digest: Option<String>,
    /// Result of applying the final diff to the host checkout, if attempted.
    pub patch_application: Option<StagedResult>,
}

impl RunArtifacts {
    /// Artifacts of a run that ended before any sandbox state could be captured.
    pub fn empty(reason: RunEndReason, base_revision: Option<String>) -> Self {
        Self {
            status: reason.status(),
            reason,
            turns: 0,
            base_revision,
            final_diff: String::new(),
            changed_files: Vec::new(),
            has_changes: false,
            last_build: None,
            last_failure_digest: None,
            patch_application: None,
        }
    }
}

/// Receives everything that happens during a run.
#[async_trait]
pub trait RunRecorder: Send {
    async fn record_rejection(&mut self, turn: usize, analysis: &StepAnalysis) -> Result<()>;

    async fn record_turn(&mut self, observation: &TurnObservation) -> Result<()>;

    async fn record_final(&mut self, artifacts: &RunArtifacts) -> Result<()>;
}

/// Everything recorded by a [`MemoryRecorder`].
#[derive(Debug, Clone, Default)]
pub struct RecordedRun {
    pub rejections: Vec<(usize, StepAnalysis)>,
    pub observations: Vec<TurnObservation>,
    pub final_artifacts: Option<RunArtifacts>,
}

/// Keeps the run in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    inner: Arc<Mutex<RecordedRun>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything recorded so far.
    pub fn snapshot(&self) -> RecordedRun {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordedRun> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RunRecorder for MemoryRecorder {
    async fn record_rejection(&mut self, turn: usize, analysis: &StepAnalysis) -> Result<()> {
        self.lock().rejections.push((turn, analysis.clone()));
        Ok(())
    }

    async fn record_turn(&mut self, observation: &TurnObservation) -> Result<()> {
        self.lock().observations.push(observation.clone());
        Ok(())
    }

    async fn record_final(&mut self, artifacts: &RunArtifacts) -> Result<()> {
        self.lock().final_artifacts = Some(artifacts.clone());
        Ok(())
    }
}
