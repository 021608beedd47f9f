//! turnstile - sandboxed, protocol-enforced turn execution
//!
//! This library validates generated C# script steps against a single-action
//! protocol, runs accepted steps in a disposable container workspace, observes
//! the resulting repository state and drives the retry loop around it.

pub mod config;
pub mod digest;
pub mod error;
pub mod executor;
pub mod generator;
pub mod recorder;
pub mod sandbox;
pub mod step;
pub mod turn_loop;

pub use error::{Error, Result};

pub use config::{EngineConfig, Validate, ValidationResult};
pub use digest::DigestConfig;
pub use executor::{TurnExecutor, TurnObservation, TurnOutcome, VerificationConfig};
pub use generator::{Feedback, ScriptedGenerator, StepGenerator, StepRequest, StepScript};
pub use recorder::{MemoryRecorder, RunArtifacts, RunEndReason, RunRecorder, RunStatus};
pub use sandbox::{
    CommandResult, ContainerEngine, ContainerSandbox, DockerCli, EnvironmentCheck, HostWorkspace,
    LocalEngine, PatchTarget, SandboxConfig, SandboxSettings, StagedResult, Stage,
};
pub use step::{analyze_step, ActionKind, StepAction, StepAnalysis, Violation};
pub use turn_loop::{LoopConfig, TurnLoop};
