//! Error types for the turnstile engine.
//!
//! Only misuse and setup faults are errors. Protocol violations and failed
//! sandbox commands are returned as data so the turn loop can retry on them.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for sandbox and turn-loop operations.
#[derive(Error, Debug)]
pub enum Error {
    /// An execute-style operation was called before `start()` completed or after `stop()`.
    #[error("sandbox is not started")]
    NotStarted,

    /// `start()` was called on a sandbox that already left the idle state.
    #[error("sandbox is already started")]
    AlreadyStarted,

    /// The container engine refused to create or start the container.
    #[error("failed to create sandbox container: {0}")]
    SandboxCreation(String),

    /// A setup stage inside the container failed; the workspace never became ready.
    #[error("sandbox setup failed during {stage}: {detail}")]
    SandboxSetup { stage: String, detail: String },

    /// Failed to stop or remove the container.
    #[error("failed to clean up sandbox container {container}: {reason}")]
    SandboxCleanup { container: String, reason: String },

    /// The container engine is not reachable.
    #[error("container engine unavailable: {0}")]
    Environment(String),

    /// The source repository path does not exist.
    #[error("invalid source path: {0}")]
    InvalidPath(PathBuf),

    /// IO error while talking to the engine or the host workspace.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The step generator could not produce a step.
    #[error("step generator failed: {0}")]
    Generator(String),

    /// The run recorder rejected an artifact.
    #[error("run recorder failed: {0}")]
    Recorder(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
