//! Step generators.
//!
//! The turn loop asks a [`StepGenerator`] for the next step body, passing the
//! feedback from the previous turn. Prompting a model is outside this crate;
//! [`ScriptedGenerator`] replays a fixed list of steps.

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What went wrong on the previous turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Feedback {
    /// The step was rejected before reaching the sandbox.
    Rejected { message: String },
    /// The step ran and exited non-zero.
    Failed { digest: String },
    /// The step's verification build or test run failed.
    BuildFailed { digest: String },
}

impl Feedback {
    pub fn text(&self) -> &str {
        match self {
            Feedback::Rejected { message } => message,
            Feedback::Failed { digest } | Feedback::BuildFailed { digest } => digest,
        }
    }
}

/// Request for the next step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRequest {
    pub turn: usize,
    /// 1 for a fresh attempt, incremented after each consecutive failure.
    pub attempt: usize,
    pub feedback: Option<Feedback>,
}

/// Produces step bodies.
#[async_trait]
pub trait StepGenerator: Send {
    async fn next_step(&mut self, request: &StepRequest) -> Result<String>;
}

/// A named list of steps for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepScript {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<String>,
}

impl StepScript {
    /// Loads a step script from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(Error::Io)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse step script: {}", e)))
    }
}

/// Replays steps in order and records every request it receives.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    steps: VecDeque<String>,
    requests: Vec<StepRequest>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
            requests: Vec::new(),
        }
    }

    pub fn from_script(script: StepScript) -> Self {
        Self::new(script.steps)
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> &[StepRequest] {
        &self.requests
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

#[async_trait]
impl StepGenerator for ScriptedGenerator {
    async fn next_step(&mut self, request: &StepRequest) -> Result<String> {
        self.requests.push(request.clone());
        self.steps.pop_front().ok_or_else(|| {
            Error::Generator(format!("step script exhausted at turn {}", request.turn))
        })
    }
}
