//! Sandbox lifecycle management.
//!
//! A [`ContainerSandbox`] owns one disposable container per run, created through
//! a [`ContainerEngine`]. [`DockerCli`] is the production engine; [`LocalEngine`]
//! runs on the host without isolation.

mod command;
mod container;
mod engine;
mod environment;
mod local;
mod patch;
mod process;
mod result_file;
mod settings;

pub use command::{CommandResult, StagedResult, Stage};
pub use container::{ContainerSandbox, StepExecution};
pub use engine::{ContainerEngine, ContainerSpec, DockerCli};
pub use environment::EnvironmentCheck;
pub use local::LocalEngine;
pub use patch::{apply_command, HostWorkspace, PatchTarget};
pub use process::shell_quote;
pub use result_file::{parse_step_report, StepReport};
pub use settings::{RuntimeConfig, SandboxConfig, SandboxSettings};
