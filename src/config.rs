//! Engine configuration and validation.
//!
//! Configuration is read from TOML and validated before a run starts so that
//! mistakes surface before any container is created.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::digest::DigestConfig;
use crate::error::{Error, Result};
use crate::executor::VerificationConfig;
use crate::sandbox::SandboxConfig;
use crate::turn_loop::LoopConfig;

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default, rename = "loop")]
    pub turn_loop: LoopConfig,
}

impl EngineConfig {
    /// Loads a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(Error::Io)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Loads and validates, returning the config and any warnings.
    pub fn load_validated(path: impl AsRef<Path>) -> Result<(Self, Vec<String>)> {
        let config = Self::load(path)?;
        let warnings = config.validate().into_result()?;
        Ok((config, warnings))
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = self.sandbox.validate();
        result.merge(self.verification.validate());
        result.merge(self.turn_loop.validate());
        result
    }
}

impl Validate for SandboxConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.image.trim().is_empty() {
            result.add_error("sandbox.image cannot be empty");
        }

        let paths = [
            ("sandbox.source_mount", &self.source_mount),
            ("sandbox.workspace_dir", &self.workspace_dir),
            ("sandbox.scratch_dir", &self.scratch_dir),
        ];
        for (name, path) in &paths {
            if !path.starts_with('/') {
                result.add_error(format!("{} must be an absolute path, got '{}'", name, path));
            }
            if path.trim_end_matches('/').is_empty() {
                result.add_error(format!("{} cannot be the filesystem root", name));
            }
        }
        for (i, (name_a, a)) in paths.iter().enumerate() {
            for (name_b, b) in &paths[i + 1..] {
                if a.trim_end_matches('/') == b.trim_end_matches('/') {
                    result.add_error(format!("{} and {} must differ", name_a, name_b));
                }
            }
        }
        let workspace = format!("{}/", self.workspace_dir.trim_end_matches('/'));
        if self.scratch_dir.starts_with(&workspace) {
            result.add_error("sandbox.scratch_dir must be outside sandbox.workspace_dir");
        }

        let template = &self.runtime.invoke_template;
        for placeholder in ["{script}", "{result}"] {
            if !template.contains(placeholder) {
                result.add_error(format!(
                    "sandbox.runtime.invoke_template must contain {}",
                    placeholder
                ));
            }
        }
        if self.runtime.build_command.is_none() {
            result.add_warning("sandbox.runtime.build_command is not set; the runtime must already exist in the image");
        }

        result
    }
}

impl Validate for VerificationConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        if self.build_command.trim().is_empty() {
            result.add_error("verification.build_command cannot be empty");
        }
        if self.test_command.trim().is_empty() {
            result.add_error("verification.test_command cannot be empty");
        }
        result
    }
}

impl Validate for LoopConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.max_turns == 0 {
            result.add_error("loop.max_turns must be greater than 0");
        }
        if self.max_attempts == 0 {
            result.add_error("loop.max_attempts must be greater than 0");
        }
        if self.max_attempts > self.max_turns && self.max_turns > 0 {
            result.add_warning("loop.max_attempts exceeds loop.max_turns and can never be reached");
        }
        result.merge(self.digest.validate());

        result
    }
}

impl Validate for DigestConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        if self.max_chars == 0 {
            result.add_error("loop.digest.max_chars must be greater than 0");
        }
        if self.max_lines == 0 {
            result.add_error("loop.digest.max_lines must be greater than 0");
        }
        if self.max_chars > 0 && self.max_chars < 80 {
            result.add_warning("loop.digest.max_chars under 80 leaves little room for diagnostics");
        }
        result
    }
}
