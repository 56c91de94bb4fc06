//! Structure settings.
//!
//! Settings are passed explicitly to every structure; there is no global
//! default object. Missing YAML keys fall back to the documented defaults.
//!
//! # Example
//!
//! ```
//! use weave_core::config::Settings;
//!
//! let settings = Settings::from_yaml_str("fail_fast: false\nmemory:\n  max_runs: 5\n").unwrap();
//! assert!(!settings.fail_fast);
//! assert_eq!(settings.max_subtasks, 20);
//! assert_eq!(settings.memory.max_runs, Some(5));
//! ```

use crate::error::{Result, WeaveError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Execution settings for a structure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Stop launching tasks after the first task error
    pub fail_fast: bool,
    /// Maximum workflow tasks running at once
    pub max_concurrency: usize,
    /// Maximum tool rounds per task
    pub max_subtasks: usize,
    /// Ask the model to reconcile tool results into a final answer
    pub reflect_on_tool_use: bool,
    /// Attempts allowed for schema-constrained output
    pub max_validation_attempts: usize,
    /// Use the driver's streaming variant
    pub stream: bool,
    /// Directory for persisted event logs
    pub events_dir: Option<PathBuf>,
    /// Conversation memory settings
    pub memory: MemorySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fail_fast: true,
            max_concurrency: 4,
            max_subtasks: 20,
            reflect_on_tool_use: true,
            max_validation_attempts: 3,
            stream: false,
            events_dir: None,
            memory: MemorySettings::default(),
        }
    }
}

/// Conversation memory settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Create a conversation memory when none is supplied
    pub enabled: bool,
    /// FIFO cap on stored runs
    pub max_runs: Option<usize>,
    /// Prune rendered runs to the token budget
    pub autoprune: bool,
    /// Tokens kept free when pruning
    pub reserved_tokens: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_runs: None,
            autoprune: true,
            reserved_tokens: 1,
        }
    }
}

impl Settings {
    /// Parses and validates settings from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads, parses and validates a YAML settings file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Rejects values the scheduler cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `WeaveError::Config` for zero concurrency, zero subtasks or
    /// zero validation attempts.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(WeaveError::Config("max_concurrency must be at least 1".to_string()));
        }
        if self.max_subtasks == 0 {
            return Err(WeaveError::Config("max_subtasks must be at least 1".to_string()));
        }
        if self.max_validation_attempts == 0 {
            return Err(WeaveError::Config(
                "max_validation_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
