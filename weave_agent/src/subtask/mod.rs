//! Action subtask engine.
//!
//! A toolkit task drives a nested loop: the model's response is parsed into
//! actions, each action is dispatched to a tool activity, and the results
//! are fed back as the next prompt turn until the model answers or the
//! `max_subtasks` bound is hit.

mod engine;
pub mod parser;

pub use engine::ActionsEngine;
pub use parser::{parse_response, ActionCall, ActionParseError, ParsedResponse};

use thiserror::Error;
use weave_core::{Artifact, WeaveError};

/// Recoverable failure of a single action.
///
/// Rendered into an Error artifact that is fed back to the model; it never
/// fails the task on its own.
#[derive(Error, Debug)]
pub enum ActionDispatchError {
    /// No tool with this name.
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    /// The tool has no activity with this name.
    #[error("Unknown activity '{activity}' for tool '{tool}'")]
    UnknownActivity { tool: String, activity: String },

    /// The input does not satisfy the activity schema.
    #[error("Invalid input for '{tool}.{activity}': {message}")]
    InvalidInput {
        tool: String,
        activity: String,
        message: String,
    },

    /// The activity handler failed.
    #[error("Activity '{tool}.{activity}' failed: {message}")]
    Failed {
        tool: String,
        activity: String,
        message: String,
    },
}

impl ActionDispatchError {
    /// Classifies a core error raised while resolving or invoking an action.
    pub fn from_core(tool: &str, activity: &str, error: WeaveError) -> Self {
        match error {
            WeaveError::ToolNotFound(name) => ActionDispatchError::UnknownTool(name),
            WeaveError::ActivityNotFound { tool, activity } => {
                ActionDispatchError::UnknownActivity { tool, activity }
            }
            WeaveError::SchemaViolation(message) | WeaveError::InvalidSchema(message) => {
                ActionDispatchError::InvalidInput {
                    tool: tool.to_string(),
                    activity: activity.to_string(),
                    message,
                }
            }
            other => ActionDispatchError::Failed {
                tool: tool.to_string(),
                activity: activity.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Error artifact fed back to the model.
    pub fn to_artifact(&self) -> Artifact {
        Artifact::error(self.to_string())
    }
}

/// One tool round of a task: the model's thought, the requested actions and
/// their results.
///
/// Owned by the task that runs it and dropped when the task's run ends.
#[derive(Clone, Debug)]
pub struct ActionsSubtask {
    /// 1-based round number
    pub round: usize,
    /// Model reasoning for this round
    pub thought: Option<String>,
    /// Actions with their resolved tags
    pub actions: Vec<ActionCall>,
    /// One result per action, in request order
    pub results: Vec<Artifact>,
}

impl ActionsSubtask {
    /// Whether any action of this round failed.
    pub fn has_errors(&self) -> bool {
        self.results.iter().any(Artifact::is_error)
    }

    /// Observation message sent back to the model.
    pub fn observation(&self) -> String {
        let lines: Vec<String> = self
            .actions
            .iter()
            .zip(&self.results)
            .map(|(action, result)| {
                format!(
                    "Action {} ({}) output: {}",
                    action.tag.as_deref().unwrap_or("-"),
                    action.qualified_name(),
                    result.to_text()
                )
            })
            .collect();
        format!("Observation:\n{}", lines.join("\n"))
    }
}
