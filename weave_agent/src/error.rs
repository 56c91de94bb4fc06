//! Error types for structures and tasks.
//!
//! [`StructureError`] covers graph and configuration problems. These are
//! returned from `run()` before any task executes. [`TaskError`] covers
//! task-fatal failures; it never escapes a run and is turned into the
//! failing task's Error artifact instead.

use crate::task::TaskId;
use thiserror::Error;
use weave_core::WeaveError;

/// Graph construction and structure configuration errors.
#[derive(Error, Debug)]
pub enum StructureError {
    /// A parent or child id does not name a task in the structure.
    #[error("Missing node: task '{task}' references unknown task '{missing}'")]
    MissingNode {
        /// Task declaring the reference
        task: TaskId,
        /// Referenced id that does not exist
        missing: TaskId,
    },

    /// The task graph contains a cycle.
    #[error("Cycle detected involving tasks: {0:?}")]
    Cycle(Vec<TaskId>),

    /// Two tasks share an id.
    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    /// No task with this id.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// A handle refers to a different task object than the one registered
    /// under its id.
    #[error("Task handle '{0}' does not belong to this structure")]
    ForeignHandle(TaskId),

    /// The structure has no tasks to run.
    #[error("Structure has no tasks")]
    EmptyStructure,

    /// Agent and Pipeline structures need a single input task.
    #[error("{kind} requires a single input task, found: {found:?}")]
    MultipleInputTasks {
        /// Structure kind
        kind: String,
        /// Tasks without parents
        found: Vec<TaskId>,
    },

    /// Agent and Pipeline structures need a single output task.
    #[error("{kind} requires a single output task, found: {found:?}")]
    MultipleOutputTasks {
        /// Structure kind
        kind: String,
        /// Tasks without children
        found: Vec<TaskId>,
    },

    /// Agents hold exactly one task.
    #[error("Agent already has a task")]
    AgentTaskLimit,

    /// A task input template failed to render.
    #[error("Failed to render input of task '{task}': {source}")]
    Render {
        /// Task whose template failed
        task: TaskId,
        #[source]
        source: WeaveError,
    },

    /// Conversation memory could not be loaded.
    #[error("Memory error: {0}")]
    Memory(#[source] WeaveError),

    /// Invalid settings or structure definition.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error while reading a definition.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Task-fatal errors.
#[derive(Error, Debug)]
pub enum TaskError {
    /// The task body reported a failure.
    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    /// Model-backed task without a prompt driver.
    #[error("Task '{0}' has no prompt driver")]
    NoPromptDriver(TaskId),

    /// The action loop hit its bound.
    #[error("Exceeded tool limit of {0} subtasks per task")]
    SubtaskLimit(usize),

    /// Structured output never matched its schema.
    #[error("Output failed schema validation after {attempts} attempts: {message}")]
    Validation {
        /// Attempts made
        attempts: usize,
        /// Last validation failure
        message: String,
    },

    /// Error from the core layer (driver, template, tool).
    #[error(transparent)]
    Core(#[from] WeaveError),

    /// The task body panicked.
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
