//! Error types for the taskweave core layer.

use crate::artifact::ArtifactKind;

/// Main error type for the core layer.
///
/// All core operations return `Result<T> = std::result::Result<T, WeaveError>`.
#[derive(thiserror::Error, Debug)]
pub enum WeaveError {
    /// The prompt driver failed to produce a response.
    #[error("Prompt driver error: {0}")]
    Driver(String),

    /// A template could not be parsed or rendered.
    #[error("Template error: {0}")]
    Template(String),

    /// A JSON schema could not be compiled.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A value did not satisfy its JSON schema.
    #[error("Schema validation failed: {0}")]
    SchemaViolation(String),

    /// List artifacts only hold items of a single kind.
    #[error("Artifact kind mismatch: expected {expected}, got {actual}")]
    ArtifactMismatch {
        /// Kind already held by the list
        expected: ArtifactKind,
        /// Kind that was rejected
        actual: ArtifactKind,
    },

    /// Operation requires a list artifact.
    #[error("Not a list artifact: {0}")]
    NotAList(ArtifactKind),

    /// No tool with this name is registered.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The tool exists but has no activity with this name.
    #[error("Activity not found: {tool}.{activity}")]
    ActivityNotFound {
        /// Tool name
        tool: String,
        /// Requested activity
        activity: String,
    },

    /// A tool with the same name is already registered.
    #[error("Tool already registered: {0}")]
    ToolAlreadyRegistered(String),

    /// Conversation memory persistence failed.
    #[error("Memory driver error: {0}")]
    MemoryDriver(String),

    /// Invalid configuration values.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error raised by a caller-supplied activity handler.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Type alias for Result with WeaveError.
pub type Result<T> = std::result::Result<T, WeaveError>;
