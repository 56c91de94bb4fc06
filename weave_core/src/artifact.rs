//! Typed values exchanged between tasks, tools and memory.
//!
//! Every task output, tool result and conversation run is an [`Artifact`].
//! The kind of an artifact is fixed at construction; list artifacts keep
//! their items homogeneous.

use crate::error::{Result, WeaveError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Separator used when a list artifact is rendered as text.
pub const LIST_ITEM_SEPARATOR: &str = "\n\n";

/// Kind tag of an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Plain text
    Text,
    /// Diagnosable failure message
    Error,
    /// Informational message (references, notices)
    Info,
    /// Structured JSON value
    Json,
    /// Homogeneous list of artifacts
    List,
    /// Binary media with a MIME type
    Media,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::Text => "text",
            ArtifactKind::Error => "error",
            ArtifactKind::Info => "info",
            ArtifactKind::Json => "json",
            ArtifactKind::List => "list",
            ArtifactKind::Media => "media",
        };
        f.write_str(name)
    }
}

/// Payload of an artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactValue {
    Text(String),
    Error(String),
    Info(String),
    Json(Value),
    List(Vec<Artifact>),
    Media { mime_type: String, data: Vec<u8> },
}

impl ArtifactValue {
    /// Returns the kind tag for this payload.
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactValue::Text(_) => ArtifactKind::Text,
            ArtifactValue::Error(_) => ArtifactKind::Error,
            ArtifactValue::Info(_) => ArtifactKind::Info,
            ArtifactValue::Json(_) => ArtifactKind::Json,
            ArtifactValue::List(_) => ArtifactKind::List,
            ArtifactValue::Media { .. } => ArtifactKind::Media,
        }
    }
}

/// A typed value with an identity and optional metadata.
///
/// # Example
///
/// ```
/// use weave_core::artifact::{Artifact, ArtifactKind};
///
/// let answer = Artifact::text("42");
/// assert_eq!(answer.kind(), ArtifactKind::Text);
/// assert_eq!(answer.to_text(), "42");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact identifier
    pub id: String,
    /// Typed payload
    pub value: ArtifactValue,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl Artifact {
    /// Creates an artifact from a payload with a fresh id.
    pub fn new(value: ArtifactValue) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            value,
            meta: BTreeMap::new(),
        }
    }

    /// Creates a text artifact.
    pub fn text(value: impl Into<String>) -> Self {
        Self::new(ArtifactValue::Text(value.into()))
    }

    /// Creates an error artifact.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ArtifactValue::Error(message.into()))
    }

    /// Creates an info artifact.
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ArtifactValue::Info(message.into()))
    }

    /// Creates a JSON artifact.
    pub fn json(value: Value) -> Self {
        Self::new(ArtifactValue::Json(value))
    }

    /// Creates a media artifact.
    pub fn media(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(ArtifactValue::Media {
            mime_type: mime_type.into(),
            data,
        })
    }

    /// Creates a list artifact, rejecting mixed item kinds.
    ///
    /// # Errors
    ///
    /// Returns `WeaveError::ArtifactMismatch` if the items are not all of
    /// the same kind.
    pub fn list(items: Vec<Artifact>) -> Result<Self> {
        if let Some(first) = items.first() {
            let expected = first.kind();
            if let Some(bad) = items.iter().find(|item| item.kind() != expected) {
                return Err(WeaveError::ArtifactMismatch {
                    expected,
                    actual: bad.kind(),
                });
            }
        }
        Ok(Self::new(ArtifactValue::List(items)))
    }

    /// Adds a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Returns a metadata entry.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// Returns the kind tag.
    pub fn kind(&self) -> ArtifactKind {
        self.value.kind()
    }

    /// Returns true for error artifacts.
    pub fn is_error(&self) -> bool {
        matches!(self.value, ArtifactValue::Error(_))
    }

    /// Returns the items of a list artifact.
    pub fn items(&self) -> Option<&[Artifact]> {
        match &self.value {
            ArtifactValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the item kind of a non-empty list artifact.
    pub fn item_kind(&self) -> Option<ArtifactKind> {
        self.items().and_then(|items| items.first()).map(Artifact::kind)
    }

    /// Appends an item to a list artifact.
    ///
    /// # Errors
    ///
    /// - `WeaveError::NotAList` if this artifact is not a list
    /// - `WeaveError::ArtifactMismatch` if the item kind differs from the list's
    pub fn push(&mut self, item: Artifact) -> Result<()> {
        let expected = self.item_kind();
        match &mut self.value {
            ArtifactValue::List(items) => {
                if let Some(expected) = expected {
                    if item.kind() != expected {
                        return Err(WeaveError::ArtifactMismatch {
                            expected,
                            actual: item.kind(),
                        });
                    }
                }
                items.push(item);
                Ok(())
            }
            other => Err(WeaveError::NotAList(other.kind())),
        }
    }

    /// Concatenates two list artifacts (list-append).
    ///
    /// The result keeps this artifact's id and metadata.
    pub fn concat(mut self, other: Artifact) -> Result<Artifact> {
        let ArtifactValue::List(items) = other.value else {
            return Err(WeaveError::NotAList(other.value.kind()));
        };
        for item in items {
            self.push(item)?;
        }
        Ok(self)
    }

    /// Renders the artifact as prompt-ready text.
    pub fn to_text(&self) -> String {
        match &self.value {
            ArtifactValue::Text(text) | ArtifactValue::Error(text) | ArtifactValue::Info(text) => {
                text.clone()
            }
            ArtifactValue::Json(value) => value.to_string(),
            ArtifactValue::List(items) => items
                .iter()
                .map(Artifact::to_text)
                .collect::<Vec<_>>()
                .join(LIST_ITEM_SEPARATOR),
            ArtifactValue::Media { mime_type, data } => {
                format!("Media, type: {}, size: {} bytes", mime_type, data.len())
            }
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<String> for Artifact {
    fn from(s: String) -> Self {
        Artifact::text(s)
    }
}

impl From<&str> for Artifact {
    fn from(s: &str) -> Self {
        Artifact::text(s)
    }
}
