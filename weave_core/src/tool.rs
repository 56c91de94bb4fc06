//! Tool registry for schema-described activities.
//!
//! A tool is a named set of activities. Each activity carries a JSON schema
//! for its input, an `off_prompt` flag and an async handler. Activities are
//! registered explicitly when the tool is built; nothing is discovered at
//! runtime.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use weave_core::artifact::Artifact;
//! use weave_core::tool::{Activity, Tool, ToolRegistry};
//!
//! let calculator = Tool::new("calculator", "Basic arithmetic").activity(Activity::new(
//!     "add",
//!     "Adds two numbers",
//!     json!({
//!         "type": "object",
//!         "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
//!         "required": ["a", "b"]
//!     }),
//!     |input| async move {
//!         let sum = input["a"].as_f64().unwrap_or(0.0) + input["b"].as_f64().unwrap_or(0.0);
//!         Ok(Artifact::text(sum.to_string()))
//!     },
//! ));
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(calculator).unwrap();
//! assert!(registry.resolve("calculator", "add").is_ok());
//! ```

use crate::artifact::Artifact;
use crate::error::{Result, WeaveError};
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by activity handlers.
pub type ActivityFuture = Pin<Box<dyn Future<Output = Result<Artifact>> + Send>>;

/// Activity handler: structured input to artifact.
pub type ActivityHandler = Arc<dyn Fn(Value) -> ActivityFuture + Send + Sync>;

/// A named, schema-described callable.
#[derive(Clone)]
pub struct Activity {
    /// Activity name, unique within its tool
    pub name: String,
    /// Description shown to the model
    pub description: String,
    /// JSON schema of the input
    pub schema: Value,
    /// Results go to task memory instead of the prompt
    pub off_prompt: bool,
    handler: ActivityHandler,
}

impl Activity {
    /// Creates an activity.
    ///
    /// # Arguments
    ///
    /// * `name` - Activity name
    /// * `description` - Description shown to the model
    /// * `schema` - JSON schema the input must satisfy
    /// * `handler` - Async function producing the activity's artifact
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Artifact>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            off_prompt: false,
            handler: Arc::new(move |input| Box::pin(handler(input))),
        }
    }

    /// Marks results as off-prompt.
    pub fn off_prompt(mut self, off_prompt: bool) -> Self {
        self.off_prompt = off_prompt;
        self
    }

    /// Checks `input` against the activity schema.
    ///
    /// # Errors
    ///
    /// - `WeaveError::InvalidSchema` if the schema itself does not compile
    /// - `WeaveError::SchemaViolation` listing every violation
    pub fn validate(&self, input: &Value) -> Result<()> {
        validate_against(&self.schema, input)
    }

    /// Validates the input, then runs the handler.
    pub async fn invoke(&self, input: Value) -> Result<Artifact> {
        self.validate(&input)?;
        (self.handler)(input).await
    }

    /// Action descriptor advertised to the model.
    pub fn action_schema(&self, tool: &str) -> Value {
        json!({
            "name": tool,
            "path": self.name,
            "description": self.description,
            "input": self.schema,
        })
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("name", &self.name)
            .field("off_prompt", &self.off_prompt)
            .finish()
    }
}

/// Validates a value against a JSON schema.
pub fn validate_against(schema: &Value, value: &Value) -> Result<()> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| WeaveError::InvalidSchema(e.to_string()))?;
    if validator.is_valid(value) {
        return Ok(());
    }
    let messages = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(WeaveError::SchemaViolation(messages.join("; ")))
}

/// A named set of activities.
#[derive(Clone, Debug)]
pub struct Tool {
    /// Tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    activities: IndexMap<String, Activity>,
}

impl Tool {
    /// Creates a tool without activities.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            activities: IndexMap::new(),
        }
    }

    /// Adds an activity, replacing one with the same name.
    pub fn activity(mut self, activity: Activity) -> Self {
        self.activities.insert(activity.name.clone(), activity);
        self
    }

    /// Looks up an activity by exact name.
    pub fn get(&self, name: &str) -> Option<&Activity> {
        self.activities.get(name)
    }

    /// Activities in registration order.
    pub fn activities(&self) -> impl Iterator<Item = &Activity> {
        self.activities.values()
    }
}

/// Registry of tools available to a task.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Tool>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns `WeaveError::ToolAlreadyRegistered` if the name is taken.
    pub fn register(&mut self, tool: Tool) -> Result<()> {
        if self.tools.contains_key(&tool.name) {
            return Err(WeaveError::ToolAlreadyRegistered(tool.name));
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Resolves a tool and activity by exact name.
    ///
    /// # Errors
    ///
    /// - `WeaveError::ToolNotFound` for an unknown tool
    /// - `WeaveError::ActivityNotFound` for an unknown activity
    pub fn resolve(&self, tool: &str, activity: &str) -> Result<&Activity> {
        let found = self
            .tools
            .get(tool)
            .ok_or_else(|| WeaveError::ToolNotFound(tool.to_string()))?;
        found.get(activity).ok_or_else(|| WeaveError::ActivityNotFound {
            tool: tool.to_string(),
            activity: activity.to_string(),
        })
    }

    /// Registered tool names in registration order.
    pub fn list_tools(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Action descriptors for every activity of every tool.
    pub fn action_schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .flat_map(|tool| tool.activities().map(|a| a.action_schema(&tool.name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool() -> Tool {
        Tool::new("echo", "Echoes input").activity(Activity::new(
            "say",
            "Repeats the text",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
            |input| async move {
                Ok(Artifact::text(input["text"].as_str().unwrap_or_default()))
            },
        ))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).unwrap();

        assert!(registry.is_registered("echo"));
        assert_eq!(registry.list_tools(), vec!["echo"]);
        assert!(registry.resolve("echo", "say").is_ok());
        assert!(matches!(
            registry.resolve("nope", "say"),
            Err(WeaveError::ToolNotFound(_))
        ));
        assert!(matches!(
            registry.resolve("echo", "shout"),
            Err(WeaveError::ActivityNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).unwrap();
        assert!(matches!(
            registry.register(echo_tool()),
            Err(WeaveError::ToolAlreadyRegistered(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_validates_input() {
        let tool = echo_tool();
        let say = tool.get("say").unwrap();

        let ok = say.invoke(json!({"text": "hi"})).await.unwrap();
        assert_eq!(ok.to_text(), "hi");

        let err = say.invoke(json!({"words": "hi"})).await.unwrap_err();
        assert!(matches!(err, WeaveError::SchemaViolation(_)));
    }

    #[test]
    fn test_invalid_schema() {
        let err = validate_against(&json!({"type": 12}), &json!({})).unwrap_err();
        assert!(matches!(err, WeaveError::InvalidSchema(_)));
    }

    #[test]
    fn test_action_schemas() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).unwrap();
        let schemas = registry.action_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["name"], "echo");
        assert_eq!(schemas[0]["path"], "say");
    }
}
