//! Off-prompt artifact storage.
//!
//! Tool results flagged off-prompt are kept here, and only an Info
//! reference is placed in the prompt. The model can pull a namespace back
//! through the `retrieve` activity of [`TaskMemory::as_tool`].

use crate::artifact::Artifact;
use crate::tool::{Activity, Tool};
use indexmap::IndexMap;
use serde_json::json;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Default memory name.
pub const DEFAULT_TASK_MEMORY_NAME: &str = "TaskMemory";

/// Namespaced artifact store shared by the tasks of a structure.
///
/// Namespaces accumulate until [`clear`](Self::clear) is called. A structure
/// clears the store it owns at the start of every run.
#[derive(Clone, Debug)]
pub struct TaskMemory {
    name: String,
    namespaces: Arc<Mutex<IndexMap<String, Vec<Artifact>>>>,
}

impl TaskMemory {
    /// Creates an empty task memory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespaces: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores an artifact under a fresh namespace and returns the reference
    /// placed in the prompt instead.
    ///
    /// List artifacts are stored item by item.
    ///
    /// # Arguments
    ///
    /// * `source` - What produced the artifact (e.g. `"calculator.add"`)
    /// * `artifact` - The artifact to keep off-prompt
    ///
    /// # Returns
    ///
    /// Info artifact naming `memory_name` and `artifact_namespace`, with
    /// both also set as metadata
    pub fn store(&self, source: &str, artifact: Artifact) -> Artifact {
        let namespace = Uuid::new_v4().simple().to_string();
        let items = match artifact.items() {
            Some(items) => items.to_vec(),
            None => vec![artifact],
        };

        self.namespaces
            .lock()
            .expect("task memory lock poisoned")
            .insert(namespace.clone(), items);

        tracing::debug!(memory = %self.name, %namespace, %source, "Stored off-prompt output");

        Artifact::info(format!(
            "Output of \"{}\" was stored in memory with memory_name \"{}\" and artifact_namespace \"{}\"",
            source, self.name, namespace
        ))
        .with_meta("memory_name", self.name.clone())
        .with_meta("artifact_namespace", namespace)
    }

    /// Returns the artifacts of a namespace.
    pub fn load(&self, namespace: &str) -> Option<Vec<Artifact>> {
        self.namespaces
            .lock()
            .expect("task memory lock poisoned")
            .get(namespace)
            .cloned()
    }

    /// Namespaces in insertion order.
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces
            .lock()
            .expect("task memory lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Drops every stored namespace.
    pub fn clear(&self) {
        self.namespaces
            .lock()
            .expect("task memory lock poisoned")
            .clear();
    }

    /// Exposes this memory as a tool with a `retrieve` activity.
    pub fn as_tool(&self) -> Tool {
        let memory = self.clone();
        Tool::new(self.name.clone(), "Retrieves artifacts stored off-prompt").activity(
            Activity::new(
                "retrieve",
                "Returns the full content stored under an artifact namespace",
                json!({
                    "type": "object",
                    "properties": {
                        "memory_name": {"type": "string"},
                        "artifact_namespace": {"type": "string"}
                    },
                    "required": ["artifact_namespace"]
                }),
                move |input| {
                    let memory = memory.clone();
                    async move {
                        let namespace = input["artifact_namespace"].as_str().unwrap_or_default();
                        Ok(match memory.load(namespace) {
                            Some(items) => Artifact::text(
                                items
                                    .iter()
                                    .map(Artifact::to_text)
                                    .collect::<Vec<_>>()
                                    .join(crate::artifact::LIST_ITEM_SEPARATOR),
                            ),
                            None => Artifact::error(format!(
                                "artifact_namespace \"{}\" not found in {}",
                                namespace,
                                memory.name()
                            )),
                        })
                    }
                },
            ),
        )
    }
}

impl Default for TaskMemory {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_MEMORY_NAME)
    }
}
