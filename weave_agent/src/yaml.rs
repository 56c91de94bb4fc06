//! YAML structure definitions.
//!
//! Covers structures made of prompt and toolkit tasks. Code and branch
//! tasks carry closures and are built through the Rust API.
//!
//! ```yaml
//! kind: workflow
//! settings:
//!   max_concurrency: 2
//! rulesets:
//!   - name: style
//!     rules:
//!       - type: text
//!         value: Be concise
//! tasks:
//!   - id: research
//!     type: toolkit
//!     tools: [search]
//!   - id: write
//!     type: prompt
//!     template: "Write about: {{ parent_output }}"
//!     parents: [research]
//! ```

use crate::error::StructureError;
use crate::structure::{Agent, Pipeline, Structure, StructureConfig, StructureKind, Workflow};
use crate::task::{PromptTask, Task, ToolkitTask};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use weave_core::{PromptDriver, Ruleset, Settings, ToolRegistry};

/// Structure definition from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinition {
    /// Execution strategy
    pub kind: StructureKind,
    /// Settings; defaults apply when absent
    #[serde(default)]
    pub settings: Option<Settings>,
    /// Structure-level rulesets
    #[serde(default)]
    pub rulesets: Vec<Ruleset>,
    /// Tasks in declaration order
    pub tasks: Vec<TaskDefinition>,
}

/// Task definition from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique task identifier
    pub id: String,
    /// Task type
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Input template
    #[serde(default)]
    pub template: Option<String>,
    /// Parent ids (workflow only)
    #[serde(default)]
    pub parents: Vec<String>,
    /// Child ids (workflow only)
    #[serde(default)]
    pub children: Vec<String>,
    /// Task-level rulesets
    #[serde(default)]
    pub rulesets: Vec<Ruleset>,
    /// Registry names of the tools a toolkit task may call
    #[serde(default)]
    pub tools: Vec<String>,
    /// JSON schema for structured prompt output
    #[serde(default)]
    pub output_schema: Option<Value>,
    /// Per-task subtask bound
    #[serde(default)]
    pub max_subtasks: Option<usize>,
    /// Per-task reflection toggle
    #[serde(default)]
    pub reflect_on_tool_use: Option<bool>,
    /// Task-local template variables
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Task types available in YAML.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Prompt,
    Toolkit,
}

/// Errors that can occur while loading a structure definition.
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// The definition is well-formed YAML but not a valid structure
    #[error("Invalid structure definition: {0}")]
    InvalidSchema(String),

    /// A task names a tool the registry does not have
    #[error("Task '{task}' uses unknown tool '{tool}'")]
    UnknownTool { task: String, tool: String },

    /// The structure rejected a task
    #[error(transparent)]
    Structure(#[from] StructureError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

/// Structure built from a definition.
#[derive(Debug)]
pub enum BuiltStructure {
    Agent(Agent),
    Pipeline(Pipeline),
    Workflow(Workflow),
}

impl BuiltStructure {
    pub fn structure(&self) -> &Structure {
        match self {
            BuiltStructure::Agent(agent) => &**agent,
            BuiltStructure::Pipeline(pipeline) => &**pipeline,
            BuiltStructure::Workflow(workflow) => &**workflow,
        }
    }

    pub fn structure_mut(&mut self) -> &mut Structure {
        match self {
            BuiltStructure::Agent(agent) => &mut **agent,
            BuiltStructure::Pipeline(pipeline) => &mut **pipeline,
            BuiltStructure::Workflow(workflow) => &mut **workflow,
        }
    }
}

impl StructureDefinition {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DefinitionError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Builds the structure.
    ///
    /// # Arguments
    ///
    /// * `driver` - Prompt driver shared by every task
    /// * `tools` - Registry the `tools` entries are looked up in
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` for invalid settings, an agent without
    /// exactly one task, tool lists on prompt tasks, unknown tools or
    /// duplicate task ids. Graph problems such as cycles surface when the
    /// structure runs.
    pub fn build(
        self,
        driver: Arc<dyn PromptDriver>,
        tools: &ToolRegistry,
    ) -> Result<BuiltStructure, DefinitionError> {
        let settings = self.settings.unwrap_or_default();
        settings
            .validate()
            .map_err(|e| DefinitionError::InvalidSchema(e.to_string()))?;

        let mut config = StructureConfig::new()
            .with_settings(settings)
            .with_prompt_driver(driver);
        for ruleset in self.rulesets {
            config = config.with_ruleset(ruleset);
        }

        let tasks = self
            .tasks
            .into_iter()
            .map(|def| def.build(tools))
            .collect::<Result<Vec<_>, _>>()?;

        let built = match self.kind {
            StructureKind::Agent => {
                if tasks.len() != 1 {
                    return Err(DefinitionError::InvalidSchema(format!(
                        "agent requires exactly one task, found {}",
                        tasks.len()
                    )));
                }
                let mut agent = Agent::new(config);
                for task in tasks {
                    agent.add_task(task)?;
                }
                BuiltStructure::Agent(agent)
            }
            StructureKind::Pipeline => {
                BuiltStructure::Pipeline(Pipeline::new(config).with_tasks(tasks)?)
            }
            StructureKind::Workflow => {
                BuiltStructure::Workflow(Workflow::new(config).with_tasks(tasks)?)
            }
        };
        Ok(built)
    }
}

impl TaskDefinition {
    fn build(self, registry: &ToolRegistry) -> Result<Task, DefinitionError> {
        let mut task = match self.task_type {
            TaskType::Prompt => {
                if !self.tools.is_empty() {
                    return Err(DefinitionError::InvalidSchema(format!(
                        "prompt task '{}' cannot use tools; use type: toolkit",
                        self.id
                    )));
                }
                let mut prompt = PromptTask::new();
                if let Some(schema) = self.output_schema {
                    prompt = prompt.with_output_schema(schema);
                }
                Task::new(self.id.as_str(), prompt)
            }
            TaskType::Toolkit => {
                if self.tools.is_empty() {
                    return Err(DefinitionError::InvalidSchema(format!(
                        "toolkit task '{}' lists no tools",
                        self.id
                    )));
                }
                let mut selected = ToolRegistry::new();
                for name in &self.tools {
                    let tool = registry.get(name).ok_or_else(|| DefinitionError::UnknownTool {
                        task: self.id.clone(),
                        tool: name.clone(),
                    })?;
                    selected
                        .register(tool.clone())
                        .map_err(|e| DefinitionError::InvalidSchema(e.to_string()))?;
                }
                let mut toolkit = ToolkitTask::new(selected);
                if let Some(max) = self.max_subtasks {
                    toolkit = toolkit.with_max_subtasks(max);
                }
                if let Some(reflect) = self.reflect_on_tool_use {
                    toolkit = toolkit.with_reflect_on_tool_use(reflect);
                }
                Task::toolkit(self.id.as_str(), toolkit)
            }
        };

        if let Some(template) = self.template {
            task = task.with_template(template);
        }
        for parent in self.parents {
            task = task.with_parent(parent);
        }
        for child in self.children {
            task = task.with_child(child);
        }
        for ruleset in self.rulesets {
            task = task.with_ruleset(ruleset);
        }
        for (key, value) in self.context {
            task = task.with_context(key, value);
        }
        Ok(task)
    }
}
