//! Single-task structure.

use super::{Structure, StructureConfig, StructureKind};
use crate::error::StructureError;
use crate::task::{Task, TaskHandle, ToolkitTask};
use std::ops::{Deref, DerefMut};
use weave_core::ToolRegistry;

/// Structure holding exactly one task.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use weave_agent::structure::{Agent, StructureConfig};
/// use weave_core::{ScriptedPromptDriver, ToolRegistry};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let driver = Arc::new(ScriptedPromptDriver::new(["Paris"]));
/// let config = StructureConfig::new().with_prompt_driver(driver);
/// let mut agent = Agent::from_tools(config, ToolRegistry::new());
///
/// let report = agent.run(vec!["Capital of France?".into()]).await.unwrap();
/// assert_eq!(report.output.unwrap().to_text(), "Paris");
/// # });
/// ```
#[derive(Debug)]
pub struct Agent {
    inner: Structure,
}

/// Id of the task created by [`Agent::from_tools`].
pub const AGENT_TASK_ID: &str = "agent";

impl Agent {
    /// Creates an agent without a task.
    pub fn new(config: StructureConfig) -> Self {
        Self {
            inner: Structure::new(StructureKind::Agent, config),
        }
    }

    /// Creates an agent with one task.
    ///
    /// The task is a toolkit task over `tools`, or a plain prompt task when
    /// the registry is empty.
    pub fn from_tools(config: StructureConfig, tools: ToolRegistry) -> Self {
        let mut agent = Self::new(config);
        let task = if tools.is_empty() {
            Task::prompt(AGENT_TASK_ID)
        } else {
            Task::toolkit(AGENT_TASK_ID, ToolkitTask::new(tools))
        };
        agent.inner.attach(task);
        agent
    }

    /// Builder form of [`Agent::add_task`].
    pub fn with_task(mut self, task: Task) -> Result<Self, StructureError> {
        self.add_task(task)?;
        Ok(self)
    }

    /// Sets the agent's task.
    ///
    /// # Errors
    ///
    /// Returns `StructureError::AgentTaskLimit` if the agent already has one.
    pub fn add_task(&mut self, mut task: Task) -> Result<TaskHandle, StructureError> {
        if !self.inner.tasks.is_empty() {
            return Err(StructureError::AgentTaskLimit);
        }
        task.parent_ids.clear();
        task.child_ids.clear();
        Ok(self.inner.attach(task))
    }

    /// The agent's task, if set.
    pub fn agent_task(&self) -> Option<&Task> {
        self.inner.tasks.first()
    }

    pub fn into_inner(self) -> Structure {
        self.inner
    }
}

impl Deref for Agent {
    type Target = Structure;

    fn deref(&self) -> &Structure {
        &self.inner
    }
}

impl DerefMut for Agent {
    fn deref_mut(&mut self) -> &mut Structure {
        &mut self.inner
    }
}
