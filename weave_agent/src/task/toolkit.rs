//! Model-backed task with tools, driven by the action subtask engine.

use super::{TaskBehavior, TaskContext, TaskKind, TaskOutcome};
use crate::error::TaskError;
use crate::subtask::ActionsEngine;
use async_trait::async_trait;
use weave_core::ToolRegistry;

/// Task that lets the model call tools until it produces an answer.
///
/// `max_subtasks` and `reflect_on_tool_use` default to the structure
/// settings and can be overridden per task.
#[derive(Clone, Debug, Default)]
pub struct ToolkitTask {
    tools: ToolRegistry,
    max_subtasks: Option<usize>,
    reflect_on_tool_use: Option<bool>,
}

impl ToolkitTask {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            tools,
            max_subtasks: None,
            reflect_on_tool_use: None,
        }
    }

    pub fn with_max_subtasks(mut self, max_subtasks: usize) -> Self {
        self.max_subtasks = Some(max_subtasks);
        self
    }

    pub fn with_reflect_on_tool_use(mut self, reflect: bool) -> Self {
        self.reflect_on_tool_use = Some(reflect);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

#[async_trait]
impl TaskBehavior for ToolkitTask {
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        let driver = ctx.require_driver()?;

        let mut tools = self.tools.clone();
        let has_off_prompt = tools
            .list_tools()
            .iter()
            .filter_map(|name| tools.get(name))
            .any(|tool| tool.activities().any(|a| a.off_prompt));
        if has_off_prompt && !tools.is_registered(ctx.task_memory.name()) {
            tools.register(ctx.task_memory.as_tool())?;
        }

        let engine = ActionsEngine::new(driver, tools)
            .with_max_subtasks(self.max_subtasks.unwrap_or(ctx.settings.max_subtasks))
            .with_reflect_on_tool_use(
                self.reflect_on_tool_use
                    .unwrap_or(ctx.settings.reflect_on_tool_use),
            );

        engine.run(ctx).await.map(TaskOutcome::Output)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Toolkit
    }
}
