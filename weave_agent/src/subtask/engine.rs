//! The bounded think/act/observe loop of a toolkit task.

use super::parser::parse_response;
use super::{ActionCall, ActionDispatchError, ActionsSubtask};
use crate::error::TaskError;
use crate::events::RunEvent;
use crate::task::{build_prompt_stack, call_driver, TaskContext};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use weave_core::{Artifact, Message, PromptDriver, ToolRegistry};

const DEFAULT_MAX_SUBTASKS: usize = 20;

/// Drives tool use for one task run.
pub struct ActionsEngine {
    driver: Arc<dyn PromptDriver>,
    tools: ToolRegistry,
    max_subtasks: usize,
    reflect_on_tool_use: bool,
}

impl ActionsEngine {
    /// Creates an engine with the default bound and reflection enabled.
    pub fn new(driver: Arc<dyn PromptDriver>, tools: ToolRegistry) -> Self {
        Self {
            driver,
            tools,
            max_subtasks: DEFAULT_MAX_SUBTASKS,
            reflect_on_tool_use: true,
        }
    }

    pub fn with_max_subtasks(mut self, max_subtasks: usize) -> Self {
        self.max_subtasks = max_subtasks;
        self
    }

    pub fn with_reflect_on_tool_use(mut self, reflect: bool) -> Self {
        self.reflect_on_tool_use = reflect;
        self
    }

    /// System prompt section describing the response protocol and tools.
    pub fn instructions(&self) -> String {
        let mut text = String::from(
            "You can use tools to answer. To use tools, respond with:\n\
             Thought: <your reasoning>\n\
             Actions: <JSON array of {\"tag\": <unique string>, \"name\": <tool name>, \"path\": <activity name>, \"input\": <object matching the activity schema>}>\n\
             When you have the final answer, respond with:\n\
             Answer: <final answer>\n\nAvailable tools:",
        );
        for schema in self.tools.action_schemas() {
            text.push('\n');
            text.push_str(&schema.to_string());
        }
        text
    }

    /// Runs the loop and returns the task output.
    ///
    /// # Errors
    ///
    /// - `TaskError::SubtaskLimit` once `max_subtasks` rounds ran and the
    ///   model still requests actions
    /// - `TaskError::Core` if the prompt driver fails
    pub async fn run(&self, ctx: &TaskContext) -> Result<Artifact, TaskError> {
        self.run_with_trace(ctx).await.map(|(output, _)| output)
    }

    /// Like [`run`](Self::run), also returning every tool round.
    pub async fn run_with_trace(
        &self,
        ctx: &TaskContext,
    ) -> Result<(Artifact, Vec<ActionsSubtask>), TaskError> {
        let instructions = self.instructions();
        let mut trace: Vec<Message> = Vec::new();
        let mut subtasks: Vec<ActionsSubtask> = Vec::new();

        loop {
            // Rebuilt every round so memory is pruned against the growing trace.
            let stack = build_prompt_stack(
                ctx,
                self.driver.as_ref(),
                Some(instructions.clone()),
                self.tools.action_schemas(),
                &trace,
            )
            .await;
            let response = call_driver(ctx, self.driver.as_ref(), &stack).await?;
            let text = response.to_text();
            let parsed = parse_response(&text);

            if parsed.is_final() {
                let answer = parsed.answer.unwrap_or(text);
                return Ok((Artifact::text(answer), subtasks));
            }

            if subtasks.len() >= self.max_subtasks {
                tracing::warn!(task = %ctx.task_id, limit = self.max_subtasks, "Subtask limit reached");
                return Err(TaskError::SubtaskLimit(self.max_subtasks));
            }

            let round = subtasks.len() + 1;
            let actions = assign_tags(round, parsed.actions);
            ctx.events
                .emit(RunEvent::SubtaskStarted {
                    timestamp: Utc::now(),
                    task_id: ctx.task_id.to_string(),
                    round,
                    thought: parsed.thought.clone(),
                    actions: actions.iter().map(ActionCall::qualified_name).collect(),
                })
                .await;

            let results = self.dispatch(ctx, &actions).await;
            let subtask = ActionsSubtask {
                round,
                thought: parsed.thought,
                actions,
                results,
            };

            ctx.events
                .emit(RunEvent::SubtaskFinished {
                    timestamp: Utc::now(),
                    task_id: ctx.task_id.to_string(),
                    round,
                    results: subtask.results.iter().map(Artifact::to_text).collect(),
                })
                .await;
            tracing::debug!(task = %ctx.task_id, round, errors = subtask.has_errors(), "Subtask finished");

            if !self.reflect_on_tool_use && !subtask.has_errors() {
                let output = results_list(&subtask.results)?;
                subtasks.push(subtask);
                return Ok((output, subtasks));
            }

            trace.push(Message::assistant(text));
            trace.push(Message::user(subtask.observation()));
            subtasks.push(subtask);
        }
    }

    /// Executes the actions of one round concurrently.
    ///
    /// Results come back in request order, matched by tag rather than by
    /// completion order.
    async fn dispatch(&self, ctx: &TaskContext, actions: &[ActionCall]) -> Vec<Artifact> {
        let mut results: HashMap<String, Artifact> = HashMap::new();
        let mut join_set = JoinSet::new();

        for action in actions {
            let tag = action.tag.clone().unwrap_or_default();

            if action.is_parse_error() {
                let message = action.input["error"].as_str().unwrap_or("invalid actions");
                results.insert(tag, Artifact::error(message));
                continue;
            }

            let activity = match self.tools.resolve(&action.name, &action.path) {
                Ok(activity) => activity.clone(),
                Err(e) => {
                    let error = ActionDispatchError::from_core(&action.name, &action.path, e);
                    tracing::debug!(task = %ctx.task_id, action = %action.qualified_name(), error = %error, "Action rejected");
                    results.insert(tag, error.to_artifact());
                    continue;
                }
            };

            let input = action.input.clone();
            let tool = action.name.clone();
            let path = action.path.clone();
            let task_memory = ctx.task_memory.clone();

            join_set.spawn(async move {
                let result = match activity.invoke(input).await {
                    Ok(artifact) if activity.off_prompt && !artifact.is_error() => {
                        task_memory.store(&format!("{}.{}", tool, path), artifact)
                    }
                    Ok(artifact) => artifact,
                    Err(e) => ActionDispatchError::from_core(&tool, &path, e).to_artifact(),
                };
                (tag, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((tag, artifact)) => {
                    results.insert(tag, artifact);
                }
                Err(e) => tracing::warn!(task = %ctx.task_id, error = %e, "Action panicked"),
            }
        }

        actions
            .iter()
            .map(|action| {
                let tag = action.tag.clone().unwrap_or_default();
                results
                    .remove(&tag)
                    .unwrap_or_else(|| Artifact::error(format!("Action '{}' did not complete", tag)))
            })
            .collect()
    }
}

/// Gives every action a unique tag, keeping caller tags where possible.
fn assign_tags(round: usize, actions: Vec<ActionCall>) -> Vec<ActionCall> {
    let mut seen: HashSet<String> = HashSet::new();
    actions
        .into_iter()
        .enumerate()
        .map(|(i, mut action)| {
            let mut tag = match action.tag.take() {
                Some(tag) if !tag.is_empty() && !seen.contains(&tag) => tag,
                _ => format!("action-{}-{}", round, i + 1),
            };
            while seen.contains(&tag) {
                tag.push('\'');
            }
            seen.insert(tag.clone());
            action.tag = Some(tag);
            action
        })
        .collect()
}

/// List output for runs without reflection. Mixed kinds fall back to text items.
fn results_list(results: &[Artifact]) -> Result<Artifact, TaskError> {
    match Artifact::list(results.to_vec()) {
        Ok(list) => Ok(list),
        Err(_) => Ok(Artifact::list(
            results.iter().map(|r| Artifact::text(r.to_text())).collect(),
        )?),
    }
}
