//! Model-backed task: renders a prompt stack and calls the prompt driver.

use super::{TaskBehavior, TaskContext, TaskKind, TaskOutcome};
use crate::error::TaskError;
use crate::events::RunEvent;
use crate::subtask::parser::extract_json;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use weave_core::rules::render_rulesets;
use weave_core::tool::validate_against;
use weave_core::{Artifact, Message, PromptDriver, PromptStack, WeaveError};

/// Task that sends its input to the model and returns the response.
///
/// With an output schema, the response's JSON is validated; failures are
/// fed back to the model until `max_validation_attempts` is reached.
#[derive(Clone, Debug, Default)]
pub struct PromptTask {
    output_schema: Option<Value>,
}

impl PromptTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the response to be JSON matching `schema`.
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn output_schema(&self) -> Option<&Value> {
        self.output_schema.as_ref()
    }

    async fn run_validated(
        &self,
        ctx: &TaskContext,
        driver: &dyn PromptDriver,
        extra_system: Option<String>,
        schema: &Value,
    ) -> Result<Artifact, TaskError> {
        let attempts = ctx.settings.max_validation_attempts;
        let mut last_error = String::new();
        let mut trace: Vec<Message> = Vec::new();

        for attempt in 1..=attempts {
            let stack =
                build_prompt_stack(ctx, driver, extra_system.clone(), Vec::new(), &trace).await;
            let response = call_driver(ctx, driver, &stack).await?;
            let text = response.to_text();

            let checked = match extract_json(&text) {
                Some(value) => match validate_against(schema, &value) {
                    Ok(()) => Ok(value),
                    Err(WeaveError::InvalidSchema(e)) => {
                        return Err(WeaveError::InvalidSchema(e).into());
                    }
                    Err(e) => Err(e.to_string()),
                },
                None => Err("response did not contain a JSON value".to_string()),
            };

            match checked {
                Ok(value) => return Ok(Artifact::json(value)),
                Err(message) => {
                    tracing::debug!(task = %ctx.task_id, attempt, %message, "Structured output rejected");
                    trace.push(Message::assistant(text));
                    trace.push(Message::user(format!(
                        "Your response did not match the required output schema: {}. \
                         Respond again with only a JSON value that matches the schema.",
                        message
                    )));
                    last_error = message;
                }
            }
        }

        Err(TaskError::Validation {
            attempts,
            message: last_error,
        })
    }
}

#[async_trait]
impl TaskBehavior for PromptTask {
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        let driver = ctx.require_driver()?;
        let extra = self.output_schema.as_ref().map(|schema| {
            format!(
                "Respond with a single JSON value that matches this schema: {}",
                schema
            )
        });
        let output = match &self.output_schema {
            Some(schema) => self.run_validated(ctx, driver.as_ref(), extra, schema).await?,
            None => {
                let stack = build_prompt_stack(ctx, driver.as_ref(), extra, Vec::new(), &[]).await;
                call_driver(ctx, driver.as_ref(), &stack).await?
            }
        };
        Ok(TaskOutcome::Output(output))
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Prompt
    }
}

/// Builds the prompt stack for a model-backed task.
///
/// Order: one system message (rulesets, then `extra_system`), the fitting
/// conversation runs, the task input as the user message, then `trace`.
/// Memory is pruned against the complete stack, action schemas included.
pub(crate) async fn build_prompt_stack(
    ctx: &TaskContext,
    driver: &dyn PromptDriver,
    extra_system: Option<String>,
    actions: Vec<Value>,
    trace: &[Message],
) -> PromptStack {
    let mut stack = PromptStack::new();

    let system: Vec<String> = render_rulesets(&ctx.rulesets)
        .into_iter()
        .chain(extra_system)
        .collect();
    if !system.is_empty() {
        stack.add_system(system.join("\n\n"));
    }
    stack.add_user(ctx.input.to_text());
    stack.messages.extend(trace.iter().cloned());
    stack.actions = actions;

    if let Some(memory) = &ctx.memory {
        let memory = memory.lock().await;
        let included = memory.add_to_prompt_stack(
            &mut stack,
            driver.tokenizer(),
            ctx.settings.memory.reserved_tokens,
        );
        tracing::debug!(task = %ctx.task_id, included, "Added conversation memory to prompt");
    }

    stack
}

/// Sends a stack to the driver, streaming when the settings ask for it.
///
/// Streamed chunks are recorded as `CompletionChunk` events once the
/// response is complete.
pub(crate) async fn call_driver(
    ctx: &TaskContext,
    driver: &dyn PromptDriver,
    stack: &PromptStack,
) -> Result<Artifact, TaskError> {
    tracing::debug!(task = %ctx.task_id, model = driver.model(), messages = stack.len(), "Calling prompt driver");

    if !ctx.settings.stream {
        return Ok(driver.run(stack).await?);
    }

    let chunks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = chunks.clone();
    let on_chunk = move |chunk: &Artifact| {
        sink.lock()
            .expect("completion chunk lock poisoned")
            .push(chunk.to_text());
    };
    let output = driver.run_stream(stack, &on_chunk).await?;

    let chunks = std::mem::take(&mut *chunks.lock().expect("completion chunk lock poisoned"));
    for chunk in chunks {
        ctx.events
            .emit(RunEvent::CompletionChunk {
                timestamp: Utc::now(),
                task_id: ctx.task_id.to_string(),
                chunk,
            })
            .await;
    }
    Ok(output)
}
