//! Deterministic prompt drivers.

use super::{ChunkCallback, PromptDriver};
use crate::artifact::Artifact;
use crate::error::{Result, WeaveError};
use crate::prompt::{PromptStack, Role};
use crate::tokenizer::{SimpleTokenizer, Tokenizer};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

const DEFAULT_MAX_INPUT_TOKENS: usize = 4096;

#[derive(Clone, Debug)]
enum Scripted {
    Text(String),
    Fail(String),
}

/// Replays a queue of canned responses.
///
/// Every prompt stack it receives is recorded for later inspection. When the
/// queue is empty the fallback response is used; without a fallback the
/// driver fails.
///
/// # Example
///
/// ```
/// use weave_core::drivers::{PromptDriver, ScriptedPromptDriver};
/// use weave_core::prompt::PromptStack;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let driver = ScriptedPromptDriver::new(["first", "second"]);
/// let stack = PromptStack::new();
/// assert_eq!(driver.run(&stack).await.unwrap().to_text(), "first");
/// assert_eq!(driver.run(&stack).await.unwrap().to_text(), "second");
/// assert_eq!(driver.calls(), 2);
/// # });
/// ```
pub struct ScriptedPromptDriver {
    responses: Mutex<VecDeque<Scripted>>,
    fallback: Option<String>,
    stacks: Mutex<Vec<PromptStack>>,
    tokenizer: SimpleTokenizer,
    model: String,
}

impl ScriptedPromptDriver {
    /// Creates a driver answering with `responses` in order.
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|r| Scripted::Text(r.into()))
                    .collect(),
            ),
            fallback: None,
            stacks: Mutex::new(Vec::new()),
            tokenizer: SimpleTokenizer::new(DEFAULT_MAX_INPUT_TOKENS),
            model: "scripted".to_string(),
        }
    }

    /// Response used once the queue runs dry.
    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    /// Replaces the tokenizer.
    pub fn with_tokenizer(mut self, tokenizer: SimpleTokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Queues another response.
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("scripted responses lock poisoned")
            .push_back(Scripted::Text(response.into()));
    }

    /// Queues a driver failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .expect("scripted responses lock poisoned")
            .push_back(Scripted::Fail(message.into()));
    }

    /// Prompt stacks received so far.
    pub fn stacks(&self) -> Vec<PromptStack> {
        self.stacks
            .lock()
            .expect("scripted stacks lock poisoned")
            .clone()
    }

    /// Number of calls made.
    pub fn calls(&self) -> usize {
        self.stacks
            .lock()
            .expect("scripted stacks lock poisoned")
            .len()
    }

    fn next_response(&self, stack: &PromptStack) -> Result<String> {
        self.stacks
            .lock()
            .expect("scripted stacks lock poisoned")
            .push(stack.clone());

        let next = self
            .responses
            .lock()
            .expect("scripted responses lock poisoned")
            .pop_front();

        match next {
            Some(Scripted::Text(text)) => Ok(text),
            Some(Scripted::Fail(message)) => Err(WeaveError::Driver(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| WeaveError::Driver("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl PromptDriver for ScriptedPromptDriver {
    async fn run(&self, stack: &PromptStack) -> Result<Artifact> {
        self.next_response(stack).map(Artifact::text)
    }

    async fn run_stream(&self, stack: &PromptStack, on_chunk: ChunkCallback<'_>) -> Result<Artifact> {
        let text = self.next_response(stack)?;
        for chunk in text.split_inclusive(' ') {
            on_chunk(&Artifact::text(chunk));
        }
        Ok(Artifact::text(text))
    }

    fn tokenizer(&self) -> &dyn Tokenizer {
        &self.tokenizer
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Answers with the content of the last user message.
#[derive(Clone, Debug)]
pub struct EchoPromptDriver {
    tokenizer: SimpleTokenizer,
}

impl EchoPromptDriver {
    pub fn new() -> Self {
        Self {
            tokenizer: SimpleTokenizer::new(DEFAULT_MAX_INPUT_TOKENS),
        }
    }
}

impl Default for EchoPromptDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PromptDriver for EchoPromptDriver {
    async fn run(&self, stack: &PromptStack) -> Result<Artifact> {
        let content = stack
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(Artifact::text(content))
    }

    fn tokenizer(&self) -> &dyn Tokenizer {
        &self.tokenizer
    }

    fn model(&self) -> &str {
        "echo"
    }
}
