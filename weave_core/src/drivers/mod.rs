//! Prompt driver contract.
//!
//! A prompt driver accepts a normalized [`PromptStack`] and returns the
//! model's response as an [`Artifact`]. Concrete backends live outside
//! this crate; [`mock`] ships deterministic drivers for tests and demos.

pub mod mock;

use crate::artifact::Artifact;
use crate::error::Result;
use crate::prompt::PromptStack;
use crate::tokenizer::Tokenizer;
use async_trait::async_trait;

pub use mock::{EchoPromptDriver, ScriptedPromptDriver};

/// Callback receiving partial artifacts while a response streams.
pub type ChunkCallback<'a> = &'a (dyn Fn(&Artifact) + Send + Sync);

/// Model backend.
#[async_trait]
pub trait PromptDriver: Send + Sync {
    /// Sends the prompt stack and returns the full response.
    async fn run(&self, stack: &PromptStack) -> Result<Artifact>;

    /// Streaming variant.
    ///
    /// Calls `on_chunk` for every partial artifact and returns the assembled
    /// response. The default implementation emits the whole response as a
    /// single chunk.
    async fn run_stream(&self, stack: &PromptStack, on_chunk: ChunkCallback<'_>) -> Result<Artifact> {
        let output = self.run(stack).await?;
        on_chunk(&output);
        Ok(output)
    }

    /// Tokenizer matching the backend's accounting.
    fn tokenizer(&self) -> &dyn Tokenizer;

    /// Model name, used in logs.
    fn model(&self) -> &str;
}
