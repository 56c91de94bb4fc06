//! Task running a caller-supplied async function.

use super::{TaskBehavior, TaskContext, TaskKind, TaskOutcome};
use crate::error::TaskError;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use weave_core::Artifact;

type CodeFuture = Pin<Box<dyn Future<Output = Result<Artifact, TaskError>> + Send>>;

/// Task whose core effect is an async closure.
///
/// # Example
///
/// ```
/// use weave_agent::task::CodeTask;
/// use weave_core::Artifact;
///
/// let task = CodeTask::new(|ctx| async move {
///     Ok(Artifact::text(ctx.input.to_text().to_uppercase()))
/// });
/// ```
pub struct CodeTask {
    f: Box<dyn Fn(TaskContext) -> CodeFuture + Send + Sync>,
}

impl CodeTask {
    /// Creates a new CodeTask with the given async function.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Artifact, TaskError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |ctx| Box::pin(f(ctx)) as CodeFuture),
        }
    }
}

#[async_trait]
impl TaskBehavior for CodeTask {
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        (self.f)(ctx.clone()).await.map(TaskOutcome::Output)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Code
    }
}
