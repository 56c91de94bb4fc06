//! Branch task: picks which children run.

use super::{TaskBehavior, TaskContext, TaskId, TaskKind, TaskOutcome};
use crate::error::TaskError;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use weave_core::Artifact;

type DecisionFuture = Pin<Box<dyn Future<Output = Result<Vec<TaskId>, TaskError>> + Send>>;

/// Task delegating to a decision function that returns the children to
/// activate.
///
/// The scheduler checks the selection against the declared children: an
/// unknown id fails the task and leaves every child `Pending`; otherwise
/// the unselected children and their exclusive descendants are skipped.
/// Selecting no child at all is valid and skips every child.
pub struct BranchTask {
    decide: Box<dyn Fn(TaskContext) -> DecisionFuture + Send + Sync>,
}

impl BranchTask {
    pub fn new<F, Fut>(decide: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<TaskId>, TaskError>> + Send + 'static,
    {
        Self {
            decide: Box::new(move |ctx| Box::pin(decide(ctx)) as DecisionFuture),
        }
    }
}

#[async_trait]
impl TaskBehavior for BranchTask {
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        let selected = (self.decide)(ctx.clone()).await?;
        let names: Vec<&str> = selected.iter().map(TaskId::as_str).collect();
        let output = Artifact::info(format!("Selected branches: [{}]", names.join(", ")));
        Ok(TaskOutcome::Branch { output, selected })
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Branch
    }
}
