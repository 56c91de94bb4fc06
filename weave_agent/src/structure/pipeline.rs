//! Linear chain of tasks.

use super::{Structure, StructureConfig, StructureKind};
use crate::error::StructureError;
use crate::task::{Task, TaskHandle};
use indexmap::IndexSet;
use std::ops::{Deref, DerefMut};

/// Structure whose tasks form a single chain.
///
/// Each added task becomes the only child of the previous last task, so
/// links declared on the task itself are replaced.
///
/// # Example
///
/// ```
/// use weave_agent::structure::{Pipeline, StructureConfig};
/// use weave_agent::task::Task;
///
/// let mut pipeline = Pipeline::new(StructureConfig::new());
/// pipeline.add_task(Task::prompt("draft")).unwrap();
/// pipeline.add_task(Task::prompt("review")).unwrap();
/// assert_eq!(pipeline.output_task().unwrap().id().as_str(), "review");
/// ```
#[derive(Debug)]
pub struct Pipeline {
    inner: Structure,
}

impl Pipeline {
    pub fn new(config: StructureConfig) -> Self {
        Self {
            inner: Structure::new(StructureKind::Pipeline, config),
        }
    }

    /// Builder form of [`Pipeline::add_tasks`].
    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Result<Self, StructureError> {
        self.add_tasks(tasks)?;
        Ok(self)
    }

    /// Appends a task to the end of the chain.
    ///
    /// # Errors
    ///
    /// Returns `StructureError::DuplicateTask` if the id is taken.
    pub fn add_task(&mut self, mut task: Task) -> Result<TaskHandle, StructureError> {
        if self.inner.position(&task.id).is_some() {
            return Err(StructureError::DuplicateTask(task.id));
        }

        task.parent_ids.clear();
        task.child_ids.clear();
        if let Some(last) = self.inner.tasks.last_mut() {
            last.child_ids = IndexSet::from([task.id.clone()]);
            task.parent_ids.insert(last.id.clone());
        }
        Ok(self.inner.attach(task))
    }

    pub fn add_tasks(&mut self, tasks: Vec<Task>) -> Result<Vec<TaskHandle>, StructureError> {
        tasks.into_iter().map(|task| self.add_task(task)).collect()
    }

    /// Splices `task` into the chain right after `after`.
    ///
    /// # Errors
    ///
    /// - `StructureError::ForeignHandle` if `after` is not a task of this pipeline
    /// - `StructureError::TaskNotFound` if no task has the handle's id
    /// - `StructureError::DuplicateTask` if the new id is taken
    pub fn insert_task(&mut self, after: &TaskHandle, mut task: Task) -> Result<TaskHandle, StructureError> {
        let idx = self.inner.check_handle(after)?;
        if self.inner.position(&task.id).is_some() {
            return Err(StructureError::DuplicateTask(task.id));
        }

        let next = self.inner.tasks[idx].child_ids.first().cloned();
        task.parent_ids = IndexSet::from([after.id.clone()]);
        task.child_ids = next.iter().cloned().collect();
        self.inner.tasks[idx].child_ids = IndexSet::from([task.id.clone()]);

        if let Some(next_idx) = next.and_then(|id| self.inner.position(&id)) {
            self.inner.tasks[next_idx].parent_ids = IndexSet::from([task.id.clone()]);
        }

        let handle = self.inner.attach(task);
        // Keep table order equal to chain order.
        if let Some(task) = self.inner.tasks.pop() {
            self.inner.tasks.insert(idx + 1, task);
        }
        Ok(handle)
    }

    pub fn into_inner(self) -> Structure {
        self.inner
    }
}

impl Deref for Pipeline {
    type Target = Structure;

    fn deref(&self) -> &Structure {
        &self.inner
    }
}

impl DerefMut for Pipeline {
    fn deref_mut(&mut self) -> &mut Structure {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::structure::StructureStatus;
    use crate::task::{TaskContext, TaskId, TaskState};
    use weave_core::Artifact;

    fn upper(id: &str) -> Task {
        Task::code(id, |ctx: TaskContext| async move {
            Ok(Artifact::text(ctx.input.to_text().to_uppercase()))
        })
        .with_template("{{ parent_output or args[0] }}")
    }

    fn suffix(id: &str, s: &'static str) -> Task {
        Task::code(id, move |ctx: TaskContext| async move {
            Ok(Artifact::text(format!("{}{}", ctx.input, s)))
        })
        .with_template("{{ parent_output }}")
    }

    #[test]
    fn test_add_task_chains() {
        let mut pipeline = Pipeline::new(StructureConfig::new());
        pipeline
            .add_tasks(vec![Task::prompt("a"), Task::prompt("b").with_child("x"), Task::prompt("c")])
            .unwrap();

        let b = pipeline.task("b").unwrap();
        assert_eq!(b.parent_ids().iter().collect::<Vec<_>>(), vec![&TaskId::new("a")]);
        assert_eq!(b.child_ids().iter().collect::<Vec<_>>(), vec![&TaskId::new("c")]);
        assert!(pipeline.task("c").unwrap().child_ids().is_empty());
        assert!(matches!(
            pipeline.add_task(Task::prompt("a")),
            Err(StructureError::DuplicateTask(_))
        ));
    }

    #[test]
    fn test_insert_task_rewires_both_sides() {
        let mut pipeline = Pipeline::new(StructureConfig::new());
        pipeline.add_task(Task::prompt("a")).unwrap();
        pipeline.add_task(Task::prompt("c")).unwrap();

        let a = pipeline.handle("a").unwrap();
        pipeline.insert_task(&a, Task::prompt("b")).unwrap();

        let ids: Vec<&str> = pipeline.tasks().iter().map(|t| t.id().as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(pipeline.task("a").unwrap().child_ids().contains(&TaskId::new("b")));
        assert!(!pipeline.task("a").unwrap().child_ids().contains(&TaskId::new("c")));
        assert!(pipeline.task("c").unwrap().parent_ids().contains(&TaskId::new("b")));
        assert_eq!(pipeline.graph().unwrap().topological_order().len(), 3);
    }

    #[test]
    fn test_insert_task_rejects_foreign_handle() {
        let mut first = Pipeline::new(StructureConfig::new());
        first.add_task(Task::prompt("a")).unwrap();
        let mut second = Pipeline::new(StructureConfig::new());
        second.add_task(Task::prompt("a")).unwrap();

        let foreign = second.handle("a").unwrap();
        assert!(matches!(
            first.insert_task(&foreign, Task::prompt("b")),
            Err(StructureError::ForeignHandle(_))
        ));
        assert_eq!(first.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_runs_in_order() {
        let mut pipeline = Pipeline::new(StructureConfig::new());
        pipeline
            .add_tasks(vec![upper("a"), suffix("b", "!"), suffix("c", "?")])
            .unwrap();

        let report = pipeline.run(vec!["hey".into()]).await.unwrap();
        assert_eq!(report.status, StructureStatus::Finished);
        assert_eq!(report.output.unwrap().to_text(), "HEY!?");
    }

    #[tokio::test]
    async fn test_fail_fast_leaves_rest_pending() {
        let mut pipeline = Pipeline::new(StructureConfig::new());
        pipeline
            .add_task(Task::code("a", |_| async {
                Err(TaskError::ExecutionFailed("bad input".into()))
            }))
            .unwrap();
        pipeline.add_task(suffix("b", "!")).unwrap();

        let report = pipeline.run(vec![]).await.unwrap();
        assert_eq!(report.status, StructureStatus::Halted);
        assert!(report.output.is_none());
        assert_eq!(pipeline.task("a").unwrap().state(), TaskState::Error);
        assert_eq!(pipeline.task("b").unwrap().state(), TaskState::Pending);
    }
}
