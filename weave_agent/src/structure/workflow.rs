//! Directed acyclic graph of tasks with parallel branches.

use super::{Structure, StructureConfig, StructureKind};
use crate::error::StructureError;
use crate::task::{Task, TaskHandle, TaskId};
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

/// Structure running an arbitrary task DAG.
///
/// Independent tasks run concurrently, up to `settings.max_concurrency`.
/// Links may reference tasks that are added later; they are checked when
/// the workflow runs.
///
/// # Example
///
/// ```
/// use weave_agent::structure::{StructureConfig, Workflow};
/// use weave_agent::task::Task;
///
/// let mut workflow = Workflow::new(StructureConfig::new());
/// workflow.add_task(Task::prompt("research")).unwrap();
/// workflow.add_task(Task::prompt("outline")).unwrap();
/// workflow
///     .add_task(Task::prompt("write").with_parent("research").with_parent("outline"))
///     .unwrap();
/// assert_eq!(workflow.graph().unwrap().input_tasks().len(), 2);
/// ```
#[derive(Debug)]
pub struct Workflow {
    inner: Structure,
}

impl Workflow {
    pub fn new(config: StructureConfig) -> Self {
        Self {
            inner: Structure::new(StructureKind::Workflow, config),
        }
    }

    /// Builder form of [`Workflow::add_tasks`].
    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Result<Self, StructureError> {
        self.add_tasks(tasks)?;
        Ok(self)
    }

    /// Adds a task and registers the reverse side of its links with tasks
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns `StructureError::DuplicateTask` if the id is taken.
    pub fn add_task(&mut self, mut task: Task) -> Result<TaskHandle, StructureError> {
        if self.inner.position(&task.id).is_some() {
            return Err(StructureError::DuplicateTask(task.id));
        }

        for existing in &mut self.inner.tasks {
            if task.parent_ids.contains(&existing.id) {
                existing.child_ids.insert(task.id.clone());
            }
            if task.child_ids.contains(&existing.id) {
                existing.parent_ids.insert(task.id.clone());
            }
            if existing.child_ids.contains(&task.id) {
                task.parent_ids.insert(existing.id.clone());
            }
            if existing.parent_ids.contains(&task.id) {
                task.child_ids.insert(existing.id.clone());
            }
        }
        Ok(self.inner.attach(task))
    }

    pub fn add_tasks(&mut self, tasks: Vec<Task>) -> Result<Vec<TaskHandle>, StructureError> {
        tasks.into_iter().map(|task| self.add_task(task)).collect()
    }

    /// Splices `middle` between the `before` and `after` tasks.
    ///
    /// Every `before -> after` edge is removed, then each before task becomes
    /// a parent of every middle task and each middle task a parent of every
    /// after task. Other edges are left alone. Nothing changes if any check
    /// fails.
    ///
    /// # Errors
    ///
    /// - `StructureError::ForeignHandle` if a handle does not point at the
    ///   task object registered in this workflow
    /// - `StructureError::TaskNotFound` if a handle's id is unknown
    /// - `StructureError::DuplicateTask` if a middle id is taken or repeated
    pub fn insert_tasks(
        &mut self,
        before: &[TaskHandle],
        middle: Vec<Task>,
        after: &[TaskHandle],
    ) -> Result<Vec<TaskHandle>, StructureError> {
        let before_idx = before
            .iter()
            .map(|h| self.inner.check_handle(h))
            .collect::<Result<Vec<_>, _>>()?;
        for handle in after {
            self.inner.check_handle(handle)?;
        }

        let mut seen: HashSet<&TaskId> = HashSet::new();
        for task in &middle {
            if self.inner.position(&task.id).is_some() || !seen.insert(&task.id) {
                return Err(StructureError::DuplicateTask(task.id.clone()));
            }
        }

        let before_ids: Vec<TaskId> = before.iter().map(|h| h.id.clone()).collect();
        let after_ids: Vec<TaskId> = after.iter().map(|h| h.id.clone()).collect();

        for task in &mut self.inner.tasks {
            if before_ids.contains(&task.id) {
                task.child_ids.retain(|c| !after_ids.contains(c));
            }
            if after_ids.contains(&task.id) {
                task.parent_ids.retain(|p| !before_ids.contains(p));
            }
        }

        let middle_ids: Vec<TaskId> = middle.iter().map(|t| t.id.clone()).collect();
        for task in &mut self.inner.tasks {
            if before_ids.contains(&task.id) {
                task.child_ids.extend(middle_ids.iter().cloned());
            }
            if after_ids.contains(&task.id) {
                task.parent_ids.extend(middle_ids.iter().cloned());
            }
        }

        // New tasks follow the last before task so ties keep reading order.
        let mut at = before_idx
            .iter()
            .max()
            .map(|&i| i + 1)
            .unwrap_or(self.inner.tasks.len());
        let mut handles = Vec::with_capacity(middle.len());
        for mut task in middle {
            task.parent_ids.extend(before_ids.iter().cloned());
            task.child_ids.extend(after_ids.iter().cloned());
            handles.push(self.inner.attach(task));
            if let Some(task) = self.inner.tasks.pop() {
                self.inner.tasks.insert(at, task);
            }
            at += 1;
        }
        Ok(handles)
    }

    pub fn into_inner(self) -> Structure {
        self.inner
    }
}

impl Deref for Workflow {
    type Target = Structure;

    fn deref(&self) -> &Structure {
        &self.inner
    }
}

impl DerefMut for Workflow {
    fn deref_mut(&mut self) -> &mut Structure {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(set: &indexmap::IndexSet<TaskId>) -> Vec<&str> {
        set.iter().map(TaskId::as_str).collect()
    }

    #[test]
    fn test_add_task_registers_reverse_links() {
        let mut workflow = Workflow::new(StructureConfig::new());
        workflow.add_task(Task::prompt("a").with_child("b")).unwrap();
        workflow.add_task(Task::prompt("b")).unwrap();
        workflow.add_task(Task::prompt("c").with_parent("b")).unwrap();

        assert_eq!(ids(workflow.task("b").unwrap().parent_ids()), vec!["a"]);
        assert_eq!(ids(workflow.task("b").unwrap().child_ids()), vec!["c"]);
    }

    #[test]
    fn test_insert_tasks_splices_and_keeps_other_edges() {
        let mut workflow = Workflow::new(StructureConfig::new());
        workflow
            .add_tasks(vec![
                Task::prompt("a"),
                Task::prompt("b").with_parent("a"),
                Task::prompt("side").with_parent("a"),
            ])
            .unwrap();

        let a = workflow.handle("a").unwrap();
        let b = workflow.handle("b").unwrap();
        let handles = workflow
            .insert_tasks(&[a], vec![Task::prompt("m1"), Task::prompt("m2")], &[b])
            .unwrap();
        assert_eq!(handles.len(), 2);

        assert_eq!(ids(workflow.task("a").unwrap().child_ids()), vec!["side", "m1", "m2"]);
        assert_eq!(ids(workflow.task("b").unwrap().parent_ids()), vec!["m1", "m2"]);
        assert_eq!(ids(workflow.task("m1").unwrap().parent_ids()), vec!["a"]);
        assert_eq!(ids(workflow.task("m2").unwrap().child_ids()), vec!["b"]);

        let graph = workflow.graph().unwrap();
        assert!(!graph.has_edge(&TaskId::new("a"), &TaskId::new("b")));
        assert!(graph.has_edge(&TaskId::new("a"), &TaskId::new("side")));
    }

    #[test]
    fn test_insert_tasks_checks_identity() {
        let mut workflow = Workflow::new(StructureConfig::new());
        workflow.add_task(Task::prompt("a")).unwrap();
        workflow.add_task(Task::prompt("b").with_parent("a")).unwrap();

        let stale = workflow.handle("a").unwrap();
        let mut other = Workflow::new(StructureConfig::new());
        other.add_task(Task::prompt("a")).unwrap();
        let same_id_other_object = other.handle("a").unwrap();
        let b = workflow.handle("b").unwrap();

        assert!(matches!(
            workflow.insert_tasks(&[same_id_other_object], vec![Task::prompt("m")], &[b.clone()]),
            Err(StructureError::ForeignHandle(_))
        ));

        let forged = TaskHandle {
            uid: uuid::Uuid::new_v4(),
            ..stale
        };
        assert!(matches!(
            workflow.insert_tasks(&[forged], vec![Task::prompt("m")], &[b.clone()]),
            Err(StructureError::ForeignHandle(_))
        ));

        let a = workflow.handle("a").unwrap();
        assert!(matches!(
            workflow.insert_tasks(&[a], vec![Task::prompt("b")], &[b]),
            Err(StructureError::DuplicateTask(_))
        ));
        assert!(workflow.task("m").is_none());
        assert_eq!(ids(workflow.task("a").unwrap().child_ids()), vec!["b"]);
    }
}
