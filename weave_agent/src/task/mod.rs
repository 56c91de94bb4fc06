//! Task model: identity, graph links, state machine and run contract.
//!
//! A [`Task`] is a node in a structure's graph. What it does when it runs
//! is delegated to a [`TaskBehavior`]; the built-in behaviors are
//! [`PromptTask`], [`ToolkitTask`], [`CodeTask`] and [`BranchTask`].
//!
//! Tasks never own their structure. A task added to a structure only keeps
//! the structure's id, and [`TaskHandle`] identifies a task object by a
//! per-object uid in addition to its id.

mod branch;
mod code;
mod prompt;
mod toolkit;

pub use branch::BranchTask;
pub use code::CodeTask;
pub use prompt::PromptTask;
pub use toolkit::ToolkitTask;

pub(crate) use prompt::{build_prompt_stack, call_driver};

use crate::error::TaskError;
use crate::events::EventLog;
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;
use weave_core::{Artifact, PromptDriver, Ruleset, Settings, SharedMemory, TaskMemory};

/// Template used when a task does not set one.
pub const DEFAULT_INPUT_TEMPLATE: &str = "{{ args[0] }}";

/// Unique identifier for a task within a structure.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new TaskId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a random TaskId.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the underlying string identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the TaskId and returns the underlying string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&TaskId> for TaskId {
    fn from(id: &TaskId) -> Self {
        id.clone()
    }
}

/// Execution state of a task.
///
/// `Pending -> Running -> {Finished, Error}`, or `Pending -> Skipped` when a
/// branch decision excludes the task. Reset returns any state to `Pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Finished,
    Error,
    Skipped,
}

impl TaskState {
    /// Finished, Error and Skipped are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Error | TaskState::Skipped)
    }

    /// Whether a child may start once every parent is in this state.
    pub fn unblocks_children(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Skipped)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
            TaskState::Error => "ERROR",
            TaskState::Skipped => "SKIPPED",
        };
        f.write_str(name)
    }
}

/// Kind of a task behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Prompt,
    Toolkit,
    Code,
    Branch,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Prompt => "prompt",
            TaskKind::Toolkit => "toolkit",
            TaskKind::Code => "code",
            TaskKind::Branch => "branch",
        };
        f.write_str(name)
    }
}

/// Non-owning reference to a task registered in a structure.
///
/// Two handles are equal only if they point at the same task object, not
/// merely at tasks with equal ids.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    /// Owning structure
    pub structure: Uuid,
    /// Identity of the task object
    pub uid: Uuid,
    /// Task id
    pub id: TaskId,
}

/// Synchronous hook receiving the task id and the artifact it may rewrite.
pub type Hook = Arc<dyn Fn(&TaskId, &mut Artifact) + Send + Sync>;

/// Result of a task behavior.
#[derive(Clone, Debug)]
pub enum TaskOutcome {
    /// Plain output artifact.
    Output(Artifact),
    /// Branch decision: output plus the ids of the children to activate.
    Branch {
        output: Artifact,
        selected: Vec<TaskId>,
    },
}

impl TaskOutcome {
    /// The output artifact.
    pub fn output(&self) -> &Artifact {
        match self {
            TaskOutcome::Output(output) | TaskOutcome::Branch { output, .. } => output,
        }
    }
}

/// The core effect of a task.
#[async_trait]
pub trait TaskBehavior: Send + Sync {
    /// Runs the task body with a fully prepared context.
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, TaskError>;

    /// Behavior kind.
    fn kind(&self) -> TaskKind;
}

/// Execution context handed to a task behavior.
///
/// Built by the scheduler right before the task runs: the input is already
/// rendered and passed through the before-run hook.
#[derive(Clone)]
pub struct TaskContext {
    /// Owning structure id
    pub structure_id: Uuid,
    /// Running task id
    pub task_id: TaskId,
    /// Rendered input
    pub input: Artifact,
    /// Parent outputs keyed by parent id, in declaration order
    pub parent_outputs: IndexMap<TaskId, Artifact>,
    /// Declared children
    pub child_ids: Vec<TaskId>,
    /// Effective rulesets, structure rulesets first
    pub rulesets: Vec<Ruleset>,
    /// Conversation memory rendered into prompts
    pub memory: Option<SharedMemory>,
    /// Off-prompt artifact store
    pub task_memory: TaskMemory,
    /// Model backend
    pub prompt_driver: Option<Arc<dyn PromptDriver>>,
    /// Structure settings
    pub settings: Arc<Settings>,
    /// Event log of the current run
    pub events: EventLog,
}

impl TaskContext {
    /// Creates a context with default settings and no collaborators.
    pub fn new(task_id: impl Into<TaskId>, input: Artifact) -> Self {
        Self {
            structure_id: Uuid::nil(),
            task_id: task_id.into(),
            input,
            parent_outputs: IndexMap::new(),
            child_ids: Vec::new(),
            rulesets: Vec::new(),
            memory: None,
            task_memory: TaskMemory::default(),
            prompt_driver: None,
            settings: Arc::new(Settings::default()),
            events: EventLog::new(),
        }
    }

    pub fn with_prompt_driver(mut self, driver: Arc<dyn PromptDriver>) -> Self {
        self.prompt_driver = Some(driver);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn with_memory(mut self, memory: SharedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_task_memory(mut self, task_memory: TaskMemory) -> Self {
        self.task_memory = task_memory;
        self
    }

    pub fn with_rulesets(mut self, rulesets: Vec<Ruleset>) -> Self {
        self.rulesets = rulesets;
        self
    }

    pub fn with_children(mut self, child_ids: Vec<TaskId>) -> Self {
        self.child_ids = child_ids;
        self
    }

    pub fn with_parent_output(mut self, parent: impl Into<TaskId>, output: Artifact) -> Self {
        self.parent_outputs.insert(parent.into(), output);
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Returns the prompt driver or fails with `NoPromptDriver`.
    pub fn require_driver(&self) -> Result<Arc<dyn PromptDriver>, TaskError> {
        self.prompt_driver
            .clone()
            .ok_or_else(|| TaskError::NoPromptDriver(self.task_id.clone()))
    }
}

/// A node in a structure's task graph.
///
/// # Example
///
/// ```
/// use weave_agent::task::{Task, TaskState};
///
/// let task = Task::prompt("summarize")
///     .with_template("Summarize: {{ parent_output }}")
///     .with_parent("fetch");
/// assert_eq!(task.state(), TaskState::Pending);
/// assert_eq!(task.parent_ids().len(), 1);
/// ```
#[derive(Clone)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) uid: Uuid,
    pub(crate) parent_ids: IndexSet<TaskId>,
    pub(crate) child_ids: IndexSet<TaskId>,
    pub(crate) state: TaskState,
    pub(crate) template: String,
    pub(crate) context: Map<String, Value>,
    pub(crate) rulesets: Vec<Ruleset>,
    pub(crate) input: Option<Artifact>,
    pub(crate) output: Option<Artifact>,
    pub(crate) memory: Option<SharedMemory>,
    pub(crate) prompt_driver: Option<Arc<dyn PromptDriver>>,
    pub(crate) on_before_run: Option<Hook>,
    pub(crate) on_after_run: Option<Hook>,
    pub(crate) behavior: Arc<dyn TaskBehavior>,
    pub(crate) structure: Option<Uuid>,
}

impl Task {
    /// Creates a task with a custom behavior.
    pub fn new(id: impl Into<TaskId>, behavior: impl TaskBehavior + 'static) -> Self {
        Self {
            id: id.into(),
            uid: Uuid::new_v4(),
            parent_ids: IndexSet::new(),
            child_ids: IndexSet::new(),
            state: TaskState::Pending,
            template: DEFAULT_INPUT_TEMPLATE.to_string(),
            context: Map::new(),
            rulesets: Vec::new(),
            input: None,
            output: None,
            memory: None,
            prompt_driver: None,
            on_before_run: None,
            on_after_run: None,
            behavior: Arc::new(behavior),
            structure: None,
        }
    }

    /// Creates a prompt task.
    pub fn prompt(id: impl Into<TaskId>) -> Self {
        Self::new(id, PromptTask::new())
    }

    /// Creates a toolkit task.
    pub fn toolkit(id: impl Into<TaskId>, toolkit: ToolkitTask) -> Self {
        Self::new(id, toolkit)
    }

    /// Creates a code task from an async function.
    pub fn code<F, Fut>(id: impl Into<TaskId>, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Artifact, TaskError>> + Send + 'static,
    {
        Self::new(id, CodeTask::new(f))
    }

    /// Creates a branch task from an async decision function.
    pub fn branch<F, Fut>(id: impl Into<TaskId>, decide: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<TaskId>, TaskError>> + Send + 'static,
    {
        Self::new(id, BranchTask::new(decide))
    }

    /// Sets the input template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Adds a task-local template variable.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Declares a parent.
    pub fn with_parent(mut self, id: impl Into<TaskId>) -> Self {
        self.parent_ids.insert(id.into());
        self
    }

    /// Declares a child.
    pub fn with_child(mut self, id: impl Into<TaskId>) -> Self {
        self.child_ids.insert(id.into());
        self
    }

    /// Adds a task-level ruleset.
    pub fn with_ruleset(mut self, ruleset: Ruleset) -> Self {
        self.rulesets.push(ruleset);
        self
    }

    /// Gives the task its own conversation memory.
    ///
    /// It takes precedence over the structure's memory for this task's
    /// prompts, and records a run when the task finishes.
    pub fn with_memory(mut self, memory: SharedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Overrides the structure's prompt driver.
    pub fn with_prompt_driver(mut self, driver: Arc<dyn PromptDriver>) -> Self {
        self.prompt_driver = Some(driver);
        self
    }

    /// Sets the hook called before the core effect; it may rewrite the input.
    pub fn on_before_run(mut self, hook: impl Fn(&TaskId, &mut Artifact) + Send + Sync + 'static) -> Self {
        self.on_before_run = Some(Arc::new(hook));
        self
    }

    /// Sets the hook called after the core effect; it may rewrite the output.
    pub fn on_after_run(mut self, hook: impl Fn(&TaskId, &mut Artifact) + Send + Sync + 'static) -> Self {
        self.on_after_run = Some(Arc::new(hook));
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Identity of this task object.
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn parent_ids(&self) -> &IndexSet<TaskId> {
        &self.parent_ids
    }

    pub fn child_ids(&self) -> &IndexSet<TaskId> {
        &self.child_ids
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn kind(&self) -> TaskKind {
        self.behavior.kind()
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn rulesets(&self) -> &[Ruleset] {
        &self.rulesets
    }

    /// Output artifact, set once the task reaches a terminal state.
    pub fn output(&self) -> Option<&Artifact> {
        self.output.as_ref()
    }

    /// Input the task ran with, if it has started.
    pub fn frozen_input(&self) -> Option<&Artifact> {
        self.input.as_ref()
    }

    pub fn memory(&self) -> Option<&SharedMemory> {
        self.memory.as_ref()
    }

    /// Owning structure id, once the task has been added to one.
    pub fn structure_id(&self) -> Option<Uuid> {
        self.structure
    }

    /// Returns the task to `Pending` and clears input and output.
    pub fn reset(&mut self) {
        self.state = TaskState::Pending;
        self.input = None;
        self.output = None;
    }

    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Pending
    }

    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Finished
    }

    pub fn is_skipped(&self) -> bool {
        self.state == TaskState::Skipped
    }

    pub fn is_error(&self) -> bool {
        self.state == TaskState::Error
    }

    /// Handle to this task, once it belongs to a structure.
    pub fn handle(&self) -> Option<TaskHandle> {
        self.structure.map(|structure| TaskHandle {
            structure,
            uid: self.uid,
            id: self.id.clone(),
        })
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("state", &self.state)
            .field("parent_ids", &self.parent_ids)
            .field("child_ids", &self.child_ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id() {
        let id = TaskId::new("a");
        assert_eq!(id.as_str(), "a");
        assert_eq!(id.to_string(), "a");
        assert_eq!(TaskId::from("a"), id);
        assert_ne!(TaskId::generate(), TaskId::generate());
    }

    #[test]
    fn test_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Finished.is_terminal());
        assert!(TaskState::Error.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
        assert!(TaskState::Skipped.unblocks_children());
        assert!(!TaskState::Error.unblocks_children());
        assert_eq!(TaskState::Finished.to_string(), "FINISHED");
    }

    #[test]
    fn test_builder_links() {
        let task = Task::prompt("b").with_parent("a").with_parent("a").with_child("c");
        assert_eq!(task.parent_ids().len(), 1);
        assert_eq!(task.child_ids().iter().next(), Some(&TaskId::new("c")));
        assert_eq!(task.kind(), TaskKind::Prompt);
        assert!(task.handle().is_none());
    }

    #[test]
    fn test_reset() {
        let mut task = Task::prompt("a");
        task.state = TaskState::Error;
        task.output = Some(Artifact::error("boom"));
        task.input = Some(Artifact::text("in"));

        task.reset();
        assert!(task.is_pending());
        assert!(task.output().is_none());
        assert!(task.frozen_input().is_none());
    }

    #[test]
    fn test_clones_keep_identity_fields() {
        let task = Task::prompt("a");
        let copy = task.clone();
        assert_eq!(task.uid(), copy.uid());
        assert_ne!(task.uid(), Task::prompt("a").uid());
    }
}
