//! Structures: task tables with a shared scheduler.
//!
//! [`Agent`], [`Pipeline`] and [`Workflow`] only differ in how tasks are
//! added and wired. All three run through [`Structure::run`]:
//!
//! 1. Settings are validated and the graph is resolved. Graph errors are
//!    returned before any task is touched.
//! 2. Every task is reset to `Pending`.
//! 3. Ready tasks (all parents terminal and unblocking) are launched in
//!    topological order, one at a time for agents and pipelines and up to
//!    `max_concurrency` at once for workflows.
//! 4. The run's status is computed and the (input, output) pair is recorded
//!    into conversation memory.

mod agent;
mod pipeline;
mod workflow;

pub use agent::{Agent, AGENT_TASK_ID};
pub use pipeline::Pipeline;
pub use workflow::Workflow;

use crate::error::{StructureError, TaskError};
use crate::events::{EventLog, RunEvent};
use crate::graph::{GraphResolver, TaskGraph};
use crate::task::{Task, TaskContext, TaskHandle, TaskId, TaskKind, TaskOutcome, TaskState};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;
use weave_core::memory::MemoryDriver;
use weave_core::rules::effective_rulesets;
use weave_core::{
    template, Artifact, ConversationMemory, PromptDriver, Ruleset, Run, Settings, SharedMemory,
    TaskMemory, WeaveError,
};

/// Execution strategy of a structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureKind {
    Agent,
    Pipeline,
    Workflow,
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StructureKind::Agent => "Agent",
            StructureKind::Pipeline => "Pipeline",
            StructureKind::Workflow => "Workflow",
        };
        f.write_str(name)
    }
}

/// Overall state of a structure after its last run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureStatus {
    /// Never run
    Pending,
    /// Every task finished or was skipped
    Finished,
    /// Every task is terminal and at least one errored (fail-fast disabled)
    FinishedWithErrors,
    /// Fail-fast stopped the run after a task error
    Halted,
    /// Some tasks can never start, e.g. below a failed branch decision
    Stuck,
}

impl fmt::Display for StructureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StructureStatus::Pending => "pending",
            StructureStatus::Finished => "finished",
            StructureStatus::FinishedWithErrors => "finished_with_errors",
            StructureStatus::Halted => "halted",
            StructureStatus::Stuck => "stuck",
        };
        f.write_str(name)
    }
}

/// Summary returned by [`Structure::run`].
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Id of this run, also the event log id
    pub run_id: Uuid,
    /// Final status
    pub status: StructureStatus,
    /// Output task's output; absent when halted or stuck before it
    pub output: Option<Artifact>,
}

/// Collaborators and settings threaded through structure construction.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use weave_agent::structure::StructureConfig;
/// use weave_core::{EchoPromptDriver, Settings};
///
/// let mut settings = Settings::default();
/// settings.fail_fast = false;
/// let config = StructureConfig::new()
///     .with_settings(settings)
///     .with_prompt_driver(Arc::new(EchoPromptDriver::new()));
/// assert!(config.conversation_memory.is_none());
/// ```
#[derive(Clone, Default)]
pub struct StructureConfig {
    /// Execution settings
    pub settings: Settings,
    /// Default prompt driver for model-backed tasks
    pub prompt_driver: Option<Arc<dyn PromptDriver>>,
    /// Structure-level rulesets
    pub rulesets: Vec<Ruleset>,
    /// Conversation memory; created from settings when absent and enabled
    pub conversation_memory: Option<SharedMemory>,
    /// Off-prompt artifact store shared with other structures. When absent
    /// the structure owns a private store that is cleared at every run.
    pub task_memory: Option<TaskMemory>,
}

impl StructureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_prompt_driver(mut self, driver: Arc<dyn PromptDriver>) -> Self {
        self.prompt_driver = Some(driver);
        self
    }

    pub fn with_ruleset(mut self, ruleset: Ruleset) -> Self {
        self.rulesets.push(ruleset);
        self
    }

    pub fn with_conversation_memory(mut self, memory: ConversationMemory) -> Self {
        self.conversation_memory = Some(memory.shared());
        self
    }

    /// Uses a memory shared with other structures.
    pub fn with_shared_memory(mut self, memory: SharedMemory) -> Self {
        self.conversation_memory = Some(memory);
        self
    }

    pub fn with_task_memory(mut self, task_memory: TaskMemory) -> Self {
        self.task_memory = Some(task_memory);
        self
    }

    /// Builds conversation memory from the memory settings and hydrates it
    /// from `driver` when `autoload` is set.
    ///
    /// # Errors
    ///
    /// Returns `StructureError::Memory` if the driver fails to load.
    pub async fn with_memory_driver(
        mut self,
        driver: Arc<dyn MemoryDriver>,
        autoload: bool,
    ) -> Result<Self, StructureError> {
        let memory = ConversationMemory::from_settings(&self.settings.memory)
            .load_from(driver, autoload)
            .await
            .map_err(StructureError::Memory)?;
        self.conversation_memory = Some(memory.shared());
        Ok(self)
    }
}

/// Task table plus everything a run needs.
///
/// Owns its tasks. Tasks only keep the structure id, and [`TaskHandle`]s
/// are resolved against this table.
pub struct Structure {
    id: Uuid,
    kind: StructureKind,
    pub(crate) tasks: Vec<Task>,
    rulesets: Vec<Ruleset>,
    settings: Arc<Settings>,
    prompt_driver: Option<Arc<dyn PromptDriver>>,
    conversation_memory: Option<SharedMemory>,
    task_memory: TaskMemory,
    owns_task_memory: bool,
    events: EventLog,
    args: Vec<String>,
    status: StructureStatus,
    output_id: Option<TaskId>,
}

impl Structure {
    /// Creates an empty structure.
    pub fn new(kind: StructureKind, config: StructureConfig) -> Self {
        let conversation_memory = config.conversation_memory.or_else(|| {
            config
                .settings
                .memory
                .enabled
                .then(|| ConversationMemory::from_settings(&config.settings.memory).shared())
        });

        Self {
            id: Uuid::new_v4(),
            kind,
            tasks: Vec::new(),
            rulesets: config.rulesets,
            settings: Arc::new(config.settings),
            prompt_driver: config.prompt_driver,
            conversation_memory,
            owns_task_memory: config.task_memory.is_none(),
            task_memory: config.task_memory.unwrap_or_default(),
            events: EventLog::new(),
            args: Vec::new(),
            status: StructureStatus::Pending,
            output_id: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> StructureKind {
        self.kind
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn rulesets(&self) -> &[Ruleset] {
        &self.rulesets
    }

    /// Attaches a task without checking its id.
    pub(crate) fn attach(&mut self, mut task: Task) -> TaskHandle {
        task.structure = Some(self.id);
        let handle = TaskHandle {
            structure: self.id,
            uid: task.uid,
            id: task.id.clone(),
        };
        self.tasks.push(task);
        handle
    }

    /// Attaches a task, rejecting duplicate ids.
    pub(crate) fn insert_raw(&mut self, task: Task) -> Result<TaskHandle, StructureError> {
        if self.position(&task.id).is_some() {
            return Err(StructureError::DuplicateTask(task.id));
        }
        Ok(self.attach(task))
    }

    pub(crate) fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|task| &task.id == id)
    }

    /// Resolves a handle to its table index.
    ///
    /// The handle must come from this structure and point at the task object
    /// currently registered under its id.
    pub(crate) fn check_handle(&self, handle: &TaskHandle) -> Result<usize, StructureError> {
        if handle.structure != self.id {
            return Err(StructureError::ForeignHandle(handle.id.clone()));
        }
        let idx = self
            .position(&handle.id)
            .ok_or_else(|| StructureError::TaskNotFound(handle.id.clone()))?;
        if self.tasks[idx].uid != handle.uid {
            return Err(StructureError::ForeignHandle(handle.id.clone()));
        }
        Ok(idx)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id.as_str() == id)
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn handle(&self, id: &str) -> Option<TaskHandle> {
        self.task(id).and_then(Task::handle)
    }

    /// Whether `handle` points at a task object owned by this structure.
    pub fn contains_handle(&self, handle: &TaskHandle) -> bool {
        self.check_handle(handle).is_ok()
    }

    /// Resolves the current task graph without changing the tasks.
    pub fn graph(&self) -> Result<TaskGraph, StructureError> {
        let mut tasks = self.tasks.clone();
        GraphResolver::resolve(&mut tasks)
    }

    /// First task without parents.
    pub fn input_task(&self) -> Option<&Task> {
        let graph = self.graph().ok()?;
        graph.input_task().and_then(|id| self.task(id.as_str()))
    }

    /// Last task without children.
    pub fn output_task(&self) -> Option<&Task> {
        let graph = self.graph().ok()?;
        graph.output_task().and_then(|id| self.task(id.as_str()))
    }

    /// Input of a task: the frozen input once it has started, otherwise its
    /// template rendered against the current context.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` for an unknown id or `Render` if the template
    /// fails.
    pub fn task_input(&self, id: &str) -> Result<Artifact, StructureError> {
        let idx = self
            .tasks
            .iter()
            .position(|task| task.id.as_str() == id)
            .ok_or_else(|| StructureError::TaskNotFound(TaskId::new(id)))?;
        if let Some(input) = &self.tasks[idx].input {
            return Ok(input.clone());
        }
        self.render_input(idx).map_err(|source| StructureError::Render {
            task: self.tasks[idx].id.clone(),
            source,
        })
    }

    pub fn status(&self) -> StructureStatus {
        self.status
    }

    /// True when every task is terminal, with or without errors.
    ///
    /// A branch that selected no children finishes normally; a branch that
    /// failed leaves its children pending and the structure stuck.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            StructureStatus::Finished | StructureStatus::FinishedWithErrors
        )
    }

    pub fn is_stuck(&self) -> bool {
        self.status == StructureStatus::Stuck
    }

    /// Output of the output task from the last run; absent when halted.
    pub fn output(&self) -> Option<&Artifact> {
        if self.status == StructureStatus::Halted {
            return None;
        }
        let id = self.output_id.as_ref()?;
        self.task(id.as_str()).and_then(Task::output)
    }

    /// Event log of the last run.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn conversation_memory(&self) -> Option<&SharedMemory> {
        self.conversation_memory.as_ref()
    }

    pub fn task_memory(&self) -> &TaskMemory {
        &self.task_memory
    }

    /// Arguments of the last run.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Runs every task and returns the run summary.
    ///
    /// Task failures never surface here: they become the failing task's
    /// Error artifact and show up in the returned status.
    ///
    /// # Errors
    ///
    /// Returns `StructureError` for invalid settings, an empty structure, a
    /// missing node, a cycle, or an agent/pipeline with several inputs or
    /// outputs. No task has run when this happens.
    pub async fn run(&mut self, args: Vec<String>) -> Result<RunReport, StructureError> {
        self.settings
            .validate()
            .map_err(|e| StructureError::Config(e.to_string()))?;
        if self.tasks.is_empty() {
            return Err(StructureError::EmptyStructure);
        }
        let graph = GraphResolver::resolve(&mut self.tasks)?;
        self.check_shape(&graph)?;

        for task in &mut self.tasks {
            task.reset();
        }
        if self.owns_task_memory {
            self.task_memory.clear();
        }
        self.args = args;
        self.output_id = graph.output_task().cloned();

        let run_id = Uuid::new_v4();
        let mut events = EventLog::with_run_id(run_id);
        if let Some(dir) = &self.settings.events_dir {
            events = events.persist_to(dir);
        }
        self.events = events.clone();

        tracing::info!(structure = %self.id, kind = %self.kind, %run_id, tasks = self.tasks.len(), "Starting structure run");
        events
            .emit(RunEvent::StructureStarted {
                timestamp: Utc::now(),
                structure_id: self.id.to_string(),
                kind: self.kind.to_string(),
                task_count: self.tasks.len(),
            })
            .await;

        let concurrency = match self.kind {
            StructureKind::Workflow => self.settings.max_concurrency,
            StructureKind::Agent | StructureKind::Pipeline => 1,
        };
        self.execute(&graph, concurrency, &events).await;

        self.status = self.compute_status();
        if self.is_finished() {
            self.record_run(&graph, &events).await;
        }

        let count = |state: TaskState| self.tasks.iter().filter(|t| t.state == state).count();
        events
            .emit(RunEvent::StructureFinished {
                timestamp: Utc::now(),
                status: self.status.to_string(),
                finished: count(TaskState::Finished),
                failed: count(TaskState::Error),
                skipped: count(TaskState::Skipped),
            })
            .await;
        tracing::info!(structure = %self.id, %run_id, status = %self.status, "Structure run finished");

        Ok(RunReport {
            run_id,
            status: self.status,
            output: self.output().cloned(),
        })
    }

    fn check_shape(&self, graph: &TaskGraph) -> Result<(), StructureError> {
        if self.kind == StructureKind::Workflow {
            return Ok(());
        }
        let inputs = graph.input_tasks();
        if inputs.len() != 1 {
            return Err(StructureError::MultipleInputTasks {
                kind: self.kind.to_string(),
                found: inputs,
            });
        }
        let outputs = graph.output_tasks();
        if outputs.len() != 1 {
            return Err(StructureError::MultipleOutputTasks {
                kind: self.kind.to_string(),
                found: outputs,
            });
        }
        Ok(())
    }

    async fn execute(&mut self, graph: &TaskGraph, concurrency: usize, events: &EventLog) {
        let order: Vec<usize> = graph
            .topological_order()
            .iter()
            .filter_map(|id| self.position(id))
            .collect();
        let mut running: JoinSet<(usize, Result<TaskOutcome, TaskError>)> = JoinSet::new();
        let mut halted = false;

        loop {
            if !halted {
                for &idx in &order {
                    if running.len() >= concurrency {
                        break;
                    }
                    if !self.tasks[idx].is_pending() || !self.parents_ready(idx) {
                        continue;
                    }

                    let ctx = match self.prepare(idx, events) {
                        Ok(ctx) => ctx,
                        Err(e) => {
                            self.complete(idx, Err(TaskError::Core(e)), false, &order, events).await;
                            if self.tasks[idx].is_error() && self.settings.fail_fast {
                                halted = true;
                                break;
                            }
                            continue;
                        }
                    };

                    let task = &mut self.tasks[idx];
                    task.state = TaskState::Running;
                    tracing::debug!(task = %task.id, kind = %task.kind(), "Task started");
                    events
                        .emit(RunEvent::TaskStarted {
                            timestamp: Utc::now(),
                            task_id: task.id.to_string(),
                            kind: task.kind().to_string(),
                        })
                        .await;

                    let behavior = Arc::clone(&task.behavior);
                    running.spawn(async move {
                        let body = tokio::spawn(async move { behavior.execute(&ctx).await });
                        let result = match body.await {
                            Ok(result) => result,
                            Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
                            Err(e) => Err(TaskError::ExecutionFailed(e.to_string())),
                        };
                        (idx, result)
                    });
                }
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            match joined {
                Ok((idx, result)) => {
                    self.complete(idx, result, true, &order, events).await;
                    if self.tasks[idx].is_error() && self.settings.fail_fast && !halted {
                        tracing::warn!(task = %self.tasks[idx].id, "Task failed, halting structure");
                        halted = true;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Scheduler join failed"),
            }
        }
    }

    /// A task may start when every parent finished or was skipped. With
    /// fail-fast disabled a failed parent also unblocks, unless it is a
    /// branch: a failed branch has no selection to follow.
    fn parents_ready(&self, idx: usize) -> bool {
        self.tasks[idx].parent_ids.iter().all(|pid| {
            self.position(pid).is_some_and(|p| {
                let parent = &self.tasks[p];
                parent.state.unblocks_children()
                    || (parent.state == TaskState::Error
                        && !self.settings.fail_fast
                        && parent.kind() != TaskKind::Branch)
            })
        })
    }

    fn render_context(&self, idx: usize) -> Value {
        let task = &self.tasks[idx];
        let mut parent_outputs = Map::new();
        let mut texts = Vec::new();
        for pid in &task.parent_ids {
            if let Some(output) = self.position(pid).and_then(|p| self.tasks[p].output.as_ref()) {
                let text = output.to_text();
                parent_outputs.insert(pid.to_string(), Value::String(text.clone()));
                texts.push(text);
            }
        }

        let mut ctx = Map::new();
        ctx.insert("args".into(), Value::from(self.args.clone()));
        ctx.insert("structure_id".into(), Value::String(self.id.to_string()));
        ctx.insert("task_id".into(), Value::String(task.id.to_string()));
        ctx.insert(
            "parent_output".into(),
            Value::String(texts.first().cloned().unwrap_or_default()),
        );
        ctx.insert("parents_output_text".into(), Value::String(texts.join("\n\n")));
        ctx.insert("parent_outputs".into(), Value::Object(parent_outputs));
        for (key, value) in &task.context {
            ctx.insert(key.clone(), value.clone());
        }
        Value::Object(ctx)
    }

    fn render_input(&self, idx: usize) -> Result<Artifact, WeaveError> {
        let text = template::render(&self.tasks[idx].template, &self.render_context(idx))?;
        Ok(Artifact::text(text))
    }

    /// Renders the input, runs the before-run hook and freezes the input.
    fn prepare(&mut self, idx: usize, events: &EventLog) -> Result<TaskContext, WeaveError> {
        let mut input = self.render_input(idx)?;

        let task = &self.tasks[idx];
        if let Some(hook) = &task.on_before_run {
            hook(&task.id, &mut input);
        }

        let mut parent_outputs = IndexMap::new();
        for pid in &task.parent_ids {
            if let Some(output) = self.position(pid).and_then(|p| self.tasks[p].output.clone()) {
                parent_outputs.insert(pid.clone(), output);
            }
        }

        let ctx = TaskContext {
            structure_id: self.id,
            task_id: task.id.clone(),
            input: input.clone(),
            parent_outputs,
            child_ids: task.child_ids.iter().cloned().collect(),
            rulesets: effective_rulesets(&self.rulesets, &task.rulesets),
            memory: task.memory.clone().or_else(|| self.conversation_memory.clone()),
            task_memory: self.task_memory.clone(),
            prompt_driver: task.prompt_driver.clone().or_else(|| self.prompt_driver.clone()),
            settings: Arc::clone(&self.settings),
            events: events.clone(),
        };

        self.tasks[idx].input = Some(input);
        Ok(ctx)
    }

    /// Applies a task result: branch validation, after-run hook, terminal
    /// state, skip propagation and task-level memory.
    ///
    /// `started` is false when `prepare` failed; the after-run hook only
    /// runs for tasks whose before-run hook ran.
    async fn complete(
        &mut self,
        idx: usize,
        result: Result<TaskOutcome, TaskError>,
        started: bool,
        order: &[usize],
        events: &EventLog,
    ) {
        let task_id = self.tasks[idx].id.clone();
        let (mut output, selected) = match result {
            Ok(TaskOutcome::Output(output)) => (output, None),
            Ok(TaskOutcome::Branch { output, selected }) => (output, Some(selected)),
            Err(e) => (Artifact::error(e.to_string()), None),
        };

        let mut unselected = Vec::new();
        if let Some(selected) = selected {
            let children = &self.tasks[idx].child_ids;
            let invalid: Vec<&str> = selected
                .iter()
                .filter(|id| !children.contains(*id))
                .map(TaskId::as_str)
                .collect();
            if invalid.is_empty() {
                unselected = children
                    .iter()
                    .filter(|child| !selected.contains(child))
                    .cloned()
                    .collect();
            } else {
                let declared: Vec<&str> = children.iter().map(TaskId::as_str).collect();
                output = Artifact::error(format!(
                    "Branch '{}' selected undeclared children {:?}; declared children are {:?}",
                    task_id, invalid, declared
                ));
            }
        }

        if let Some(hook) = self.tasks[idx].on_after_run.clone().filter(|_| started) {
            hook(&task_id, &mut output);
        }

        let state = if output.is_error() {
            TaskState::Error
        } else {
            TaskState::Finished
        };
        {
            let task = &mut self.tasks[idx];
            task.state = state;
            task.output = Some(output.clone());
        }

        if state == TaskState::Error {
            tracing::warn!(task = %task_id, error = %output, "Task failed");
            events
                .emit(RunEvent::TaskFailed {
                    timestamp: Utc::now(),
                    task_id: task_id.to_string(),
                    error: output.to_text(),
                })
                .await;
            return;
        }

        tracing::debug!(task = %task_id, "Task finished");
        events
            .emit(RunEvent::TaskFinished {
                timestamp: Utc::now(),
                task_id: task_id.to_string(),
                output: output.to_text(),
            })
            .await;

        if !unselected.is_empty() {
            let reason = format!("not selected by branch '{}'", task_id);
            for child in &unselected {
                if let Some(c) = self.position(child) {
                    self.skip(c, &reason, events).await;
                }
            }
            self.propagate_skips(order, events).await;
        }

        self.record_task_run(idx, events).await;
    }

    async fn skip(&mut self, idx: usize, reason: &str, events: &EventLog) {
        let task = &mut self.tasks[idx];
        if !task.is_pending() {
            return;
        }
        task.state = TaskState::Skipped;
        tracing::debug!(task = %task.id, reason, "Task skipped");
        events
            .emit(RunEvent::TaskSkipped {
                timestamp: Utc::now(),
                task_id: task.id.to_string(),
                reason: reason.to_string(),
            })
            .await;
    }

    /// Skips pending tasks whose parents were all skipped, in topological
    /// order so the skip reaches every exclusive descendant.
    async fn propagate_skips(&mut self, order: &[usize], events: &EventLog) {
        for &idx in order {
            let task = &self.tasks[idx];
            if !task.is_pending() || task.parent_ids.is_empty() {
                continue;
            }
            let all_skipped = task
                .parent_ids
                .iter()
                .all(|pid| self.position(pid).is_some_and(|p| self.tasks[p].is_skipped()));
            if all_skipped {
                self.skip(idx, "all parents skipped", events).await;
            }
        }
    }

    fn compute_status(&self) -> StructureStatus {
        let any_error = self.tasks.iter().any(Task::is_error);
        let any_pending = self.tasks.iter().any(Task::is_pending);

        if any_error && self.settings.fail_fast {
            StructureStatus::Halted
        } else if any_pending {
            StructureStatus::Stuck
        } else if any_error {
            StructureStatus::FinishedWithErrors
        } else {
            StructureStatus::Finished
        }
    }

    /// Records (task input, task output) into the task's own memory.
    async fn record_task_run(&self, idx: usize, events: &EventLog) {
        let task = &self.tasks[idx];
        let Some(memory) = &task.memory else {
            return;
        };
        if self
            .conversation_memory
            .as_ref()
            .is_some_and(|shared| Arc::ptr_eq(shared, memory))
        {
            return;
        }
        let (Some(input), Some(output)) = (task.input.clone(), task.output.clone()) else {
            return;
        };
        append_run(memory, Run::new(input, output), Some(&task.id), events).await;
    }

    /// Records (input task input, output task output) into the structure's
    /// conversation memory.
    async fn record_run(&self, graph: &TaskGraph, events: &EventLog) {
        let Some(memory) = &self.conversation_memory else {
            return;
        };
        let input = graph
            .input_task()
            .and_then(|id| self.task(id.as_str()))
            .and_then(|task| task.input.clone());
        let output = graph
            .output_task()
            .and_then(|id| self.task(id.as_str()))
            .filter(|task| task.is_finished())
            .and_then(|task| task.output.clone());

        if let (Some(input), Some(output)) = (input, output) {
            append_run(memory, Run::new(input, output), None, events).await;
        }
    }
}

async fn append_run(memory: &SharedMemory, run: Run, task: Option<&TaskId>, events: &EventLog) {
    let run_id = run.id.clone();
    let result = memory.lock().await.add_run(run).await;
    match result {
        Ok(()) => {
            events
                .emit(RunEvent::RunRecorded {
                    timestamp: Utc::now(),
                    memory_run_id: run_id,
                    task_id: task.map(ToString::to_string),
                })
                .await;
        }
        Err(e) => tracing::warn!(error = %e, "Failed to store conversation run"),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl fmt::Debug for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Structure")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("tasks", &self.tasks)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weave_core::{EchoPromptDriver, ScriptedPromptDriver};

    fn config() -> StructureConfig {
        StructureConfig::new().with_prompt_driver(Arc::new(EchoPromptDriver::new()))
    }

    fn lenient() -> StructureConfig {
        let mut settings = Settings::default();
        settings.fail_fast = false;
        config().with_settings(settings)
    }

    fn explode() -> Artifact {
        panic!("kaboom")
    }

    fn echo(id: &str) -> Task {
        Task::code(id, |ctx: TaskContext| async move { Ok(ctx.input) })
    }

    #[tokio::test]
    async fn test_render_context() {
        let mut workflow = Workflow::new(config());
        workflow
            .add_task(Task::code("a", |_| async { Ok(Artifact::text("alpha")) }))
            .unwrap();
        workflow
            .add_task(Task::code("b", |_| async { Ok(Artifact::text("beta")) }))
            .unwrap();
        workflow
            .add_task(
                echo("c")
                    .with_parent("a")
                    .with_parent("b")
                    .with_context("tone", "dry")
                    .with_template(
                        "{{ parent_outputs.a }}+{{ parent_outputs.b }}|{{ parent_output }}|{{ tone }}|{{ args[0] }}",
                    ),
            )
            .unwrap();

        let report = workflow.run(vec!["x".into()]).await.unwrap();
        assert_eq!(report.status, StructureStatus::Finished);
        assert_eq!(report.output.unwrap().to_text(), "alpha+beta|alpha|dry|x");
    }

    #[tokio::test]
    async fn test_task_input_is_lazy_until_started() {
        let mut pipeline = Pipeline::new(config());
        pipeline
            .add_task(echo("a").with_template("hello {{ args[0] }}"))
            .unwrap();

        assert_eq!(pipeline.task_input("a").unwrap().to_text(), "hello ");
        pipeline.run(vec!["world".into()]).await.unwrap();
        assert_eq!(pipeline.task_input("a").unwrap().to_text(), "hello world");
        assert!(matches!(
            pipeline.task_input("missing"),
            Err(StructureError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_hooks_run_once_and_rewrite() {
        let calls = Arc::new(AtomicUsize::new(0));
        let before = Arc::clone(&calls);
        let after = Arc::clone(&calls);

        let mut agent = Agent::new(config());
        agent
            .add_task(
                echo("a")
                    .on_before_run(move |_, input| {
                        before.fetch_add(1, Ordering::SeqCst);
                        *input = Artifact::text(format!("[{}]", input));
                    })
                    .on_after_run(move |_, output| {
                        after.fetch_add(1, Ordering::SeqCst);
                        *output = Artifact::text(format!("{}!", output));
                    }),
            )
            .unwrap();

        let report = agent.run(vec!["hi".into()]).await.unwrap();
        assert_eq!(report.output.unwrap().to_text(), "[hi]!");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_render_failure_skips_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let before = Arc::clone(&calls);
        let after = Arc::clone(&calls);

        let mut agent = Agent::new(config());
        agent
            .add_task(
                echo("a")
                    .with_template("{{ unclosed")
                    .on_before_run(move |_, _| {
                        before.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_after_run(move |_, _| {
                        after.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();

        let report = agent.run(vec![]).await.unwrap();
        assert_eq!(report.status, StructureStatus::Halted);
        assert!(agent.task("a").unwrap().is_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_owned_task_memory_cleared_each_run() {
        let mut owned = Agent::new(config());
        owned.add_task(echo("a")).unwrap();
        owned.run(vec![]).await.unwrap();
        owned.task_memory().store("x.y", Artifact::text("stale"));
        owned.run(vec![]).await.unwrap();
        assert!(owned.task_memory().namespaces().is_empty());

        let shared = TaskMemory::default();
        let mut borrowing = Agent::new(config().with_task_memory(shared.clone()));
        borrowing.add_task(echo("a")).unwrap();
        shared.store("x.y", Artifact::text("kept"));
        borrowing.run(vec![]).await.unwrap();
        assert_eq!(shared.namespaces().len(), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_error_artifact() {
        let mut agent = Agent::new(config());
        agent
            .add_task(Task::code("a", |_| async { Ok(explode()) }))
            .unwrap();

        let report = agent.run(vec![]).await.unwrap();
        assert_eq!(report.status, StructureStatus::Halted);
        assert!(report.output.is_none());
        let task = agent.task("a").unwrap();
        assert!(task.is_error());
        assert!(task.output().unwrap().to_text().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_error_without_fail_fast_continues() {
        let mut pipeline = Pipeline::new(lenient());
        pipeline
            .add_task(Task::code("a", |_| async {
                Err(TaskError::ExecutionFailed("nope".into()))
            }))
            .unwrap();
        pipeline
            .add_task(echo("b").with_template("after: {{ parent_output }}"))
            .unwrap();

        let report = pipeline.run(vec![]).await.unwrap();
        assert_eq!(report.status, StructureStatus::FinishedWithErrors);
        assert!(pipeline.is_finished());
        assert_eq!(
            report.output.unwrap().to_text(),
            "after: Task execution failed: nope"
        );
    }

    #[tokio::test]
    async fn test_zero_branch_selection_finishes() {
        let mut workflow = Workflow::new(config());
        workflow
            .add_task(Task::branch("router", |_| async { Ok(vec![]) }).with_child("l").with_child("r"))
            .unwrap();
        workflow.add_task(echo("l")).unwrap();
        workflow.add_task(echo("r")).unwrap();
        workflow.add_task(echo("end").with_parent("l")).unwrap();

        let report = workflow.run(vec![]).await.unwrap();
        assert_eq!(report.status, StructureStatus::Finished);
        assert!(workflow.is_finished());
        for id in ["l", "r", "end"] {
            assert!(workflow.task(id).unwrap().is_skipped(), "{} not skipped", id);
        }
    }

    #[tokio::test]
    async fn test_skip_stops_at_join_with_live_parent() {
        let mut workflow = Workflow::new(config());
        workflow
            .add_task(Task::branch("router", |_| async { Ok(vec![TaskId::new("l")]) }))
            .unwrap();
        workflow.add_task(echo("l").with_parent("router")).unwrap();
        workflow.add_task(echo("r").with_parent("router")).unwrap();
        workflow.add_task(echo("r2").with_parent("r")).unwrap();
        workflow
            .add_task(echo("join").with_parent("l").with_parent("r2"))
            .unwrap();

        let report = workflow.run(vec![]).await.unwrap();
        assert_eq!(report.status, StructureStatus::Finished);
        assert!(workflow.task("l").unwrap().is_finished());
        assert!(workflow.task("r").unwrap().is_skipped());
        assert!(workflow.task("r2").unwrap().is_skipped());
        assert!(workflow.task("join").unwrap().is_finished());
    }

    #[tokio::test]
    async fn test_structure_memory_records_run() {
        let driver = Arc::new(ScriptedPromptDriver::new(["first answer", "second answer"]));
        let mut agent = Agent::new(StructureConfig::new().with_prompt_driver(driver.clone()));
        agent.add_task(Task::prompt("chat")).unwrap();

        agent.run(vec!["first question".into()]).await.unwrap();
        agent.run(vec!["second question".into()]).await.unwrap();

        let memory = agent.conversation_memory().unwrap().lock().await;
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.runs()[1].output.to_text(), "second answer");

        let second = &driver.stacks()[1];
        assert!(second.messages.iter().any(|m| m.content == "first question"));
        assert!(second.messages.iter().any(|m| m.content == "first answer"));
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let mut settings = Settings::default();
        settings.max_concurrency = 0;
        let mut workflow = Workflow::new(config().with_settings(settings));
        workflow.add_task(echo("a")).unwrap();
        assert!(matches!(
            workflow.run(vec![]).await,
            Err(StructureError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_pipeline_shape_checked_at_run() {
        let mut structure = Structure::new(StructureKind::Pipeline, config());
        structure.insert_raw(echo("a")).unwrap();
        structure.insert_raw(echo("b")).unwrap();

        match structure.run(vec![]).await {
            Err(StructureError::MultipleInputTasks { kind, found }) => {
                assert_eq!(kind, "Pipeline");
                assert_eq!(found.len(), 2);
            }
            other => panic!("expected MultipleInputTasks, got {:?}", other.map(|r| r.status)),
        }
        assert!(structure.tasks().iter().all(|t| t.frozen_input().is_none()));
    }

    #[tokio::test]
    async fn test_empty_structure() {
        let mut workflow = Workflow::new(config());
        assert!(matches!(
            workflow.run(vec![]).await,
            Err(StructureError::EmptyStructure)
        ));
        assert_eq!(workflow.status(), StructureStatus::Pending);
    }
}
