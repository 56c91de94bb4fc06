//! Taskweave agent layer - task graphs and their execution.
//!
//! This crate runs tasks built on `weave_core`:
//!
//! - [`task`]: task model, state machine and the built-in task kinds
//! - [`graph`]: graph resolution, cycle detection and topological order
//! - [`structure`]: Agent, Pipeline and Workflow plus the shared scheduler
//! - [`subtask`]: the action subtask engine driving tool use
//! - [`events`]: per-run event log
//! - [`yaml`]: structures defined in YAML
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use weave_agent::structure::{StructureConfig, Workflow};
//! use weave_agent::task::{Task, TaskContext};
//! use weave_core::Artifact;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut workflow = Workflow::new(StructureConfig::new());
//! workflow
//!     .add_task(Task::code("fetch", |_| async { Ok(Artifact::text("data")) }))
//!     .unwrap();
//! workflow
//!     .add_task(
//!         Task::code("report", |ctx: TaskContext| async move { Ok(ctx.input) })
//!             .with_template("Report on {{ parent_output }}")
//!             .with_parent("fetch"),
//!     )
//!     .unwrap();
//!
//! let report = workflow.run(vec![]).await.unwrap();
//! assert_eq!(report.output.unwrap().to_text(), "Report on data");
//! # });
//! ```

pub mod error;
pub mod events;
pub mod graph;
pub mod structure;
pub mod subtask;
pub mod task;
pub mod yaml;

pub use error::{StructureError, TaskError};
pub use events::{EventLog, EventLogError, RunEvent};
pub use graph::{GraphResolver, TaskGraph};
pub use structure::{
    Agent, Pipeline, RunReport, Structure, StructureConfig, StructureKind, StructureStatus,
    Workflow,
};
pub use subtask::{ActionDispatchError, ActionsEngine, ActionsSubtask};
pub use task::{
    BranchTask, CodeTask, PromptTask, Task, TaskBehavior, TaskContext, TaskHandle, TaskId,
    TaskKind, TaskOutcome, TaskState, ToolkitTask,
};
pub use yaml::{BuiltStructure, DefinitionError, StructureDefinition};
