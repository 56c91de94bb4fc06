//! Taskweave core - artifacts, prompts, tools and memory.
//!
//! This crate holds the building blocks the orchestration layer passes
//! around:
//!
//! - [`artifact`]: typed values exchanged between tasks, tools and memory
//! - [`rules`]: rulesets rendered into system prompts
//! - [`prompt`]: role-tagged prompt stacks
//! - [`tokenizer`]: token accounting used by memory pruning
//! - [`drivers`]: the model backend contract plus deterministic drivers
//! - [`tool`]: schema-described activities and the tool registry
//! - [`task_memory`]: off-prompt artifact storage
//! - [`memory`]: conversation memory and its persistence drivers
//! - [`template`]: input rendering
//! - [`config`]: explicit settings threaded through structures

pub mod artifact;
pub mod config;
pub mod drivers;
pub mod error;
pub mod memory;
pub mod prompt;
pub mod rules;
pub mod task_memory;
pub mod template;
pub mod tokenizer;
pub mod tool;

pub use artifact::{Artifact, ArtifactKind, ArtifactValue};
pub use config::{MemorySettings, Settings};
pub use drivers::{EchoPromptDriver, PromptDriver, ScriptedPromptDriver};
pub use error::{Result, WeaveError};
pub use memory::{ConversationMemory, MemoryDriver, Run, SharedMemory};
pub use prompt::{Message, PromptStack, Role};
pub use rules::{Rule, Ruleset};
pub use task_memory::TaskMemory;
pub use tokenizer::{SimpleTokenizer, Tokenizer};
pub use tool::{Activity, Tool, ToolRegistry};
