//! Run event log with serde-serializable events and JSON persistence.
//!
//! Every structure run opens a fresh [`EventLog`] whose id is the run id.
//! The scheduler and the action subtask engine record an event at each
//! transition:
//!
//! - `StructureStarted` / `StructureFinished`: run boundaries
//! - `TaskStarted`, `TaskFinished`, `TaskFailed`, `TaskSkipped`: task state changes
//! - `SubtaskStarted` / `SubtaskFinished`: one tool round of the action loop
//! - `CompletionChunk`: a streamed piece of a model response
//! - `RunRecorded`: a run appended to conversation memory
//!
//! When a directory is configured the whole log is rewritten to
//! `<dir>/<run_id>.json` after each event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Error types for event log persistence.
#[derive(Error, Debug)]
pub enum EventLogError {
    /// Failed to serialize events
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Failed to write the event file
    #[error("Write failed: {0}")]
    WriteFailed(#[from] std::io::Error),

    /// Failed to create the event directory
    #[error("Directory creation failed: {0}")]
    DirectoryFailed(String),
}

/// A structure run event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RunEvent {
    /// Structure run started
    StructureStarted {
        timestamp: DateTime<Utc>,
        structure_id: String,
        kind: String,
        task_count: usize,
    },
    /// Task moved to RUNNING
    TaskStarted {
        timestamp: DateTime<Utc>,
        task_id: String,
        kind: String,
    },
    /// Task finished with an output
    TaskFinished {
        timestamp: DateTime<Utc>,
        task_id: String,
        output: String,
    },
    /// Task ended in ERROR
    TaskFailed {
        timestamp: DateTime<Utc>,
        task_id: String,
        error: String,
    },
    /// Task skipped by a branch decision
    TaskSkipped {
        timestamp: DateTime<Utc>,
        task_id: String,
        reason: String,
    },
    /// Tool round started
    SubtaskStarted {
        timestamp: DateTime<Utc>,
        task_id: String,
        round: usize,
        thought: Option<String>,
        actions: Vec<String>,
    },
    /// Tool round finished
    SubtaskFinished {
        timestamp: DateTime<Utc>,
        task_id: String,
        round: usize,
        results: Vec<String>,
    },
    /// Streamed response chunk
    CompletionChunk {
        timestamp: DateTime<Utc>,
        task_id: String,
        chunk: String,
    },
    /// Run appended to conversation memory
    RunRecorded {
        timestamp: DateTime<Utc>,
        memory_run_id: String,
        task_id: Option<String>,
    },
    /// Structure run finished
    StructureFinished {
        timestamp: DateTime<Utc>,
        status: String,
        finished: usize,
        failed: usize,
        skipped: usize,
    },
}

impl RunEvent {
    /// Short event name, used in logs and tests.
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::StructureStarted { .. } => "StructureStarted",
            RunEvent::TaskStarted { .. } => "TaskStarted",
            RunEvent::TaskFinished { .. } => "TaskFinished",
            RunEvent::TaskFailed { .. } => "TaskFailed",
            RunEvent::TaskSkipped { .. } => "TaskSkipped",
            RunEvent::SubtaskStarted { .. } => "SubtaskStarted",
            RunEvent::SubtaskFinished { .. } => "SubtaskFinished",
            RunEvent::CompletionChunk { .. } => "CompletionChunk",
            RunEvent::RunRecorded { .. } => "RunRecorded",
            RunEvent::StructureFinished { .. } => "StructureFinished",
        }
    }
}

/// Event log for one structure run.
///
/// Clones share the same event list, so tasks running concurrently append
/// to a single ordered log.
#[derive(Clone, Debug)]
pub struct EventLog {
    run_id: Uuid,
    events: Arc<Mutex<Vec<RunEvent>>>,
    dir: Option<PathBuf>,
}

impl EventLog {
    /// Creates an in-memory log with a fresh run id.
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4())
    }

    /// Creates an in-memory log for a given run id.
    pub fn with_run_id(run_id: Uuid) -> Self {
        Self {
            run_id,
            events: Arc::new(Mutex::new(Vec::new())),
            dir: None,
        }
    }

    /// Persists the log under `dir` after every event.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory for `<run_id>.json`; created on first write
    pub fn persist_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Records an event and persists the log if a directory is set.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` on success, or `EventLogError` if persisting fails.
    /// The event is kept in memory either way.
    pub async fn record(&self, event: RunEvent) -> Result<(), EventLogError> {
        let mut events = self.events.lock().await;
        events.push(event);

        if let Some(dir) = &self.dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| EventLogError::DirectoryFailed(e.to_string()))?;
            let json = serde_json::to_string_pretty(&*events)?;
            tokio::fs::write(self.file_path_in(dir), json).await?;
        }
        Ok(())
    }

    /// Records an event, logging persistence failures instead of returning them.
    pub async fn emit(&self, event: RunEvent) {
        let name = event.name();
        if let Err(e) = self.record(event).await {
            tracing::warn!(run_id = %self.run_id, event = name, error = %e, "Failed to persist run event");
        }
    }

    fn file_path_in(&self, dir: &std::path::Path) -> PathBuf {
        dir.join(format!("{}.json", self.run_id))
    }

    /// Path of the persisted log, if persistence is enabled.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.dir.as_deref().map(|dir| self.file_path_in(dir))
    }

    /// Returns a copy of all recorded events.
    pub async fn replay(&self) -> Vec<RunEvent> {
        self.events.lock().await.clone()
    }

    /// Returns the run id.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
