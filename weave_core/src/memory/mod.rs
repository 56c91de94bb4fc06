//! Conversation memory: bounded run history injected into prompts.
//!
//! Two independent limits apply:
//!
//! - `max_runs` trims the stored history (oldest first) every time a run
//!   is added, before the persistence driver sees it.
//! - Token pruning decides, per prompt, how many of the newest runs fit in
//!   the driver's input budget. It never deletes history.

pub mod drivers;

use crate::artifact::Artifact;
use crate::config::MemorySettings;
use crate::error::Result;
use crate::prompt::{Message, PromptStack};
use crate::tokenizer::Tokenizer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub use drivers::{InMemoryMemoryDriver, LocalFileMemoryDriver, MemoryDriver, MemorySnapshot};

/// Conversation memory shared between concurrently running tasks.
///
/// The mutex serializes run appends and evictions.
pub type SharedMemory = Arc<tokio::sync::Mutex<ConversationMemory>>;

/// One (input, output) exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Generated run id
    pub id: String,
    /// Input artifact
    pub input: Artifact,
    /// Output artifact
    pub output: Artifact,
    /// When the run was recorded
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// Creates a run with a fresh id.
    pub fn new(input: Artifact, output: Artifact) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input,
            output,
            created_at: Utc::now(),
        }
    }

    /// Prompt messages for this run: the user input then the assistant output.
    pub fn to_messages(&self) -> [Message; 2] {
        [
            Message::user(self.input.to_text()),
            Message::assistant(self.output.to_text()),
        ]
    }
}

/// Ordered run history with a FIFO cap and optional persistence.
///
/// # Example
///
/// ```
/// use weave_core::artifact::Artifact;
/// use weave_core::memory::{ConversationMemory, Run};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let mut memory = ConversationMemory::new().with_max_runs(Some(2));
/// for n in 0..3 {
///     memory.add_run(Run::new(Artifact::text(format!("q{n}")), Artifact::text("a"))).await.unwrap();
/// }
/// assert_eq!(memory.len(), 2);
/// assert_eq!(memory.runs()[0].input.to_text(), "q1");
/// # });
/// ```
#[derive(Clone)]
pub struct ConversationMemory {
    runs: VecDeque<Run>,
    max_runs: Option<usize>,
    autoprune: bool,
    driver: Option<Arc<dyn MemoryDriver>>,
    meta: BTreeMap<String, Value>,
}

impl ConversationMemory {
    /// Creates an empty, unbounded memory with autopruning enabled.
    pub fn new() -> Self {
        Self {
            runs: VecDeque::new(),
            max_runs: None,
            autoprune: true,
            driver: None,
            meta: BTreeMap::new(),
        }
    }

    /// Creates a memory from settings.
    pub fn from_settings(settings: &MemorySettings) -> Self {
        Self::new()
            .with_max_runs(settings.max_runs)
            .with_autoprune(settings.autoprune)
    }

    /// Sets the run cap, trimming existing history.
    pub fn with_max_runs(mut self, max_runs: Option<usize>) -> Self {
        self.max_runs = max_runs;
        self.evict();
        self
    }

    pub fn with_autoprune(mut self, autoprune: bool) -> Self {
        self.autoprune = autoprune;
        self
    }

    /// Attaches a persistence driver without loading from it.
    pub fn with_driver(mut self, driver: Arc<dyn MemoryDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Attaches a persistence driver and, when `autoload` is set, hydrates
    /// the history from it.
    ///
    /// Loaded history is trimmed to `max_runs`.
    ///
    /// # Errors
    ///
    /// Returns the driver's error if loading fails.
    pub async fn load_from(mut self, driver: Arc<dyn MemoryDriver>, autoload: bool) -> Result<Self> {
        if autoload {
            let snapshot = driver.load().await?;
            self.runs = snapshot.runs.into();
            self.meta = snapshot.meta;
            self.evict();
            tracing::debug!(runs = self.runs.len(), "Loaded conversation memory");
        }
        self.driver = Some(driver);
        Ok(self)
    }

    /// Appends a run, evicts past the cap, then persists.
    ///
    /// # Errors
    ///
    /// Returns the driver's error if storing fails. The run stays in memory.
    pub async fn add_run(&mut self, run: Run) -> Result<()> {
        self.runs.push_back(run);
        self.evict();

        if let Some(driver) = &self.driver {
            let runs: Vec<Run> = self.runs.iter().cloned().collect();
            driver.store(&runs, &self.meta).await?;
        }
        Ok(())
    }

    fn evict(&mut self) {
        if let Some(max) = self.max_runs {
            while self.runs.len() > max {
                if let Some(evicted) = self.runs.pop_front() {
                    tracing::debug!(run_id = %evicted.id, "Evicted oldest run");
                }
            }
        }
    }

    /// Stored runs, oldest first.
    pub fn runs(&self) -> &VecDeque<Run> {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn max_runs(&self) -> Option<usize> {
        self.max_runs
    }

    pub fn autoprune(&self) -> bool {
        self.autoprune
    }

    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    /// Sets a metadata entry. Persisted with the next run.
    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.meta.insert(key.into(), value.into());
    }

    /// Selects the runs to render into `stack`, oldest first.
    ///
    /// With autopruning disabled every run is selected. Otherwise runs are
    /// added newest first; after each addition the whole candidate stack is
    /// counted, and the first run that pushes it past
    /// `max_input_tokens - reserve` stops the selection.
    pub fn runs_fitting(&self, stack: &PromptStack, tokenizer: &dyn Tokenizer, reserve: usize) -> Vec<Run> {
        if !self.autoprune {
            return self.runs.iter().cloned().collect();
        }

        let mut included: VecDeque<Run> = VecDeque::new();

        for run in self.runs.iter().rev() {
            let mut candidate = stack.clone();
            candidate.insert_after_system(
                std::iter::once(run)
                    .chain(included.iter())
                    .flat_map(Run::to_messages),
            );

            if tokenizer.remaining(&candidate, reserve).is_none() {
                tracing::debug!(
                    included = included.len(),
                    total = self.runs.len(),
                    "Pruned conversation memory to fit token budget"
                );
                break;
            }
            included.push_front(run.clone());
        }

        included.into()
    }

    /// Inserts the fitting runs after the system messages of `stack`.
    ///
    /// # Returns
    ///
    /// Number of runs inserted
    pub fn add_to_prompt_stack(&self, stack: &mut PromptStack, tokenizer: &dyn Tokenizer, reserve: usize) -> usize {
        let runs = self.runs_fitting(stack, tokenizer, reserve);
        stack.insert_after_system(runs.iter().flat_map(Run::to_messages));
        runs.len()
    }

    /// Wraps this memory for sharing between tasks.
    pub fn shared(self) -> SharedMemory {
        Arc::new(tokio::sync::Mutex::new(self))
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConversationMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationMemory")
            .field("runs", &self.runs.len())
            .field("max_runs", &self.max_runs)
            .field("autoprune", &self.autoprune)
            .field("has_driver", &self.driver.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Role;
    use crate::tokenizer::SimpleTokenizer;

    fn run(n: usize) -> Run {
        Run::new(Artifact::text(format!("q{n}")), Artifact::text(format!("a{n}")))
    }

    async fn memory_with(n: usize) -> ConversationMemory {
        let mut memory = ConversationMemory::new();
        for i in 0..n {
            memory.add_run(run(i)).await.unwrap();
        }
        memory
    }

    #[tokio::test]
    async fn test_fifo_cap() {
        let mut memory = ConversationMemory::new().with_max_runs(Some(3));
        for i in 0..5 {
            memory.add_run(run(i)).await.unwrap();
        }
        let inputs: Vec<String> = memory.runs().iter().map(|r| r.input.to_text()).collect();
        assert_eq!(inputs, vec!["q2", "q3", "q4"]);
    }

    #[tokio::test]
    async fn test_store_never_exceeds_cap() {
        let driver = Arc::new(InMemoryMemoryDriver::new());
        let mut memory = ConversationMemory::new()
            .with_max_runs(Some(2))
            .with_driver(driver.clone());

        for i in 0..4 {
            memory.add_run(run(i)).await.unwrap();
            assert!(driver.snapshot().runs.len() <= 2);
        }
        assert_eq!(driver.store_count(), 4);
    }

    #[tokio::test]
    async fn test_load_from_trims() {
        let snapshot = MemorySnapshot {
            runs: (0..5).map(run).collect(),
            meta: BTreeMap::new(),
        };
        let driver = Arc::new(InMemoryMemoryDriver::with_snapshot(snapshot));

        let memory = ConversationMemory::new()
            .with_max_runs(Some(2))
            .load_from(driver.clone(), true)
            .await
            .unwrap();
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.runs()[0].input.to_text(), "q3");

        let empty = ConversationMemory::new().load_from(driver, false).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_no_autoprune_includes_everything() {
        let memory = memory_with(10).await.with_autoprune(false);
        let tokenizer = SimpleTokenizer::new(1).with_characters_per_token(1);
        let mut stack = PromptStack::new();
        stack.add_user("now");

        assert_eq!(memory.add_to_prompt_stack(&mut stack, &tokenizer, 1), 10);
        assert_eq!(stack.len(), 21);
    }

    #[tokio::test]
    async fn test_pruning_keeps_newest() {
        let memory = memory_with(5).await;
        // Each run renders to "user: qN\n\n" + "assistant: aN\n\n" = 25 characters
        let mut base = PromptStack::new();
        base.add_user("now");
        let base_tokens = 11;
        let tokenizer = SimpleTokenizer::new(base_tokens + 2 * 25 + 1).with_characters_per_token(1);

        let mut stack = base.clone();
        let included = memory.add_to_prompt_stack(&mut stack, &tokenizer, 1);
        assert_eq!(included, 2);
        assert_eq!(stack.messages[0].content, "q3");
        assert_eq!(stack.messages[2].content, "q4");
        assert_eq!(stack.last().unwrap().content, "now");
        assert_eq!(stack.messages[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_pruning_idempotent() {
        let memory = memory_with(6).await;
        let tokenizer = SimpleTokenizer::new(70).with_characters_per_token(1);
        let mut stack = PromptStack::new();
        stack.add_system("sys");

        let first: Vec<String> = memory
            .runs_fitting(&stack, &tokenizer, 1)
            .into_iter()
            .map(|r| r.id)
            .collect();
        let second: Vec<String> = memory
            .runs_fitting(&stack, &tokenizer, 1)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_fits() {
        let memory = memory_with(3).await;
        let tokenizer = SimpleTokenizer::new(5).with_characters_per_token(1);
        let mut stack = PromptStack::new();
        stack.add_user("a much longer prompt than the budget");

        assert_eq!(memory.add_to_prompt_stack(&mut stack, &tokenizer, 1), 0);
        assert_eq!(stack.len(), 1);
    }
}
