//! Persistence drivers for conversation memory.

use super::Run;
use crate::error::{Result, WeaveError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Persisted state of a conversation memory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Runs, oldest first
    #[serde(default)]
    pub runs: Vec<Run>,
    /// Memory-level metadata
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

/// Store/load contract for conversation memory.
///
/// Storing the same state twice must leave the backend unchanged.
#[async_trait]
pub trait MemoryDriver: Send + Sync {
    /// Replaces the persisted state with `runs` and `meta`.
    async fn store(&self, runs: &[Run], meta: &BTreeMap<String, Value>) -> Result<()>;

    /// Loads the persisted state. An empty backend yields an empty snapshot.
    async fn load(&self) -> Result<MemorySnapshot>;
}

/// Stores memory as a pretty-printed JSON file.
///
/// # Example
///
/// ```
/// use weave_core::memory::LocalFileMemoryDriver;
///
/// let driver = LocalFileMemoryDriver::new("/tmp/conversation.json");
/// assert!(driver.path().ends_with("conversation.json"));
/// ```
#[derive(Clone, Debug)]
pub struct LocalFileMemoryDriver {
    path: PathBuf,
}

impl LocalFileMemoryDriver {
    /// Creates a driver for the given file. The file is created on first store.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MemoryDriver for LocalFileMemoryDriver {
    async fn store(&self, runs: &[Run], meta: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let snapshot = MemorySnapshot {
            runs: runs.to_vec(),
            meta: meta.clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    async fn load(&self) -> Result<MemorySnapshot> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(MemorySnapshot::default()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                WeaveError::MemoryDriver(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemorySnapshot::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps the last stored snapshot in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMemoryDriver {
    snapshot: Mutex<MemorySnapshot>,
    stores: AtomicUsize,
}

impl InMemoryMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver pre-seeded with a snapshot.
    pub fn with_snapshot(snapshot: MemorySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            stores: AtomicUsize::new(0),
        }
    }

    /// Number of `store` calls received.
    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    /// Returns a copy of the stored snapshot.
    pub fn snapshot(&self) -> MemorySnapshot {
        self.snapshot
            .lock()
            .expect("memory snapshot lock poisoned")
            .clone()
    }
}

#[async_trait]
impl MemoryDriver for InMemoryMemoryDriver {
    async fn store(&self, runs: &[Run], meta: &BTreeMap<String, Value>) -> Result<()> {
        let mut snapshot = self.snapshot.lock().expect("memory snapshot lock poisoned");
        snapshot.runs = runs.to_vec();
        snapshot.meta = meta.clone();
        self.stores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<MemorySnapshot> {
        Ok(self.snapshot())
    }
}
