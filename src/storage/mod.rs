//! Durable, dependency-aware task store.
//!
//! Every mutation is appended to a [`TaskLog`] before the in-memory index is
//! touched. The index lives behind a single async mutex that is held across
//! the append, so mutations are serialized and the log order matches the
//! order in which they were applied.

mod index;
mod jsonl;
mod memory;

pub use jsonl::JsonlLog;
pub use memory::MemoryLog;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::task::{NewTask, Task, TaskPatch, TaskStats, TaskStatus};
use crate::core::types::TaskId;
use index::TaskIndex;

/// Errors that can occur during task store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No task with this id.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The requested dependencies would make the task depend on itself.
    #[error("dependency cycle through task {0}")]
    DependencyCycle(TaskId),

    /// Rejected input.
    #[error("invalid task: {0}")]
    InvalidInput(String),

    /// Log file I/O failed.
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Log lock was poisoned.
    #[error("log lock poisoned")]
    LockPoisoned,

    /// The log backend refused the operation.
    #[error("log unavailable: {0}")]
    Unavailable(String),
}

/// One line of the task log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogRecord {
    Create { task: Task },
    Update { task: Task },
    Complete { id: TaskId, at: DateTime<Utc> },
    Delete { id: TaskId },
}

impl LogRecord {
    fn encode(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// Append-only record log backing a [`TaskStore`].
///
/// Implementations must not return from `append` until the record is durable
/// for their medium.
#[async_trait]
pub trait TaskLog: Send + Sync {
    /// Create the log if it does not exist. Must be idempotent.
    async fn init(&self) -> Result<(), StoreError>;

    /// Durably append one record.
    async fn append(&self, record: &LogRecord) -> Result<(), StoreError>;

    /// Raw lines in append order. Parsing is left to the store so malformed
    /// lines are handled the same way for every backend.
    async fn read_lines(&self) -> Result<Vec<String>, StoreError>;

    /// Atomically replace the whole log.
    async fn rewrite(&self, records: &[LogRecord]) -> Result<(), StoreError>;
}

/// Outcome of replaying the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records applied to the index.
    pub applied: usize,
    /// Lines that could not be parsed.
    pub skipped: usize,
    /// Tasks in the index afterwards.
    pub tasks: usize,
}

/// Single-owner task registry.
pub struct TaskStore {
    log: Arc<dyn TaskLog>,
    index: Mutex<TaskIndex>,
}

impl TaskStore {
    /// Create a store over the given log. Call [`init`](Self::init) and
    /// [`load`](Self::load) before use, or use [`open`](Self::open).
    pub fn new(log: Arc<dyn TaskLog>) -> Self {
        Self {
            log,
            index: Mutex::new(TaskIndex::default()),
        }
    }

    /// Store backed by a volatile in-memory log.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLog::new()))
    }

    /// Initialise and load a store in one step.
    pub async fn open(log: Arc<dyn TaskLog>) -> Result<Self, StoreError> {
        let store = Self::new(log);
        store.init().await?;
        store.load().await?;
        Ok(store)
    }

    /// Open a store backed by a JSON Lines file.
    pub async fn open_file(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open(Arc::new(JsonlLog::new(path))).await
    }

    /// Create backing storage if absent.
    pub async fn init(&self) -> Result<(), StoreError> {
        self.log.init().await
    }

    /// Rebuild the index from the log. Malformed lines are skipped with a
    /// warning; derived statuses are recomputed rather than trusted.
    pub async fn load(&self) -> Result<LoadReport, StoreError> {
        let mut index = self.index.lock().await;
        let lines = self.log.read_lines().await?;

        let mut rebuilt = TaskIndex::default();
        let mut report = LoadReport::default();

        for (lineno, line) in lines.iter().enumerate() {
            let record: LogRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(line = lineno + 1, error = %e, "skipping malformed task log record");
                    report.skipped += 1;
                    continue;
                }
            };
            replay(&mut rebuilt, record);
            report.applied += 1;
        }

        rebuilt.recompute_all();
        report.tasks = rebuilt.len();
        *index = rebuilt;

        info!(
            applied = report.applied,
            skipped = report.skipped,
            tasks = report.tasks,
            "task log loaded"
        );
        Ok(report)
    }

    /// Create a task with a fresh id.
    pub async fn create(&self, input: NewTask) -> Result<Task, StoreError> {
        if input.title.trim().is_empty() {
            return Err(StoreError::InvalidInput("title must not be empty".into()));
        }

        let mut index = self.index.lock().await;

        let mut id = TaskId::generate();
        while index.contains(&id) {
            id = TaskId::generate();
        }

        let mut task = Task::from_input(id.clone(), input, Utc::now());
        task.status = index.derive_status(&task);

        self.log
            .append(&LogRecord::Create { task: task.clone() })
            .await?;
        index.upsert(task);

        debug!(task_id = %id, "task created");
        current(&index, &id)
    }

    /// Apply a partial update. `id` and `createdAt` never change.
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, StoreError> {
        if matches!(&patch.title, Some(title) if title.trim().is_empty()) {
            return Err(StoreError::InvalidInput("title must not be empty".into()));
        }

        let mut index = self.index.lock().await;
        let mut task = index
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;

        if let Some(deps) = &patch.dependencies {
            if index.would_cycle(id, deps) {
                return Err(StoreError::DependencyCycle(id.clone()));
            }
        }

        let graph_changed = patch.touches_graph();
        task.apply(patch, Utc::now());
        task.status = index.derive_status(&task);

        self.log
            .append(&LogRecord::Update { task: task.clone() })
            .await?;
        let changed = index.upsert(task);

        debug!(
            task_id = %id,
            graph_changed,
            dependents_changed = changed.len(),
            "task updated"
        );
        current(&index, id)
    }

    /// Mark a task completed and refresh its dependents.
    ///
    /// Completing an already-completed task is a no-op: `completedAt` keeps
    /// its first value and nothing is appended to the log.
    pub async fn complete(&self, id: &TaskId) -> Result<Task, StoreError> {
        let mut index = self.index.lock().await;
        let task = index
            .get(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;

        if task.status == TaskStatus::Completed {
            return Ok(task.clone());
        }

        let at = Utc::now();
        self.log
            .append(&LogRecord::Complete { id: id.clone(), at })
            .await?;
        let changed = index.complete(id, at).unwrap_or_default();

        debug!(task_id = %id, newly_ready = changed.len(), "task completed");
        current(&index, id)
    }

    /// Remove a task. Tasks that depended on it fall back to pending.
    pub async fn delete(&self, id: &TaskId) -> Result<Task, StoreError> {
        let mut index = self.index.lock().await;
        if !index.contains(id) {
            return Err(StoreError::TaskNotFound(id.clone()));
        }

        self.log.append(&LogRecord::Delete { id: id.clone() }).await?;
        let (task, changed) = index
            .remove(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;

        debug!(task_id = %id, dependents_changed = changed.len(), "task deleted");
        Ok(task)
    }

    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.index.lock().await.get(id).cloned()
    }

    /// All tasks ordered by creation time.
    pub async fn get_all(&self) -> Vec<Task> {
        self.index.lock().await.all()
    }

    /// Ready tasks ordered by priority, then creation time.
    pub async fn get_ready(&self) -> Vec<Task> {
        self.index.lock().await.ready()
    }

    pub async fn get_stats(&self) -> TaskStats {
        self.index.lock().await.stats()
    }

    /// Rewrite the log as one `create` record per live task.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let index = self.index.lock().await;
        let records: Vec<LogRecord> = index
            .all()
            .into_iter()
            .map(|task| LogRecord::Create { task })
            .collect();

        self.log.rewrite(&records).await?;
        info!(records = records.len(), "task log compacted");
        Ok(records.len())
    }
}

fn current(index: &TaskIndex, id: &TaskId) -> Result<Task, StoreError> {
    index
        .get(id)
        .cloned()
        .ok_or_else(|| StoreError::TaskNotFound(id.clone()))
}

fn replay(index: &mut TaskIndex, record: LogRecord) {
    match record {
        LogRecord::Create { task } | LogRecord::Update { task } => {
            index.upsert(task);
        }
        LogRecord::Complete { id, at } => {
            if index.complete(&id, at).is_none() {
                warn!(task_id = %id, "completion record for unknown task");
            }
        }
        LogRecord::Delete { id } => {
            index.remove(&id);
        }
    }
}
