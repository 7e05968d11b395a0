//! Trackable work items held by the task store.
//!
//! A [`Task`] carries a status that is partly explicit (claimed, completed,
//! cancelled) and partly derived from its dependencies (pending, ready,
//! blocked). Derivation lives in the storage index; this module only defines
//! the record and its inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::types::TaskId;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on at least one dependency that is not completed.
    Pending,
    /// Every dependency is completed.
    Ready,
    /// Claimed by a worker.
    InProgress,
    /// A dependency is cancelled or itself blocked.
    Blocked,
    /// Finished.
    Completed,
    /// Abandoned.
    Cancelled,
}

impl TaskStatus {
    /// Statuses the store computes from the dependency graph.
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Blocked
        )
    }

    /// Completed or cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// All statuses, in display order.
    pub fn all() -> [TaskStatus; 6] {
        [
            TaskStatus::Pending,
            TaskStatus::Ready,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Task priority; lower values sort first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Critical),
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            other => Err(format!("priority must be in 0..=3, got {}", other)),
        }
    }
}

/// A stored task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a task from creation input. The status starts as `Pending` until
    /// the store evaluates dependencies.
    pub(crate) fn from_input(id: TaskId, input: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: input.title,
            description: input.description,
            status: TaskStatus::Pending,
            priority: input.priority.unwrap_or_default(),
            dependencies: input.dependencies,
            assignee: input.assignee,
            tags: input.tags,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply a patch in place. `id` and `created_at` are never touched.
    pub(crate) fn apply(&mut self, patch: TaskPatch, now: DateTime<Utc>) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(dependencies) = patch.dependencies {
            self.dependencies = dependencies;
        }
        if let Some(assignee) = patch.assignee {
            self.assignee = assignee;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(status) = patch.status {
            match status {
                TaskStatus::Completed => {
                    if self.status != TaskStatus::Completed {
                        self.completed_at = Some(now);
                    }
                }
                _ => self.completed_at = None,
            }
            self.status = status;
        }
        self.updated_at = now;
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: Option<Priority>,
    pub dependencies: BTreeSet<TaskId>,
    pub assignee: Option<String>,
    pub tags: BTreeSet<String>,
}

impl NewTask {
    /// Create input with a title and defaults for everything else.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Builder: add a dependency.
    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    /// Builder: add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Builder: set the assignee.
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }
}

/// Partial update for a task. `None` leaves a field untouched.
///
/// Setting `status` to a derived status (`pending`, `ready`, `blocked`)
/// releases any explicit claim; the store then recomputes the real value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub dependencies: Option<BTreeSet<TaskId>>,
    pub assignee: Option<Option<String>>,
    pub tags: Option<BTreeSet<String>>,
}

impl TaskPatch {
    /// Patch that only changes the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Whether applying this patch can change which tasks are ready.
    pub(crate) fn touches_graph(&self) -> bool {
        self.status.is_some() || self.dependencies.is_some()
    }
}

/// Counts of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl TaskStats {
    pub(crate) fn record(&mut self, status: TaskStatus) {
        self.total += 1;
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Ready => self.ready += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Blocked => self.blocked += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}
