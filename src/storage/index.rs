//! In-memory task index with a reverse-dependency map.
//!
//! The index owns readiness: whenever a task changes, its own derived status
//! is recomputed and changes propagate to dependents breadth-first, so a
//! mutation costs O(out-degree) per task whose status actually moves.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::task::{Task, TaskStats, TaskStatus};
use crate::core::types::TaskId;

#[derive(Debug, Default)]
pub(crate) struct TaskIndex {
    tasks: HashMap<TaskId, Task>,
    /// dependency id -> tasks listing it. Entries may name ids that no longer
    /// (or do not yet) exist.
    dependents: HashMap<TaskId, HashSet<TaskId>>,
}

impl TaskIndex {
    pub(crate) fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub(crate) fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// All tasks ordered by creation time.
    pub(crate) fn all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Ready tasks ordered by priority, then creation time.
    pub(crate) fn ready(&self) -> Vec<Task> {
        let mut ready: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Ready)
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        ready
    }

    pub(crate) fn stats(&self) -> TaskStats {
        let mut stats = TaskStats::default();
        for task in self.tasks.values() {
            stats.record(task.status);
        }
        stats
    }

    /// Status a task would have given the current state of its dependencies.
    /// Explicit statuses (claimed, completed, cancelled) are returned as-is.
    pub(crate) fn derive_status(&self, task: &Task) -> TaskStatus {
        if !task.status.is_derived() {
            return task.status;
        }

        let mut all_completed = true;
        for dep in &task.dependencies {
            match self.tasks.get(dep).map(|d| d.status) {
                Some(TaskStatus::Cancelled) | Some(TaskStatus::Blocked) => {
                    return TaskStatus::Blocked;
                }
                Some(TaskStatus::Completed) => {}
                _ => all_completed = false,
            }
        }

        if all_completed {
            TaskStatus::Ready
        } else {
            TaskStatus::Pending
        }
    }

    /// Whether giving `id` the dependency set `deps` would close a cycle.
    pub(crate) fn would_cycle<'a>(
        &self,
        id: &TaskId,
        deps: impl IntoIterator<Item = &'a TaskId>,
    ) -> bool {
        let mut stack: Vec<&TaskId> = deps.into_iter().collect();
        let mut seen: HashSet<&TaskId> = HashSet::new();

        while let Some(current) = stack.pop() {
            if current == id {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(task) = self.tasks.get(current) {
                stack.extend(task.dependencies.iter());
            }
        }
        false
    }

    /// Insert or replace a task and propagate readiness. Returns the ids whose
    /// status changed as a side effect (excluding `task` itself).
    pub(crate) fn upsert(&mut self, mut task: Task) -> Vec<TaskId> {
        let id = task.id.clone();
        if let Some(previous) = self.tasks.remove(&id) {
            self.unlink(&previous);
        }
        self.link(&task);
        task.status = self.derive_status(&task);
        self.tasks.insert(id.clone(), task);
        self.propagate_from(&id)
    }

    /// Mark a task completed. Returns `None` if the id is unknown.
    pub(crate) fn complete(&mut self, id: &TaskId, at: DateTime<Utc>) -> Option<Vec<TaskId>> {
        let task = self.tasks.get_mut(id)?;
        if task.status == TaskStatus::Completed {
            return Some(Vec::new());
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(at);
        task.updated_at = at;
        Some(self.propagate_from(id))
    }

    /// Remove a task. Dependents keep the dangling id and fall back to pending.
    pub(crate) fn remove(&mut self, id: &TaskId) -> Option<(Task, Vec<TaskId>)> {
        let task = self.tasks.remove(id)?;
        self.unlink(&task);
        let changed = self.propagate_from(id);
        Some((task, changed))
    }

    /// Recompute every derived status from scratch, used after log replay.
    pub(crate) fn recompute_all(&mut self) {
        for task in self.tasks.values_mut() {
            if task.status.is_derived() {
                task.status = TaskStatus::Pending;
            }
        }
        let ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        for id in ids {
            if let Some(task) = self.tasks.get(&id) {
                let status = self.derive_status(task);
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.status = status;
                }
            }
            self.propagate_from(&id);
        }
    }

    fn link(&mut self, task: &Task) {
        for dep in &task.dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(task.id.clone());
        }
    }

    fn unlink(&mut self, task: &Task) {
        for dep in &task.dependencies {
            if let Some(set) = self.dependents.get_mut(dep) {
                set.remove(&task.id);
                if set.is_empty() {
                    self.dependents.remove(dep);
                }
            }
        }
    }

    /// Breadth-first readiness propagation starting at the dependents of
    /// `origin`. Only tasks whose status changes push their own dependents.
    fn propagate_from(&mut self, origin: &TaskId) -> Vec<TaskId> {
        let mut changed = Vec::new();
        let mut queue: VecDeque<TaskId> = self
            .dependents
            .get(origin)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(id) = queue.pop_front() {
            let Some(task) = self.tasks.get(&id) else {
                continue;
            };
            let next = self.derive_status(task);
            if next == task.status {
                continue;
            }
            if let Some(task) = self.tasks.get_mut(&id) {
                task.status = next;
            }
            changed.push(id.clone());
            if let Some(set) = self.dependents.get(&id) {
                queue.extend(set.iter().cloned());
            }
        }

        changed
    }
}
