//! Ordered task collection owned by exactly one scheduler.
//!
//! # Invariants
//! - Insertion order is preserved and used as the final tie-break
//! - Every dependency id refers to a task in the same list
//! - All mutation goes through `&mut self`; there is no shared-state path
//!
//! The list never calls out: dispatching, retry policy, and reporting live in
//! the scheduler. This keeps every operation here synchronous and total.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use super::task::{Blocker, Task, TaskError, TaskId, TaskStatus};
use crate::mission::WorkerReport;

/// Per-status counts, used by the loop predicate and the final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub blocked: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.blocked + self.cancelled
    }
}

/// The working state of one top-level request.
///
/// Created when a scheduler accepts a work order, dropped once the
/// consolidated report is produced. Nothing here survives the request.
#[derive(Debug, Default)]
pub struct TodoList {
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
}

impl TodoList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch of tasks, preserving their order.
    ///
    /// Dependencies may point at tasks already in the list or at other tasks
    /// in the same batch (in either direction).
    ///
    /// # Errors
    /// Rejects duplicate ids and dependencies that resolve to no known task.
    pub fn add_all(&mut self, tasks: Vec<Task>) -> Result<(), TaskError> {
        let mut known: HashSet<TaskId> = self.index.keys().copied().collect();
        for task in &tasks {
            if !known.insert(task.id()) {
                return Err(TaskError::DuplicateTask(task.id()));
            }
        }
        for task in &tasks {
            for dep in task.dependencies() {
                if !known.contains(dep) {
                    return Err(TaskError::UnknownTask(*dep));
                }
            }
        }

        for task in tasks {
            self.index.insert(task.id(), self.tasks.len());
            self.tasks.push(task);
        }
        Ok(())
    }

    /// Append a single task.
    pub fn add(&mut self, task: Task) -> Result<(), TaskError> {
        self.add_all(vec![task])
    }

    // Lookup

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.index.get(&id).map(|&i| &self.tasks[i])
    }

    fn get_mut(&mut self, id: TaskId) -> Result<&mut Task, TaskError> {
        match self.index.get(&id) {
            Some(&i) => Ok(&mut self.tasks[i]),
            None => Err(TaskError::UnknownTask(id)),
        }
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut c = StatusCounts::default();
        for task in &self.tasks {
            match task.status() {
                TaskStatus::Pending => c.pending += 1,
                TaskStatus::InProgress => c.in_progress += 1,
                TaskStatus::Completed => c.completed += 1,
                TaskStatus::Blocked => c.blocked += 1,
                TaskStatus::Cancelled => c.cancelled += 1,
            }
        }
        c
    }

    // Status transitions, by id

    pub fn mark_in_progress(&mut self, id: TaskId) -> Result<(), TaskError> {
        self.get_mut(id)?.start()
    }

    pub fn mark_completed(&mut self, id: TaskId, report: WorkerReport) -> Result<(), TaskError> {
        self.get_mut(id)?.complete(report)
    }

    pub fn mark_blocked(&mut self, id: TaskId, blocker: Blocker) -> Result<(), TaskError> {
        self.get_mut(id)?.block(blocker)
    }

    pub fn requeue(&mut self, id: TaskId) -> Result<(), TaskError> {
        self.get_mut(id)?.requeue()
    }

    /// Cancel every task that is still Pending or InProgress.
    ///
    /// Completed, Blocked, and already-Cancelled tasks are left untouched;
    /// Blocked in particular keeps its diagnosis for the final report.
    ///
    /// # Returns
    /// The ids that were actually cancelled.
    pub fn cancel_unresolved(&mut self) -> Vec<TaskId> {
        let mut cancelled = Vec::new();
        for task in &mut self.tasks {
            if task.status().is_active() {
                // Active tasks always accept cancel, so this cannot fail.
                if task.cancel().is_ok() {
                    cancelled.push(task.id());
                }
            }
        }
        cancelled
    }

    // Selection

    /// True while any task could still change state on its own: Pending or
    /// InProgress. Blocked tasks are settled and do not keep the loop alive;
    /// they are surfaced by the consolidator instead.
    pub fn has_non_terminal(&self) -> bool {
        self.tasks.iter().any(|t| t.status().is_active())
    }

    /// Whether every dependency of `task` has completed.
    fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies().iter().all(|dep| {
            self.get(*dep)
                .map(|d| d.status() == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// The next task eligible for dispatch: highest priority Pending task
    /// whose dependencies are all Completed. Ties break by priority rank,
    /// then insertion order.
    ///
    /// Returns `None` when nothing is currently eligible, which is not the
    /// same as the request being finished: tasks may be in flight or gated
    /// on incomplete dependencies.
    pub fn next_ready(&self) -> Option<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Pending && self.dependencies_satisfied(t))
            .min_by_key(|t| t.priority().rank())
            .map(|t| t.id())
    }

    /// Settle tasks that can never run because a dependency resolved without
    /// completing. Runs to a fixpoint so whole chains collapse at once.
    ///
    /// # Returns
    /// `(task, failed_dependency)` pairs in the order they were settled.
    pub fn settle_stranded(&mut self) -> Vec<(TaskId, TaskId)> {
        let mut settled = Vec::new();
        loop {
            let next = self.tasks.iter().find_map(|t| {
                if t.status() != TaskStatus::Pending {
                    return None;
                }
                t.dependencies()
                    .iter()
                    .find(|dep| {
                        self.get(**dep)
                            .map(|d| d.status().is_resolved() && d.status() != TaskStatus::Completed)
                            .unwrap_or(false)
                    })
                    .map(|dep| (t.id(), *dep))
            });

            match next {
                Some((id, dep)) => {
                    debug!(task = %id, dependency = %dep, "settling stranded task");
                    let blocker =
                        Blocker::new(format!("dependency {} did not complete", dep));
                    // The task is Pending, so block() cannot fail here.
                    let _ = self.mark_blocked(id, blocker);
                    settled.push((id, dep));
                }
                None => break,
            }
        }
        settled
    }
}
