//! Consolidation: fold a quiescent todo list into the one report a request
//! produces.
//!
//! # Purpose
//! Pure reduction. Every value in the report comes from task records written
//! during execution, so consolidating the same list twice yields identical
//! output. The scheduler calls this exactly once per request, after the loop
//! reaches quiescence.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::plan::TaskSpec;
use crate::mission::WorkerReport;
use crate::task::{Priority, StatusCounts, TaskId, TaskStatus, TodoList};
use crate::worker::WorkerKind;

/// One completed task in the final report.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedTask {
    pub task_id: TaskId,
    pub content: String,
    pub attempt_count: u32,
    pub finished_at: DateTime<Utc>,
    pub report: WorkerReport,
}

/// One blocked task in the final report, with enough context to hand back
/// for human re-submission.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedTask {
    pub task_id: TaskId,
    pub content: String,
    pub priority: Priority,
    pub worker_kind: WorkerKind,
    pub attempt_count: u32,
    pub blocked_at: DateTime<Utc>,
    pub reason: String,
    /// One entry per dispatch attempt, most recent last
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<String>,
}

impl BlockedTask {
    /// A fresh spec for submitting this work as a new request.
    ///
    /// Dependencies are not carried over: they referred to tasks of the
    /// original request and are meaningless outside it.
    pub fn resubmission_spec(&self) -> TaskSpec {
        TaskSpec::new(self.content.clone())
            .with_priority(self.priority)
            .with_worker_kind(self.worker_kind.clone())
    }
}

/// One cancelled task in the final report.
#[derive(Debug, Clone, Serialize)]
pub struct CancelledTask {
    pub task_id: TaskId,
    pub content: String,
    pub attempt_count: u32,
    pub cancelled_at: DateTime<Utc>,
}

/// The consolidated outcome of one top-level request.
///
/// Lists preserve todo-list insertion order.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub goal: String,
    pub completed: Vec<CompletedTask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked: Vec<BlockedTask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cancelled: Vec<CancelledTask>,
    pub counts: StatusCounts,
}

impl FinalReport {
    /// Reduce a quiescent todo list to its report.
    ///
    /// # Precondition
    /// The list has nothing Pending or InProgress; callers consolidate only
    /// after the execution loop finishes.
    pub fn consolidate(goal: impl Into<String>, todo: &TodoList) -> Self {
        let mut completed = Vec::new();
        let mut blocked = Vec::new();
        let mut cancelled = Vec::new();

        for task in todo.tasks() {
            match task.status() {
                TaskStatus::Completed => {
                    // Completed tasks always carry a report; fall back to an
                    // empty digest rather than inventing one.
                    let report = task
                        .result()
                        .cloned()
                        .unwrap_or_else(|| WorkerReport::complete(vec![], vec![], vec![]));
                    completed.push(CompletedTask {
                        task_id: task.id(),
                        content: task.content().to_string(),
                        attempt_count: task.attempt_count(),
                        finished_at: task.status_changed_at(),
                        report,
                    });
                }
                TaskStatus::Blocked => {
                    let (reason, attempts) = task
                        .blocker()
                        .map(|b| (b.reason.clone(), b.attempts.clone()))
                        .unwrap_or_else(|| ("unspecified blockade".to_string(), Vec::new()));
                    blocked.push(BlockedTask {
                        task_id: task.id(),
                        content: task.content().to_string(),
                        priority: task.priority(),
                        worker_kind: task.worker_kind().clone(),
                        attempt_count: task.attempt_count(),
                        blocked_at: task.status_changed_at(),
                        reason,
                        attempts,
                    });
                }
                TaskStatus::Cancelled => {
                    cancelled.push(CancelledTask {
                        task_id: task.id(),
                        content: task.content().to_string(),
                        attempt_count: task.attempt_count(),
                        cancelled_at: task.status_changed_at(),
                    });
                }
                TaskStatus::Pending | TaskStatus::InProgress => {}
            }
        }

        Self {
            goal: goal.into(),
            completed,
            blocked,
            cancelled,
            counts: todo.counts(),
        }
    }

    /// Whether every task completed: nothing blocked, nothing cancelled.
    pub fn is_fully_complete(&self) -> bool {
        self.blocked.is_empty()
            && self.cancelled.is_empty()
            && self.counts.completed == self.counts.total()
    }
}
