//! Core Task type with lifecycle state machine and attempt tracking.
//!
//! # Invariants
//! - `id` is unique within the owning todo list
//! - `attempt_count` only grows, and only via `start()`
//! - `result` is populated iff status is Completed
//! - `blocker` is populated iff status is Blocked

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mission::WorkerReport;
use crate::worker::WorkerKind;

/// Unique identifier for a task.
///
/// # Properties
/// - Globally unique within an execution context
/// - Immutable once created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    ///
    /// # Postcondition
    /// Returns a fresh ID that has never been used before in this process.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Only a tie-break between ready tasks, never a
/// preemption signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Selection rank; lower runs first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> InProgress -> Completed
///        \             \-> Blocked
///        \             \-> Pending    (requeue after transient failure)
///        \-> Blocked                  (dependency never completed)
///        \-> Cancelled
/// InProgress -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies and a dispatch slot
    Pending,
    /// Dispatched (or executing inline), awaiting its outcome
    InProgress,
    /// A worker returned a complete result
    Completed,
    /// Semantically stuck; recorded and never re-dispatched automatically
    Blocked,
    /// Abandoned by a request-level abort
    Cancelled,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    ///
    /// # Property
    /// `is_terminal() => !is_active()`
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Check if the task is still active (can make progress).
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }

    /// Check if the task is settled from the execution loop's point of view.
    ///
    /// Blocked counts as resolved: the loop will not touch it again, it is
    /// surfaced in the final report instead.
    pub fn is_resolved(&self) -> bool {
        self.is_terminal() || matches!(self, TaskStatus::Blocked)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Advisory sizing of a task, set at planning time and consulted by routing.
///
/// Never affects correctness: a misjudged estimate costs efficiency, not
/// outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeEstimate {
    /// Answerable on the spot, not worth a dispatch slot
    Trivial,
    /// One coherent unit of work for a single worker
    Focused,
    /// Big enough to be worth decomposing again
    MultiStep,
}

impl Default for ScopeEstimate {
    fn default() -> Self {
        ScopeEstimate::Focused
    }
}

/// Why a task ended up Blocked, with the approaches that were tried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocker {
    /// Human-readable reason the task cannot proceed
    pub reason: String,
    /// One entry per dispatch attempt, most recent last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<String>,
}

impl Blocker {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            attempts: Vec::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<String>) -> Self {
        self.attempts = attempts;
        self
    }
}

/// A unit of work tracked by a scheduler.
///
/// # Invariants
/// - All fields are immutable after construction except status, counters,
///   and outcome fields, which change only via explicit transitions
/// - `dependencies` refer to tasks in the same todo list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task
    id: TaskId,

    /// Opaque description of what to accomplish
    content: String,

    /// Tie-break between simultaneously ready tasks
    priority: Priority,

    /// Tasks that must be Completed before this one may start
    dependencies: Vec<TaskId>,

    /// Advisory capability tag; the dispatch may substitute a fallback kind
    worker_kind: WorkerKind,

    /// Advisory sizing, consulted when choosing a route
    scope_estimate: ScopeEstimate,

    /// Number of dispatch initiations so far
    attempt_count: u32,

    /// Final worker result, present iff Completed
    result: Option<WorkerReport>,

    /// Blockade record, present iff Blocked
    blocker: Option<Blocker>,

    /// Current status
    status: TaskStatus,

    /// When `status` last changed (stamped at every transition)
    status_changed_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task.
    ///
    /// # Preconditions
    /// - `content` is non-empty
    ///
    /// # Postconditions
    /// - `status == Pending`, `attempt_count == 0`
    /// - `task.id` is a fresh unique identifier
    ///
    /// # Errors
    /// Returns `Err` if preconditions are violated.
    pub fn new(
        content: impl Into<String>,
        priority: Priority,
        worker_kind: WorkerKind,
    ) -> Result<Self, TaskError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(TaskError::EmptyContent);
        }

        Ok(Self {
            id: TaskId::new(),
            content,
            priority,
            dependencies: Vec::new(),
            worker_kind,
            scope_estimate: ScopeEstimate::default(),
            attempt_count: 0,
            result: None,
            blocker: None,
            status: TaskStatus::Pending,
            status_changed_at: Utc::now(),
        })
    }

    /// Attach dependencies that must complete before this task may start.
    pub fn with_dependencies(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_scope_estimate(mut self, scope_estimate: ScopeEstimate) -> Self {
        self.scope_estimate = scope_estimate;
        self
    }

    // Getters - all return references to preserve immutability semantics

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn worker_kind(&self) -> &WorkerKind {
        &self.worker_kind
    }

    pub fn scope_estimate(&self) -> ScopeEstimate {
        self.scope_estimate
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn result(&self) -> Option<&WorkerReport> {
        self.result.as_ref()
    }

    pub fn blocker(&self) -> Option<&Blocker> {
        self.blocker.as_ref()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn status_changed_at(&self) -> DateTime<Utc> {
        self.status_changed_at
    }

    /// Attempts left before the retry ceiling is hit.
    pub fn attempts_remaining(&self, max_attempts: u32) -> u32 {
        max_attempts.saturating_sub(self.attempt_count)
    }

    // State transitions - explicit and validated

    /// Begin a dispatch: Pending -> InProgress, attempt counter incremented.
    ///
    /// # Precondition
    /// `self.status == Pending`
    ///
    /// # Errors
    /// Returns `Err` if the task is not in Pending state.
    pub fn start(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::InProgress;
                self.attempt_count += 1;
                self.status_changed_at = Utc::now();
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: format!("{:?}", other),
                to: "InProgress".to_string(),
            }),
        }
    }

    /// Record a complete worker result: InProgress -> Completed.
    ///
    /// # Precondition
    /// `self.status == InProgress`
    pub fn complete(&mut self, report: WorkerReport) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::InProgress => {
                self.status = TaskStatus::Completed;
                self.result = Some(report);
                self.status_changed_at = Utc::now();
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: format!("{:?}", other),
                to: "Completed".to_string(),
            }),
        }
    }

    /// Record a blockade: Pending | InProgress -> Blocked.
    ///
    /// Pending is allowed so that a task whose dependency will never complete
    /// can be settled without a pointless dispatch.
    pub fn block(&mut self, blocker: Blocker) -> Result<(), TaskError> {
        if self.status.is_active() {
            self.status = TaskStatus::Blocked;
            self.blocker = Some(blocker);
            self.status_changed_at = Utc::now();
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: "Blocked".to_string(),
            })
        }
    }

    /// Return a dispatched task to the pool after a transient failure:
    /// InProgress -> Pending.
    ///
    /// The attempt already spent stays counted.
    pub fn requeue(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::InProgress => {
                self.status = TaskStatus::Pending;
                self.status_changed_at = Utc::now();
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: format!("{:?}", other),
                to: "Pending".to_string(),
            }),
        }
    }

    /// Abandon the task: Pending | InProgress -> Cancelled.
    ///
    /// # Precondition
    /// `self.status.is_active()`
    pub fn cancel(&mut self) -> Result<(), TaskError> {
        if self.status.is_active() {
            self.status = TaskStatus::Cancelled;
            self.status_changed_at = Utc::now();
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: "Cancelled".to_string(),
            })
        }
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Task content cannot be empty")]
    EmptyContent,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No task with id {0} in this list")]
    UnknownTask(TaskId),

    #[error("Task {0} is already in this list")]
    DuplicateTask(TaskId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::WorkerReport;

    fn kind() -> WorkerKind {
        WorkerKind::new("general")
    }

    #[test]
    fn new_task_starts_pending_with_zero_attempts() {
        let task = Task::new("write parser", Priority::Medium, kind()).expect("valid task");
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.attempt_count(), 0);
        assert!(task.result().is_none());
        assert!(task.blocker().is_none());
    }

    #[test]
    fn empty_content_is_rejected() {
        let err = Task::new("   ", Priority::Low, kind()).expect_err("must reject");
        assert!(matches!(err, TaskError::EmptyContent));
    }

    #[test]
    fn start_bumps_attempt_count() {
        let mut task = Task::new("t", Priority::High, kind()).expect("valid task");
        task.start().expect("pending -> in_progress");
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert_eq!(task.attempt_count(), 1);

        task.requeue().expect("in_progress -> pending");
        task.start().expect("second dispatch");
        assert_eq!(task.attempt_count(), 2);
    }

    #[test]
    fn complete_requires_in_progress() {
        let mut task = Task::new("t", Priority::Medium, kind()).expect("valid task");
        let err = task
            .complete(WorkerReport::complete(vec![], vec![], vec![]))
            .expect_err("pending cannot complete");
        assert!(matches!(err, TaskError::InvalidTransition { .. }));

        task.start().expect("start");
        task.complete(WorkerReport::complete(vec![], vec![], vec![]))
            .expect("in_progress -> completed");
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(task.result().is_some());
    }

    #[test]
    fn terminal_states_refuse_further_transitions() {
        let mut task = Task::new("t", Priority::Medium, kind()).expect("valid task");
        task.start().expect("start");
        task.complete(WorkerReport::complete(vec![], vec![], vec![]))
            .expect("complete");

        assert!(task.start().is_err());
        assert!(task.cancel().is_err());
        assert!(task.block(Blocker::new("late")).is_err());
        assert!(task.requeue().is_err());
    }

    #[test]
    fn pending_task_can_be_blocked_without_dispatch() {
        let mut task = Task::new("dependent", Priority::Medium, kind()).expect("valid task");
        task.block(Blocker::new("dependency failed"))
            .expect("pending -> blocked");
        assert_eq!(task.status(), TaskStatus::Blocked);
        assert_eq!(task.attempt_count(), 0, "no dispatch ever happened");
    }

    #[test]
    fn blocked_is_resolved_but_not_terminal() {
        let mut task = Task::new("t", Priority::Medium, kind()).expect("valid task");
        task.start().expect("start");
        task.block(Blocker::new("cannot proceed")).expect("block");

        assert!(task.status().is_resolved());
        assert!(!task.status().is_terminal());
        assert!(task.cancel().is_err(), "blocked keeps its diagnosis");
    }

    #[test]
    fn cancel_covers_both_active_states() {
        let mut pending = Task::new("a", Priority::Medium, kind()).expect("valid task");
        pending.cancel().expect("pending -> cancelled");
        assert_eq!(pending.status(), TaskStatus::Cancelled);

        let mut running = Task::new("b", Priority::Medium, kind()).expect("valid task");
        running.start().expect("start");
        running.cancel().expect("in_progress -> cancelled");
        assert_eq!(running.status(), TaskStatus::Cancelled);
    }
}
