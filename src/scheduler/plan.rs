//! Decomposition plans: the task specs a goal breaks into, validated before
//! anything is admitted to a todo list.
//!
//! # Invariants
//! - Spec count is within the level's fan-out bounds
//! - All dependency indices are valid, non-self, and acyclic

use std::ops::RangeInclusive;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::task::{Priority, ScopeEstimate, Task, TaskId};
use crate::worker::WorkerKind;

/// A planned task before it becomes a tracked `Task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// What this task should accomplish
    pub content: String,

    /// Selection tie-break
    #[serde(default)]
    pub priority: Priority,

    /// Capability tag; `None` means the registry default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_kind: Option<WorkerKind>,

    /// Indices of specs in the same plan that must complete first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<usize>,

    /// Advisory sizing for the routing decision
    #[serde(default)]
    pub scope_estimate: ScopeEstimate,
}

impl TaskSpec {
    /// Create a spec with default priority, kind, and sizing.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            priority: Priority::default(),
            worker_kind: None,
            depends_on: Vec::new(),
            scope_estimate: ScopeEstimate::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_worker_kind(mut self, kind: WorkerKind) -> Self {
        self.worker_kind = Some(kind);
        self
    }

    /// Add a dependency on another spec (by index).
    pub fn with_dependency(mut self, index: usize) -> Self {
        self.depends_on.push(index);
        self
    }

    /// Add multiple dependencies.
    pub fn with_dependencies(mut self, indices: Vec<usize>) -> Self {
        self.depends_on.extend(indices);
        self
    }

    pub fn with_scope_estimate(mut self, estimate: ScopeEstimate) -> Self {
        self.scope_estimate = estimate;
        self
    }
}

/// A validated decomposition.
///
/// # Invariants
/// - `specs` length is within the fan-out bounds it was created with
/// - Dependencies form a DAG over spec indices
#[derive(Debug, Clone)]
pub struct TaskPlan {
    specs: Vec<TaskSpec>,
}

impl TaskPlan {
    /// Validate a decomposition against the level's fan-out bounds.
    ///
    /// # Errors
    /// Returns `Err` when the spec count is outside `fanout`, an index is
    /// out of range or self-referential, or the dependencies contain a
    /// cycle.
    pub fn new(specs: Vec<TaskSpec>, fanout: RangeInclusive<usize>) -> Result<Self, PlanError> {
        if specs.is_empty() {
            return Err(PlanError::EmptyPlan);
        }
        if !fanout.contains(&specs.len()) {
            return Err(PlanError::FanOutOutOfBounds {
                actual: specs.len(),
                min: *fanout.start(),
                max: *fanout.end(),
            });
        }

        for (i, spec) in specs.iter().enumerate() {
            for &dep in &spec.depends_on {
                if dep >= specs.len() {
                    return Err(PlanError::InvalidDependency {
                        task_index: i,
                        dependency_index: dep,
                    });
                }
                if dep == i {
                    return Err(PlanError::SelfDependency { task_index: i });
                }
            }
        }

        check_acyclic(&specs)?;

        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[TaskSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Turn the plan into tracked tasks, resolving index dependencies to the
    /// fresh task ids and filling unspecified worker kinds with the default.
    ///
    /// # Postconditions
    /// - Output order matches spec order
    /// - Every dependency id refers to a task in the output
    pub fn materialize(&self, default_kind: &WorkerKind) -> Result<Vec<Task>, PlanError> {
        let mut tasks = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let kind = spec
                .worker_kind
                .clone()
                .unwrap_or_else(|| default_kind.clone());
            let task = Task::new(spec.content.clone(), spec.priority, kind)
                .map_err(|e| PlanError::TaskCreation(e.to_string()))?
                .with_scope_estimate(spec.scope_estimate);
            tasks.push(task);
        }

        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id()).collect();
        Ok(tasks
            .into_iter()
            .zip(&self.specs)
            .map(|(task, spec)| {
                if spec.depends_on.is_empty() {
                    task
                } else {
                    let deps = spec.depends_on.iter().map(|&d| ids[d]).collect();
                    task.with_dependencies(deps)
                }
            })
            .collect())
    }
}

/// Kahn's algorithm, used purely as a cycle check.
fn check_acyclic(specs: &[TaskSpec]) -> Result<(), PlanError> {
    let n = specs.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, spec) in specs.iter().enumerate() {
        for &dep in &spec.depends_on {
            adj[dep].push(i);
            in_degree[i] += 1;
        }
    }

    let mut queue: Vec<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut visited = 0;
    while let Some(node) = queue.pop() {
        visited += 1;
        for &next in &adj[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push(next);
            }
        }
    }

    if visited != n {
        Err(PlanError::CircularDependency)
    } else {
        Ok(())
    }
}

/// Turns a goal into task specs.
///
/// The scheduler validates whatever comes back; a decomposer only proposes.
/// Implementations range from passing through caller-provided specs to
/// consulting a planner service.
#[async_trait]
pub trait Decomposer: Send + Sync {
    /// Break `goal` into specs. `provided` carries any specs the caller
    /// already supplied alongside the goal.
    async fn decompose(
        &self,
        goal: &str,
        provided: Vec<TaskSpec>,
    ) -> Result<Vec<TaskSpec>, PlanError>;
}

/// Uses exactly the specs the caller supplied.
pub struct PassthroughDecomposer;

#[async_trait]
impl Decomposer for PassthroughDecomposer {
    async fn decompose(
        &self,
        _goal: &str,
        provided: Vec<TaskSpec>,
    ) -> Result<Vec<TaskSpec>, PlanError> {
        Ok(provided)
    }
}

/// Errors in plan creation or materialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanError {
    #[error("Plan contains no tasks")]
    EmptyPlan,

    #[error("Plan has {actual} tasks, outside the allowed {min}..={max}")]
    FanOutOutOfBounds {
        actual: usize,
        min: usize,
        max: usize,
    },

    #[error("Task {task_index} has invalid dependency index {dependency_index}")]
    InvalidDependency {
        task_index: usize,
        dependency_index: usize,
    },

    #[error("Task {task_index} depends on itself")]
    SelfDependency { task_index: usize },

    #[error("Circular dependency detected in plan")]
    CircularDependency,

    #[error("Decomposition failed: {0}")]
    Decomposition(String),

    #[error("Failed to create task: {0}")]
    TaskCreation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(n: usize) -> Vec<TaskSpec> {
        (0..n).map(|i| TaskSpec::new(format!("task {i}"))).collect()
    }

    #[test]
    fn fan_out_bounds_are_enforced() {
        assert!(matches!(
            TaskPlan::new(specs(2), 3..=7),
            Err(PlanError::FanOutOutOfBounds { actual: 2, min: 3, max: 7 })
        ));
        assert!(TaskPlan::new(specs(3), 3..=7).is_ok());
        assert!(TaskPlan::new(specs(7), 3..=7).is_ok());
        assert!(matches!(
            TaskPlan::new(specs(8), 3..=7),
            Err(PlanError::FanOutOutOfBounds { actual: 8, .. })
        ));

        // Nested levels accept singleton plans.
        assert!(TaskPlan::new(specs(1), 1..=7).is_ok());
    }

    #[test]
    fn dependency_indices_are_validated() {
        let mut bad = specs(3);
        bad[1] = TaskSpec::new("task 1").with_dependency(9);
        assert!(matches!(
            TaskPlan::new(bad, 3..=7),
            Err(PlanError::InvalidDependency { task_index: 1, dependency_index: 9 })
        ));

        let mut selfish = specs(3);
        selfish[2] = TaskSpec::new("task 2").with_dependency(2);
        assert!(matches!(
            TaskPlan::new(selfish, 3..=7),
            Err(PlanError::SelfDependency { task_index: 2 })
        ));
    }

    #[test]
    fn cycles_are_rejected() {
        let looped = vec![
            TaskSpec::new("a").with_dependency(2),
            TaskSpec::new("b").with_dependency(0),
            TaskSpec::new("c").with_dependency(1),
        ];
        assert!(matches!(
            TaskPlan::new(looped, 3..=7),
            Err(PlanError::CircularDependency)
        ));
    }

    #[test]
    fn diamond_dependencies_are_fine() {
        let diamond = vec![
            TaskSpec::new("root"),
            TaskSpec::new("left").with_dependency(0),
            TaskSpec::new("right").with_dependency(0),
            TaskSpec::new("join").with_dependencies(vec![1, 2]),
        ];
        assert!(TaskPlan::new(diamond, 3..=7).is_ok());
    }

    #[test]
    fn materialize_resolves_indices_and_fills_default_kind() {
        let plan = TaskPlan::new(
            vec![
                TaskSpec::new("fetch").with_worker_kind(WorkerKind::new("research")),
                TaskSpec::new("summarize").with_dependency(0),
                TaskSpec::new("publish").with_dependencies(vec![0, 1]),
            ],
            3..=7,
        )
        .expect("valid plan");

        let tasks = plan
            .materialize(&WorkerKind::new("general"))
            .expect("materializes");
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].worker_kind().as_str(), "research");
        assert_eq!(tasks[1].worker_kind().as_str(), "general");

        assert_eq!(tasks[1].dependencies(), &[tasks[0].id()]);
        assert_eq!(tasks[2].dependencies(), &[tasks[0].id(), tasks[1].id()]);
    }

    #[tokio::test]
    async fn passthrough_decomposer_returns_what_it_was_given() {
        let provided = specs(4);
        let out = PassthroughDecomposer
            .decompose("some goal", provided.clone())
            .await
            .expect("passthrough never fails");
        assert_eq!(out.len(), provided.len());
    }
}
