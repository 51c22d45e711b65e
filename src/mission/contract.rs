//! The mission contract: the complete, self-contained payload handed to a
//! worker at dispatch time.
//!
//! # Purpose
//! A worker sees nothing but its mission. Everything it needs is spelled out
//! here; everything it must not touch is spelled out too. Missions are built
//! fresh for every dispatch and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::report::WorkerReport;
use crate::task::TaskId;

/// Context inherited from the delegating scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionContext {
    /// The goal of the request this task belongs to
    pub parent_goal: String,
    /// Digests of completed dependency results
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior_results: Vec<PriorResult>,
    /// Prerequisites the scheduler has already verified
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub satisfied_prerequisites: Vec<String>,
}

/// Digest of one completed dependency, embedded into dependent missions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorResult {
    pub task_id: TaskId,
    /// What the dependency was asked to do
    pub content: String,
    /// One-line digest of its result
    pub summary: String,
    /// Artifact locations the dependency produced
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deliverables: Vec<String>,
}

impl PriorResult {
    /// Build a digest from a completed dependency's report.
    pub fn new(task_id: TaskId, content: impl Into<String>, report: &WorkerReport) -> Self {
        Self {
            task_id,
            content: content.into(),
            summary: report.summary(),
            deliverables: report
                .deliverables
                .iter()
                .map(|d| d.location.clone())
                .collect(),
        }
    }
}

/// What the worker must do and must not do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<String>,
}

impl Scope {
    pub fn new(must: Vec<String>, must_not: Vec<String>) -> Self {
        Self { must, must_not }
    }

    /// A scope cut down to the bare objective. Used when a retry adjusts its
    /// approach by shedding everything optional.
    pub fn essential(objective: &str) -> Self {
        Self {
            must: vec![objective.to_string()],
            must_not: Vec::new(),
        }
    }
}

/// The result shape a worker is required to return.
///
/// The terminal status field is always mandatory; the flags here tighten the
/// rest of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnFormat {
    /// A complete report must list at least one deliverable
    #[serde(default)]
    pub require_deliverables: bool,
    /// Every reported decision must carry a rationale
    #[serde(default)]
    pub require_rationale: bool,
    /// A complete report must list at least one touched file
    #[serde(default)]
    pub require_files_touched: bool,
}

impl Default for ReturnFormat {
    fn default() -> Self {
        Self {
            require_deliverables: true,
            require_rationale: true,
            require_files_touched: false,
        }
    }
}

impl ReturnFormat {
    /// Status field only; everything else optional.
    pub fn lenient() -> Self {
        Self {
            require_deliverables: false,
            require_rationale: false,
            require_files_touched: false,
        }
    }
}

/// A complete delegation payload.
///
/// # Invariants
/// - `objective` is non-empty
/// - Immutable once built; a retry gets a fresh mission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: Uuid,
    pub issued_at: DateTime<Utc>,
    /// Which dispatch attempt this mission belongs to (1-based)
    pub attempt: u32,
    pub context: MissionContext,
    /// Single statement of what this worker must accomplish
    pub objective: String,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_criteria: Vec<String>,
    /// Expected output locations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deliverables: Vec<String>,
    pub return_format: ReturnFormat,
}

impl Mission {
    /// Create a mission for the given objective.
    ///
    /// # Preconditions
    /// - `objective` is non-empty
    ///
    /// # Errors
    /// Returns `Err` if preconditions are violated.
    pub fn new(
        parent_goal: impl Into<String>,
        objective: impl Into<String>,
    ) -> Result<Self, MissionError> {
        let objective = objective.into();
        if objective.trim().is_empty() {
            return Err(MissionError::EmptyObjective);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            issued_at: Utc::now(),
            attempt: 1,
            context: MissionContext {
                parent_goal: parent_goal.into(),
                prior_results: Vec::new(),
                satisfied_prerequisites: Vec::new(),
            },
            objective,
            scope: Scope::default(),
            constraints: Vec::new(),
            success_criteria: Vec::new(),
            deliverables: Vec::new(),
            return_format: ReturnFormat::default(),
        })
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_prior_results(mut self, prior_results: Vec<PriorResult>) -> Self {
        self.context.prior_results = prior_results;
        self
    }

    pub fn with_prerequisites(mut self, prerequisites: Vec<String>) -> Self {
        self.context.satisfied_prerequisites = prerequisites;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_success_criteria(mut self, success_criteria: Vec<String>) -> Self {
        self.success_criteria = success_criteria;
        self
    }

    pub fn with_deliverables(mut self, deliverables: Vec<String>) -> Self {
        self.deliverables = deliverables;
        self
    }

    pub fn with_return_format(mut self, return_format: ReturnFormat) -> Self {
        self.return_format = return_format;
        self
    }
}

/// Errors in mission construction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MissionError {
    #[error("Mission objective cannot be empty")]
    EmptyObjective,
}
