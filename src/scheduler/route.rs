//! Routing: decide how a ready task gets executed.
//!
//! Three channels exist. Trivial work runs inline on the scheduler's own
//! flow, with no dispatch slot and no throttle. Focused work is delegated to
//! a worker through the queue. Multi-step work goes to a nested scheduler,
//! depth permitting.
//!
//! Misrouting is never fatal: a missing inline handler or an exhausted depth
//! budget degrades to plain delegation.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::mission::{Mission, WorkerReport};
use crate::task::{ScopeEstimate, Task};
use crate::worker::{WorkerError, WorkerKind};

/// Where a dispatch should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Run on the scheduler's own flow, bypassing the queue
    Inline,
    /// Send through the delegation queue to a worker of this kind
    Delegate(WorkerKind),
    /// Send through the queue to a nested scheduler registered as this kind
    Nested(WorkerKind),
}

/// Executes trivial work without consuming a dispatch slot.
///
/// Failures are treated exactly like worker infrastructure failures, and the
/// task is routed to a real worker from then on.
#[async_trait]
pub trait InlineHandler: Send + Sync {
    async fn handle(&self, mission: &Mission) -> Result<WorkerReport, WorkerError>;
}

/// Maps a task's advisory sizing to a route.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    /// Registry kind wrapping a nested scheduler, if this deployment has one
    nested_kind: Option<WorkerKind>,
}

impl RoutePolicy {
    /// Every task goes to a leaf worker; nothing nests.
    pub fn leaf_only() -> Self {
        Self { nested_kind: None }
    }

    /// Multi-step tasks may be routed to the given nested-scheduler kind.
    pub fn with_nested_kind(nested_kind: WorkerKind) -> Self {
        Self {
            nested_kind: Some(nested_kind),
        }
    }

    pub fn nested_kind(&self) -> Option<&WorkerKind> {
        self.nested_kind.as_ref()
    }

    /// Pick the route for one ready task.
    ///
    /// `inline_available` reflects whether an inline handler exists and has
    /// not already failed for this task; `can_nest` is the depth check.
    pub fn route(&self, task: &Task, inline_available: bool, can_nest: bool) -> RouteDecision {
        match task.scope_estimate() {
            ScopeEstimate::Trivial => {
                if inline_available {
                    debug!(task = %task.id(), "routing inline");
                    RouteDecision::Inline
                } else {
                    warn!(
                        task = %task.id(),
                        "trivial task has no inline handler; delegating instead"
                    );
                    RouteDecision::Delegate(task.worker_kind().clone())
                }
            }
            ScopeEstimate::MultiStep => match &self.nested_kind {
                Some(kind) if can_nest => {
                    debug!(task = %task.id(), kind = %kind, "routing to nested scheduler");
                    RouteDecision::Nested(kind.clone())
                }
                Some(_) => {
                    warn!(
                        task = %task.id(),
                        "depth budget exhausted; delegating multi-step task as one unit"
                    );
                    RouteDecision::Delegate(task.worker_kind().clone())
                }
                None => {
                    warn!(
                        task = %task.id(),
                        "no nested scheduler configured; delegating multi-step task as one unit"
                    );
                    RouteDecision::Delegate(task.worker_kind().clone())
                }
            },
            ScopeEstimate::Focused => RouteDecision::Delegate(task.worker_kind().clone()),
        }
    }
}
