//! A scheduler wrapped as a worker, so a multi-step task can be delegated to
//! a scheduling level of its own.
//!
//! # Purpose
//! To its parent this is just another registry entry behind the queue: one
//! mission in, one report out. Inside, the mission objective is decomposed
//! and run as a full request, and the child's final report is folded back
//! into a single worker report.
//!
//! # Invariants
//! - The child level cannot abort its parent; aborts only flow downward
//! - A child with any blocked subtask reports blocked, never complete

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::mission::{Deliverable, Mission, WorkerReport};
use crate::worker::{Worker, WorkerError, WorkerKind, WorkerRegistry};

use super::consolidator::FinalReport;
use super::context::SchedulerContext;
use super::core::{Scheduler, WorkOrder};
use super::plan::Decomposer;
use super::route::RoutePolicy;

/// Worker that runs each mission as a nested scheduling request.
pub struct NestedScheduler {
    kind: WorkerKind,
    name: String,
    /// Workers available to the child level; usually leaf kinds only
    registry: Arc<WorkerRegistry>,
    config: Arc<SchedulerConfig>,
    cancel: CancellationToken,
    /// Scheduler levels this worker may still stack, itself included
    levels: u32,
    decomposer: Arc<dyn Decomposer>,
    routes: RoutePolicy,
}

impl NestedScheduler {
    /// A nested level one step below the root, with its own worker registry
    /// and a decomposer for breaking missions down.
    pub fn new(
        kind: WorkerKind,
        registry: Arc<WorkerRegistry>,
        config: Arc<SchedulerConfig>,
        decomposer: Arc<dyn Decomposer>,
    ) -> Self {
        let name = format!("nested:{}", kind);
        let levels = config.max_depth.saturating_sub(1);
        Self {
            kind,
            name,
            registry,
            config,
            cancel: CancellationToken::new(),
            levels,
            decomposer,
            routes: RoutePolicy::leaf_only(),
        }
    }

    /// Tie nested runs to an externally owned abort signal, normally the
    /// same token the root scheduler runs under.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the remaining level budget, for stacks deeper than one
    /// nested level.
    pub fn with_levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_route_policy(mut self, routes: RoutePolicy) -> Self {
        self.routes = routes;
        self
    }
}

#[async_trait]
impl Worker for NestedScheduler {
    fn kind(&self) -> &WorkerKind {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, mission: Mission) -> Result<WorkerReport, WorkerError> {
        let ctx = SchedulerContext {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            cancel: self.cancel.child_token(),
            levels_remaining: self.levels,
        };
        info!(
            kind = %self.kind,
            objective = %mission.objective,
            levels = self.levels,
            "starting nested request"
        );

        let scheduler = Scheduler::nested(ctx)
            .with_route_policy(self.routes.clone())
            .with_decomposer(Arc::clone(&self.decomposer));
        let order = WorkOrder::new(mission.objective.as_str());

        match scheduler.run(order).await {
            Ok(report) => fold_report(&mission, report),
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "nested request failed to run");
                Err(WorkerError::Unavailable(format!("nested scheduler: {}", e)))
            }
        }
    }
}

/// Fold a child-level final report into the single report the parent
/// expects from any worker.
fn fold_report(mission: &Mission, report: FinalReport) -> Result<WorkerReport, WorkerError> {
    if !report.cancelled.is_empty() {
        return Err(WorkerError::Cancelled);
    }

    if report.blocked.is_empty() {
        let mut deliverables: Vec<Deliverable> = Vec::new();
        let mut files_touched = Vec::new();
        for done in &report.completed {
            deliverables.extend(done.report.deliverables.iter().cloned());
            files_touched.extend(done.report.files_touched.iter().cloned());
        }
        if deliverables.is_empty() {
            // Parents usually require a complete report to name at least one
            // deliverable.
            deliverables.push(Deliverable {
                location: format!("mission:{}", mission.id),
                summary: format!("{} subtasks completed", report.completed.len()),
            });
        }
        return Ok(WorkerReport::complete(deliverables, Vec::new(), files_touched));
    }

    let reasons: Vec<String> = report
        .blocked
        .iter()
        .map(|b| format!("{}: {}", b.content, b.reason))
        .collect();
    Ok(WorkerReport::blocked(format!(
        "{} of {} subtasks blocked [{}]",
        report.blocked.len(),
        report.counts.total(),
        reasons.join("; ")
    )))
}
