//! foreman - demo entry point.
//!
//! Runs one scripted request against simulated workers: a reliable kind, a
//! kind that times out on first attempts, a kind that is permanently down
//! with a registered fallback, and a nested scheduler for multi-step work.
//! Prints the consolidated final report as JSON.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foreman::mission::{Deliverable, Mission, WorkerReport};
use foreman::scheduler::{
    Decomposer, NestedScheduler, PlanError, RoutePolicy, Scheduler, SchedulerContext, TaskSpec,
    WorkOrder,
};
use foreman::task::{Priority, ScopeEstimate};
use foreman::worker::{Worker, WorkerError, WorkerKind, WorkerRegistry};
use foreman::SchedulerConfig;

/// Simulated worker with deterministic behavior keyed off the mission's
/// attempt number, so retries and fallbacks show up without external
/// services.
struct DemoWorker {
    kind: WorkerKind,
    name: String,
    style: Style,
}

#[derive(Clone, Copy)]
enum Style {
    /// Always completes
    Reliable,
    /// Times out on the first attempt of every task, then completes
    FlakyFirst,
    /// Never available; exercises retries and the fallback kind
    AlwaysDown,
}

impl DemoWorker {
    fn new(kind: &str, style: Style) -> Arc<dyn Worker> {
        Arc::new(Self {
            kind: WorkerKind::new(kind),
            name: format!("demo:{}", kind),
            style,
        })
    }
}

#[async_trait]
impl Worker for DemoWorker {
    fn kind(&self) -> &WorkerKind {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, mission: Mission) -> Result<WorkerReport, WorkerError> {
        // Hold the dispatch slot long enough for the cap and the throttle to
        // show in the logs.
        tokio::time::sleep(Duration::from_millis(400)).await;
        match self.style {
            Style::AlwaysDown => Err(WorkerError::Unavailable("simulated outage".to_string())),
            Style::FlakyFirst if mission.attempt == 1 => Err(WorkerError::Timeout {
                elapsed: Duration::from_millis(400),
            }),
            _ => Ok(WorkerReport::complete(
                vec![Deliverable {
                    location: format!("artifacts/{}.md", mission.id),
                    summary: format!("completed: {}", mission.objective),
                }],
                vec![],
                vec![],
            )),
        }
    }
}

/// Splits any objective into a fixed number of sequential-free steps.
struct EvenSplit {
    parts: usize,
}

#[async_trait]
impl Decomposer for EvenSplit {
    async fn decompose(
        &self,
        goal: &str,
        _provided: Vec<TaskSpec>,
    ) -> Result<Vec<TaskSpec>, PlanError> {
        Ok((1..=self.parts)
            .map(|i| TaskSpec::new(format!("step {} of {}: {}", i, self.parts, goal)))
            .collect())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foreman=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(SchedulerConfig::from_env()?);
    let cancel = CancellationToken::new();

    let research = DemoWorker::new("research", Style::Reliable);
    let build = DemoWorker::new("build", Style::FlakyFirst);
    let deploy = DemoWorker::new("deploy", Style::AlwaysDown);

    // The nested level sees leaf kinds only.
    let mut crew_registry = WorkerRegistry::new(WorkerKind::new("research"));
    crew_registry.register(Arc::clone(&research));
    crew_registry.register(Arc::clone(&build));
    let crew = NestedScheduler::new(
        WorkerKind::new("crew"),
        Arc::new(crew_registry),
        Arc::clone(&config),
        Arc::new(EvenSplit { parts: 3 }),
    )
    .with_cancel(cancel.clone());

    let mut registry = WorkerRegistry::new(WorkerKind::new("research"));
    registry.register(research);
    registry.register(build);
    registry.register(deploy);
    registry.register(Arc::new(crew));
    registry.register_fallback(WorkerKind::new("deploy"), WorkerKind::new("research"));

    let ctx = SchedulerContext::new(Arc::new(registry), config).with_cancel(cancel);
    let scheduler =
        Scheduler::new(ctx).with_route_policy(RoutePolicy::with_nested_kind(WorkerKind::new("crew")));

    let order = WorkOrder::new("ship the quarterly release").with_specs(vec![
        TaskSpec::new("audit open regressions").with_priority(Priority::High),
        TaskSpec::new("assemble the release notes")
            .with_worker_kind(WorkerKind::new("build"))
            .with_dependency(0),
        TaskSpec::new("refresh the onboarding walkthrough")
            .with_scope_estimate(ScopeEstimate::MultiStep),
        TaskSpec::new("stage the artifacts")
            .with_worker_kind(WorkerKind::new("deploy"))
            .with_dependency(1),
    ]);

    let report = scheduler.run(order).await?;
    info!(
        completed = report.completed.len(),
        blocked = report.blocked.len(),
        cancelled = report.cancelled.len(),
        "demo request finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
