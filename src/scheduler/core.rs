//! The scheduler: one request driven from decomposition through bounded
//! delegation to a consolidated report.
//!
//! # Purpose
//! Owns the todo list and the delegation queue for a single request. The
//! loop admits every ready task, reaps dispatch outcomes one at a time, and
//! stops only when no task is Pending or InProgress anywhere.
//!
//! # Invariants
//! - Every worker dispatch passes through the delegation queue; nothing
//!   reaches a worker around the cap or the throttle
//! - A failed dispatch settles or requeues its own task and touches no other
//! - A blocked task never stops siblings from running to their own outcome
//! - `run` consumes the scheduler, so a request is consolidated exactly once
//!
//! # Design
//! Dispatches run in spawned tasks holding their queue slots; the loop
//! itself stays single-threaded over the todo list, so task state needs no
//! locking. Cancellation reaches dispatches through per-dispatch child
//! tokens, and whatever an aborted dispatch returns is discarded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tracing::{debug, error, info, warn};

use crate::mission::{
    Mission, MissionError, PriorResult, ReportStatus, ReturnFormat, Scope, WorkerReport,
};
use crate::queue::{DelegationQueue, QueueError, QueueLimits};
use crate::task::{Blocker, Task, TaskError, TaskId, TodoList};
use crate::worker::{WorkerError, WorkerKind};

use super::consolidator::FinalReport;
use super::context::SchedulerContext;
use super::plan::{Decomposer, PassthroughDecomposer, PlanError, TaskPlan, TaskSpec};
use super::retry::{Approach, RetryAction, RetryPolicy};
use super::route::{InlineHandler, RouteDecision, RoutePolicy};

/// One top-level request: a goal, optionally with the task breakdown already
/// spelled out by the caller.
#[derive(Debug, Clone)]
pub struct WorkOrder {
    pub goal: String,
    /// Pre-split specs; the decomposer receives these and may use or replace
    /// them
    pub specs: Vec<TaskSpec>,
}

impl WorkOrder {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            specs: Vec::new(),
        }
    }

    pub fn with_specs(mut self, specs: Vec<TaskSpec>) -> Self {
        self.specs = specs;
        self
    }
}

/// Errors that abort a whole request, as opposed to failures of individual
/// dispatches, which settle their own task.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("Task bookkeeping failed: {0}")]
    Task(#[from] TaskError),

    #[error("Mission construction failed: {0}")]
    Mission(#[from] MissionError),

    #[error("Dispatch queue failed: {0}")]
    Queue(#[from] QueueError),

    #[error("No worker registered that can take kind '{0}'")]
    NoWorkers(WorkerKind),
}

type DispatchFuture = BoxFuture<'static, (TaskId, Result<WorkerReport, WorkerError>)>;

/// Drives one request to quiescence.
pub struct Scheduler {
    ctx: SchedulerContext,
    queue: DelegationQueue,
    routes: RoutePolicy,
    decomposer: Arc<dyn Decomposer>,
    inline: Option<Arc<dyn InlineHandler>>,
    return_format: ReturnFormat,
    nested: bool,
    todo: TodoList,
    /// Tasks whose inline attempt failed; they go to real workers from then on
    inline_failed: HashSet<TaskId>,
    /// Per-task failure journal, attached to the blocker when attempts run out
    journals: HashMap<TaskId, Vec<String>>,
}

impl Scheduler {
    /// Root scheduler: full fan-out bounds and the root attempt ceiling.
    pub fn new(ctx: SchedulerContext) -> Self {
        Self::build(ctx, false)
    }

    /// Scheduler for one nested level: a fan-out floor of one and the
    /// tighter nested attempt ceiling.
    pub fn nested(ctx: SchedulerContext) -> Self {
        Self::build(ctx, true)
    }

    fn build(ctx: SchedulerContext, nested: bool) -> Self {
        let queue = DelegationQueue::new(QueueLimits::new(
            ctx.config.max_concurrent,
            ctx.config.throttle_interval,
        ));
        Self {
            ctx,
            queue,
            routes: RoutePolicy::leaf_only(),
            decomposer: Arc::new(PassthroughDecomposer),
            inline: None,
            return_format: ReturnFormat::default(),
            nested,
            todo: TodoList::new(),
            inline_failed: HashSet::new(),
            journals: HashMap::new(),
        }
    }

    pub fn with_route_policy(mut self, routes: RoutePolicy) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn Decomposer>) -> Self {
        self.decomposer = decomposer;
        self
    }

    pub fn with_inline_handler(mut self, handler: Arc<dyn InlineHandler>) -> Self {
        self.inline = Some(handler);
        self
    }

    pub fn with_return_format(mut self, return_format: ReturnFormat) -> Self {
        self.return_format = return_format;
        self
    }

    /// The queue this scheduler dispatches through, for gauge readings.
    pub fn queue(&self) -> &DelegationQueue {
        &self.queue
    }

    /// Execute the request to quiescence and consolidate.
    ///
    /// Consumes the scheduler: one request, one report.
    ///
    /// # Postconditions
    /// - Every task ends Completed, Blocked, or Cancelled
    /// - A report is returned even when the request was cancelled mid-flight
    ///
    /// # Errors
    /// Only for request-level faults: a rejected plan, an unusable registry,
    /// or internal bookkeeping going wrong. Individual dispatch failures are
    /// settled into task state instead.
    pub async fn run(mut self, order: WorkOrder) -> Result<FinalReport, SchedulerError> {
        let WorkOrder { goal, specs } = order;

        let config = Arc::clone(&self.ctx.config);
        let specs = self.decomposer.decompose(&goal, specs).await?;
        let fanout = if self.nested {
            1..=config.max_fanout
        } else {
            config.min_fanout..=config.max_fanout
        };
        let plan = TaskPlan::new(specs, fanout)?;
        let tasks = plan.materialize(self.ctx.registry.default_kind())?;
        self.todo.add_all(tasks)?;
        info!(
            goal = %goal,
            tasks = self.todo.len(),
            nested = self.nested,
            "request accepted"
        );

        let policy = RetryPolicy::new(config.attempts_for(self.nested));
        let mut in_flight: FuturesUnordered<DispatchFuture> = FuturesUnordered::new();

        let finished = loop {
            // Admit everything ready before looking at results.
            while !self.ctx.is_cancelled() {
                let Some(next) = self.todo.next_ready() else {
                    break;
                };
                self.dispatch(next, &goal, &policy, &mut in_flight).await?;
            }
            if self.ctx.is_cancelled() {
                break false;
            }

            if in_flight.is_empty() {
                // Nothing running and nothing ready. Settle tasks whose
                // dependencies resolved without completing, then stop.
                for (task_id, dep_id) in self.todo.settle_stranded() {
                    warn!(
                        task = %task_id,
                        dependency = %dep_id,
                        "dependency did not complete; dependent blocked"
                    );
                }
                if self.todo.has_non_terminal() {
                    // Unreachable with a validated acyclic plan.
                    error!("tasks remain active with nothing ready and nothing in flight");
                }
                break true;
            }

            let reaped = tokio::select! {
                _ = self.ctx.cancel.cancelled() => break false,
                reaped = in_flight.next() => reaped,
            };
            if let Some((task_id, outcome)) = reaped {
                self.settle(task_id, outcome, &policy)?;
            }
        };

        if !finished {
            self.abort(&mut in_flight).await;
        }

        let report = FinalReport::consolidate(&goal, &self.todo);
        info!(
            goal = %goal,
            completed = report.completed.len(),
            blocked = report.blocked.len(),
            cancelled = report.cancelled.len(),
            "request consolidated"
        );
        Ok(report)
    }

    /// Route one ready task and send it on its way.
    async fn dispatch(
        &mut self,
        task_id: TaskId,
        goal: &str,
        policy: &RetryPolicy,
        in_flight: &mut FuturesUnordered<DispatchFuture>,
    ) -> Result<(), SchedulerError> {
        self.todo.mark_in_progress(task_id)?;

        let (mission, route, own_kind, attempt) = {
            let task = self
                .todo
                .get(task_id)
                .ok_or(TaskError::UnknownTask(task_id))?;
            let inline_ok = self.inline.is_some() && !self.inline_failed.contains(&task_id);
            let route = self.routes.route(task, inline_ok, self.ctx.can_nest());
            let mission = self.build_mission(goal, task)?;
            (mission, route, task.worker_kind().clone(), task.attempt_count())
        };

        match route {
            RouteDecision::Inline => {
                if let Some(handler) = self.inline.clone() {
                    debug!(task = %task_id, attempt, "running task inline");
                    let outcome = handler.handle(&mission).await;
                    if outcome.is_err() {
                        // One inline failure reroutes this task to real
                        // workers for good.
                        self.inline_failed.insert(task_id);
                    }
                    return self.settle(task_id, outcome, policy);
                }
                self.submit(task_id, own_kind, mission, in_flight).await
            }
            RouteDecision::Delegate(kind) | RouteDecision::Nested(kind) => {
                let (kind, mission) = if policy.approach_for(attempt) == Approach::Adjusted {
                    self.adjust(task_id, kind, mission)
                } else {
                    (kind, mission)
                };
                self.submit(task_id, kind, mission, in_flight).await
            }
        }
    }

    /// Change something material for a task's final attempt: the fallback
    /// worker kind when the registry has one, otherwise a scope cut down to
    /// the bare objective.
    fn adjust(&self, task_id: TaskId, kind: WorkerKind, mission: Mission) -> (WorkerKind, Mission) {
        match self.ctx.registry.fallback_of(&kind) {
            Some(fallback) => {
                info!(
                    task = %task_id,
                    from = %kind,
                    to = %fallback,
                    "final attempt on the fallback worker kind"
                );
                (fallback, mission)
            }
            None => {
                info!(task = %task_id, "final attempt with the scope cut to essentials");
                let scope = Scope::essential(&mission.objective);
                (kind, mission.with_scope(scope))
            }
        }
    }

    /// Mission for the task as it stands right now. Completed dependencies
    /// ride along so the worker starts from their output instead of
    /// rediscovering it.
    fn build_mission(&self, goal: &str, task: &Task) -> Result<Mission, MissionError> {
        let mut prior = Vec::new();
        let mut satisfied = Vec::new();
        for dep_id in task.dependencies() {
            if let Some(dep) = self.todo.get(*dep_id) {
                if let Some(report) = dep.result() {
                    prior.push(PriorResult::new(dep.id(), dep.content(), report));
                }
                satisfied.push(dep.content().to_string());
            }
        }

        Ok(Mission::new(goal, task.content())?
            .with_attempt(task.attempt_count())
            .with_prior_results(prior)
            .with_prerequisites(satisfied)
            .with_return_format(self.return_format.clone()))
    }

    /// Put one mission through the queue and track its outcome.
    async fn submit(
        &mut self,
        task_id: TaskId,
        kind: WorkerKind,
        mission: Mission,
        in_flight: &mut FuturesUnordered<DispatchFuture>,
    ) -> Result<(), SchedulerError> {
        let Some(worker) = self.ctx.registry.resolve(&kind) else {
            return Err(SchedulerError::NoWorkers(kind));
        };

        let attempt = mission.attempt;
        let label = format!("{} attempt {}", task_id, attempt);
        let cancel = self.ctx.cancel.child_token();
        let work = async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(WorkerError::Cancelled),
                outcome = worker.run(mission) => outcome,
            }
        };

        let submitted = tokio::select! {
            _ = self.ctx.cancel.cancelled() => None,
            submitted = self.queue.submit(label, work) => Some(submitted),
        };
        match submitted {
            Some(Ok(handle)) => {
                debug!(task = %task_id, worker = %kind, attempt, "dispatched");
                in_flight.push(
                    async move {
                        let outcome = match handle.join().await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                Err(WorkerError::Unavailable(format!("dispatch lost: {}", e)))
                            }
                        };
                        (task_id, outcome)
                    }
                    .boxed(),
                );
                Ok(())
            }
            None | Some(Err(QueueError::Closed)) => {
                // Abort hit during admission; the sweep cancels the task.
                debug!(task = %task_id, "admission interrupted by abort");
                Ok(())
            }
            Some(Err(e)) => Err(e.into()),
        }
    }

    /// Apply one dispatch outcome to its task.
    fn settle(
        &mut self,
        task_id: TaskId,
        outcome: Result<WorkerReport, WorkerError>,
        policy: &RetryPolicy,
    ) -> Result<(), SchedulerError> {
        let outcome = outcome.and_then(|report| {
            report
                .validate_against(&self.return_format)
                .map_err(|e| WorkerError::MalformedReport(e.to_string()))
                .map(|()| report)
        });

        match outcome {
            Ok(report) if report.status == ReportStatus::Complete => {
                info!(task = %task_id, summary = %report.summary(), "task completed");
                self.journals.remove(&task_id);
                self.todo.mark_completed(task_id, report)?;
            }
            Ok(report) => {
                // The worker itself declared the blockade. That is a settled
                // outcome, not a failure to retry.
                let reason = report
                    .reason
                    .clone()
                    .unwrap_or_else(|| "blocked without reason".to_string());
                warn!(task = %task_id, reason = %reason, "task blocked by its worker");
                let attempts = self.journals.remove(&task_id).unwrap_or_default();
                self.todo
                    .mark_blocked(task_id, Blocker::new(reason).with_attempts(attempts))?;
            }
            Err(err) => self.settle_failure(task_id, err, policy)?,
        }
        Ok(())
    }

    /// Apply an infrastructure failure: journal it, penalize the queue when
    /// it was a quota blowout, then retry or block per policy.
    fn settle_failure(
        &mut self,
        task_id: TaskId,
        err: WorkerError,
        policy: &RetryPolicy,
    ) -> Result<(), SchedulerError> {
        let (attempt, kind) = {
            let task = self
                .todo
                .get(task_id)
                .ok_or(TaskError::UnknownTask(task_id))?;
            (task.attempt_count(), task.worker_kind().clone())
        };
        self.journals
            .entry(task_id)
            .or_default()
            .push(format!("attempt {} ({}): {}", attempt, kind, err));

        if let Some(delay) = err.penalty_delay(self.ctx.config.quota_penalty) {
            warn!(
                task = %task_id,
                penalty_ms = delay.as_millis() as u64,
                "worker quota exhausted; delaying the next dispatch"
            );
            self.queue.penalize(delay);
        }

        match policy.next_action(attempt, &err) {
            RetryAction::Retry { approach } => {
                info!(
                    task = %task_id,
                    attempt,
                    next = ?approach,
                    error = %err,
                    "task will be retried"
                );
                self.todo.requeue(task_id)?;
            }
            RetryAction::DoNotRetry => {
                warn!(task = %task_id, attempt, error = %err, "attempts exhausted; task blocked");
                let attempts = self.journals.remove(&task_id).unwrap_or_default();
                let blocker =
                    Blocker::new(format!("failed after {} attempt(s): {}", attempt, err))
                        .with_attempts(attempts);
                self.todo.mark_blocked(task_id, blocker)?;
            }
        }
        Ok(())
    }

    /// Wind the request down after a cancellation signal.
    async fn abort(&mut self, in_flight: &mut FuturesUnordered<DispatchFuture>) {
        info!("aborting request");
        self.queue.close();
        // In-flight dispatches observe the abort through their child tokens
        // and come back quickly; whatever they return is discarded.
        while let Some((task_id, _)) = in_flight.next().await {
            debug!(task = %task_id, "in-flight result discarded");
        }
        let swept = self.todo.cancel_unresolved();
        info!(cancelled = swept.len(), "active tasks cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::config::SchedulerConfig;
    use crate::mission::Deliverable;
    use crate::task::{Priority, ScopeEstimate};
    use crate::worker::{Worker, WorkerRef, WorkerRegistry};

    fn ok_report(summary: &str) -> WorkerReport {
        WorkerReport::complete(
            vec![Deliverable {
                location: format!("out/{}.md", summary.replace(' ', "_")),
                summary: summary.to_string(),
            }],
            vec![],
            vec![],
        )
    }

    struct ScriptedWorker {
        kind: WorkerKind,
        delay: Duration,
        script: StdMutex<VecDeque<Result<WorkerReport, WorkerError>>>,
        seen: StdMutex<Vec<Mission>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        starts: StdMutex<Vec<Instant>>,
        finished: AtomicUsize,
    }

    impl ScriptedWorker {
        fn new(kind: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                kind: WorkerKind::new(kind),
                delay,
                script: StdMutex::new(VecDeque::new()),
                seen: StdMutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                starts: StdMutex::new(Vec::new()),
                finished: AtomicUsize::new(0),
            })
        }

        fn reliable(kind: &str) -> Arc<Self> {
            Self::new(kind, Duration::from_millis(50))
        }

        /// Queue an outcome for the next call; calls beyond the script
        /// succeed with a stock report.
        fn push(&self, outcome: Result<WorkerReport, WorkerError>) {
            self.script.lock().expect("script").push_back(outcome);
        }

        fn calls(&self) -> usize {
            self.seen.lock().expect("seen").len()
        }

        fn missions(&self) -> Vec<Mission> {
            self.seen.lock().expect("seen").clone()
        }

        fn start_times(&self) -> Vec<Instant> {
            self.starts.lock().expect("starts").clone()
        }
    }

    #[async_trait::async_trait]
    impl Worker for ScriptedWorker {
        fn kind(&self) -> &WorkerKind {
            &self.kind
        }

        fn name(&self) -> &str {
            self.kind.as_str()
        }

        async fn run(&self, mission: Mission) -> Result<WorkerReport, WorkerError> {
            self.starts.lock().expect("starts").push(Instant::now());
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_active, Ordering::SeqCst);
            self.seen.lock().expect("seen").push(mission);

            tokio::time::sleep(self.delay).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            let scripted = self.script.lock().expect("script").pop_front();
            scripted.unwrap_or_else(|| Ok(ok_report("done")))
        }
    }

    fn registry_of(workers: &[Arc<ScriptedWorker>]) -> Arc<WorkerRegistry> {
        let mut registry = WorkerRegistry::new(workers[0].kind.clone());
        for worker in workers {
            registry.register(Arc::clone(worker) as WorkerRef);
        }
        Arc::new(registry)
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: 2,
            throttle_interval: Duration::from_millis(100),
            quota_penalty: Duration::from_millis(500),
            max_attempts: 3,
            nested_max_attempts: 2,
            max_depth: 2,
            min_fanout: 1,
            max_fanout: 7,
        }
    }

    fn scheduler(config: SchedulerConfig, workers: &[Arc<ScriptedWorker>]) -> Scheduler {
        let ctx = SchedulerContext::new(registry_of(workers), Arc::new(config));
        Scheduler::new(ctx)
    }

    fn spec(content: &str) -> TaskSpec {
        TaskSpec::new(content)
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_respect_the_cap_and_keep_their_spacing() {
        let worker = ScriptedWorker::new("general", Duration::from_millis(300));
        let sched = scheduler(test_config(), &[Arc::clone(&worker)]);

        let order = WorkOrder::new("five independent chores")
            .with_specs((0..5).map(|i| spec(&format!("chore {}", i))).collect());
        let report = sched.run(order).await.expect("run succeeds");

        assert!(report.is_fully_complete());
        assert_eq!(report.completed.len(), 5);
        assert_eq!(worker.peak.load(Ordering::SeqCst), 2);

        let starts = worker.start_times();
        assert_eq!(starts.len(), 5);
        for pair in starts.windows(2) {
            assert!(
                pair[1] - pair[0] >= Duration::from_millis(100),
                "initiations closer than the throttle: {:?}",
                pair[1] - pair[0]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dependents_receive_prior_results() {
        let worker = ScriptedWorker::reliable("general");
        worker.push(Ok(ok_report("api survey")));
        let sched = scheduler(test_config(), &[Arc::clone(&worker)]);

        let order = WorkOrder::new("survey then design").with_specs(vec![
            spec("survey the api"),
            spec("design the client").with_dependency(0),
        ]);
        let report = sched.run(order).await.expect("run succeeds");
        assert!(report.is_fully_complete());

        let missions = worker.missions();
        assert_eq!(missions.len(), 2);
        let design = &missions[1];
        assert_eq!(design.objective, "design the client");
        assert_eq!(design.context.parent_goal, "survey then design");
        assert_eq!(design.context.prior_results.len(), 1);
        assert_eq!(design.context.prior_results[0].summary, "api survey");
        assert_eq!(design.context.satisfied_prerequisites, ["survey the api"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_task_is_retried_then_blocked_while_others_finish() {
        let flaky = ScriptedWorker::reliable("flaky");
        for _ in 0..3 {
            flaky.push(Err(WorkerError::Unavailable("connection refused".into())));
        }
        let steady = ScriptedWorker::reliable("steady");
        let ctx = SchedulerContext::new(
            registry_of(&[Arc::clone(&flaky), Arc::clone(&steady)]),
            Arc::new(test_config()),
        );
        let sched = Scheduler::new(ctx);

        let order = WorkOrder::new("mixed fortunes").with_specs(vec![
            spec("doomed errand").with_worker_kind(WorkerKind::new("flaky")),
            spec("steady errand").with_worker_kind(WorkerKind::new("steady")),
        ]);
        let report = sched.run(order).await.expect("run succeeds");

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].content, "steady errand");
        assert_eq!(report.blocked.len(), 1);
        let blocked = &report.blocked[0];
        assert_eq!(blocked.content, "doomed errand");
        assert_eq!(blocked.attempt_count, 3);
        assert_eq!(blocked.attempts.len(), 3, "every attempt is journaled");
        assert!(blocked.reason.contains("failed after 3 attempt"));

        let attempts: Vec<u32> = flaky.missions().iter().map(|m| m.attempt).collect();
        assert_eq!(attempts, [1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn final_attempt_moves_to_the_fallback_kind() {
        let specialist = ScriptedWorker::reliable("specialist");
        specialist.push(Err(WorkerError::Timeout {
            elapsed: Duration::from_secs(30),
        }));
        let generalist = ScriptedWorker::reliable("generalist");

        let mut registry = WorkerRegistry::new(WorkerKind::new("specialist"));
        registry.register(Arc::clone(&specialist) as WorkerRef);
        registry.register(Arc::clone(&generalist) as WorkerRef);
        registry.register_fallback(WorkerKind::new("specialist"), WorkerKind::new("generalist"));

        let mut config = test_config();
        config.max_attempts = 2;
        let ctx = SchedulerContext::new(Arc::new(registry), Arc::new(config));
        let sched = Scheduler::new(ctx);

        let order = WorkOrder::new("one stubborn task").with_specs(vec![
            spec("port the module").with_worker_kind(WorkerKind::new("specialist")),
        ]);
        let report = sched.run(order).await.expect("run succeeds");

        assert!(report.is_fully_complete());
        assert_eq!(report.completed[0].attempt_count, 2);
        assert_eq!(specialist.calls(), 1);
        assert_eq!(generalist.calls(), 1);
        assert_eq!(generalist.missions()[0].attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn final_attempt_narrows_scope_without_a_fallback() {
        let worker = ScriptedWorker::reliable("general");
        worker.push(Err(WorkerError::Unavailable("flake".into())));
        let mut config = test_config();
        config.max_attempts = 2;
        let sched = scheduler(config, &[Arc::clone(&worker)]);

        let order = WorkOrder::new("narrowing").with_specs(vec![spec("summarize findings")]);
        let report = sched.run(order).await.expect("run succeeds");
        assert!(report.is_fully_complete());

        let missions = worker.missions();
        assert_eq!(missions.len(), 2);
        assert!(
            missions[0].scope.must.is_empty(),
            "first attempt keeps the default scope"
        );
        assert_eq!(missions[1].scope.must, ["summarize findings"]);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_blockade_settles_without_retry() {
        let worker = ScriptedWorker::reliable("general");
        worker.push(Ok(WorkerReport::blocked("missing production credentials")));
        let sched = scheduler(test_config(), &[Arc::clone(&worker)]);

        let order = WorkOrder::new("gated work").with_specs(vec![spec("rotate the keys")]);
        let report = sched.run(order).await.expect("run succeeds");

        assert_eq!(worker.calls(), 1, "a declared blockade is not retried");
        assert_eq!(report.blocked.len(), 1);
        assert_eq!(report.blocked[0].reason, "missing production credentials");
        assert_eq!(report.blocked[0].attempt_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_report_consumes_an_attempt() {
        let worker = ScriptedWorker::reliable("general");
        // A complete report without deliverables fails the default return
        // format and counts as an infrastructure failure.
        worker.push(Ok(WorkerReport::complete(vec![], vec![], vec![])));
        worker.push(Ok(ok_report("second try")));
        let sched = scheduler(test_config(), &[Arc::clone(&worker)]);

        let order =
            WorkOrder::new("contract enforcement").with_specs(vec![spec("produce the artifact")]);
        let report = sched.run(order).await.expect("run succeeds");

        assert!(report.is_fully_complete());
        assert_eq!(report.completed[0].attempt_count, 2);
        assert_eq!(worker.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_delays_the_next_dispatch() {
        let worker = ScriptedWorker::new("general", Duration::from_millis(10));
        worker.push(Err(WorkerError::QuotaExhausted {
            retry_after: Some(Duration::from_millis(800)),
        }));
        let mut config = test_config();
        config.max_concurrent = 1;
        let sched = scheduler(config, &[Arc::clone(&worker)]);

        let order = WorkOrder::new("rate limited").with_specs(vec![spec("rate limited call")]);
        let report = sched.run(order).await.expect("run succeeds");

        assert!(report.is_fully_complete());
        assert_eq!(report.completed[0].attempt_count, 2);
        let starts = worker.start_times();
        assert_eq!(starts.len(), 2);
        assert!(
            starts[1] - starts[0] >= Duration::from_millis(800),
            "retry after a quota failure must wait out the penalty, got {:?}",
            starts[1] - starts[0]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_sweeps_active_tasks_and_discards_in_flight_results() {
        let slow = ScriptedWorker::new("slow", Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let ctx = SchedulerContext::new(registry_of(&[Arc::clone(&slow)]), Arc::new(test_config()))
            .with_cancel(cancel.clone());
        let sched = Scheduler::new(ctx);

        let order = WorkOrder::new("interrupted request")
            .with_specs((1..=4).map(|i| spec(&format!("slog {}", i))).collect());

        let run = tokio::spawn(sched.run(order));
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        let report = run
            .await
            .expect("scheduler task joins")
            .expect("a report still comes back");

        assert!(report.completed.is_empty());
        assert_eq!(report.cancelled.len(), 4);
        assert_eq!(slow.calls(), 2, "only two dispatches were admitted before the abort");
        assert_eq!(
            slow.finished.load(Ordering::SeqCst),
            0,
            "aborted dispatches never run to completion"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dependents_of_a_blocked_task_are_settled_not_spun() {
        let worker = ScriptedWorker::reliable("general");
        worker.push(Ok(WorkerReport::blocked("subsystem is read-only this week")));
        let sched = scheduler(test_config(), &[Arc::clone(&worker)]);

        let order = WorkOrder::new("renovation").with_specs(vec![
            spec("unlock the subsystem"),
            spec("rewire the subsystem").with_dependency(0),
            spec("paint the fence"),
        ]);
        let report = sched.run(order).await.expect("run succeeds");

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].content, "paint the fence");
        assert_eq!(report.blocked.len(), 2);
        assert_eq!(report.blocked[0].content, "unlock the subsystem");
        assert_eq!(report.blocked[1].content, "rewire the subsystem");
        assert!(report.blocked[1].reason.contains("did not complete"));
        assert_eq!(
            report.blocked[1].attempt_count, 0,
            "stranded dependents are never dispatched"
        );
        assert_eq!(worker.calls(), 2);
    }

    #[tokio::test]
    async fn root_fan_out_bounds_are_enforced() {
        let worker = ScriptedWorker::reliable("general");
        let mut config = test_config();
        config.min_fanout = 3;
        let sched = scheduler(config, &[Arc::clone(&worker)]);

        let order = WorkOrder::new("too small").with_specs(vec![spec("one"), spec("two")]);
        let err = sched.run(order).await.expect_err("two tasks are below the floor");
        assert!(matches!(
            err,
            SchedulerError::Plan(PlanError::FanOutOutOfBounds {
                actual: 2,
                min: 3,
                max: 7
            })
        ));
        assert_eq!(worker.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn high_priority_tasks_dispatch_first() {
        let worker = ScriptedWorker::reliable("general");
        let mut config = test_config();
        config.max_concurrent = 1;
        let sched = scheduler(config, &[Arc::clone(&worker)]);

        let order = WorkOrder::new("triage").with_specs(vec![
            spec("routine cleanup").with_priority(Priority::Low),
            spec("sev1 hotfix").with_priority(Priority::High),
            spec("quarterly report").with_priority(Priority::Medium),
        ]);
        let report = sched.run(order).await.expect("run succeeds");
        assert!(report.is_fully_complete());

        let objectives: Vec<String> = worker
            .missions()
            .iter()
            .map(|m| m.objective.clone())
            .collect();
        assert_eq!(
            objectives,
            ["sev1 hotfix", "quarterly report", "routine cleanup"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_worker_kind_falls_back_to_the_default() {
        let worker = ScriptedWorker::reliable("general");
        let sched = scheduler(test_config(), &[Arc::clone(&worker)]);

        let order = WorkOrder::new("misrouted").with_specs(vec![
            spec("renamed discipline").with_worker_kind(WorkerKind::new("archaeologist")),
        ]);
        let report = sched.run(order).await.expect("run succeeds");

        assert!(report.is_fully_complete());
        assert_eq!(worker.calls(), 1);
    }

    struct ScriptedInline {
        fail_first: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl InlineHandler for ScriptedInline {
        async fn handle(&self, mission: &Mission) -> Result<WorkerReport, WorkerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                Err(WorkerError::Unavailable("inline flow hiccup".into()))
            } else {
                Ok(ok_report(&format!("inline {}", mission.objective)))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn trivial_tasks_run_inline_without_touching_workers() {
        let worker = ScriptedWorker::reliable("general");
        let inline = Arc::new(ScriptedInline {
            fail_first: false,
            calls: AtomicUsize::new(0),
        });
        let ctx = SchedulerContext::new(registry_of(&[Arc::clone(&worker)]), Arc::new(test_config()));
        let sched = Scheduler::new(ctx).with_inline_handler(inline.clone());

        let order = WorkOrder::new("small stuff")
            .with_specs(vec![spec("flip the flag").with_scope_estimate(ScopeEstimate::Trivial)]);
        let report = sched.run(order).await.expect("run succeeds");

        assert!(report.is_fully_complete());
        assert_eq!(inline.calls.load(Ordering::SeqCst), 1);
        assert_eq!(worker.calls(), 0, "trivial work never reaches the queue");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_inline_task_degrades_to_delegation() {
        let worker = ScriptedWorker::reliable("general");
        let inline = Arc::new(ScriptedInline {
            fail_first: true,
            calls: AtomicUsize::new(0),
        });
        let ctx = SchedulerContext::new(registry_of(&[Arc::clone(&worker)]), Arc::new(test_config()));
        let sched = Scheduler::new(ctx).with_inline_handler(inline.clone());

        let order = WorkOrder::new("small stuff")
            .with_specs(vec![spec("flip the flag").with_scope_estimate(ScopeEstimate::Trivial)]);
        let report = sched.run(order).await.expect("run succeeds");

        assert!(report.is_fully_complete());
        assert_eq!(report.completed[0].attempt_count, 2);
        assert_eq!(
            inline.calls.load(Ordering::SeqCst),
            1,
            "a failed inline task is not retried inline"
        );
        assert_eq!(worker.calls(), 1);
    }
}
