//! Scheduler module - one request from decomposition to the final report.
//!
//! # Components
//! - **Scheduler**: the execution loop; admits ready tasks, reaps outcomes,
//!   runs to quiescence, consolidates once
//! - **TaskPlan / Decomposer**: validated fan-out from a goal to tasks
//! - **RoutePolicy**: inline vs. delegated vs. nested execution per task
//! - **RetryPolicy**: attempt ceilings and the same-then-adjusted schedule
//! - **NestedScheduler**: a scheduler registered as a worker kind, for
//!   multi-step tasks that deserve a level of their own
//!
//! # Design Principles
//! - Every dispatch passes through the delegation queue
//! - Dispatch failures settle their own task and nothing else
//! - Consolidation is pure; running it twice would give the same report

pub mod consolidator;
pub mod context;
pub mod core;
pub mod nested;
pub mod plan;
pub mod retry;
pub mod route;

pub use consolidator::{BlockedTask, CancelledTask, CompletedTask, FinalReport};
pub use context::SchedulerContext;
pub use core::{Scheduler, SchedulerError, WorkOrder};
pub use nested::NestedScheduler;
pub use plan::{Decomposer, PassthroughDecomposer, PlanError, TaskPlan, TaskSpec};
pub use retry::{Approach, RetryAction, RetryPolicy};
pub use route::{InlineHandler, RouteDecision, RoutePolicy};
