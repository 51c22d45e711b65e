//! # foreman
//!
//! Hierarchical task delegation scheduler with bounded concurrency.
//!
//! This library provides:
//! - A todo list of dependency-ordered tasks with validated state transitions
//! - A delegation queue that caps concurrent dispatches and paces initiations
//! - A scheduler loop that retries failures, isolates them, and consolidates
//!   every request into exactly one final report
//! - A worker boundary small enough to wrap anything that can take a mission
//!   and answer with a structured report, including another scheduler
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │            Scheduler             │
//!        │  (todo list + delegation queue)  │
//!        └────────┬───────────┬─────────────┘
//!                 │           │
//!                 ▼           ▼
//!          ┌──────────┐ ┌─────────────────┐
//!          │  Worker  │ │ NestedScheduler │
//!          │  (leaf)  │ │  (level below)  │
//!          └──────────┘ └─────────────────┘
//! ```
//!
//! ## Request Flow
//! 1. Decompose a goal into 3-7 root tasks with dependencies
//! 2. Admit ready tasks through the queue (cap + throttle before every
//!    dispatch)
//! 3. Settle each outcome: complete, retry, or block; siblings keep running
//! 4. Consolidate once into a final report of completed, blocked, and
//!    cancelled work
//!
//! ## Modules
//! - `task`: task state machine and the todo list
//! - `mission`: the delegation contract and the worker report
//! - `worker`: the worker trait, error taxonomy, and the registry
//! - `queue`: bounded, throttled dispatch admission
//! - `scheduler`: the execution loop, planning, routing, retries, nesting

pub mod config;
pub mod mission;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod worker;

pub use config::SchedulerConfig;
pub use mission::{Mission, WorkerReport};
pub use scheduler::{FinalReport, Scheduler, SchedulerContext, TaskSpec, WorkOrder};
pub use task::{Priority, Task, TaskId, TaskStatus};
pub use worker::{Worker, WorkerError, WorkerKind, WorkerRegistry};
