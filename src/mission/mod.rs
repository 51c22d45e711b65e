//! Mission module - the wire contract between scheduler and workers.
//!
//! Two halves: the `Mission` a scheduler sends down, and the `WorkerReport`
//! that comes back. Both are plain serde types; neither side shares any
//! other state.

pub mod contract;
pub mod report;

pub use contract::{Mission, MissionContext, MissionError, PriorResult, ReturnFormat, Scope};
pub use report::{Decision, Deliverable, ReportError, ReportStatus, WorkerReport};
