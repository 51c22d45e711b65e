//! Task module - the tracked unit of work and the list that owns it.
//!
//! - All types use algebraic data types with exhaustive matching
//! - Invariants are documented and enforced in constructors
//! - State changes go through validated transition methods only

pub mod task;
pub mod todo;

pub use task::{Blocker, Priority, ScopeEstimate, Task, TaskError, TaskId, TaskStatus};
pub use todo::{StatusCounts, TodoList};
