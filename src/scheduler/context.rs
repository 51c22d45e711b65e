//! Scheduler execution context - what a scheduler level shares with the
//! levels below it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::worker::WorkerRegistry;

/// Context handed to a scheduler when it starts, and derived for every
/// nested scheduler below it.
///
/// # Thread Safety
/// Registry and config are shared immutably via Arc; the cancellation token
/// is the only signal that crosses levels at runtime.
#[derive(Clone)]
pub struct SchedulerContext {
    /// Workers available at this level
    pub registry: Arc<WorkerRegistry>,

    /// Tunables for this level
    pub config: Arc<SchedulerConfig>,

    /// Request-level abort signal
    pub cancel: CancellationToken,

    /// Scheduler levels this context may still stack, itself included
    pub levels_remaining: u32,
}

impl SchedulerContext {
    /// Root context: full depth budget and a fresh cancellation token.
    pub fn new(registry: Arc<WorkerRegistry>, config: Arc<SchedulerConfig>) -> Self {
        let levels_remaining = config.max_depth;
        Self {
            registry,
            config,
            cancel: CancellationToken::new(),
            levels_remaining,
        }
    }

    /// Replace the cancellation token, e.g. to tie this scheduler to an
    /// externally owned abort signal.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Context for a scheduler one level down.
    ///
    /// The child observes this level's aborts through a child token but
    /// cannot abort this level.
    ///
    /// # Postcondition
    /// `child.levels_remaining == self.levels_remaining - 1`
    pub fn child_context(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            cancel: self.cancel.child_token(),
            levels_remaining: self.levels_remaining.saturating_sub(1),
        }
    }

    /// Whether dispatching a nested scheduler is still within the depth
    /// budget: the child level needs room to exist.
    pub fn can_nest(&self) -> bool {
        self.levels_remaining > 1
    }

    /// Check if a request-level abort was signalled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
