//! Worker boundary: the trait a scheduler dispatches through, the failure
//! taxonomy of that channel, and the registry that maps capability tags to
//! live workers.
//!
//! # Design
//! A worker is a black box. It receives a `Mission`, and either returns a
//! `WorkerReport` (complete or blocked, both well-formed outcomes) or fails
//! with a `WorkerError` describing what went wrong with the channel itself.
//! Semantic trouble inside the worker's domain is never a `WorkerError`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::mission::{Mission, WorkerReport};

/// Capability tag naming a class of workers.
///
/// Advisory: tasks carry one, but the dispatch may substitute a fallback or
/// the registry default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerKind(String);

impl WorkerKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

/// Infrastructure failures of the dispatch channel.
///
/// Every variant here consumes an attempt when it reaches the retry policy;
/// `is_retryable` says whether another attempt is worth making at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker did not respond within {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Worker unavailable: {0}")]
    Unavailable(String),

    #[error("Worker returned a malformed result: {0}")]
    MalformedReport(String),

    #[error("Worker quota exhausted")]
    QuotaExhausted { retry_after: Option<Duration> },

    #[error("Dispatch cancelled")]
    Cancelled,
}

impl WorkerError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Cancellation is the one channel failure that is never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WorkerError::Cancelled)
    }

    /// Whether this failure should slow the whole queue down, not just this
    /// task.
    pub fn is_quota(&self) -> bool {
        matches!(self, WorkerError::QuotaExhausted { .. })
    }

    /// Extra delay the queue should impose before its next dispatch.
    ///
    /// Uses the provider's hint when one exists, otherwise the caller's
    /// default penalty.
    pub fn penalty_delay(&self, default_penalty: Duration) -> Option<Duration> {
        match self {
            WorkerError::QuotaExhausted { retry_after } => {
                Some(retry_after.unwrap_or(default_penalty))
            }
            _ => None,
        }
    }
}

/// A delegate that can execute missions of its kind.
#[async_trait]
pub trait Worker: Send + Sync {
    /// The capability tag this worker serves.
    fn kind(&self) -> &WorkerKind;

    /// Human-readable name for registries and logs.
    fn name(&self) -> &str;

    /// Execute a mission to its terminal outcome.
    ///
    /// # Errors
    /// Only for infrastructure failures of the channel. A worker that is
    /// semantically stuck returns `Ok` with a blocked report instead.
    async fn run(&self, mission: Mission) -> Result<WorkerReport, WorkerError>;
}

/// Shared reference to a worker.
pub type WorkerRef = Arc<dyn Worker>;

/// Registry entry metadata, for listings.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub kind: WorkerKind,
    pub name: String,
}

/// Maps capability tags to workers, with a default and optional per-kind
/// fallbacks for approach-adjusting retries.
pub struct WorkerRegistry {
    workers: HashMap<WorkerKind, WorkerRef>,
    fallbacks: HashMap<WorkerKind, WorkerKind>,
    default_kind: WorkerKind,
}

impl WorkerRegistry {
    pub fn new(default_kind: WorkerKind) -> Self {
        Self {
            workers: HashMap::new(),
            fallbacks: HashMap::new(),
            default_kind,
        }
    }

    pub fn register(&mut self, worker: WorkerRef) {
        self.workers.insert(worker.kind().clone(), worker);
    }

    /// Declare that `kind` may be substituted by `fallback` when a retry
    /// wants a different approach.
    pub fn register_fallback(&mut self, kind: WorkerKind, fallback: WorkerKind) {
        self.fallbacks.insert(kind, fallback);
    }

    pub fn get(&self, kind: &WorkerKind) -> Option<WorkerRef> {
        self.workers.get(kind).cloned()
    }

    /// Resolve a kind to a worker: exact match, else the default kind, else
    /// any registered worker.
    pub fn resolve(&self, kind: &WorkerKind) -> Option<WorkerRef> {
        self.get(kind)
            .or_else(|| self.get(&self.default_kind))
            .or_else(|| self.workers.values().next().cloned())
    }

    /// The fallback kind for `kind`, if one is declared and actually has a
    /// registered worker behind it.
    pub fn fallback_of(&self, kind: &WorkerKind) -> Option<WorkerKind> {
        self.fallbacks
            .get(kind)
            .filter(|f| self.workers.contains_key(*f))
            .cloned()
    }

    pub fn default_kind(&self) -> &WorkerKind {
        &self.default_kind
    }

    pub fn list(&self) -> Vec<WorkerInfo> {
        let mut list: Vec<_> = self
            .workers
            .values()
            .map(|w| WorkerInfo {
                kind: w.kind().clone(),
                name: w.name().to_string(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}
