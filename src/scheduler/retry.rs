//! Retry policy: how many dispatch attempts a task gets and which approach
//! each attempt takes.
//!
//! # Design
//! Only infrastructure failures come through here. A semantic blockade is a
//! worker saying "this cannot be done", and retrying it verbatim would just
//! burn quota; the scheduler records it instead. Infrastructure failures are
//! channel trouble, so the first response is to try again unchanged, and the
//! last attempt a task will ever get switches to an adjusted approach.

use crate::worker::WorkerError;

/// How a dispatch attempt should be shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approach {
    /// Rebuild the same mission and send it again
    Same,
    /// Change something material: a fallback worker kind when the registry
    /// has one, otherwise a scope cut down to the bare objective
    Adjusted,
}

/// What to do with a task after an infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Requeue it; the next dispatch uses the given approach
    Retry { approach: Approach },
    /// Attempts exhausted or the failure is not retryable; block the task
    DoNotRetry,
}

/// Attempt ceiling and approach schedule for one dispatch class.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// A policy allowing `max_attempts` dispatches per task (at least 1).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The approach for a given 1-based attempt number.
    ///
    /// Every attempt repeats the original approach except a task's final
    /// attempt, which adjusts, provided there was an earlier attempt to
    /// adjust away from.
    pub fn approach_for(&self, attempt: u32) -> Approach {
        if self.max_attempts > 1 && attempt >= self.max_attempts {
            Approach::Adjusted
        } else {
            Approach::Same
        }
    }

    /// Decide the follow-up to an infrastructure failure on `attempt`.
    pub fn next_action(&self, attempt: u32, error: &WorkerError) -> RetryAction {
        if !error.is_retryable() {
            return RetryAction::DoNotRetry;
        }
        if attempt >= self.max_attempts {
            RetryAction::DoNotRetry
        } else {
            RetryAction::Retry {
                approach: self.approach_for(attempt + 1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timeout() -> WorkerError {
        WorkerError::Timeout {
            elapsed: Duration::from_secs(30),
        }
    }

    #[test]
    fn approach_schedule_adjusts_only_the_final_attempt() {
        let cases: &[(u32, &[Approach])] = &[
            (1, &[Approach::Same]),
            (2, &[Approach::Same, Approach::Adjusted]),
            (3, &[Approach::Same, Approach::Same, Approach::Adjusted]),
        ];

        for (max_attempts, expected) in cases {
            let policy = RetryPolicy::new(*max_attempts);
            for (i, want) in expected.iter().enumerate() {
                let attempt = (i + 1) as u32;
                assert_eq!(
                    policy.approach_for(attempt),
                    *want,
                    "max_attempts={max_attempts}, attempt={attempt}"
                );
            }
        }
    }

    #[test]
    fn transient_failures_retry_until_the_ceiling() {
        let policy = RetryPolicy::new(3);

        assert_eq!(
            policy.next_action(1, &timeout()),
            RetryAction::Retry {
                approach: Approach::Same
            }
        );
        assert_eq!(
            policy.next_action(2, &timeout()),
            RetryAction::Retry {
                approach: Approach::Adjusted
            },
            "the retry that lands on the final attempt adjusts"
        );
        assert_eq!(policy.next_action(3, &timeout()), RetryAction::DoNotRetry);
    }

    #[test]
    fn quota_exhaustion_is_retryable_like_any_transient_failure() {
        let policy = RetryPolicy::new(2);
        let quota = WorkerError::QuotaExhausted { retry_after: None };
        assert_eq!(
            policy.next_action(1, &quota),
            RetryAction::Retry {
                approach: Approach::Adjusted
            }
        );
    }

    #[test]
    fn cancellation_is_never_retried() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.next_action(1, &WorkerError::Cancelled),
            RetryAction::DoNotRetry
        );
    }

    #[test]
    fn zero_attempt_policies_are_clamped_to_one() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.approach_for(1), Approach::Same);
        assert_eq!(policy.next_action(1, &timeout()), RetryAction::DoNotRetry);
    }
}
