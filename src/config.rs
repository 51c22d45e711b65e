//! Configuration for the delegation scheduler.
//!
//! Configuration can be set via environment variables:
//! - `FOREMAN_MAX_CONCURRENT` - Optional. Dispatch slots per scheduler. Defaults to `2`.
//! - `FOREMAN_THROTTLE_MS` - Optional. Minimum gap between dispatch initiations. Defaults to `500`.
//! - `FOREMAN_QUOTA_PENALTY_MS` - Optional. Extra pre-dispatch delay after quota exhaustion. Defaults to `5000`.
//! - `FOREMAN_MAX_ATTEMPTS` - Optional. Dispatch attempts per leaf task. Defaults to `3`.
//! - `FOREMAN_NESTED_MAX_ATTEMPTS` - Optional. Attempts for nested-scheduler dispatches. Defaults to `2`.
//! - `FOREMAN_MAX_DEPTH` - Optional. Scheduler nesting levels. Defaults to `2`.
//! - `FOREMAN_MIN_FANOUT` / `FOREMAN_MAX_FANOUT` - Optional. Decomposition bounds. Default to `3` / `7`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Tunables for one scheduler level.
///
/// Nested schedulers get their own copy; nothing here is process-global.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum dispatches in flight at once
    pub max_concurrent: usize,

    /// Minimum spacing between any two dispatch initiations
    pub throttle_interval: Duration,

    /// Extra spacing imposed once after a quota-exhaustion failure
    pub quota_penalty: Duration,

    /// Dispatch attempts per leaf task before it is declared blocked
    pub max_attempts: u32,

    /// Dispatch attempts when the worker is itself a scheduler
    pub nested_max_attempts: u32,

    /// How many scheduler levels may stack (1 = no nesting)
    pub max_depth: u32,

    /// Smallest acceptable root decomposition
    pub min_fanout: usize,

    /// Largest acceptable decomposition at any level
    pub max_fanout: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            throttle_interval: Duration::from_millis(500),
            quota_penalty: Duration::from_millis(5000),
            max_attempts: 3,
            nested_max_attempts: 2,
            max_depth: 2,
            min_fanout: 3,
            max_fanout: 7,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparseable or out-of-range
    /// values. All variables are optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// `from_env` is this with `std::env::var`; tests feed a map instead so
    /// they never race on process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_concurrent = parse_or(&lookup, "FOREMAN_MAX_CONCURRENT", defaults.max_concurrent)?;
        let throttle_interval = Duration::from_millis(parse_or(
            &lookup,
            "FOREMAN_THROTTLE_MS",
            defaults.throttle_interval.as_millis() as u64,
        )?);
        let quota_penalty = Duration::from_millis(parse_or(
            &lookup,
            "FOREMAN_QUOTA_PENALTY_MS",
            defaults.quota_penalty.as_millis() as u64,
        )?);
        let max_attempts = parse_or(&lookup, "FOREMAN_MAX_ATTEMPTS", defaults.max_attempts)?;
        let nested_max_attempts = parse_or(
            &lookup,
            "FOREMAN_NESTED_MAX_ATTEMPTS",
            defaults.nested_max_attempts,
        )?;
        let max_depth = parse_or(&lookup, "FOREMAN_MAX_DEPTH", defaults.max_depth)?;
        let min_fanout = parse_or(&lookup, "FOREMAN_MIN_FANOUT", defaults.min_fanout)?;
        let max_fanout = parse_or(&lookup, "FOREMAN_MAX_FANOUT", defaults.max_fanout)?;

        let config = Self {
            max_concurrent,
            throttle_interval,
            quota_penalty,
            max_attempts,
            nested_max_attempts,
            max_depth,
            min_fanout,
            max_fanout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the scheduler cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue(
                "FOREMAN_MAX_CONCURRENT".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 || self.nested_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "FOREMAN_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "FOREMAN_MAX_DEPTH".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.min_fanout == 0 || self.min_fanout > self.max_fanout {
            return Err(ConfigError::InvalidValue(
                "FOREMAN_MIN_FANOUT".to_string(),
                format!(
                    "fan-out bounds {}..={} are not a valid range",
                    self.min_fanout, self.max_fanout
                ),
            ));
        }
        Ok(())
    }

    /// Attempt ceiling for a dispatch, which depends on what is being
    /// dispatched: schedulers are more expensive to retry than leaf workers.
    pub fn attempts_for(&self, nested: bool) -> u32 {
        if nested {
            self.nested_max_attempts
        } else {
            self.max_attempts
        }
    }
}

fn parse_or<T>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}
