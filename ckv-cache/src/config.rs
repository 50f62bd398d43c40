//! # Cache Configuration
//!
//! Plain structs with defaults; every field may be omitted from JSON.
//! Durations are expressed in milliseconds.

use std::time::Duration;

use ckv_common::{CkvError, CkvResult};
use serde::Deserialize;
use tracing::{debug, error};

/// What a facade operation does when the store call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log the failure and return the operation's sentinel (`false`, `None`,
    /// empty, zero). Callers cannot tell a miss from an outage.
    #[default]
    Swallow,
    /// Return the error to the caller.
    Propagate,
}

impl ErrorPolicy {
    /// Resolves a store result according to the policy.
    ///
    /// Under `Swallow` the error is logged and replaced by `T::default()`.
    pub(crate) fn settle<T: Default>(
        self,
        op: &'static str,
        key: &str,
        result: CkvResult<T>,
    ) -> CkvResult<T> {
        match (result, self) {
            (Ok(value), _) => Ok(value),
            (Err(err), ErrorPolicy::Swallow) => {
                error!(op, key, error = %err, "cache operation failed");
                Ok(T::default())
            }
            (Err(err), ErrorPolicy::Propagate) => {
                debug!(op, key, error = %err, "cache operation failed");
                Err(err)
            }
        }
    }
}

/// Retry pacing for `LockManager::preemptive_lock`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// First pause between acquisition attempts.
    pub retry_initial_ms: u64,
    /// Upper bound for the doubling pause.
    pub retry_max_ms: u64,
    /// Random extra pause in `[0, jitter_ms]` added to every wait.
    pub jitter_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            retry_initial_ms: 10,
            retry_max_ms: 200,
            jitter_ms: 10,
        }
    }
}

impl LockConfig {
    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms.max(1))
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms).max(self.retry_initial())
    }
}

/// Top-level facade configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub error_policy: ErrorPolicy,
    pub lock: LockConfig,
}

impl CacheConfig {
    /// Parses a (possibly partial) JSON document.
    pub fn from_json(text: &str) -> CkvResult<Self> {
        serde_json::from_str(text).map_err(CkvError::from)
    }

    /// Default configuration with the propagate policy, handy in tests.
    pub fn propagating() -> Self {
        CacheConfig {
            error_policy: ErrorPolicy::Propagate,
            ..CacheConfig::default()
        }
    }
}
