//! # Cache Facade
//!
//! Purpose: Expose value storage with TTLs over any [`Store`], encoding
//! values as JSON and applying the configured [`ErrorPolicy`] to every
//! failure.
//!
//! ## Design Principles
//! 1. **Injectable Store**: The facade owns an `Arc<S>` handed in by the
//!    caller; there is no process-wide client.
//! 2. **Thin Translation**: Each method maps to one or two store calls; the
//!    facade keeps no state of its own.
//! 3. **Policy at the Boundary**: Store errors are resolved once, here, into a
//!    sentinel or an `Err`.

use std::sync::Arc;
use std::time::Duration;

use ckv_common::{CkvError, CkvResult, Store, TtlStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::{CacheConfig, ErrorPolicy};
use crate::lock::LockManager;
use crate::ranked::RankedSets;

/// JSON encoding shared by the facade and the lock manager.
pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> CkvResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(CkvError::from)
}

pub(crate) fn into_text(bytes: Vec<u8>) -> CkvResult<String> {
    String::from_utf8(bytes).map_err(|_| CkvError::failed("stored value is not valid UTF-8"))
}

/// Value cache over a shared store.
pub struct Cache<S> {
    store: Arc<S>,
    config: CacheConfig,
}

impl<S: Store> Cache<S> {
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Cache { store, config }
    }

    /// Cache with default configuration (swallow policy).
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, CacheConfig::default())
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Lock manager sharing this cache's store and configuration.
    pub fn locks(&self) -> LockManager<S> {
        LockManager::new(Arc::clone(&self.store), &self.config)
    }

    /// Ranked-set helpers sharing this cache's store and policy.
    pub fn ranked(&self) -> RankedSets<S> {
        RankedSets::new(Arc::clone(&self.store), self.config.error_policy)
    }

    fn policy(&self) -> ErrorPolicy {
        self.config.error_policy
    }

    pub fn exists(&self, key: &str) -> CkvResult<bool> {
        self.policy()
            .settle("exists", key, self.store.exists(key.as_bytes()))
    }

    /// Stored text of `key`, or `None` when absent.
    pub fn get(&self, key: &str) -> CkvResult<Option<String>> {
        let result = self
            .store
            .get(key.as_bytes())
            .and_then(|value| value.map(into_text).transpose());
        self.policy().settle("get", key, result)
    }

    /// Decodes the JSON stored at `key`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> CkvResult<Option<T>> {
        let result = self.store.get(key.as_bytes()).and_then(|value| {
            value
                .map(|bytes| serde_json::from_slice(&bytes).map_err(CkvError::from))
                .transpose()
        });
        self.policy().settle("get_json", key, result)
    }

    /// Stores `value` as JSON with a TTL, only when `key` does not exist.
    ///
    /// A second call while the key is live returns false and leaves the first
    /// value in place.
    pub fn set_with_expire<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CkvResult<bool> {
        let result = encode(value).and_then(|bytes| {
            self.store
                .set_if_absent(key.as_bytes(), &bytes, Some(ttl))
        });
        let stored = self.policy().settle("set_with_expire", key, result)?;
        if !stored {
            debug!(key, "set_with_expire skipped; key present or store failed");
        }
        Ok(stored)
    }

    /// Resets the TTL of a present key.
    ///
    /// Returns `Some(applied)` when the key exists and `None` when it does
    /// not. The value itself is never returned.
    pub fn get_key_with_expire(&self, key: &str, ttl: Duration) -> CkvResult<Option<bool>> {
        let result = self.store.get(key.as_bytes()).and_then(|value| match value {
            Some(_) => self.store.expire(key.as_bytes(), ttl).map(Some),
            None => Ok(None),
        });
        self.policy().settle("get_key_with_expire", key, result)
    }

    /// Deletes `key` when it currently exists.
    pub fn delete(&self, key: &str) -> CkvResult<bool> {
        let result = self.store.exists(key.as_bytes()).and_then(|present| {
            if present {
                self.store.delete(key.as_bytes())
            } else {
                Ok(false)
            }
        });
        self.policy().settle("delete", key, result)
    }

    /// Renames `old` to `new`; fails when `new` exists or `old` is missing.
    pub fn rename_by_key(&self, old: &str, new: &str) -> CkvResult<bool> {
        let result = self.store.rename_if_absent(old.as_bytes(), new.as_bytes());
        self.policy().settle("rename_by_key", old, result)
    }

    /// Removes the TTL of an existing key.
    pub fn set_permanent_by_key(&self, key: &str) -> CkvResult<bool> {
        let result = self.store.exists(key.as_bytes()).and_then(|present| {
            if present {
                self.store.persist(key.as_bytes())
            } else {
                Ok(false)
            }
        });
        self.policy().settle("set_permanent_by_key", key, result)
    }

    /// TTL state of `key`; `Missing` on swallowed failures.
    pub fn ttl(&self, key: &str) -> CkvResult<TtlStatus> {
        self.policy().settle("ttl", key, self.store.ttl(key.as_bytes()))
    }

    /// Sets one bit and returns its previous value.
    pub fn set_bit(&self, key: &str, offset: u64, bit: bool) -> CkvResult<bool> {
        self.policy()
            .settle("set_bit", key, self.store.set_bit(key.as_bytes(), offset, bit))
    }

    pub fn bit_count(&self, key: &str) -> CkvResult<i64> {
        self.policy()
            .settle("bit_count", key, self.store.bit_count(key.as_bytes()))
    }

    /// Adds `delta` to the counter at `key`; `None` on swallowed failures.
    pub fn increment(&self, key: &str, delta: i64) -> CkvResult<Option<i64>> {
        let result = self.store.increment_by(key.as_bytes(), delta).map(Some);
        self.policy().settle("increment", key, result)
    }

    /// Subtracts `delta` from the counter at `key`; `None` on swallowed failures.
    pub fn decrement(&self, key: &str, delta: i64) -> CkvResult<Option<i64>> {
        let result = self.store.decrement_by(key.as_bytes(), delta).map(Some);
        self.policy().settle("decrement", key, result)
    }
}
