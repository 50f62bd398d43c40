//! # Distributed Lock Manager
//!
//! Purpose: Mutual exclusion across processes built on the store's
//! set-if-absent-with-TTL and compare-and-delete primitives.
//!
//! ## Design Principles
//! 1. **Ownership by Value**: The lock token is the JSON encoding of the
//!    caller's value; release and renew succeed only on an exact byte match.
//! 2. **Atomic Release**: Ownership check and delete run as one script so a
//!    lock that expired and was re-acquired is never released by its old owner.
//! 3. **Bounded Waiting**: `preemptive_lock` polls until a deadline with
//!    capped exponential backoff and random jitter.
//! 4. **RAII Option**: [`LockGuard`] releases on drop, in the style of a pooled
//!    connection returning to its pool.
//!
//! ```text
//! Unheld ──acquire(v)──▶ Held(v) ──unlock(v) / TTL──▶ Unheld
//!                          │
//!                          └─ unlock(w), w != v ──▶ LockNotOwned
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ckv_common::{ttl_millis, CkvError, CkvResult, Script, ScriptReply, Store};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::encode;
use crate::config::{CacheConfig, ErrorPolicy, LockConfig};

/// How `distributed_lock` writes the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Acquire only when the key is absent ("NX").
    NotExist,
    /// Overwrite only when the key is present ("XX").
    ///
    /// This refreshes the lock whoever holds it; use
    /// [`LockManager::renew`] for an ownership-checked refresh.
    Exist,
}

impl LockMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LockMode::NotExist => "NX",
            LockMode::Exist => "XX",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockMode {
    type Err = CkvError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        if mode.eq_ignore_ascii_case("NX") {
            Ok(LockMode::NotExist)
        } else if mode.eq_ignore_ascii_case("XX") {
            Ok(LockMode::Exist)
        } else {
            Err(CkvError::failed(format!("unknown lock mode `{mode}`")))
        }
    }
}

/// Runs the compare-and-delete script and maps its reply.
fn release(store: &impl Store, key: &str, token: &[u8]) -> CkvResult<bool> {
    let reply = store.eval(&Script::compare_and_delete(), &[key.as_bytes()], &[token])?;
    owned_reply(reply)
}

fn owned_reply(reply: ScriptReply) -> CkvResult<bool> {
    match reply.as_integer() {
        Some(1) => Ok(true),
        Some(0) => Err(CkvError::LockNotOwned),
        _ => Err(CkvError::failed(format!("unexpected script reply {reply:?}"))),
    }
}

/// Lock operations over a shared store.
pub struct LockManager<S> {
    store: Arc<S>,
    policy: ErrorPolicy,
    pacing: LockConfig,
}

impl<S: Store> LockManager<S> {
    pub fn new(store: Arc<S>, config: &CacheConfig) -> Self {
        LockManager {
            store,
            policy: config.error_policy,
            pacing: config.lock.clone(),
        }
    }

    /// Acquires (`NotExist`) or refreshes (`Exist`) the lock at `key`.
    ///
    /// With `NotExist`, at most one of several concurrent callers succeeds
    /// before the TTL elapses.
    pub fn distributed_lock<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        mode: LockMode,
        ttl: Duration,
    ) -> CkvResult<bool> {
        let result = encode(value).and_then(|token| self.write_token(key, &token, mode, ttl));
        let acquired = self.policy.settle("distributed_lock", key, result)?;
        debug!(key, mode = %mode, acquired, "distributed lock attempt");
        Ok(acquired)
    }

    /// Same as [`distributed_lock`](Self::distributed_lock) with the mode given
    /// by name ("NX" or "XX", any case).
    pub fn distributed_lock_by_name<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        mode: &str,
        ttl: Duration,
    ) -> CkvResult<bool> {
        match mode.parse::<LockMode>() {
            Ok(mode) => self.distributed_lock(key, value, mode, ttl),
            Err(err) => self.policy.settle("distributed_lock", key, Err(err)),
        }
    }

    fn write_token(&self, key: &str, token: &[u8], mode: LockMode, ttl: Duration) -> CkvResult<bool> {
        match mode {
            LockMode::NotExist => self.store.set_if_absent(key.as_bytes(), token, Some(ttl)),
            LockMode::Exist => self.store.set_if_present(key.as_bytes(), token, Some(ttl)),
        }
    }

    /// Waits up to `wait_timeout` for the lock at `key`.
    ///
    /// The token is written with a TTL equal to `wait_timeout`. At least one
    /// attempt is made unless the timeout is zero, which returns false. A
    /// timeout too large to form a deadline waits until the lock is free.
    pub fn preemptive_lock<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        wait_timeout: Duration,
    ) -> CkvResult<bool> {
        if wait_timeout.is_zero() {
            return Ok(false);
        }
        let result = encode(value).and_then(|token| self.poll(key, &token, wait_timeout));
        self.policy.settle("preemptive_lock", key, result)
    }

    fn poll(&self, key: &str, token: &[u8], wait_timeout: Duration) -> CkvResult<bool> {
        // A timeout past the clock's range waits indefinitely.
        let deadline = Instant::now().checked_add(wait_timeout);
        let max_backoff = self.pacing.retry_max();
        let mut backoff = self.pacing.retry_initial();
        let mut attempts = 0u32;
        let mut rng = rand::rng();

        loop {
            attempts += 1;
            if self.store.set_if_absent(key.as_bytes(), token, Some(wait_timeout))? {
                debug!(key, attempts, "preemptive lock acquired");
                return Ok(true);
            }

            let jitter = Duration::from_millis(rng.random_range(0..=self.pacing.jitter_ms));
            let mut pause = backoff + jitter;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    debug!(key, attempts, "preemptive lock timed out");
                    return Ok(false);
                }
                pause = pause.min(deadline - now);
            }
            thread::sleep(pause);
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    /// Releases the lock when `value` matches the stored owner.
    ///
    /// A mismatch is [`CkvError::LockNotOwned`]; under the swallow policy it
    /// reads as `false`, the same as a transport failure.
    pub fn unlock<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> CkvResult<bool> {
        let result = encode(value).and_then(|token| release(&*self.store, key, &token));
        self.policy.settle("unlock", key, result)
    }

    /// Refreshes the TTL when `value` matches the stored owner.
    pub fn renew<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CkvResult<bool> {
        let result = encode(value).and_then(|token| {
            let millis = ttl_millis(ttl).to_string();
            let reply = self.store.eval(
                &Script::compare_and_expire(),
                &[key.as_bytes()],
                &[token.as_slice(), millis.as_bytes()],
            )?;
            owned_reply(reply)
        });
        self.policy.settle("renew", key, result)
    }

    /// Acquires in `NotExist` mode and returns a guard that unlocks on drop.
    ///
    /// `None` when another owner holds the lock.
    pub fn try_guard<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CkvResult<Option<LockGuard<S>>> {
        let result = encode(value).and_then(|token| {
            let acquired = self
                .store
                .set_if_absent(key.as_bytes(), &token, Some(ttl))?;
            Ok(acquired.then(|| LockGuard {
                store: Arc::clone(&self.store),
                key: key.to_string(),
                token,
                released: false,
            }))
        });
        self.policy.settle("try_guard", key, result)
    }
}

/// Held lock that is released when dropped.
pub struct LockGuard<S: Store> {
    store: Arc<S>,
    key: String,
    token: Vec<u8>,
    released: bool,
}

impl<S: Store> LockGuard<S> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases now and reports the outcome; dropping afterwards is a no-op.
    pub fn release(mut self) -> CkvResult<bool> {
        self.released = true;
        release(&*self.store, &self.key, &self.token)
    }
}

impl<S: Store> Drop for LockGuard<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = release(&*self.store, &self.key, &self.token) {
            warn!(key = %self.key, error = %err, "lock guard release failed");
        }
    }
}
