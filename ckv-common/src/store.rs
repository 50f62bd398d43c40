//! # Store Contract
//!
//! Purpose: Describe the primitive operations a key-value backend must offer
//! so the cache facade, lock manager, and ranked-set helpers can run against a
//! remote server or an in-process engine interchangeably.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: Callers hold `Arc<S: Store>` and never see the
//!    transport.
//! 2. **Borrow-Friendly API**: Keys, values, and members are `&[u8]`.
//! 3. **No Retries**: Every call is one attempt; retry policy belongs to the
//!    caller.
//! 4. **Atomic Escape Hatch**: `eval` is the only multi-step primitive and the
//!    backend must run it without interleaving.

use std::time::Duration;

use crate::error::CkvResult;
use crate::script::{Script, ScriptReply};

/// Write condition for `Store::set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// Unconditional write.
    Always,
    /// Write only when the key does not exist (NX).
    IfAbsent,
    /// Write only when the key already exists (XX).
    IfPresent,
}

/// Traversal order for ranked-set range and rank queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// TTL state of a key, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TtlStatus {
    /// Key is missing or already expired.
    #[default]
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Milliseconds to send on the wire for `ttl`.
///
/// Fractional milliseconds round up so a non-zero TTL never reads as
/// "expire now"; TTLs beyond `u64::MAX` ms saturate.
pub fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

/// Primitive operations of a remote single-threaded key-value store.
pub trait Store: Send + Sync {
    /// Returns true when the key exists.
    fn exists(&self, key: &[u8]) -> CkvResult<bool>;

    /// Fetches a string value; `Ok(None)` when the key is missing.
    fn get(&self, key: &[u8]) -> CkvResult<Option<Vec<u8>>>;

    /// Writes a string value with an optional TTL.
    ///
    /// Returns false when `condition` rejected the write.
    fn set(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> CkvResult<bool>;

    /// Atomic set-if-absent with TTL.
    fn set_if_absent(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> CkvResult<bool> {
        self.set(key, value, ttl, SetCondition::IfAbsent)
    }

    /// Atomic set-if-present with TTL.
    fn set_if_present(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> CkvResult<bool> {
        self.set(key, value, ttl, SetCondition::IfPresent)
    }

    /// Deletes a key. Returns true when a live key was removed.
    fn delete(&self, key: &[u8]) -> CkvResult<bool>;

    /// Sets a TTL on an existing key. Returns false when the key is missing.
    fn expire(&self, key: &[u8], ttl: Duration) -> CkvResult<bool>;

    /// Removes the TTL. Returns false when the key is missing or persistent.
    fn persist(&self, key: &[u8]) -> CkvResult<bool>;

    /// Returns TTL status for a key.
    fn ttl(&self, key: &[u8]) -> CkvResult<TtlStatus>;

    /// Renames `old` to `new` only when `new` does not exist.
    ///
    /// Returns false when `old` is missing or `new` is already present.
    fn rename_if_absent(&self, old: &[u8], new: &[u8]) -> CkvResult<bool>;

    /// Adds `delta` to the integer stored at `key` (missing counts as 0).
    fn increment_by(&self, key: &[u8], delta: i64) -> CkvResult<i64>;

    /// Subtracts `delta` from the integer stored at `key`.
    fn decrement_by(&self, key: &[u8], delta: i64) -> CkvResult<i64> {
        match delta.checked_neg() {
            Some(negated) => self.increment_by(key, negated),
            None => Err(crate::CkvError::failed("decrement would overflow")),
        }
    }

    /// Sets one bit and returns the previous bit.
    fn set_bit(&self, key: &[u8], offset: u64, bit: bool) -> CkvResult<bool>;

    /// Counts set bits in the string at `key`.
    fn bit_count(&self, key: &[u8]) -> CkvResult<i64>;

    /// Upserts a ranked-set member. Returns true when the member is new.
    fn zadd(&self, key: &[u8], member: &[u8], score: f64) -> CkvResult<bool>;

    /// Removes members and returns how many were present.
    fn zrem(&self, key: &[u8], members: &[&[u8]]) -> CkvResult<i64>;

    /// Adds `delta` to a member's score, creating it when absent.
    fn zincrby(&self, key: &[u8], member: &[u8], delta: f64) -> CkvResult<f64>;

    /// Members with rank in `[start, stop]`; negative indices count from the end.
    fn zrange(&self, key: &[u8], start: i64, stop: i64, order: Order) -> CkvResult<Vec<Vec<u8>>>;

    /// Counts members whose score lies in `[min, max]`.
    fn zcount(&self, key: &[u8], min: f64, max: f64) -> CkvResult<i64>;

    /// 0-based rank of a member, or `None` when absent.
    fn zrank(&self, key: &[u8], member: &[u8], order: Order) -> CkvResult<Option<u64>>;

    /// Evaluates a script atomically with respect to all other operations.
    fn eval(&self, script: &Script, keys: &[&[u8]], args: &[&[u8]]) -> CkvResult<ScriptReply>;

    /// Round-trips a no-op to check liveness.
    fn ping(&self) -> CkvResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_millis_rounds_up_and_saturates() {
        assert_eq!(ttl_millis(Duration::ZERO), 0);
        assert_eq!(ttl_millis(Duration::from_micros(500)), 1);
        assert_eq!(ttl_millis(Duration::from_micros(1_500)), 2);
        assert_eq!(ttl_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(ttl_millis(Duration::MAX), u64::MAX);
    }
}
