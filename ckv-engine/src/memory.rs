//! # In-Memory Store
//!
//! Provide an in-process `Store` with sharded locking, TTL-aware lookups,
//! strings, counters, bitmaps, and ordered sets.
//!
//! ## Usage
//!
//! - Use `MemoryStore::new()` for a default sharded store.
//! - Use `MemoryStore::with_shard_count` to pin the shard count (tests, benches).
//! - Use `start_expirer` to enable active TTL cleanup in the background.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-shard locks reduce contention under concurrency.
//! 2. **TTL Fast Path**: Expiration is checked on access; expired entries are
//!    removed before any command observes them.
//! 3. **Atomic Builtins**: Without a scripting runtime, the compare-and-delete
//!    and compare-and-expire scripts run natively under the owning shard's
//!    write lock, giving the same all-or-nothing ownership check.
//! 4. **Strategy Pattern**: Implements `Store` to keep callers decoupled.
//!
//! ## Structure Overview
//!
//! ```text
//! MemoryStore
//!   └── shards: Vec<Shard>
//!         └── Shard
//!               └── inner: RwLock<ShardInner>
//!                     └── map: HashMap<Vec<u8>, Entry>
//!                           └── Entry { value: Str | Ranked(SortedSet), expires_at }
//! ```

use std::hash::{BuildHasher, Hasher};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use ckv_common::{
    BuiltinScript, CkvError, CkvResult, Order, Script, ScriptReply, SetCondition, Store, TtlStatus,
    WRONG_TYPE,
};

use crate::zset::{check_score, SortedSet};

/// Default shards = CPU count * multiplier to reduce lock contention.
const DEFAULT_SHARD_MULTIPLIER: usize = 4;

/// Largest bit offset accepted by SETBIT (512 MiB string).
const MAX_BIT_OFFSET: u64 = (1 << 32) - 1;

#[derive(Debug)]
enum Value {
    Str(Vec<u8>),
    Ranked(SortedSet),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Entry {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    fn as_str(&self) -> CkvResult<&[u8]> {
        match &self.value {
            Value::Str(data) => Ok(data),
            Value::Ranked(_) => Err(wrong_type()),
        }
    }

    fn as_str_mut(&mut self) -> CkvResult<&mut Vec<u8>> {
        match &mut self.value {
            Value::Str(data) => Ok(data),
            Value::Ranked(_) => Err(wrong_type()),
        }
    }

    fn as_ranked(&self) -> CkvResult<&SortedSet> {
        match &self.value {
            Value::Ranked(set) => Ok(set),
            Value::Str(_) => Err(wrong_type()),
        }
    }

    fn as_ranked_mut(&mut self) -> CkvResult<&mut SortedSet> {
        match &mut self.value {
            Value::Ranked(set) => Ok(set),
            Value::Str(_) => Err(wrong_type()),
        }
    }
}

fn wrong_type() -> CkvError {
    CkvError::failed(WRONG_TYPE)
}

/// Per-shard storage container.
#[derive(Debug, Default)]
struct ShardInner {
    map: HashMap<Vec<u8>, Entry>,
}

impl ShardInner {
    /// Drops `key` if it has expired at `now`.
    fn purge_if_expired(&mut self, key: &[u8], now: Instant) {
        if self.map.get(key).is_some_and(|entry| entry.is_expired(now)) {
            self.map.remove(key);
        }
    }

    /// Returns the live entry for `key`, removing it first if expired.
    fn live(&mut self, key: &[u8], now: Instant) -> Option<&mut Entry> {
        self.purge_if_expired(key, now);
        self.map.get_mut(key)
    }

    /// Returns the ordered set at `key`, creating an empty one when missing.
    fn ranked_or_insert(&mut self, key: &[u8], now: Instant) -> CkvResult<&mut SortedSet> {
        self.purge_if_expired(key, now);
        self.map
            .entry(key.to_vec())
            .or_insert_with(|| Entry::new(Value::Ranked(SortedSet::default())))
            .as_ranked_mut()
    }

    /// Removes an ordered set that lost its last member.
    fn drop_if_empty(&mut self, key: &[u8]) {
        let empty = matches!(
            self.map.get(key),
            Some(Entry { value: Value::Ranked(set), .. }) if set.is_empty()
        );
        if empty {
            self.map.remove(key);
        }
    }

    /// Applies `ttl` to a live entry; a zero TTL removes it immediately and a
    /// TTL past the clock's range leaves it persistent.
    fn apply_ttl(&mut self, key: &[u8], ttl: Duration, now: Instant) -> bool {
        let Some(entry) = self.live(key, now) else {
            return false;
        };
        if ttl.is_zero() {
            self.map.remove(key);
        } else {
            entry.expires_at = now.checked_add(ttl);
        }
        true
    }

    /// Returns true when the live string at `key` equals `expected`.
    fn holds(&mut self, key: &[u8], expected: &[u8], now: Instant) -> CkvResult<bool> {
        match self.live(key, now) {
            Some(entry) => Ok(entry.as_str()? == expected),
            None => Ok(false),
        }
    }
}

/// Per-shard lock wrapper.
#[derive(Debug)]
struct Shard {
    inner: RwLock<ShardInner>,
}

/// Sharded in-memory implementation of `Store`.
///
/// Every command locks exactly one shard, except rename which locks the two
/// owning shards in index order.
#[derive(Debug)]
pub struct MemoryStore {
    shards: Vec<Shard>,
    /// Bitmask for fast shard selection (power-of-two shard count).
    shard_mask: usize,
    hash_state: RandomState,
}

/// Handle for the background expiration sweeper.
///
/// Call `stop` to signal shutdown and join the thread.
pub struct ExpirationHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ExpirationHandle {
    /// Stops the sweeper and waits for the thread to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store with a default shard count based on CPU parallelism.
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        Self::with_shard_count(threads.saturating_mul(DEFAULT_SHARD_MULTIPLIER))
    }

    /// Creates a store with a caller-provided shard count.
    ///
    /// The count is normalized to the next power of two to enable fast masking.
    pub fn with_shard_count(shards: usize) -> Self {
        let shard_count = normalize_shard_count(shards);
        let shards = (0..shard_count)
            .map(|_| Shard {
                inner: RwLock::new(ShardInner::default()),
            })
            .collect();

        MemoryStore {
            shards,
            shard_mask: shard_count - 1,
            hash_state: RandomState::new(),
        }
    }

    /// Number of live and not-yet-swept keys across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.inner.read().map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes expired entries across all shards.
    ///
    /// This is an O(n) scan and is intended for a periodic background sweep.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut inner = shard.inner.write();
            let before = inner.map.len();
            inner.map.retain(|_, entry| !entry.is_expired(now));
            removed += before - inner.map.len();
        }
        removed
    }

    /// Starts a background thread that periodically removes expired entries.
    ///
    /// The returned handle must be stopped to avoid leaking the thread.
    pub fn start_expirer(self: &Arc<Self>, interval: Duration) -> ExpirationHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let store = Arc::clone(self);

        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                let removed = store.purge_expired(Instant::now());
                if removed > 0 {
                    debug!(removed, "expired entries swept");
                }
            }
        });

        ExpirationHandle {
            stop,
            join: Some(join),
        }
    }

    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key);
        (hasher.finish() as usize) & self.shard_mask
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    fn compare_and_delete(&self, keys: &[&[u8]], args: &[&[u8]]) -> CkvResult<ScriptReply> {
        let ([key], [expected]) = (keys, args) else {
            return Err(CkvError::failed("compare-and-delete takes 1 key and 1 argument"));
        };
        let now = Instant::now();
        let mut inner = self.shard_for(key).inner.write();
        if !inner.holds(key, expected, now)? {
            return Ok(ScriptReply::Integer(0));
        }
        inner.map.remove(*key);
        Ok(ScriptReply::Integer(1))
    }

    fn compare_and_expire(&self, keys: &[&[u8]], args: &[&[u8]]) -> CkvResult<ScriptReply> {
        let ([key], [expected, ttl_ms]) = (keys, args) else {
            return Err(CkvError::failed("compare-and-expire takes 1 key and 2 arguments"));
        };
        let ttl = std::str::from_utf8(ttl_ms)
            .ok()
            .and_then(|text| text.parse::<u64>().ok())
            .map(Duration::from_millis)
            .ok_or_else(|| CkvError::failed("value is not an integer or out of range"))?;
        let now = Instant::now();
        let mut inner = self.shard_for(key).inner.write();
        if !inner.holds(key, expected, now)? {
            return Ok(ScriptReply::Integer(0));
        }
        inner.apply_ttl(key, ttl, now);
        Ok(ScriptReply::Integer(1))
    }
}

impl Store for MemoryStore {
    fn exists(&self, key: &[u8]) -> CkvResult<bool> {
        let mut inner = self.shard_for(key).inner.write();
        Ok(inner.live(key, Instant::now()).is_some())
    }

    fn get(&self, key: &[u8]) -> CkvResult<Option<Vec<u8>>> {
        let mut inner = self.shard_for(key).inner.write();
        match inner.live(key, Instant::now()) {
            Some(entry) => Ok(Some(entry.as_str()?.to_vec())),
            None => Ok(None),
        }
    }

    fn set(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> CkvResult<bool> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CkvError::failed("invalid expire time in 'set' command"));
        }
        let now = Instant::now();
        let mut inner = self.shard_for(key).inner.write();
        let present = inner.live(key, now).is_some();
        let allowed = match condition {
            SetCondition::Always => true,
            SetCondition::IfAbsent => !present,
            SetCondition::IfPresent => present,
        };
        if !allowed {
            return Ok(false);
        }
        inner.map.insert(
            key.to_vec(),
            Entry {
                value: Value::Str(value.to_vec()),
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            },
        );
        Ok(true)
    }

    fn delete(&self, key: &[u8]) -> CkvResult<bool> {
        let mut inner = self.shard_for(key).inner.write();
        let present = inner.live(key, Instant::now()).is_some();
        if present {
            inner.map.remove(key);
        }
        Ok(present)
    }

    fn expire(&self, key: &[u8], ttl: Duration) -> CkvResult<bool> {
        let mut inner = self.shard_for(key).inner.write();
        Ok(inner.apply_ttl(key, ttl, Instant::now()))
    }

    fn persist(&self, key: &[u8]) -> CkvResult<bool> {
        let mut inner = self.shard_for(key).inner.write();
        match inner.live(key, Instant::now()) {
            Some(entry) => Ok(entry.expires_at.take().is_some()),
            None => Ok(false),
        }
    }

    fn ttl(&self, key: &[u8]) -> CkvResult<TtlStatus> {
        let now = Instant::now();
        let mut inner = self.shard_for(key).inner.write();
        match inner.live(key, now) {
            None => Ok(TtlStatus::Missing),
            Some(Entry {
                expires_at: None, ..
            }) => Ok(TtlStatus::NoExpiry),
            Some(Entry {
                expires_at: Some(deadline),
                ..
            }) => Ok(TtlStatus::ExpiresIn(deadline.saturating_duration_since(now))),
        }
    }

    fn rename_if_absent(&self, old: &[u8], new: &[u8]) -> CkvResult<bool> {
        let now = Instant::now();
        let (from, to) = (self.shard_index(old), self.shard_index(new));

        if from == to {
            let mut inner = self.shards[from].inner.write();
            if inner.live(old, now).is_none() || inner.live(new, now).is_some() {
                return Ok(false);
            }
            if let Some(entry) = inner.map.remove(old) {
                inner.map.insert(new.to_vec(), entry);
            }
            return Ok(true);
        }

        // Lock in index order so concurrent renames cannot deadlock.
        let (low, high) = (from.min(to), from.max(to));
        let mut low_guard = self.shards[low].inner.write();
        let mut high_guard = self.shards[high].inner.write();
        let (source, target) = if from == low {
            (&mut *low_guard, &mut *high_guard)
        } else {
            (&mut *high_guard, &mut *low_guard)
        };

        if source.live(old, now).is_none() || target.live(new, now).is_some() {
            return Ok(false);
        }
        if let Some(entry) = source.map.remove(old) {
            target.map.insert(new.to_vec(), entry);
        }
        Ok(true)
    }

    fn increment_by(&self, key: &[u8], delta: i64) -> CkvResult<i64> {
        let mut inner = self.shard_for(key).inner.write();
        let Some(entry) = inner.live(key, Instant::now()) else {
            inner
                .map
                .insert(key.to_vec(), Entry::new(Value::Str(delta.to_string().into_bytes())));
            return Ok(delta);
        };

        let data = entry.as_str_mut()?;
        let current: i64 = std::str::from_utf8(data)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or_else(|| CkvError::failed("value is not an integer or out of range"))?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| CkvError::failed("increment or decrement would overflow"))?;
        *data = next.to_string().into_bytes();
        Ok(next)
    }

    fn set_bit(&self, key: &[u8], offset: u64, bit: bool) -> CkvResult<bool> {
        if offset > MAX_BIT_OFFSET {
            return Err(CkvError::failed("bit offset is not an integer or out of range"));
        }
        let byte = (offset / 8) as usize;
        // Bit 0 is the most significant bit of byte 0.
        let mask = 0x80u8 >> (offset % 8);

        let now = Instant::now();
        let mut inner = self.shard_for(key).inner.write();
        inner.purge_if_expired(key, now);
        let data = inner
            .map
            .entry(key.to_vec())
            .or_insert_with(|| Entry::new(Value::Str(Vec::new())))
            .as_str_mut()?;
        if data.len() <= byte {
            data.resize(byte + 1, 0);
        }
        let previous = data[byte] & mask != 0;
        if bit {
            data[byte] |= mask;
        } else {
            data[byte] &= !mask;
        }
        Ok(previous)
    }

    fn bit_count(&self, key: &[u8]) -> CkvResult<i64> {
        let mut inner = self.shard_for(key).inner.write();
        match inner.live(key, Instant::now()) {
            Some(entry) => Ok(entry
                .as_str()?
                .iter()
                .map(|byte| byte.count_ones() as i64)
                .sum()),
            None => Ok(0),
        }
    }

    fn zadd(&self, key: &[u8], member: &[u8], score: f64) -> CkvResult<bool> {
        check_score(score)?;
        let mut inner = self.shard_for(key).inner.write();
        let set = inner.ranked_or_insert(key, Instant::now())?;
        Ok(set.insert(member, score))
    }

    fn zrem(&self, key: &[u8], members: &[&[u8]]) -> CkvResult<i64> {
        let mut inner = self.shard_for(key).inner.write();
        let Some(entry) = inner.live(key, Instant::now()) else {
            return Ok(0);
        };
        let set = entry.as_ranked_mut()?;
        let removed = members.iter().filter(|member| set.remove(member)).count();
        inner.drop_if_empty(key);
        Ok(removed as i64)
    }

    fn zincrby(&self, key: &[u8], member: &[u8], delta: f64) -> CkvResult<f64> {
        check_score(delta)?;
        let mut inner = self.shard_for(key).inner.write();
        let result = inner
            .ranked_or_insert(key, Instant::now())
            .and_then(|set| set.increment(member, delta));
        inner.drop_if_empty(key);
        result
    }

    fn zrange(&self, key: &[u8], start: i64, stop: i64, order: Order) -> CkvResult<Vec<Vec<u8>>> {
        let mut inner = self.shard_for(key).inner.write();
        match inner.live(key, Instant::now()) {
            Some(entry) => Ok(entry.as_ranked()?.range(start, stop, order)),
            None => Ok(Vec::new()),
        }
    }

    fn zcount(&self, key: &[u8], min: f64, max: f64) -> CkvResult<i64> {
        let mut inner = self.shard_for(key).inner.write();
        match inner.live(key, Instant::now()) {
            Some(entry) => Ok(entry.as_ranked()?.count(min, max) as i64),
            None => Ok(0),
        }
    }

    fn zrank(&self, key: &[u8], member: &[u8], order: Order) -> CkvResult<Option<u64>> {
        let mut inner = self.shard_for(key).inner.write();
        match inner.live(key, Instant::now()) {
            Some(entry) => Ok(entry.as_ranked()?.rank(member, order)),
            None => Ok(None),
        }
    }

    fn eval(&self, script: &Script, keys: &[&[u8]], args: &[&[u8]]) -> CkvResult<ScriptReply> {
        match script.builtin() {
            Some(BuiltinScript::CompareAndDelete) => self.compare_and_delete(keys, args),
            Some(BuiltinScript::CompareAndExpire) => self.compare_and_expire(keys, args),
            None => Err(CkvError::failed(
                "scripting is limited to the builtin compare-and-delete/expire scripts",
            )),
        }
    }

    fn ping(&self) -> CkvResult<()> {
        Ok(())
    }
}

/// Normalizes shard counts to a power of two for fast masking.
fn normalize_shard_count(count: usize) -> usize {
    count.max(1).next_power_of_two()
}
