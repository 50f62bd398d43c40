//! # Ranked Sets
//!
//! Leaderboard-style helpers over the store's ordered-set commands. Members
//! are UTF-8 strings; ranges use inclusive, 0-based rank indices where
//! negative values count from the end.

use std::sync::Arc;

use ckv_common::{CkvResult, Order, Store};

use crate::cache::into_text;
use crate::config::ErrorPolicy;

pub struct RankedSets<S> {
    store: Arc<S>,
    policy: ErrorPolicy,
}

impl<S: Store> RankedSets<S> {
    pub fn new(store: Arc<S>, policy: ErrorPolicy) -> Self {
        RankedSets { store, policy }
    }

    /// Upserts `member` with `score`. True when the member is new.
    pub fn zadd(&self, key: &str, member: &str, score: f64) -> CkvResult<bool> {
        let result = self.store.zadd(key.as_bytes(), member.as_bytes(), score);
        self.policy.settle("zadd", key, result)
    }

    /// Removes members; true only when exactly one was removed.
    pub fn zrem(&self, key: &str, members: &[&str]) -> CkvResult<bool> {
        let members: Vec<&[u8]> = members.iter().map(|member| member.as_bytes()).collect();
        let result = self
            .store
            .zrem(key.as_bytes(), &members)
            .map(|removed| removed == 1);
        self.policy.settle("zrem", key, result)
    }

    /// Adds `delta` to the member's score and returns the new score.
    pub fn zincrby(&self, key: &str, member: &str, delta: f64) -> CkvResult<Option<f64>> {
        let result = self
            .store
            .zincrby(key.as_bytes(), member.as_bytes(), delta)
            .map(Some);
        self.policy.settle("zincrby", key, result)
    }

    /// Members by ascending score within the rank window `[start, end]`.
    pub fn zrange(&self, key: &str, start: i64, end: i64) -> CkvResult<Vec<String>> {
        self.policy
            .settle("zrange", key, self.members(key, start, end, Order::Ascending))
    }

    /// Members by descending score within the rank window `[start, end]`.
    pub fn zrevrange(&self, key: &str, start: i64, end: i64) -> CkvResult<Vec<String>> {
        self.policy
            .settle("zrevrange", key, self.members(key, start, end, Order::Descending))
    }

    fn members(&self, key: &str, start: i64, end: i64, order: Order) -> CkvResult<Vec<String>> {
        self.store
            .zrange(key.as_bytes(), start, end, order)?
            .into_iter()
            .map(into_text)
            .collect()
    }

    /// Counts members with score in `[min, max]`.
    ///
    /// When either bound is missing this is the size of the whole set.
    pub fn zlexcount(&self, key: &str, min: Option<f64>, max: Option<f64>) -> CkvResult<i64> {
        let result = match (min, max) {
            (Some(min), Some(max)) => self.store.zcount(key.as_bytes(), min, max),
            _ => self
                .store
                .zrange(key.as_bytes(), 0, -1, Order::Descending)
                .map(|members| members.len() as i64),
        };
        self.policy.settle("zlexcount", key, result)
    }

    /// Ascending 0-based rank of `member`.
    pub fn zrank(&self, key: &str, member: &str) -> CkvResult<Option<u64>> {
        let result = self
            .store
            .zrank(key.as_bytes(), member.as_bytes(), Order::Ascending);
        self.policy.settle("zrank", key, result)
    }

    /// Descending 0-based rank of `member`.
    pub fn zrevrank(&self, key: &str, member: &str) -> CkvResult<Option<u64>> {
        let result = self
            .store
            .zrank(key.as_bytes(), member.as_bytes(), Order::Descending);
        self.policy.settle("zrevrank", key, result)
    }
}
