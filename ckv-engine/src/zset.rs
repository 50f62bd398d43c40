//! # Ordered Set
//!
//! Score-ordered collection of unique members backing the ranked-set
//! commands.
//!
//! ```text
//! SortedSet
//!   ├── scores:  HashMap<member, f64>          (O(1) member lookup)
//!   └── ordered: BTreeSet<(Score, member)>     (ordered by score, then member bytes)
//! ```
//!
//! Both indexes are updated together; a member is present in `scores` iff its
//! `(score, member)` pair is present in `ordered`.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use ckv_common::{CkvError, CkvResult, Order};
use hashbrown::HashMap;

/// Total-order wrapper so `f64` scores can key a `BTreeSet`.
///
/// NaN never enters the set (rejected at the boundary) and `-0.0` is folded
/// into `0.0` so equal scores compare equal.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl Score {
    fn new(value: f64) -> Self {
        Score(if value == 0.0 { 0.0 } else { value })
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
pub(crate) struct SortedSet {
    scores: HashMap<Vec<u8>, f64>,
    ordered: BTreeSet<(Score, Vec<u8>)>,
}

pub(crate) fn check_score(score: f64) -> CkvResult<()> {
    if score.is_nan() {
        return Err(CkvError::failed("value is not a valid float"));
    }
    Ok(())
}

impl SortedSet {
    pub(crate) fn len(&self) -> usize {
        self.scores.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Inserts or rescores a member. Returns true when the member is new.
    pub(crate) fn insert(&mut self, member: &[u8], score: f64) -> bool {
        let score = Score::new(score);
        match self.scores.insert(member.to_vec(), score.0) {
            Some(old) => {
                self.ordered.remove(&(Score::new(old), member.to_vec()));
                self.ordered.insert((score, member.to_vec()));
                false
            }
            None => {
                self.ordered.insert((score, member.to_vec()));
                true
            }
        }
    }

    pub(crate) fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.ordered.remove(&(Score::new(old), member.to_vec()));
                true
            }
            None => false,
        }
    }

    /// Adds `delta` to a member's score (absent members start at 0).
    ///
    /// Leaves the set untouched when the result would be NaN.
    pub(crate) fn increment(&mut self, member: &[u8], delta: f64) -> CkvResult<f64> {
        let current = self.scores.get(member).copied().unwrap_or(0.0);
        let next = current + delta;
        if next.is_nan() {
            return Err(CkvError::failed("resulting score is not a number (NaN)"));
        }
        self.insert(member, next);
        Ok(Score::new(next).0)
    }

    /// Members with rank in `[start, stop]` after resolving negative indices.
    pub(crate) fn range(&self, start: i64, stop: i64, order: Order) -> Vec<Vec<u8>> {
        let Some((start, stop)) = resolve_range(start, stop, self.len()) else {
            return Vec::new();
        };
        let take = stop - start + 1;
        let members = self.ordered.iter().map(|(_, member)| member.clone());
        match order {
            Order::Ascending => members.skip(start).take(take).collect(),
            Order::Descending => members.rev().skip(start).take(take).collect(),
        }
    }

    /// Counts members whose score lies in `[min, max]`.
    pub(crate) fn count(&self, min: f64, max: f64) -> usize {
        if min.is_nan() || max.is_nan() || min > max {
            return 0;
        }
        self.ordered
            .range((Score::new(min), Vec::new())..)
            .take_while(|(score, _)| score.0 <= max)
            .count()
    }

    pub(crate) fn rank(&self, member: &[u8], order: Order) -> Option<u64> {
        let score = *self.scores.get(member)?;
        let ascending = self
            .ordered
            .range(..(Score::new(score), member.to_vec()))
            .count();
        let rank = match order {
            Order::Ascending => ascending,
            Order::Descending => self.len() - 1 - ascending,
        };
        Some(rank as u64)
    }
}

/// Resolves Redis-style rank bounds against a set of `len` members.
///
/// Returns `None` when the range is empty.
fn resolve_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}
