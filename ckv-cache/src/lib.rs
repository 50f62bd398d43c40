//! # ckv Cache
//!
//! Purpose: Application-facing cache, distributed lock, and ranked-set
//! helpers over any `Store` backend.
//!
//! ## Design Principles
//! 1. **Explicit Construction**: Callers build a `Cache` around an `Arc<S>`
//!    and pass it where needed.
//! 2. **Configurable Failure**: `ErrorPolicy` decides between logged sentinels
//!    and propagated errors.

pub mod cache;
pub mod config;
pub mod lock;
pub mod ranked;

pub use cache::Cache;
pub use config::{CacheConfig, ErrorPolicy, LockConfig};
pub use lock::{LockGuard, LockManager, LockMode};
pub use ranked::RankedSets;
