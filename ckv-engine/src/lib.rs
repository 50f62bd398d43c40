//! # ckv Engine
//!
//! In-process implementation of the `Store` contract. It backs the cache
//! facade in tests and embedded deployments where no remote server is
//! available.

mod memory;
mod zset;

pub use memory::{ExpirationHandle, MemoryStore};
