// ckv-common - Shared contract for the ckv cache/lock client
//
// This crate defines the store trait, error taxonomy, and script bodies
// shared by the transport, the in-memory engine, and the cache facade.

pub mod error;
pub mod script;
pub mod store;

// Re-export for convenience
pub use error::*;
pub use script::*;
pub use store::*;
