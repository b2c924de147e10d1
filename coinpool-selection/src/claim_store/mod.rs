//! Serialized, optimistic write-back of per-pool claim state.

pub mod registry;
pub mod store;

pub use registry::ClaimStateStoreCache;
pub use store::{ClaimStateStore, PendingRequest, StateTransform, TransformFuture};
