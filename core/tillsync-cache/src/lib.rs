//! Tiered local cache for TillSync.
//!
//! Each collection carries a [`CollectionPolicy`]: how much of it is kept
//! locally and how long local data may be served before it is refreshed from
//! the remote. Writes go to the local store first and are buffered in the
//! sync queue; refreshes never discard a local change that has not been
//! delivered yet.

mod cache;
mod error;
mod policy;

pub use cache::TieredCache;
pub use error::{CacheError, CacheResult};
pub use policy::{CachePolicies, CollectionPolicy, RankBy, RetentionPolicy};
