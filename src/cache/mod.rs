//! Client-side caching primitives shared by every entity store.
//!
//! - `Entity`: records with a unique numeric id
//! - `CacheTable`: bounded, TTL-expiring memoization table (FIFO eviction)
//! - `CachedValue`: what a store keeps in its table (lists or single records)

mod table;
mod traits;

pub use table::{CacheConfig, CacheTable};
pub use traits::{CacheSource, CachedValue, Entity};
