//! Generic entity store: an ordered collection of one entity type, its cache
//! table, and CRUD methods over an `Adapter`.
//!
//! Consistency model: local mutations are applied after the adapter call
//! resolves and are never rolled back. Concurrent calls on the same record
//! race at the network layer and the last response to resolve wins. Callers
//! that need to reconcile after a partial failure (e.g., a batch update)
//! refetch the list with `FetchPolicy::Refresh`.

mod adapter;
mod entity_store;
#[cfg(test)]
pub(crate) mod fake;

pub use adapter::Adapter;
pub use entity_store::{detail_key, EntityStore, FetchPolicy, LoadingGuard, LIST_KEY};
