//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Serialize};

/// Trait for records that can live in an entity store.
///
/// Implementors must provide a unique numeric id. Stores are keyed by it and
/// never hold two entries with the same id.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this record (e.g., project id, todo id)
  fn id(&self) -> u64;

  /// Entity type name used in sync events and log fields (e.g., "project", "todo")
  fn entity_type() -> &'static str;
}

/// A value held by a store's cache table.
///
/// Lists and single records share one table so that one size bound and one
/// TTL apply to everything a store memoizes.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue<T> {
  /// A full or derived list (e.g., "list", "today")
  List(Vec<T>),
  /// A single record (e.g., "detail_7")
  Detail(T),
}

impl<T> CachedValue<T> {
  pub fn into_list(self) -> Option<Vec<T>> {
    match self {
      CachedValue::List(items) => Some(items),
      CachedValue::Detail(_) => None,
    }
  }

  pub fn into_detail(self) -> Option<T> {
    match self {
      CachedValue::Detail(item) => Some(item),
      CachedValue::List(_) => None,
    }
  }
}

/// Indicates where data returned by a store came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from the cache table, still within its TTL
  Cache,
}
