//! Bounded, TTL-expiring key/value table used by entity stores.
//!
//! Expired entries are purged lazily on the next `get`; there is no background
//! sweep. When the table is full, the oldest *inserted* key is evicted. Access
//! recency is not tracked, so this is FIFO eviction rather than LRU, and
//! overwriting a key keeps its original position in the eviction order.

use std::collections::{HashMap, VecDeque};
use tokio::time::{Duration, Instant};

/// Cache policy for a single store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
  /// How long an entry stays valid after it was written
  pub ttl: Duration,
  /// Maximum number of entries; zero disables caching
  pub max_size: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(5 * 60),
      max_size: 100,
    }
  }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
  value: V,
  timestamp: Instant,
}

#[derive(Debug)]
pub struct CacheTable<V> {
  entries: HashMap<String, CacheEntry<V>>,
  /// Keys in insertion order, oldest first
  order: VecDeque<String>,
  config: CacheConfig,
}

impl<V: Clone> CacheTable<V> {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      entries: HashMap::new(),
      order: VecDeque::new(),
      config,
    }
  }

  pub fn config(&self) -> CacheConfig {
    self.config
  }

  /// Look up a key. Purges every expired entry first.
  pub fn get(&mut self, key: &str) -> Option<V> {
    self.purge_expired();
    self.entries.get(key).map(|entry| entry.value.clone())
  }

  /// Insert or overwrite a key, evicting the oldest-inserted entry when a new
  /// key would push the table past `max_size`.
  pub fn set(&mut self, key: impl Into<String>, value: V) {
    if self.config.max_size == 0 {
      return;
    }

    let key = key.into();
    let now = Instant::now();

    if let Some(entry) = self.entries.get_mut(&key) {
      entry.value = value;
      entry.timestamp = now;
      return;
    }

    while self.entries.len() >= self.config.max_size {
      match self.order.pop_front() {
        Some(oldest) => {
          self.entries.remove(&oldest);
        }
        None => break,
      }
    }

    self.order.push_back(key.clone());
    self.entries.insert(
      key,
      CacheEntry {
        value,
        timestamp: now,
      },
    );
  }

  /// Remove a key. Returns whether it was present.
  pub fn delete(&mut self, key: &str) -> bool {
    if self.entries.remove(key).is_some() {
      self.order.retain(|k| k != key);
      true
    } else {
      false
    }
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.order.clear();
  }

  /// Number of stored entries, including expired ones not yet purged.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn purge_expired(&mut self) {
    let ttl = self.config.ttl;
    let now = Instant::now();
    let before = self.entries.len();

    self
      .entries
      .retain(|_, entry| now.duration_since(entry.timestamp) < ttl);

    if self.entries.len() != before {
      let entries = &self.entries;
      self.order.retain(|k| entries.contains_key(k));
    }
  }
}
