use color_eyre::{eyre::Report, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::adapter::Adapter;
use crate::cache::{CacheConfig, CacheSource, CacheTable, CachedValue, Entity};
use crate::context::{Cleanup, Notifier};

/// Cache key of the full list
pub const LIST_KEY: &str = "list";

/// Cache key of a single record
pub fn detail_key(id: u64) -> String {
  format!("detail_{}", id)
}

/// How a fetch uses the cache table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPolicy {
  /// Serve a valid cached value if present, otherwise fetch and cache
  #[default]
  CacheFirst,
  /// Always fetch, then cache the result
  Refresh,
  /// Always fetch and leave the cache untouched
  NoCache,
}

impl FetchPolicy {
  pub fn reads_cache(self) -> bool {
    self == FetchPolicy::CacheFirst
  }

  pub fn writes_cache(self) -> bool {
    self != FetchPolicy::NoCache
  }
}

struct StoreState<T> {
  items: Vec<T>,
  /// Record of the last detail fetch
  current: Option<T>,
  in_flight: usize,
  /// Bumped by `reset`; responses begun under an older epoch are discarded
  epoch: u64,
  error: Option<String>,
  last_fetch: Option<Instant>,
  cache: CacheTable<CachedValue<T>>,
}

/// Generic container for one entity type.
///
/// The item list and cache table are owned by the store and only change
/// through its methods. State is behind a mutex that is never held across an
/// adapter call, so every local mutation is applied atomically once the call
/// has resolved.
pub struct EntityStore<A: Adapter> {
  name: &'static str,
  adapter: A,
  state: Mutex<StoreState<A::Entity>>,
  revision: watch::Sender<u64>,
  notifier: Arc<dyn Notifier>,
}

/// Keeps the store's loading flag raised until dropped, on success and
/// failure paths alike.
///
/// A guard remembers the epoch it was taken in. After a `reset` it no longer
/// counts toward the loading flag, and `is_current` tells its owner to drop
/// the response instead of applying it.
pub struct LoadingGuard<'a, A: Adapter> {
  store: &'a EntityStore<A>,
  epoch: u64,
}

impl<A: Adapter> LoadingGuard<'_, A> {
  /// False once the store has been reset since the guard was taken.
  pub fn is_current(&self) -> bool {
    self.store.lock().epoch == self.epoch
  }
}

impl<A: Adapter> Drop for LoadingGuard<'_, A> {
  fn drop(&mut self) {
    let epoch = self.epoch;
    self.store.mutate(|state| {
      if state.epoch == epoch {
        state.in_flight = state.in_flight.saturating_sub(1);
      }
    });
  }
}

impl<A: Adapter> EntityStore<A> {
  pub fn new(
    name: &'static str,
    adapter: A,
    cache: CacheConfig,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    let (revision, _) = watch::channel(0);
    Self {
      name,
      adapter,
      state: Mutex::new(StoreState {
        items: Vec::new(),
        current: None,
        in_flight: 0,
        epoch: 0,
        error: None,
        last_fetch: None,
        cache: CacheTable::new(cache),
      }),
      revision,
      notifier,
    }
  }

  fn lock(&self) -> MutexGuard<'_, StoreState<A::Entity>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Apply a state change and wake observers.
  fn mutate<R>(&self, f: impl FnOnce(&mut StoreState<A::Entity>) -> R) -> R {
    let result = f(&mut self.lock());
    self.mark_changed();
    result
  }

  /// Wake observers after a change to state kept outside the store (e.g.,
  /// a composed store's sublists).
  pub fn mark_changed(&self) {
    self.revision.send_modify(|rev| *rev += 1);
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn adapter(&self) -> &A {
    &self.adapter
  }

  pub fn notifier(&self) -> &Arc<dyn Notifier> {
    &self.notifier
  }

  // --- observable state ---

  /// Snapshot of the current items.
  pub fn items(&self) -> Vec<A::Entity> {
    self.lock().items.clone()
  }

  /// Borrow the current items without cloning them.
  pub fn with_items<R>(&self, f: impl FnOnce(&[A::Entity]) -> R) -> R {
    f(&self.lock().items)
  }

  pub fn count(&self) -> usize {
    self.lock().items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().items.is_empty()
  }

  pub fn has_data(&self) -> bool {
    !self.is_empty()
  }

  pub fn is_loading(&self) -> bool {
    self.lock().in_flight > 0
  }

  /// Message of the last failed operation, cleared when the next one starts.
  pub fn error(&self) -> Option<String> {
    self.lock().error.clone()
  }

  pub fn last_fetch(&self) -> Option<Instant> {
    self.lock().last_fetch
  }

  /// Record from the last detail fetch, kept in step with later updates and
  /// cleared when it is deleted.
  pub fn current(&self) -> Option<A::Entity> {
    self.lock().current.clone()
  }

  /// Watch channel whose value changes on every state mutation.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.revision.subscribe()
  }

  // --- cache access for composed stores ---

  pub fn cached_list(&self, key: &str) -> Option<Vec<A::Entity>> {
    self.lock().cache.get(key).and_then(CachedValue::into_list)
  }

  pub fn cached_detail(&self, id: u64) -> Option<A::Entity> {
    self
      .lock()
      .cache
      .get(&detail_key(id))
      .and_then(CachedValue::into_detail)
  }

  pub fn cache_list(&self, key: impl Into<String>, items: Vec<A::Entity>) {
    self.lock().cache.set(key, CachedValue::List(items));
  }

  pub fn is_cached(&self, key: &str) -> bool {
    self.lock().cache.get(key).is_some()
  }

  /// Delete cache entries that a mutation has made stale.
  pub fn invalidate(&self, keys: &[&str]) {
    let mut state = self.lock();
    for key in keys {
      state.cache.delete(key);
    }
  }

  pub fn clear_cache(&self) {
    self.lock().cache.clear();
  }

  // --- loading and error plumbing ---

  /// Raise the loading flag and clear the previous error.
  pub fn begin_loading(&self) -> LoadingGuard<'_, A> {
    let epoch = self.mutate(|state| {
      state.in_flight += 1;
      state.error = None;
      state.epoch
    });
    LoadingGuard { store: self, epoch }
  }

  /// Apply a resolved response unless the store was reset while it was in
  /// flight. Returns whether `f` ran.
  fn apply_current(
    &self,
    loading: &LoadingGuard<'_, A>,
    f: impl FnOnce(&mut StoreState<A::Entity>),
  ) -> bool {
    let applied = self.mutate(|state| {
      if state.epoch != loading.epoch {
        return false;
      }
      f(state);
      true
    });
    if !applied {
      debug!(store = self.name, "response from before reset discarded");
    }
    applied
  }

  /// Centralized failure handling: record the message for the UI, log it,
  /// notify the user, and hand the error back so the caller can return it.
  pub fn report_error(&self, err: Report, operation: &str) -> Report {
    let message = match err.to_string() {
      m if m.is_empty() => format!("{} failed", operation),
      m => m,
    };
    self.mutate(|state| state.error = Some(message.clone()));
    error!(store = self.name, operation, error = ?err, "store operation failed");
    self.notifier.error(&message);
    err
  }

  // --- fetches ---

  /// Fetch the full list. On a cache hit the cached list also repopulates
  /// the items so observers see the same data that was returned.
  pub async fn fetch_list(&self, policy: FetchPolicy) -> Result<Vec<A::Entity>> {
    self
      .fetch_list_sourced(policy)
      .await
      .map(|(items, _)| items)
  }

  /// Like `fetch_list`, also reporting where the data came from.
  pub async fn fetch_list_sourced(
    &self,
    policy: FetchPolicy,
  ) -> Result<(Vec<A::Entity>, CacheSource)> {
    if policy.reads_cache() {
      if let Some(items) = self.cached_list(LIST_KEY) {
        debug!(store = self.name, key = LIST_KEY, "cache hit");
        self.mutate(|state| state.items = items.clone());
        return Ok((items, CacheSource::Cache));
      }
    }

    let loading = self.begin_loading();
    match self.adapter.get_list().await {
      Ok(items) => {
        self.apply_current(&loading, |state| {
          state.items = items.clone();
          state.last_fetch = Some(Instant::now());
          if policy.writes_cache() {
            state.cache.set(LIST_KEY, CachedValue::List(items.clone()));
          }
        });
        debug!(store = self.name, count = items.len(), "list fetched");
        Ok((items, CacheSource::Network))
      }
      Err(err) => Err(self.report_error(err, "fetch list")),
    }
  }

  /// Fetch a single record and make it the current one. Does not touch the
  /// item list.
  pub async fn fetch_detail(&self, id: u64, policy: FetchPolicy) -> Result<A::Entity> {
    let key = detail_key(id);

    if policy.reads_cache() {
      if let Some(item) = self.cached_detail(id) {
        debug!(store = self.name, key = %key, "cache hit");
        self.mutate(|state| state.current = Some(item.clone()));
        return Ok(item);
      }
    }

    let loading = self.begin_loading();
    match self.adapter.get_detail(id).await {
      Ok(item) => {
        self.apply_current(&loading, |state| {
          state.current = Some(item.clone());
          if policy.writes_cache() {
            state.cache.set(key, CachedValue::Detail(item.clone()));
          }
        });
        Ok(item)
      }
      Err(err) => Err(self.report_error(err, "fetch detail")),
    }
  }

  // --- mutations ---

  /// Create a record and prepend it to the items.
  pub async fn create(&self, payload: A::Payload) -> Result<A::Entity> {
    let loading = self.begin_loading();
    match self.adapter.create(payload).await {
      Ok(item) => {
        let id = item.id();
        self.apply_current(&loading, |state| {
          state.items.retain(|existing| existing.id() != id);
          state.items.insert(0, item.clone());
          state.cache.delete(LIST_KEY);
        });
        info!(store = self.name, id, "created");
        self.notifier.success("Created successfully");
        Ok(item)
      }
      Err(err) => Err(self.report_error(err, "create")),
    }
  }

  /// Update a record and replace it in place. A record missing from the
  /// local items is not an error; only the adapter decides not-found.
  pub async fn update(&self, id: u64, payload: A::Payload) -> Result<A::Entity> {
    let loading = self.begin_loading();
    match self.adapter.update(id, payload).await {
      Ok(item) => {
        self.apply_current(&loading, |state| {
          if let Some(existing) = state.items.iter_mut().find(|existing| existing.id() == id) {
            *existing = item.clone();
          }
          if state.current.as_ref().is_some_and(|current| current.id() == id) {
            state.current = Some(item.clone());
          }
          state.cache.delete(LIST_KEY);
          state.cache.delete(&detail_key(id));
        });
        info!(store = self.name, id, "updated");
        self.notifier.success("Updated successfully");
        Ok(item)
      }
      Err(err) => Err(self.report_error(err, "update")),
    }
  }

  pub async fn remove(&self, id: u64) -> Result<()> {
    let loading = self.begin_loading();
    match self.adapter.delete(id).await {
      Ok(()) => {
        self.apply_current(&loading, |state| {
          state.items.retain(|existing| existing.id() != id);
          if state.current.as_ref().is_some_and(|current| current.id() == id) {
            state.current = None;
          }
          state.cache.delete(LIST_KEY);
          state.cache.delete(&detail_key(id));
        });
        info!(store = self.name, id, "deleted");
        self.notifier.success("Deleted successfully");
        Ok(())
      }
      Err(err) => Err(self.report_error(err, "delete")),
    }
  }

  // --- local operations ---

  /// Local lookup only; no network and no cache.
  pub fn find_by_id(&self, id: u64) -> Option<A::Entity> {
    self
      .lock()
      .items
      .iter()
      .find(|item| item.id() == id)
      .cloned()
  }

  /// Modify a local record in place, in the items and as the current
  /// record. Returns false when it is in neither.
  pub fn update_local(&self, id: u64, mut f: impl FnMut(&mut A::Entity)) -> bool {
    self.mutate(|state| {
      let mut found = false;
      if let Some(item) = state.items.iter_mut().find(|item| item.id() == id) {
        f(item);
        found = true;
      }
      if let Some(current) = state.current.as_mut().filter(|current| current.id() == id) {
        f(current);
        found = true;
      }
      found
    })
  }

  /// Drop items, flags, and cache. Used on logout and session expiry.
  /// Requests still in flight resolve into the new epoch and are discarded.
  pub fn reset(&self) {
    self.mutate(|state| {
      state.items.clear();
      state.current = None;
      state.epoch += 1;
      state.in_flight = 0;
      state.error = None;
      state.last_fetch = None;
      state.cache.clear();
    });
  }
}

impl<A: Adapter> Cleanup for EntityStore<A> {
  fn name(&self) -> &str {
    self.name
  }

  fn cleanup(&self) {
    self.reset();
  }
}
