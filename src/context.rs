//! Explicitly constructed application context handed to every store.
//!
//! Holds what the stores share: the sync bus, the registry used to clear
//! every store at once, the user-facing notifier, the auth token read by
//! the transport, and the one-shot session-expiry guard. Stores receive an
//! `Arc<AppContext>` at construction, so the auth flow can flush the other
//! stores without knowing their types.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tracing::{debug, info, warn};

use crate::sync::{SyncBus, SyncConfig};

/// Surfaces user-visible messages (toasts, status lines, terminal output).
pub trait Notifier: Send + Sync {
  fn success(&self, message: &str);
  fn error(&self, message: &str);
}

/// Notifier that only writes to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn success(&self, message: &str) {
    info!(message, "notify");
  }

  fn error(&self, message: &str) {
    warn!(message, "notify");
  }
}

/// A store that can drop everything it holds for the current session.
pub trait Cleanup: Send + Sync {
  fn name(&self) -> &str;
  fn cleanup(&self);
}

/// Weak references to every store that must be cleared on login, logout,
/// or session expiry.
#[derive(Default)]
pub struct StoreRegistry {
  stores: Mutex<Vec<Weak<dyn Cleanup>>>,
}

impl StoreRegistry {
  fn stores(&self) -> MutexGuard<'_, Vec<Weak<dyn Cleanup>>> {
    self.stores.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn register(&self, store: Arc<dyn Cleanup>) {
    self.stores().push(Arc::downgrade(&store));
  }

  /// Run `cleanup` on every live store. Returns how many were cleared.
  pub fn clear_all(&self) -> usize {
    let live: Vec<Arc<dyn Cleanup>> = {
      let mut stores = self.stores();
      stores.retain(|weak| weak.strong_count() > 0);
      stores.iter().filter_map(Weak::upgrade).collect()
    };

    for store in &live {
      debug!(store = store.name(), "clearing store");
      store.cleanup();
    }
    live.len()
  }

  pub fn len(&self) -> usize {
    self
      .stores()
      .iter()
      .filter(|weak| weak.strong_count() > 0)
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// One-shot flag guarding the session-expiry flow against duplicate triggers
/// from concurrent 401 responses. Reset once the user is logged in again.
#[derive(Debug, Default)]
pub struct SessionGuard {
  expired: AtomicBool,
}

impl SessionGuard {
  /// Returns true only for the first caller since the last reset.
  pub fn try_begin(&self) -> bool {
    self
      .expired
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  pub fn reset(&self) {
    self.expired.store(false, Ordering::Release);
  }

  pub fn is_expired(&self) -> bool {
    self.expired.load(Ordering::Acquire)
  }
}

type ExpiryHook = Box<dyn Fn() + Send + Sync>;

pub struct AppContext {
  sync: Arc<SyncBus>,
  registry: StoreRegistry,
  notifier: Arc<dyn Notifier>,
  token: RwLock<Option<String>>,
  session: SessionGuard,
  expiry_hooks: Mutex<Vec<ExpiryHook>>,
}

impl AppContext {
  pub fn new(sync_config: SyncConfig, notifier: Arc<dyn Notifier>) -> Arc<Self> {
    Arc::new(Self {
      sync: Arc::new(SyncBus::new(sync_config)),
      registry: StoreRegistry::default(),
      notifier,
      token: RwLock::new(None),
      session: SessionGuard::default(),
      expiry_hooks: Mutex::new(Vec::new()),
    })
  }

  pub fn sync(&self) -> &Arc<SyncBus> {
    &self.sync
  }

  pub fn notifier(&self) -> &Arc<dyn Notifier> {
    &self.notifier
  }

  pub fn registry(&self) -> &StoreRegistry {
    &self.registry
  }

  pub fn register(&self, store: Arc<dyn Cleanup>) {
    self.registry.register(store);
  }

  /// Clear every registered store so cached data from one session never
  /// leaks into the next.
  pub fn clear_all_stores(&self) -> usize {
    let cleared = self.registry.clear_all();
    info!(cleared, "all stores cleared");
    cleared
  }

  pub fn token(&self) -> Option<String> {
    self
      .token
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn set_token(&self, token: Option<String>) {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
  }

  pub fn session(&self) -> &SessionGuard {
    &self.session
  }

  /// Register a callback run once per session expiry (e.g., dropping the
  /// persisted login).
  pub fn on_session_expired(&self, hook: impl Fn() + Send + Sync + 'static) {
    self
      .expiry_hooks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(Box::new(hook));
  }

  /// Handle an expired session: drop the token, clear every store, run the
  /// expiry hooks and notify once. Later calls are ignored until the guard
  /// is reset by a successful login. Returns whether this call ran the flow.
  pub fn handle_session_expired(&self) -> bool {
    if !self.session.try_begin() {
      debug!("session expiry already handled");
      return false;
    }

    warn!("session expired");
    self.set_token(None);
    self.clear_all_stores();
    for hook in self
      .expiry_hooks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
    {
      hook();
    }
    self
      .notifier
      .error("Session expired, please log in again");
    true
  }
}


#[cfg(test)]
mod tests {
  use super::testing::test_context;
  use super::*;
  use std::sync::atomic::AtomicU32;

  struct CountingStore {
    cleared: AtomicU32,
  }

  impl Cleanup for CountingStore {
    fn name(&self) -> &str {
      "counting"
    }

    fn cleanup(&self) {
      self.cleared.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn counting_store() -> Arc<CountingStore> {
    Arc::new(CountingStore {
      cleared: AtomicU32::new(0),
    })
  }

  #[test]
  fn test_clear_all_reaches_every_live_store() {
    let (ctx, _) = test_context();
    let a = counting_store();
    let b = counting_store();
    ctx.register(a.clone());
    ctx.register(b.clone());

    assert_eq!(ctx.clear_all_stores(), 2);
    assert_eq!(a.cleared.load(Ordering::SeqCst), 1);
    assert_eq!(b.cleared.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_dropped_stores_are_skipped() {
    let (ctx, _) = test_context();
    let kept = counting_store();
    ctx.register(kept.clone());
    ctx.register(counting_store());

    assert_eq!(ctx.registry().len(), 1);
    assert_eq!(ctx.clear_all_stores(), 1);
  }

  #[test]
  fn test_session_expiry_runs_once_until_reset() {
    let (ctx, notifier) = test_context();
    let store = counting_store();
    ctx.register(store.clone());
    ctx.set_token(Some("abc".to_string()));

    let hook_runs = Arc::new(AtomicU32::new(0));
    let counter = hook_runs.clone();
    ctx.on_session_expired(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(ctx.handle_session_expired());
    assert!(!ctx.handle_session_expired());
    assert_eq!(ctx.token(), None);
    assert_eq!(store.cleared.load(Ordering::SeqCst), 1);
    assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
    assert_eq!(notifier.errors().len(), 1);

    ctx.session().reset();
    assert!(ctx.handle_session_expired());
    assert_eq!(hook_runs.load(Ordering::SeqCst), 2);
  }
}
