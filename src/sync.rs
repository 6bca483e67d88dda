//! Process-wide sync state: connectivity, the bounded queue of recent
//! mutation events, and pending operations replayed when the network returns.
//!
//! The bus knows nothing about entity semantics. Reconciliation of queued
//! events is delegated to an optional handler installed by the composition
//! layer; the bus only tracks status and drops events once they are handled.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::event::SyncEvent;

/// A boxed, sendable future
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A replayable operation. `Fn` rather than `FnOnce` so a failed attempt can
/// be retried on the next pass.
type OperationFn = Arc<dyn Fn() -> BoxFuture<Result<()>> + Send + Sync>;

/// Reconciles a batch of queued events
type SyncHandlerFn = Arc<dyn Fn(Vec<SyncEvent>) -> BoxFuture<Result<()>> + Send + Sync>;

/// Sync status state machine: `Idle -> Syncing -> Idle | Error`.
/// `Error` is only left by a later successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
  Idle,
  Syncing,
  Error,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
  /// Maximum queued events; oldest are dropped first
  pub max_events: usize,
  /// Events older than this are dropped by the sweeper
  pub event_max_age: chrono::Duration,
  /// How often the sweeper runs
  pub sweep_interval: Duration,
  /// Delay applied to every sync pass before the handler runs
  pub sync_delay: Duration,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_events: 100,
      event_max_age: chrono::Duration::hours(24),
      sweep_interval: Duration::from_secs(60 * 60),
      sync_delay: Duration::from_millis(100),
    }
  }
}

struct PendingOperation {
  key: String,
  operation: OperationFn,
}

struct BusState {
  is_online: bool,
  status: SyncStatus,
  events: VecDeque<SyncEvent>,
  pending: Vec<PendingOperation>,
  next_seq: u64,
  last_activity: DateTime<Utc>,
}

impl BusState {
  fn can_sync(&self) -> bool {
    self.is_online && self.status != SyncStatus::Syncing
  }
}

/// Global sync state shared by every store through the app context.
pub struct SyncBus {
  state: Mutex<BusState>,
  handler: Mutex<Option<SyncHandlerFn>>,
  events_tx: broadcast::Sender<SyncEvent>,
  config: SyncConfig,
}

impl SyncBus {
  pub fn new(config: SyncConfig) -> Self {
    let (events_tx, _) = broadcast::channel(config.max_events.max(1));
    Self {
      state: Mutex::new(BusState {
        is_online: true,
        status: SyncStatus::Idle,
        events: VecDeque::new(),
        pending: Vec::new(),
        next_seq: 1,
        last_activity: Utc::now(),
      }),
      handler: Mutex::new(None),
      events_tx,
      config,
    }
  }

  fn state(&self) -> MutexGuard<'_, BusState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn config(&self) -> &SyncConfig {
    &self.config
  }

  pub fn is_online(&self) -> bool {
    self.state().is_online
  }

  pub fn status(&self) -> SyncStatus {
    self.state().status
  }

  /// Online and not already syncing
  pub fn can_sync(&self) -> bool {
    self.state().can_sync()
  }

  pub fn has_pending_operations(&self) -> bool {
    !self.state().pending.is_empty()
  }

  pub fn pending_keys(&self) -> Vec<String> {
    self.state().pending.iter().map(|op| op.key.clone()).collect()
  }

  /// Snapshot of the queued events, oldest first.
  pub fn events(&self) -> Vec<SyncEvent> {
    self.state().events.iter().cloned().collect()
  }

  pub fn event_count(&self) -> usize {
    self.state().events.len()
  }

  pub fn last_activity(&self) -> DateTime<Utc> {
    self.state().last_activity
  }

  /// Record user activity.
  pub fn touch(&self) {
    self.state().last_activity = Utc::now();
  }

  /// Receive every event as it is enqueued.
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events_tx.subscribe()
  }

  /// Install the reconciliation hook run for each batch of queued events.
  pub fn set_sync_handler<F, Fut>(&self, handler: F)
  where
    F: Fn(Vec<SyncEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    let handler: SyncHandlerFn = Arc::new(move |events| Box::pin(handler(events)));
    *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
  }

  /// Enqueue an event, truncating the queue to `max_events`, and start a
  /// sync pass in the background when possible.
  pub fn add_sync_event(self: &Arc<Self>, mut event: SyncEvent) {
    let should_sync = {
      let mut state = self.state();
      event.seq = state.next_seq;
      state.next_seq += 1;
      state.events.push_back(event.clone());
      while state.events.len() > self.config.max_events {
        state.events.pop_front();
      }
      state.can_sync()
    };

    debug!(entity = %event.entity, id = ?event.id, kind = ?event.kind, "sync event queued");
    // No receivers is fine
    let _ = self.events_tx.send(event);

    if should_sync {
      self.spawn(|bus| async move {
        bus.process_sync_events().await;
      });
    }
  }

  /// Hand queued events to the sync handler. No-op when offline, already
  /// syncing, or the queue is empty. Events enqueued during a pass are kept
  /// and picked up by another pass.
  pub async fn process_sync_events(&self) -> SyncStatus {
    loop {
      let batch: Vec<SyncEvent> = {
        let mut state = self.state();
        if !state.can_sync() || state.events.is_empty() {
          return state.status;
        }
        state.status = SyncStatus::Syncing;
        state.events.iter().cloned().collect()
      };

      let last_seq = batch.last().map(|e| e.seq).unwrap_or_default();
      let count = batch.len();
      let result = self.reconcile(batch).await;

      let mut state = self.state();
      match result {
        Ok(()) => {
          state.events.retain(|e| e.seq > last_seq);
          state.status = SyncStatus::Idle;
          debug!(count, "sync pass complete");
        }
        Err(e) => {
          error!(error = %e, "sync pass failed");
          state.status = SyncStatus::Error;
          return SyncStatus::Error;
        }
      }
    }
  }

  async fn reconcile(&self, events: Vec<SyncEvent>) -> Result<()> {
    if !self.config.sync_delay.is_zero() {
      tokio::time::sleep(self.config.sync_delay).await;
    }

    let handler = self
      .handler
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();

    match handler {
      Some(handler) => handler(events).await,
      None => Ok(()),
    }
  }

  /// Register an operation to replay once connectivity returns. A second
  /// registration under the same key replaces the first.
  pub fn add_pending_operation<F, Fut>(&self, key: impl Into<String>, operation: F)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    let key = key.into();
    let operation: OperationFn = Arc::new(move || Box::pin(operation()));

    let mut state = self.state();
    match state.pending.iter_mut().find(|op| op.key == key) {
      Some(existing) => existing.operation = operation,
      None => state.pending.push(PendingOperation { key, operation }),
    }
  }

  pub fn remove_pending_operation(&self, key: &str) -> bool {
    let mut state = self.state();
    let before = state.pending.len();
    state.pending.retain(|op| op.key != key);
    state.pending.len() != before
  }

  /// Run every pending operation in registration order. Successful ones are
  /// removed; failures are logged and retained for the next pass.
  pub async fn process_pending_operations(&self) -> SyncStatus {
    let snapshot: Vec<(String, OperationFn)> = {
      let mut state = self.state();
      if !state.can_sync() || state.pending.is_empty() {
        return state.status;
      }
      state.status = SyncStatus::Syncing;
      state
        .pending
        .iter()
        .map(|op| (op.key.clone(), Arc::clone(&op.operation)))
        .collect()
    };

    let mut failed = 0usize;
    for (key, operation) in snapshot {
      match operation().await {
        Ok(()) => {
          self
            .state()
            .pending
            .retain(|op| !(op.key == key && Arc::ptr_eq(&op.operation, &operation)));
          debug!(key = %key, "pending operation replayed");
        }
        Err(e) => {
          warn!(key = %key, error = %e, "pending operation failed, keeping it for retry");
          failed += 1;
        }
      }
    }

    let mut state = self.state();
    state.status = if failed > 0 {
      SyncStatus::Error
    } else {
      SyncStatus::Idle
    };
    state.status
  }

  /// Flip the connectivity flag. Coming back online replays pending
  /// operations and queued events; going offline fails nothing.
  pub fn set_online(self: &Arc<Self>, online: bool) {
    let was_online = {
      let mut state = self.state();
      std::mem::replace(&mut state.is_online, online)
    };

    if online && !was_online {
      info!("network back online, replaying pending operations");
      self.spawn(|bus| async move {
        bus.process_pending_operations().await;
        bus.process_sync_events().await;
      });
    } else if !online && was_online {
      info!("network offline");
    }
  }

  /// Drop queued events older than `event_max_age` relative to `now`.
  /// Returns how many were dropped.
  pub fn prune_expired_events(&self, now: DateTime<Utc>) -> usize {
    let max_age = self.config.event_max_age;
    let mut state = self.state();
    let before = state.events.len();
    state.events.retain(|e| now - e.timestamp < max_age);
    before - state.events.len()
  }

  /// Start the periodic expiry sweep. The task ends once the bus is dropped.
  pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
    let bus = Arc::downgrade(self);
    // interval() panics on a zero period
    let period = self.config.sweep_interval.max(Duration::from_secs(1));

    tokio::spawn(async move {
      let mut interval = tokio::time::interval(period);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        let Some(bus) = bus.upgrade() else {
          break;
        };
        let dropped = bus.prune_expired_events(Utc::now());
        if dropped > 0 {
          debug!(dropped, "expired sync events swept");
        }
      }
    })
  }

  /// Drop all events and pending operations and return to `Idle`.
  pub fn clear(&self) {
    let mut state = self.state();
    state.events.clear();
    state.pending.clear();
    state.status = SyncStatus::Idle;
  }

  /// Run a background task if a tokio runtime is available.
  fn spawn<F, Fut>(self: &Arc<Self>, task: F)
  where
    F: FnOnce(Arc<Self>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
  {
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn(task(Arc::clone(self)));
      }
      Err(_) => debug!("no runtime available, sync deferred"),
    }
  }
}
