//! In-memory adapter for store tests.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use super::Adapter;
use crate::cache::Entity;

/// Server stand-in that keeps records in memory, counts calls, and can be
/// switched into a failing mode.
pub struct FakeAdapter<T, P> {
  records: Mutex<Vec<T>>,
  next_id: AtomicU64,
  build: fn(u64, &P) -> T,
  failing: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl<T: Entity, P> FakeAdapter<T, P> {
  pub fn new(records: Vec<T>, build: fn(u64, &P) -> T) -> Self {
    let next_id = records.iter().map(Entity::id).max().unwrap_or(0) + 1;
    Self {
      records: Mutex::new(records),
      next_id: AtomicU64::new(next_id),
      build,
      failing: AtomicBool::new(false),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Number of calls whose name starts with `name`.
  pub fn calls(&self, name: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|call| call.starts_with(name))
      .count()
  }

  /// Record a call and fail it when in failing mode.
  pub fn record(&self, call: impl Into<String>) -> Result<()> {
    self.calls.lock().unwrap().push(call.into());
    if self.failing.load(Ordering::SeqCst) {
      Err(eyre!("Network connection error"))
    } else {
      Ok(())
    }
  }

  pub fn records(&self) -> Vec<T> {
    self.records.lock().unwrap().clone()
  }

  /// Replace a stored record through a closure, as a server-side change would.
  pub fn modify(&self, id: u64, f: impl FnOnce(&mut T)) -> Result<()> {
    let mut records = self.records.lock().unwrap();
    let record = records
      .iter_mut()
      .find(|r| r.id() == id)
      .ok_or_else(|| eyre!("Resource not found"))?;
    f(record);
    Ok(())
  }
}

impl<T, P> Adapter for FakeAdapter<T, P>
where
  T: Entity,
  P: Clone + Send + Sync + 'static,
{
  type Entity = T;
  type Payload = P;

  async fn get_list(&self) -> Result<Vec<T>> {
    self.record("get_list")?;
    Ok(self.records())
  }

  async fn get_detail(&self, id: u64) -> Result<T> {
    self.record(format!("get_detail:{}", id))?;
    self
      .records()
      .into_iter()
      .find(|r| r.id() == id)
      .ok_or_else(|| eyre!("Resource not found"))
  }

  async fn create(&self, payload: P) -> Result<T> {
    self.record("create")?;
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let record = (self.build)(id, &payload);
    self.records.lock().unwrap().push(record.clone());
    Ok(record)
  }

  async fn update(&self, id: u64, payload: P) -> Result<T> {
    self.record(format!("update:{}", id))?;
    let updated = (self.build)(id, &payload);
    self.modify(id, |record| *record = updated.clone())?;
    Ok(updated)
  }

  async fn delete(&self, id: u64) -> Result<()> {
    self.record(format!("delete:{}", id))?;
    let mut records = self.records.lock().unwrap();
    let before = records.len();
    records.retain(|r| r.id() != id);
    if records.len() == before {
      return Err(eyre!("Resource not found"));
    }
    Ok(())
  }
}
