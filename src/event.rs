//! Mutation records broadcast through the sync bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Entity;

/// What kind of mutation a sync event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncEventKind {
  Create,
  Update,
  Delete,
}

/// A record of one mutation, emitted by the enhanced store operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
  pub kind: SyncEventKind,
  /// Entity type name (e.g., "todo")
  pub entity: String,
  pub id: Option<u64>,
  /// Serialized record after the mutation, if there is one
  pub data: Option<serde_json::Value>,
  /// When the mutation happened; drives the expiry sweep
  pub timestamp: DateTime<Utc>,
  /// Position in the bus queue, assigned on enqueue
  #[serde(default)]
  pub seq: u64,
}

impl SyncEvent {
  pub fn new(kind: SyncEventKind, entity: impl Into<String>, id: Option<u64>) -> Self {
    Self {
      kind,
      entity: entity.into(),
      id,
      data: None,
      timestamp: Utc::now(),
      seq: 0,
    }
  }

  pub fn created<T: Entity>(record: &T) -> Self {
    Self::with_record(SyncEventKind::Create, record)
  }

  pub fn updated<T: Entity>(record: &T) -> Self {
    Self::with_record(SyncEventKind::Update, record)
  }

  pub fn deleted<T: Entity>(id: u64) -> Self {
    Self::new(SyncEventKind::Delete, T::entity_type(), Some(id))
  }

  /// Override the timestamp (used when replaying or sweeping old events).
  pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = timestamp;
    self
  }

  fn with_record<T: Entity>(kind: SyncEventKind, record: &T) -> Self {
    Self {
      data: serde_json::to_value(record).ok(),
      ..Self::new(kind, T::entity_type(), Some(record.id()))
    }
  }
}
