//! The CRUD seam every entity store is built on.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;

use crate::cache::Entity;

/// Narrow CRUD interface to one entity's API.
///
/// Implementations return already-unwrapped payloads and fail with a
/// human-readable error on any transport or business failure. Stores treat
/// every error the same way.
pub trait Adapter: Send + Sync + 'static {
  type Entity: Entity;
  /// Create/update payload (the entity's DTO)
  type Payload: Clone + Send + Sync + 'static;

  fn get_list(&self) -> impl Future<Output = Result<Vec<Self::Entity>>> + Send;

  fn get_detail(&self, id: u64) -> impl Future<Output = Result<Self::Entity>> + Send;

  fn create(&self, payload: Self::Payload) -> impl Future<Output = Result<Self::Entity>> + Send;

  fn update(
    &self,
    id: u64,
    payload: Self::Payload,
  ) -> impl Future<Output = Result<Self::Entity>> + Send;

  fn delete(&self, id: u64) -> impl Future<Output = Result<()>> + Send;
}

impl<A: Adapter> Adapter for Arc<A> {
  type Entity = A::Entity;
  type Payload = A::Payload;

  fn get_list(&self) -> impl Future<Output = Result<Vec<Self::Entity>>> + Send {
    (**self).get_list()
  }

  fn get_detail(&self, id: u64) -> impl Future<Output = Result<Self::Entity>> + Send {
    (**self).get_detail(id)
  }

  fn create(&self, payload: Self::Payload) -> impl Future<Output = Result<Self::Entity>> + Send {
    (**self).create(payload)
  }

  fn update(
    &self,
    id: u64,
    payload: Self::Payload,
  ) -> impl Future<Output = Result<Self::Entity>> + Send {
    (**self).update(id, payload)
  }

  fn delete(&self, id: u64) -> impl Future<Output = Result<()>> + Send {
    (**self).delete(id)
  }
}
