use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use tracing::info;

use crate::api::types::{Project, ProjectDto, ProjectStatus};
use crate::cache::CacheConfig;
use crate::context::{AppContext, Cleanup};
use crate::event::{SyncEvent, SyncEventKind};
use crate::store::{detail_key, Adapter, EntityStore, LIST_KEY};

/// Project endpoints beyond plain CRUD.
pub trait ProjectEndpoints: Adapter<Entity = Project, Payload = ProjectDto> {
  fn update_progress(&self, id: u64, progress: u8) -> impl Future<Output = Result<()>> + Send;
}

impl<E: ProjectEndpoints> ProjectEndpoints for Arc<E> {
  fn update_progress(&self, id: u64, progress: u8) -> impl Future<Output = Result<()>> + Send {
    (**self).update_progress(id, progress)
  }
}

/// Project counts per status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectStats {
  pub total: usize,
  pub pending: usize,
  pub in_progress: usize,
  pub completed: usize,
  pub cancelled: usize,
  /// Mean progress over all projects, 0 when there are none
  pub average_progress: f64,
}

pub struct ProjectStore<A: ProjectEndpoints> {
  store: EntityStore<A>,
  ctx: Arc<AppContext>,
}

impl<A: ProjectEndpoints> ProjectStore<A> {
  pub fn new(adapter: A, cache: CacheConfig, ctx: &Arc<AppContext>) -> Arc<Self> {
    let store = Arc::new(Self {
      store: EntityStore::new("projects", adapter, cache, ctx.notifier().clone()),
      ctx: ctx.clone(),
    });
    ctx.register(store.clone());
    store
  }

  // --- derived views ---

  fn with_status(&self, status: ProjectStatus) -> Vec<Project> {
    self.store.with_items(|items| {
      items
        .iter()
        .filter(|p| p.status == status)
        .cloned()
        .collect()
    })
  }

  pub fn pending(&self) -> Vec<Project> {
    self.with_status(ProjectStatus::Pending)
  }

  /// Projects in progress
  pub fn active(&self) -> Vec<Project> {
    self.with_status(ProjectStatus::Progress)
  }

  pub fn completed(&self) -> Vec<Project> {
    self.with_status(ProjectStatus::Completed)
  }

  pub fn cancelled(&self) -> Vec<Project> {
    self.with_status(ProjectStatus::Cancelled)
  }

  pub fn stats(&self) -> ProjectStats {
    self.store.with_items(|items| {
      let mut stats = ProjectStats {
        total: items.len(),
        ..ProjectStats::default()
      };
      for project in items {
        match project.status {
          ProjectStatus::Pending => stats.pending += 1,
          ProjectStatus::Progress => stats.in_progress += 1,
          ProjectStatus::Completed => stats.completed += 1,
          ProjectStatus::Cancelled => stats.cancelled += 1,
        }
      }
      if !items.is_empty() {
        let sum: u32 = items.iter().map(|p| u32::from(p.progress)).sum();
        stats.average_progress = f64::from(sum) / items.len() as f64;
      }
      stats
    })
  }

  // --- mutations that also emit sync events ---

  pub async fn create(&self, dto: ProjectDto) -> Result<Project> {
    let project = self.store.create(dto).await?;
    self.ctx.sync().add_sync_event(SyncEvent::created(&project));
    Ok(project)
  }

  pub async fn update(&self, id: u64, dto: ProjectDto) -> Result<Project> {
    let project = self.store.update(id, dto).await?;
    self.ctx.sync().add_sync_event(SyncEvent::updated(&project));
    Ok(project)
  }

  pub async fn remove(&self, id: u64) -> Result<()> {
    self.store.remove(id).await?;
    self
      .ctx
      .sync()
      .add_sync_event(SyncEvent::deleted::<Project>(id));
    Ok(())
  }

  /// Set a project's progress percentage (0 to 100).
  pub async fn update_progress(&self, id: u64, progress: u8) -> Result<()> {
    if progress > 100 {
      return Err(self.store.report_error(
        eyre!("Progress must be between 0 and 100"),
        "update progress",
      ));
    }

    let _loading = self.store.begin_loading();
    if let Err(err) = self.store.adapter().update_progress(id, progress).await {
      return Err(self.store.report_error(err, "update progress"));
    }

    self.store.update_local(id, |p| p.progress = progress);
    self.store.invalidate(&[LIST_KEY, detail_key(id).as_str()]);
    info!(store = self.store.name(), id, progress, "progress updated");

    let event = match self.store.find_by_id(id) {
      Some(project) => SyncEvent::updated(&project),
      None => SyncEvent::new(SyncEventKind::Update, "project", Some(id)),
    };
    self.ctx.sync().add_sync_event(event);
    Ok(())
  }
}

impl<A: ProjectEndpoints> Deref for ProjectStore<A> {
  type Target = EntityStore<A>;

  fn deref(&self) -> &Self::Target {
    &self.store
  }
}

impl<A: ProjectEndpoints> Cleanup for ProjectStore<A> {
  fn name(&self) -> &str {
    self.store.name()
  }

  fn cleanup(&self) {
    self.store.reset();
  }
}
