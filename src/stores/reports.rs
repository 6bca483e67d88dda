use color_eyre::Result;
use std::ops::Deref;
use std::sync::Arc;

use crate::api::types::{Report, ReportDto, ReportType};
use crate::cache::CacheConfig;
use crate::context::{AppContext, Cleanup};
use crate::event::SyncEvent;
use crate::store::{Adapter, EntityStore};

pub struct ReportStore<A: Adapter<Entity = Report, Payload = ReportDto>> {
  store: EntityStore<A>,
  ctx: Arc<AppContext>,
}

impl<A: Adapter<Entity = Report, Payload = ReportDto>> ReportStore<A> {
  pub fn new(adapter: A, cache: CacheConfig, ctx: &Arc<AppContext>) -> Arc<Self> {
    let store = Arc::new(Self {
      store: EntityStore::new("reports", adapter, cache, ctx.notifier().clone()),
      ctx: ctx.clone(),
    });
    ctx.register(store.clone());
    store
  }

  fn filtered(&self, predicate: impl Fn(&Report) -> bool) -> Vec<Report> {
    self
      .store
      .with_items(|items| items.iter().filter(|r| predicate(r)).cloned().collect())
  }

  pub fn of_type(&self, report_type: ReportType) -> Vec<Report> {
    self.filtered(|r| r.report_type == report_type)
  }

  pub fn weekly(&self) -> Vec<Report> {
    self.of_type(ReportType::Weekly)
  }

  pub fn biweekly(&self) -> Vec<Report> {
    self.of_type(ReportType::Biweekly)
  }

  pub fn monthly(&self) -> Vec<Report> {
    self.of_type(ReportType::Monthly)
  }

  pub fn stage(&self) -> Vec<Report> {
    self.of_type(ReportType::Stage)
  }

  pub fn for_project(&self, project_id: u64) -> Vec<Report> {
    self.filtered(|r| r.project_id == Some(project_id))
  }

  /// Generate a report server-side and prepend it to the list.
  pub async fn generate(&self, dto: ReportDto) -> Result<Report> {
    let report = self.store.create(dto).await?;
    self.ctx.sync().add_sync_event(SyncEvent::created(&report));
    Ok(report)
  }

  pub async fn update(&self, id: u64, dto: ReportDto) -> Result<Report> {
    let report = self.store.update(id, dto).await?;
    self.ctx.sync().add_sync_event(SyncEvent::updated(&report));
    Ok(report)
  }

  pub async fn remove(&self, id: u64) -> Result<()> {
    self.store.remove(id).await?;
    self
      .ctx
      .sync()
      .add_sync_event(SyncEvent::deleted::<Report>(id));
    Ok(())
  }
}

impl<A: Adapter<Entity = Report, Payload = ReportDto>> Deref for ReportStore<A> {
  type Target = EntityStore<A>;

  fn deref(&self) -> &Self::Target {
    &self.store
  }
}

impl<A: Adapter<Entity = Report, Payload = ReportDto>> Cleanup for ReportStore<A> {
  fn name(&self) -> &str {
    self.store.name()
  }

  fn cleanup(&self) {
    self.store.reset();
  }
}
