use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{ApiClient, ProjectApi, ReportApi, TodoApi, UserApi};
use crate::config::Config;
use crate::context::{AppContext, Notifier};
use crate::session::SessionStore;
use crate::stores::{ProjectStore, ReportStore, TodoStore, UserStore};
use crate::sync::SyncConfig;

/// Every store wired to the HTTP API through one shared context.
pub struct App {
  config: Config,
  ctx: Arc<AppContext>,
  pub projects: Arc<ProjectStore<ProjectApi>>,
  pub todos: Arc<TodoStore<TodoApi>>,
  pub reports: Arc<ReportStore<ReportApi>>,
  pub users: Arc<UserStore<UserApi>>,
  sweeper: JoinHandle<()>,
}

impl App {
  /// Build the stores and restore any persisted login. Must run inside a
  /// tokio runtime, which hosts the sync sweeper.
  pub fn new(config: Config, notifier: Arc<dyn Notifier>, session: SessionStore) -> Result<Self> {
    let ctx = AppContext::new(SyncConfig::from(&config.sync), notifier);
    let client = ApiClient::new(&config.api, ctx.clone())?;

    let projects = ProjectStore::new(
      ProjectApi::new(client.clone()),
      config.cache.projects.into(),
      &ctx,
    );
    let todos = TodoStore::new(TodoApi::new(client.clone()), config.cache.todos.into(), &ctx);
    let reports = ReportStore::new(
      ReportApi::new(client.clone()),
      config.cache.reports.into(),
      &ctx,
    );
    let users = UserStore::new(
      UserApi::new(client),
      config.cache.users.into(),
      &config.auth,
      &config.search,
      Arc::new(session),
      &ctx,
    );

    if let Some(user) = users.restore_session() {
      info!(user = %user.username, "resuming session");
    }
    // Stores already apply their own mutations; queued events only need
    // acknowledging so the bus can drop them.
    ctx.sync().set_sync_handler(|events| async move {
      debug!(count = events.len(), "sync events reconciled");
      Ok(())
    });
    let sweeper = ctx.sync().spawn_sweeper();

    Ok(Self {
      config,
      ctx,
      projects,
      todos,
      reports,
      users,
      sweeper,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn context(&self) -> &Arc<AppContext> {
    &self.ctx
  }

  pub fn clear_all_stores(&self) -> usize {
    self.ctx.clear_all_stores()
  }
}

impl Drop for App {
  fn drop(&mut self) {
    self.sweeper.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::LogNotifier;
  use crate::store::FetchPolicy;

  fn app() -> App {
    let config = Config::default();
    let session = SessionStore::open_in_memory().unwrap();
    App::new(config, Arc::new(LogNotifier), session).unwrap()
  }

  #[tokio::test]
  async fn test_every_store_is_registered() {
    let app = app();
    assert_eq!(app.context().registry().len(), 4);
    assert_eq!(app.clear_all_stores(), 4);
  }

  #[tokio::test]
  async fn test_restores_persisted_session() {
    let session = SessionStore::open_in_memory().unwrap();
    session
      .save("tok", &crate::stores::fixtures::user(7, "grace"))
      .unwrap();

    let app = App::new(Config::default(), Arc::new(LogNotifier), session).unwrap();

    assert!(app.users.is_logged_in());
    assert_eq!(app.context().token().as_deref(), Some("tok"));
  }

  #[tokio::test]
  async fn test_unreachable_api_reports_network_error() {
    let mut config = Config::default();
    // Nothing listens on port 9 (discard)
    config.api.base_url = "http://127.0.0.1:9/api".to_string();
    config.api.timeout_secs = 2;
    let app = App::new(config, Arc::new(LogNotifier), SessionStore::open_in_memory().unwrap()).unwrap();

    let err = app.projects.fetch_list(FetchPolicy::CacheFirst).await.unwrap_err();

    assert_eq!(err.to_string(), "Network connection error");
    assert_eq!(app.projects.error().as_deref(), Some("Network connection error"));
  }
}
