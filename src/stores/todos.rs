use chrono::{NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::api::types::{Priority, Todo, TodoDto, TodoStatus};
use crate::cache::CacheConfig;
use crate::context::{AppContext, Cleanup};
use crate::event::{SyncEvent, SyncEventKind};
use crate::store::{detail_key, Adapter, EntityStore, FetchPolicy, LIST_KEY};

/// Cache key of the todos due today
pub const TODAY_KEY: &str = "today";
/// Cache key of the todos due this week
pub const WEEK_KEY: &str = "week";
/// Cache key of the high-priority todos
pub const HIGH_KEY: &str = "high";

const SUBLIST_KEYS: [&str; 3] = [TODAY_KEY, WEEK_KEY, HIGH_KEY];

/// Todo endpoints beyond plain CRUD.
pub trait TodoEndpoints: Adapter<Entity = Todo, Payload = TodoDto> {
  fn get_today(&self) -> impl Future<Output = Result<Vec<Todo>>> + Send;

  fn get_week(&self) -> impl Future<Output = Result<Vec<Todo>>> + Send;

  fn get_high_priority(&self) -> impl Future<Output = Result<Vec<Todo>>> + Send;

  fn update_status(&self, id: u64, status: TodoStatus) -> impl Future<Output = Result<()>> + Send;

  /// Mail a todo digest to `email`, for `user_id` or the logged-in user.
  fn send_email(&self, email: &str, user_id: Option<u64>) -> impl Future<Output = Result<()>> + Send;
}

impl<E: TodoEndpoints> TodoEndpoints for Arc<E> {
  fn get_today(&self) -> impl Future<Output = Result<Vec<Todo>>> + Send {
    (**self).get_today()
  }

  fn get_week(&self) -> impl Future<Output = Result<Vec<Todo>>> + Send {
    (**self).get_week()
  }

  fn get_high_priority(&self) -> impl Future<Output = Result<Vec<Todo>>> + Send {
    (**self).get_high_priority()
  }

  fn update_status(&self, id: u64, status: TodoStatus) -> impl Future<Output = Result<()>> + Send {
    (**self).update_status(id, status)
  }

  fn send_email(&self, email: &str, user_id: Option<u64>) -> impl Future<Output = Result<()>> + Send {
    (**self).send_email(email, user_id)
  }
}

#[derive(Default)]
struct Sublists {
  today: Vec<Todo>,
  week: Vec<Todo>,
  high: Vec<Todo>,
}

impl Sublists {
  fn get_mut(&mut self, key: &str) -> Option<&mut Vec<Todo>> {
    match key {
      TODAY_KEY => Some(&mut self.today),
      WEEK_KEY => Some(&mut self.week),
      HIGH_KEY => Some(&mut self.high),
      _ => None,
    }
  }

  fn each_mut(&mut self, mut f: impl FnMut(&mut Vec<Todo>)) {
    f(&mut self.today);
    f(&mut self.week);
    f(&mut self.high);
  }
}

/// Todo store with the today / week / high-priority sublists served by
/// dedicated endpoints.
pub struct TodoStore<A: TodoEndpoints> {
  store: EntityStore<A>,
  sublists: Mutex<Sublists>,
  ctx: Arc<AppContext>,
}

impl<A: TodoEndpoints> TodoStore<A> {
  pub fn new(adapter: A, cache: CacheConfig, ctx: &Arc<AppContext>) -> Arc<Self> {
    let store = Arc::new(Self {
      store: EntityStore::new("todos", adapter, cache, ctx.notifier().clone()),
      sublists: Mutex::new(Sublists::default()),
      ctx: ctx.clone(),
    });
    ctx.register(store.clone());
    store
  }

  fn sublists(&self) -> MutexGuard<'_, Sublists> {
    self.sublists.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn edit_sublists(&self, f: impl FnMut(&mut Vec<Todo>)) {
    self.sublists().each_mut(f);
    self.store.mark_changed();
  }

  // --- sublists ---

  pub fn today(&self) -> Vec<Todo> {
    self.sublists().today.clone()
  }

  pub fn week(&self) -> Vec<Todo> {
    self.sublists().week.clone()
  }

  pub fn high(&self) -> Vec<Todo> {
    self.sublists().high.clone()
  }

  pub async fn fetch_today(&self, policy: FetchPolicy) -> Result<Vec<Todo>> {
    self
      .fetch_sublist(TODAY_KEY, policy, self.store.adapter().get_today())
      .await
  }

  pub async fn fetch_week(&self, policy: FetchPolicy) -> Result<Vec<Todo>> {
    self
      .fetch_sublist(WEEK_KEY, policy, self.store.adapter().get_week())
      .await
  }

  pub async fn fetch_high(&self, policy: FetchPolicy) -> Result<Vec<Todo>> {
    self
      .fetch_sublist(HIGH_KEY, policy, self.store.adapter().get_high_priority())
      .await
  }

  /// The request future is lazy, so a cache hit never reaches the network.
  async fn fetch_sublist(
    &self,
    key: &'static str,
    policy: FetchPolicy,
    request: impl Future<Output = Result<Vec<Todo>>>,
  ) -> Result<Vec<Todo>> {
    if policy.reads_cache() {
      if let Some(todos) = self.store.cached_list(key) {
        debug!(store = self.store.name(), key, "cache hit");
        self.set_sublist(key, todos.clone());
        return Ok(todos);
      }
    }

    let loading = self.store.begin_loading();
    match request.await {
      Ok(todos) => {
        if loading.is_current() {
          self.set_sublist(key, todos.clone());
          if policy.writes_cache() {
            self.store.cache_list(key, todos.clone());
          }
        }
        Ok(todos)
      }
      Err(err) => Err(self.store.report_error(err, &format!("fetch {}", key))),
    }
  }

  fn set_sublist(&self, key: &str, todos: Vec<Todo>) {
    if let Some(list) = self.sublists().get_mut(key) {
      *list = todos;
    }
    self.store.mark_changed();
  }

  fn invalidate_sublists(&self) {
    self.store.invalidate(&SUBLIST_KEYS);
  }

  // --- derived views ---

  fn filtered(&self, predicate: impl Fn(&Todo) -> bool) -> Vec<Todo> {
    self
      .store
      .with_items(|items| items.iter().filter(|t| predicate(t)).cloned().collect())
  }

  pub fn pending(&self) -> Vec<Todo> {
    self.filtered(|t| t.status == TodoStatus::Todo)
  }

  pub fn in_progress(&self) -> Vec<Todo> {
    self.filtered(|t| t.status == TodoStatus::Progress)
  }

  pub fn completed(&self) -> Vec<Todo> {
    self.filtered(|t| t.status == TodoStatus::Done)
  }

  pub fn high_priority(&self) -> Vec<Todo> {
    self.filtered(|t| t.priority == Priority::High)
  }

  /// Unfinished todos whose due date is before `today`. A todo due today
  /// is not overdue.
  pub fn overdue(&self, today: NaiveDate) -> Vec<Todo> {
    self.filtered(|t| t.status != TodoStatus::Done && t.due_date.is_some_and(|due| due < today))
  }

  pub fn due_on(&self, date: NaiveDate) -> Vec<Todo> {
    self.filtered(|t| t.due_date == Some(date))
  }

  // --- mutations that also emit sync events ---

  pub async fn create(&self, dto: TodoDto) -> Result<Todo> {
    let todo = self.store.create(dto).await?;
    self.invalidate_sublists();
    self.ctx.sync().add_sync_event(SyncEvent::created(&todo));
    Ok(todo)
  }

  pub async fn update(&self, id: u64, dto: TodoDto) -> Result<Todo> {
    let todo = self.store.update(id, dto).await?;
    self.edit_sublists(|list| {
      if let Some(existing) = list.iter_mut().find(|t| t.id == id) {
        *existing = todo.clone();
      }
    });
    self.invalidate_sublists();
    self.ctx.sync().add_sync_event(SyncEvent::updated(&todo));
    Ok(todo)
  }

  /// Delete a todo from the list, every sublist, and every cache key.
  pub async fn remove(&self, id: u64) -> Result<()> {
    self.store.remove(id).await?;
    self.edit_sublists(|list| list.retain(|t| t.id != id));
    self.invalidate_sublists();
    self.ctx.sync().add_sync_event(SyncEvent::deleted::<Todo>(id));
    Ok(())
  }

  /// Change a todo's status. Moving to DONE stamps `completed_time`.
  pub async fn update_status(&self, id: u64, status: TodoStatus) -> Result<()> {
    let _loading = self.store.begin_loading();
    if let Err(err) = self.store.adapter().update_status(id, status).await {
      return Err(self.store.report_error(err, "update status"));
    }

    let completed_time = (status == TodoStatus::Done).then(|| Utc::now().to_rfc3339());
    let apply = |todo: &mut Todo| {
      todo.status = status;
      if let Some(time) = &completed_time {
        todo.completed_time = Some(time.clone());
      }
    };

    self.store.update_local(id, apply);
    self.edit_sublists(|list| {
      if let Some(todo) = list.iter_mut().find(|t| t.id == id) {
        apply(todo);
      }
    });
    self
      .store
      .invalidate(&[LIST_KEY, detail_key(id).as_str()]);
    self.invalidate_sublists();
    info!(store = self.store.name(), id, status = status.as_str(), "status updated");

    let event = match self.store.find_by_id(id) {
      Some(todo) => SyncEvent::updated(&todo),
      None => SyncEvent::new(SyncEventKind::Update, "todo", Some(id)),
    };
    self.ctx.sync().add_sync_event(event);
    Ok(())
  }

  /// Update several todos at once. Fails if any member fails; members that
  /// already succeeded keep their local change, so callers refetch with
  /// `FetchPolicy::Refresh` to reconcile.
  pub async fn batch_update_status(&self, ids: &[u64], status: TodoStatus) -> Result<()> {
    try_join_all(ids.iter().map(|&id| self.update_status(id, status))).await?;
    Ok(())
  }

  /// Send the todo digest email. No local state changes.
  pub async fn send_email(&self, email: &str, user_id: Option<u64>) -> Result<()> {
    let email = email.trim();
    if email.is_empty() {
      return Err(self.store.report_error(eyre!("Email address is required"), "send email"));
    }

    let _loading = self.store.begin_loading();
    match self.store.adapter().send_email(email, user_id).await {
      Ok(()) => {
        info!(store = self.store.name(), user_id, "todo email sent");
        self.store.notifier().success("Email sent");
        Ok(())
      }
      Err(err) => Err(self.store.report_error(err, "send email")),
    }
  }
}

impl<A: TodoEndpoints> Deref for TodoStore<A> {
  type Target = EntityStore<A>;

  fn deref(&self) -> &Self::Target {
    &self.store
  }
}

impl<A: TodoEndpoints> Cleanup for TodoStore<A> {
  fn name(&self) -> &str {
    self.store.name()
  }

  fn cleanup(&self) {
    *self.sublists() = Sublists::default();
    self.store.reset();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::testing::{test_context, RecordingNotifier};
  use crate::event::SyncEventKind;
  use crate::store::fake::FakeAdapter;
  use crate::stores::fixtures::{build_todo, date, todo};

  type Fake = FakeAdapter<Todo, TodoDto>;

  impl TodoEndpoints for Fake {
    async fn get_today(&self) -> Result<Vec<Todo>> {
      self.record("get_today")?;
      Ok(
        self
          .records()
          .into_iter()
          .filter(|t| t.due_date == Some(date(2024, 5, 6)))
          .collect(),
      )
    }

    async fn get_week(&self) -> Result<Vec<Todo>> {
      self.record("get_week")?;
      Ok(
        self
          .records()
          .into_iter()
          .filter(|t| t.due_date.is_some())
          .collect(),
      )
    }

    async fn get_high_priority(&self) -> Result<Vec<Todo>> {
      self.record("get_high_priority")?;
      Ok(
        self
          .records()
          .into_iter()
          .filter(|t| t.priority == Priority::High)
          .collect(),
      )
    }

    async fn update_status(&self, id: u64, status: TodoStatus) -> Result<()> {
      self.record(format!("update_status:{}", id))?;
      self.modify(id, |t| t.status = status)
    }

    async fn send_email(&self, email: &str, user_id: Option<u64>) -> Result<()> {
      self.record(format!("send_email:{}:{:?}", email, user_id))
    }
  }

  fn setup(records: Vec<Todo>) -> (Arc<TodoStore<Arc<Fake>>>, Arc<Fake>, Arc<AppContext>) {
    let (store, adapter, ctx, _) = setup_with_notifier(records);
    (store, adapter, ctx)
  }

  fn setup_with_notifier(
    records: Vec<Todo>,
  ) -> (Arc<TodoStore<Arc<Fake>>>, Arc<Fake>, Arc<AppContext>, Arc<RecordingNotifier>) {
    let (ctx, notifier) = test_context();
    let adapter = Arc::new(FakeAdapter::new(records, build_todo));
    let store = TodoStore::new(adapter.clone(), CacheConfig::default(), &ctx);
    (store, adapter, ctx, notifier)
  }

  fn sample() -> Vec<Todo> {
    vec![
      Todo {
        due_date: Some(date(2024, 5, 6)),
        ..todo(1, "Standup notes", Priority::High, TodoStatus::Todo)
      },
      Todo {
        due_date: Some(date(2024, 5, 3)),
        ..todo(2, "Fix login", Priority::High, TodoStatus::Progress)
      },
      Todo {
        due_date: Some(date(2024, 5, 1)),
        ..todo(3, "Ship release", Priority::Low, TodoStatus::Done)
      },
      todo(4, "Read docs", Priority::Medium, TodoStatus::Todo),
    ]
  }

  fn ids(todos: &[Todo]) -> Vec<u64> {
    todos.iter().map(|t| t.id).collect()
  }

  #[tokio::test]
  async fn test_derived_views() {
    let (store, _, _) = setup(sample());
    store.fetch_list(FetchPolicy::CacheFirst).await.unwrap();

    assert_eq!(ids(&store.pending()), vec![1, 4]);
    assert_eq!(ids(&store.in_progress()), vec![2]);
    assert_eq!(ids(&store.completed()), vec![3]);
    assert_eq!(ids(&store.high_priority()), vec![1, 2]);
    assert_eq!(ids(&store.due_on(date(2024, 5, 6))), vec![1]);

    // Done todos and todos due today are never overdue
    assert_eq!(ids(&store.overdue(date(2024, 5, 6))), vec![2]);
    assert_eq!(ids(&store.overdue(date(2024, 5, 3))), Vec::<u64>::new());
  }

  #[tokio::test]
  async fn test_sublists_are_cached_under_their_keys() {
    let (store, adapter, _) = setup(sample());

    assert_eq!(ids(&store.fetch_today(FetchPolicy::CacheFirst).await.unwrap()), vec![1]);
    assert_eq!(ids(&store.fetch_high(FetchPolicy::CacheFirst).await.unwrap()), vec![1, 2]);
    store.fetch_today(FetchPolicy::CacheFirst).await.unwrap();

    assert!(store.is_cached(TODAY_KEY));
    assert!(store.is_cached(HIGH_KEY));
    assert_eq!(adapter.calls("get_today"), 1);
    assert_eq!(ids(&store.today()), vec![1]);

    store.fetch_today(FetchPolicy::Refresh).await.unwrap();
    assert_eq!(adapter.calls("get_today"), 2);
  }

  #[tokio::test]
  async fn test_remove_clears_id_from_every_sublist() {
    let (store, _, ctx) = setup(sample());
    store.fetch_list(FetchPolicy::CacheFirst).await.unwrap();
    store.fetch_today(FetchPolicy::CacheFirst).await.unwrap();
    store.fetch_week(FetchPolicy::CacheFirst).await.unwrap();
    store.fetch_high(FetchPolicy::CacheFirst).await.unwrap();

    store.remove(1).await.unwrap();

    assert_eq!(store.find_by_id(1), None);
    for list in [store.today(), store.week(), store.high()] {
      assert!(!ids(&list).contains(&1));
    }
    for key in [LIST_KEY, TODAY_KEY, WEEK_KEY, HIGH_KEY] {
      assert!(!store.is_cached(key), "{} still cached", key);
    }
    assert_eq!(ctx.sync().event_count(), 1);
  }

  #[tokio::test]
  async fn test_update_status_done_sets_completed_time() {
    let (store, _, _) = setup(sample());
    store.fetch_list(FetchPolicy::CacheFirst).await.unwrap();
    store.fetch_high(FetchPolicy::CacheFirst).await.unwrap();

    store.update_status(2, TodoStatus::Done).await.unwrap();

    let updated = store.find_by_id(2).unwrap();
    assert_eq!(updated.status, TodoStatus::Done);
    assert!(updated.completed_time.is_some());
    assert_eq!(store.high()[1].status, TodoStatus::Done);
    assert!(!store.is_cached(LIST_KEY));

    store.update_status(1, TodoStatus::Progress).await.unwrap();
    assert!(store.find_by_id(1).unwrap().completed_time.is_none());
  }

  #[tokio::test]
  async fn test_batch_update_keeps_successful_members() {
    let (store, _, _) = setup(sample());
    store.fetch_list(FetchPolicy::CacheFirst).await.unwrap();

    // 99 is unknown to the server, so the batch fails
    let result = store
      .batch_update_status(&[1, 99, 4], TodoStatus::Done)
      .await;

    assert!(result.is_err());
    assert_eq!(store.find_by_id(1).unwrap().status, TodoStatus::Done);
    assert!(!store.is_loading());

    store.batch_update_status(&[1, 4], TodoStatus::Todo).await.unwrap();
    assert_eq!(ids(&store.pending()), vec![1, 4]);
  }

  #[tokio::test]
  async fn test_create_prepends_and_invalidates_sublists() {
    let (store, _, _) = setup(sample());
    store.fetch_list(FetchPolicy::CacheFirst).await.unwrap();
    store.fetch_today(FetchPolicy::CacheFirst).await.unwrap();

    let created = store
      .create(TodoDto {
        title: "New".to_string(),
        ..TodoDto::default()
      })
      .await
      .unwrap();

    assert_eq!(store.items()[0].id, created.id);
    assert!(!store.is_cached(LIST_KEY));
    assert!(!store.is_cached(TODAY_KEY));
  }

  #[tokio::test]
  async fn test_cleanup_drops_sublists() {
    let (store, _, ctx) = setup(sample());
    store.fetch_today(FetchPolicy::CacheFirst).await.unwrap();

    ctx.clear_all_stores();

    assert!(store.today().is_empty());
    assert!(!store.is_cached(TODAY_KEY));
  }

  #[tokio::test]
  async fn test_update_status_of_unloaded_todo_emits_event() {
    let (store, adapter, ctx) = setup(sample());

    store.update_status(1, TodoStatus::Done).await.unwrap();

    assert!(store.is_empty());
    assert_eq!(adapter.records()[0].status, TodoStatus::Done);
    let events = ctx.sync().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, SyncEventKind::Update);
    assert_eq!(events[0].entity, "todo");
    assert_eq!(events[0].id, Some(1));
  }

  #[tokio::test]
  async fn test_send_email_passes_user_and_reports_failures() {
    let (store, adapter, _, notifier) = setup_with_notifier(sample());

    store.send_email(" dev@example.com ", Some(7)).await.unwrap();
    assert_eq!(adapter.calls("send_email:dev@example.com:Some(7)"), 1);
    assert_eq!(notifier.successes(), vec!["Email sent"]);

    let err = store.send_email("  ", None).await.unwrap_err();
    assert_eq!(err.to_string(), "Email address is required");
    assert_eq!(adapter.calls("send_email"), 1);

    adapter.set_failing(true);
    assert!(store.send_email("dev@example.com", None).await.is_err());
    assert!(!store.is_loading());
    assert_eq!(store.error().as_deref(), Some("Network connection error"));
  }
}
