use color_eyre::Result;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::api::types::{LoginRequest, LoginResponse, User, UserDto};
use crate::cache::CacheConfig;
use crate::config::{AuthConfig, SearchConfig};
use crate::context::{AppContext, Cleanup};
use crate::event::SyncEvent;
use crate::search::{DebouncedSearch, SearchOutcome};
use crate::session::{fingerprint, SessionStore};
use crate::store::{Adapter, EntityStore, FetchPolicy};

/// Cache key of the dashboard user list
pub const DASHBOARD_KEY: &str = "dashboard";

/// Authentication and user endpoints beyond plain CRUD.
pub trait AuthEndpoints: Adapter<Entity = User, Payload = UserDto> {
  fn login(&self, request: LoginRequest) -> impl Future<Output = Result<LoginResponse>> + Send;

  fn logout(&self) -> impl Future<Output = Result<()>> + Send;

  fn current_user(&self) -> impl Future<Output = Result<User>> + Send;

  fn get_dashboard_users(&self) -> impl Future<Output = Result<Vec<User>>> + Send;

  fn search(&self, keyword: &str) -> impl Future<Output = Result<Vec<User>>> + Send;
}

impl<E: AuthEndpoints> AuthEndpoints for Arc<E> {
  fn login(&self, request: LoginRequest) -> impl Future<Output = Result<LoginResponse>> + Send {
    (**self).login(request)
  }

  fn logout(&self) -> impl Future<Output = Result<()>> + Send {
    (**self).logout()
  }

  fn current_user(&self) -> impl Future<Output = Result<User>> + Send {
    (**self).current_user()
  }

  fn get_dashboard_users(&self) -> impl Future<Output = Result<Vec<User>>> + Send {
    (**self).get_dashboard_users()
  }

  fn search(&self, keyword: &str) -> impl Future<Output = Result<Vec<User>>> + Send {
    (**self).search(keyword)
  }
}

/// Result of a login attempt. Rejections are expected outcomes for the
/// login form to show, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
  Success(User),
  /// Credentials rejected or the request failed
  Failed { message: String },
  /// Too many failed attempts; no request was made
  LockedOut { remaining: Duration },
}

impl LoginOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, LoginOutcome::Success(_))
  }

  pub fn message(&self) -> String {
    match self {
      LoginOutcome::Success(user) => format!("Logged in as {}", user.display_name()),
      LoginOutcome::Failed { message } => message.clone(),
      LoginOutcome::LockedOut { remaining } => {
        let minutes = remaining.as_secs().div_ceil(60).max(1);
        format!(
          "Too many failed login attempts, try again in {} minute{}",
          minutes,
          if minutes == 1 { "" } else { "s" }
        )
      }
    }
  }
}

#[derive(Default)]
struct AuthState {
  current_user: Option<User>,
  attempts: u32,
  lockout_until: Option<Instant>,
  dashboard: Vec<User>,
}

/// Users, the dashboard user list, user search, and the login session.
pub struct UserStore<A: AuthEndpoints> {
  store: EntityStore<A>,
  auth: Mutex<AuthState>,
  policy: AuthConfig,
  search: DebouncedSearch<User>,
  session: Arc<SessionStore>,
  ctx: Arc<AppContext>,
}

impl<A: AuthEndpoints> UserStore<A> {
  pub fn new(
    adapter: A,
    cache: CacheConfig,
    auth: &AuthConfig,
    search: &SearchConfig,
    session: Arc<SessionStore>,
    ctx: &Arc<AppContext>,
  ) -> Arc<Self> {
    let store = Arc::new(Self {
      store: EntityStore::new("users", adapter, cache, ctx.notifier().clone()),
      auth: Mutex::new(AuthState::default()),
      policy: auth.clone(),
      search: DebouncedSearch::new(search.debounce(), search.min_chars),
      session,
      ctx: ctx.clone(),
    });
    ctx.register(store.clone());

    let weak = Arc::downgrade(&store);
    ctx.on_session_expired(move || {
      if let Some(store) = weak.upgrade() {
        store.drop_session();
      }
    });
    store
  }

  fn auth(&self) -> MutexGuard<'_, AuthState> {
    self.auth.lock().unwrap_or_else(PoisonError::into_inner)
  }

  // --- session ---

  pub fn current_user(&self) -> Option<User> {
    self.auth().current_user.clone()
  }

  pub fn token(&self) -> Option<String> {
    self.ctx.token()
  }

  pub fn is_logged_in(&self) -> bool {
    self.auth().current_user.is_some() && self.ctx.token().is_some()
  }

  /// Failed attempts since the last successful login or expired lockout.
  pub fn failed_attempts(&self) -> u32 {
    self.auth().attempts
  }

  /// Time left on the lockout, if one is active.
  pub fn lockout_remaining(&self) -> Option<Duration> {
    let mut auth = self.auth();
    match auth.lockout_until {
      Some(until) if until > Instant::now() => Some(until - Instant::now()),
      Some(_) => {
        auth.lockout_until = None;
        auth.attempts = 0;
        None
      }
      None => None,
    }
  }

  pub async fn login(&self, username: &str, password: &str) -> LoginOutcome {
    if let Some(remaining) = self.lockout_remaining() {
      warn!(username, "login rejected during lockout");
      return LoginOutcome::LockedOut { remaining };
    }

    let request = LoginRequest {
      username: username.to_string(),
      password: password.to_string(),
    };

    let response = {
      let _loading = self.store.begin_loading();
      self.store.adapter().login(request).await
    };

    let response = match response {
      Ok(response) => response,
      Err(err) => {
        warn!(username, error = %err, "login request failed");
        let message = match err.to_string().as_str() {
          "Resource not found" => "User does not exist".to_string(),
          "" => "Login failed".to_string(),
          other => other.to_string(),
        };
        return LoginOutcome::Failed { message };
      }
    };

    match response {
      LoginResponse {
        success: true,
        token: Some(token),
        user: Some(user),
        ..
      } => {
        self.ctx.clear_all_stores();
        self.ctx.set_token(Some(token.clone()));
        self.ctx.session().reset();
        {
          let mut auth = self.auth();
          auth.current_user = Some(user.clone());
          auth.attempts = 0;
          auth.lockout_until = None;
        }
        if let Err(err) = self.session.save(&token, &user) {
          warn!(error = %err, "failed to persist session");
        }
        self.store.mark_changed();
        info!(user = %user.username, token = %fingerprint(&token), "logged in");
        LoginOutcome::Success(user)
      }
      rejected => {
        let mut auth = self.auth();
        auth.attempts += 1;
        if auth.attempts >= self.policy.max_attempts {
          auth.lockout_until = Some(Instant::now() + self.policy.lockout());
          warn!(username, attempts = auth.attempts, "login locked out");
        }
        LoginOutcome::Failed {
          message: rejected
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Login failed".to_string()),
        }
      }
    }
  }

  /// Log out locally and clear every store. The server call is best effort.
  pub async fn logout(&self) {
    if self.ctx.token().is_some() {
      if let Err(err) = self.store.adapter().logout().await {
        warn!(error = %err, "logout request failed");
      }
    }
    self.drop_session();
    self.ctx.clear_all_stores();
    info!("logged out");
  }

  /// Restore a persisted login. Unreadable data is dropped.
  pub fn restore_session(&self) -> Option<User> {
    match self.session.load() {
      Ok(Some(stored)) => {
        self.ctx.set_token(Some(stored.token.clone()));
        self.auth().current_user = Some(stored.user.clone());
        self.store.mark_changed();
        debug!(
          user = %stored.user.username,
          token = %fingerprint(&stored.token),
          saved_at = %stored.saved_at,
          "session restored"
        );
        Some(stored.user)
      }
      Ok(None) => None,
      Err(err) => {
        warn!(error = %err, "dropping unreadable session");
        self.drop_session();
        None
      }
    }
  }

  /// Refresh the current user from the server.
  pub async fn fetch_current_user(&self) -> Result<User> {
    let _loading = self.store.begin_loading();
    match self.store.adapter().current_user().await {
      Ok(user) => {
        self.auth().current_user = Some(user.clone());
        self.store.mark_changed();
        Ok(user)
      }
      Err(err) => Err(self.store.report_error(err, "fetch current user")),
    }
  }

  /// Forget the token, the current user, and the persisted session.
  fn drop_session(&self) {
    self.ctx.set_token(None);
    self.auth().current_user = None;
    if let Err(err) = self.session.clear() {
      warn!(error = %err, "failed to clear persisted session");
    }
    self.store.mark_changed();
  }

  // --- users ---

  /// Users list, fetched once and then served from memory unless forced.
  pub async fn fetch_users(&self, force: bool) -> Result<Vec<User>> {
    if !force && self.store.has_data() {
      return Ok(self.store.items());
    }
    let policy = if force {
      FetchPolicy::Refresh
    } else {
      FetchPolicy::CacheFirst
    };
    self.store.fetch_list(policy).await
  }

  pub fn dashboard_users(&self) -> Vec<User> {
    self.auth().dashboard.clone()
  }

  pub async fn fetch_dashboard_users(&self, force: bool) -> Result<Vec<User>> {
    if !force {
      let loaded = self.dashboard_users();
      if !loaded.is_empty() {
        return Ok(loaded);
      }
      if let Some(users) = self.store.cached_list(DASHBOARD_KEY) {
        debug!(store = self.store.name(), key = DASHBOARD_KEY, "cache hit");
        self.auth().dashboard = users.clone();
        return Ok(users);
      }
    }

    let loading = self.store.begin_loading();
    match self.store.adapter().get_dashboard_users().await {
      Ok(users) => {
        if loading.is_current() {
          self.auth().dashboard = users.clone();
          self.store.cache_list(DASHBOARD_KEY, users.clone());
          self.store.mark_changed();
        }
        Ok(users)
      }
      Err(err) => Err(self.store.report_error(err, "fetch dashboard users")),
    }
  }

  /// Look a user up in the dashboard list first, then the full list.
  pub fn user_by_id(&self, id: u64) -> Option<User> {
    let from_dashboard = self
      .auth()
      .dashboard
      .iter()
      .find(|user| user.id == id)
      .cloned();
    from_dashboard.or_else(|| self.store.find_by_id(id))
  }

  /// Debounced user search. Only the newest call's results are kept.
  pub async fn search(&self, keyword: &str) -> Result<SearchOutcome<User>> {
    let adapter = self.store.adapter();
    self
      .search
      .search(keyword, |kw| async move { adapter.search(&kw).await })
      .await
      .map_err(|err| self.store.report_error(err, "search users"))
  }

  pub fn search_results(&self) -> Vec<User> {
    self.search.results()
  }

  // --- mutations that also emit sync events ---

  pub async fn create(&self, dto: UserDto) -> Result<User> {
    let user = self.store.create(dto).await?;
    self.store.invalidate(&[DASHBOARD_KEY]);
    self.ctx.sync().add_sync_event(SyncEvent::created(&user));
    Ok(user)
  }

  /// Update a user everywhere it is held, including the logged-in user.
  pub async fn update(&self, id: u64, dto: UserDto) -> Result<User> {
    let user = self.store.update(id, dto).await?;
    {
      let mut auth = self.auth();
      if let Some(existing) = auth.dashboard.iter_mut().find(|u| u.id == id) {
        *existing = user.clone();
      }
      if auth.current_user.as_ref().is_some_and(|u| u.id == id) {
        auth.current_user = Some(user.clone());
      }
    }
    self.store.invalidate(&[DASHBOARD_KEY]);
    self.ctx.sync().add_sync_event(SyncEvent::updated(&user));
    Ok(user)
  }

  pub async fn remove(&self, id: u64) -> Result<()> {
    self.store.remove(id).await?;
    self.auth().dashboard.retain(|u| u.id != id);
    self.store.invalidate(&[DASHBOARD_KEY]);
    self
      .ctx
      .sync()
      .add_sync_event(SyncEvent::deleted::<User>(id));
    Ok(())
  }
}

impl<A: AuthEndpoints> Deref for UserStore<A> {
  type Target = EntityStore<A>;

  fn deref(&self) -> &Self::Target {
    &self.store
  }
}

/// Clears the user lists and search. The login session is left alone so
/// that login can flush every store before installing the new user.
impl<A: AuthEndpoints> Cleanup for UserStore<A> {
  fn name(&self) -> &str {
    self.store.name()
  }

  fn cleanup(&self) {
    self.auth().dashboard.clear();
    self.search.clear();
    self.store.reset();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::testing::test_context;
  use crate::event::SyncEventKind;
  use crate::store::fake::FakeAdapter;
  use crate::stores::fixtures::user;
  use color_eyre::eyre::eyre;

  type Fake = FakeAdapter<User, UserDto>;

  fn build_user(id: u64, dto: &UserDto) -> User {
    user(id, &dto.username)
  }

  /// Accepts any known username with password "secret".
  impl AuthEndpoints for Fake {
    async fn login(&self, request: LoginRequest) -> Result<LoginResponse> {
      self.record("login")?;
      let user = self
        .records()
        .into_iter()
        .find(|u| u.username == request.username)
        .ok_or_else(|| eyre!("Resource not found"))?;
      if request.password == "secret" {
        Ok(LoginResponse {
          success: true,
          token: Some(format!("token-{}", user.id)),
          user: Some(user),
          message: None,
        })
      } else {
        Ok(LoginResponse {
          success: false,
          token: None,
          user: None,
          message: Some("Wrong password".to_string()),
        })
      }
    }

    async fn logout(&self) -> Result<()> {
      self.record("logout")
    }

    async fn current_user(&self) -> Result<User> {
      self.record("current_user")?;
      self
        .records()
        .into_iter()
        .next()
        .ok_or_else(|| eyre!("Unauthorized, please log in"))
    }

    async fn get_dashboard_users(&self) -> Result<Vec<User>> {
      self.record("get_dashboard_users")?;
      Ok(self.records().into_iter().take(2).collect())
    }

    async fn search(&self, keyword: &str) -> Result<Vec<User>> {
      self.record(format!("search:{}", keyword))?;
      Ok(
        self
          .records()
          .into_iter()
          .filter(|u| u.username.contains(keyword))
          .collect(),
      )
    }
  }

  struct Setup {
    store: Arc<UserStore<Arc<Fake>>>,
    adapter: Arc<Fake>,
    session: Arc<SessionStore>,
    ctx: Arc<AppContext>,
  }

  fn setup() -> Setup {
    let (ctx, _) = test_context();
    let records = vec![user(1, "alice"), user(2, "bob"), user(3, "alina")];
    let adapter = Arc::new(FakeAdapter::new(records, build_user));
    let session = Arc::new(SessionStore::open_in_memory().unwrap());
    let search = SearchConfig {
      debounce_ms: 300,
      min_chars: 2,
    };
    let store = UserStore::new(
      adapter.clone(),
      CacheConfig::default(),
      &AuthConfig::default(),
      &search,
      session.clone(),
      &ctx,
    );
    Setup {
      store,
      adapter,
      session,
      ctx,
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_lockout_after_five_failures_skips_network() {
    let s = setup();

    for _ in 0..5 {
      let outcome = s.store.login("alice", "wrong").await;
      assert_eq!(
        outcome,
        LoginOutcome::Failed {
          message: "Wrong password".to_string()
        }
      );
    }
    assert_eq!(s.adapter.calls("login"), 5);

    let sixth = s.store.login("alice", "secret").await;
    assert!(matches!(sixth, LoginOutcome::LockedOut { .. }));
    assert!(sixth.message().contains("15 minutes"));
    assert_eq!(s.adapter.calls("login"), 5);

    tokio::time::advance(Duration::from_secs(15 * 60 + 1)).await;
    assert!(s.store.login("alice", "secret").await.is_success());
    assert_eq!(s.store.failed_attempts(), 0);
  }

  #[tokio::test]
  async fn test_transport_errors_do_not_count_as_attempts() {
    let s = setup();

    let outcome = s.store.login("nobody", "secret").await;
    assert_eq!(
      outcome,
      LoginOutcome::Failed {
        message: "User does not exist".to_string()
      }
    );
    assert_eq!(s.store.failed_attempts(), 0);
  }

  #[tokio::test]
  async fn test_login_success_resets_attempts_and_persists() {
    let s = setup();
    s.store.login("bob", "nope").await;
    assert_eq!(s.store.failed_attempts(), 1);

    let outcome = s.store.login("bob", "secret").await;

    assert_eq!(outcome, LoginOutcome::Success(user(2, "bob")));
    assert_eq!(s.store.failed_attempts(), 0);
    assert!(s.store.is_logged_in());
    assert_eq!(s.store.token().as_deref(), Some("token-2"));
    assert_eq!(s.session.load().unwrap().unwrap().user.id, 2);
  }

  #[tokio::test]
  async fn test_login_and_logout_clear_all_stores() {
    let s = setup();
    s.store.fetch_users(false).await.unwrap();
    assert!(s.store.has_data());

    s.store.login("alice", "secret").await;
    assert!(s.store.is_empty());
    assert!(s.store.is_logged_in());

    s.store.fetch_users(false).await.unwrap();
    s.store.logout().await;

    assert!(s.store.is_empty());
    assert!(!s.store.is_logged_in());
    assert_eq!(s.adapter.calls("logout"), 1);
    assert!(s.session.load().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_restore_session() {
    let s = setup();
    s.session.save("saved-token", &user(3, "alina")).unwrap();

    let restored = s.store.restore_session();

    assert_eq!(restored.map(|u| u.id), Some(3));
    assert!(s.store.is_logged_in());
    assert_eq!(s.ctx.token().as_deref(), Some("saved-token"));
  }

  #[tokio::test]
  async fn test_session_expiry_drops_login_once() {
    let s = setup();
    s.store.login("alice", "secret").await;

    assert!(s.ctx.handle_session_expired());
    assert!(!s.ctx.handle_session_expired());

    assert!(!s.store.is_logged_in());
    assert!(s.session.load().unwrap().is_none());

    // A fresh login re-arms the expiry flow
    s.store.login("alice", "secret").await;
    assert!(s.ctx.handle_session_expired());
  }

  #[tokio::test]
  async fn test_fetch_users_is_lazy() {
    let s = setup();

    s.store.fetch_users(false).await.unwrap();
    s.store.fetch_users(false).await.unwrap();
    assert_eq!(s.adapter.calls("get_list"), 1);

    s.store.fetch_users(true).await.unwrap();
    assert_eq!(s.adapter.calls("get_list"), 2);
  }

  #[tokio::test]
  async fn test_dashboard_users_and_lookup() {
    let s = setup();

    let dashboard = s.store.fetch_dashboard_users(false).await.unwrap();
    assert_eq!(dashboard.len(), 2);
    assert!(s.store.is_cached(DASHBOARD_KEY));

    s.store.fetch_dashboard_users(false).await.unwrap();
    assert_eq!(s.adapter.calls("get_dashboard_users"), 1);

    assert_eq!(s.store.user_by_id(2).map(|u| u.username), Some("bob".to_string()));
    // Not on the dashboard and the full list is not loaded yet
    assert_eq!(s.store.user_by_id(3), None);

    s.store.fetch_users(false).await.unwrap();
    assert_eq!(s.store.user_by_id(3).map(|u| u.username), Some("alina".to_string()));
  }

  #[tokio::test(start_paused = true)]
  async fn test_search_debounces_and_keeps_results() {
    let s = setup();

    let outcome = s.store.search("ali").await.unwrap();

    let found: Vec<u64> = outcome.results().unwrap().iter().map(|u| u.id).collect();
    assert_eq!(found, vec![1, 3]);
    assert_eq!(s.store.search_results().len(), 2);
    assert_eq!(s.adapter.calls("search"), 1);

    s.store.search("a").await.unwrap();
    assert!(s.store.search_results().is_empty());
    assert_eq!(s.adapter.calls("search"), 1);
  }

  fn dto(username: &str) -> UserDto {
    UserDto {
      username: username.to_string(),
      ..UserDto::default()
    }
  }

  #[tokio::test]
  async fn test_mutations_emit_sync_events() {
    let s = setup();
    s.store.fetch_users(false).await.unwrap();
    s.store.fetch_dashboard_users(false).await.unwrap();

    let created = s.store.create(dto("carol")).await.unwrap();
    assert_eq!(s.store.items()[0].id, created.id);

    s.store.update(2, dto("robert")).await.unwrap();
    assert_eq!(s.store.user_by_id(2).map(|u| u.username), Some("robert".to_string()));

    s.store.remove(1).await.unwrap();
    assert_eq!(s.store.user_by_id(1), None);
    assert!(!s.store.is_cached(DASHBOARD_KEY));

    let kinds: Vec<SyncEventKind> = s.ctx.sync().events().iter().map(|e| e.kind).collect();
    assert_eq!(
      kinds,
      vec![SyncEventKind::Create, SyncEventKind::Update, SyncEventKind::Delete]
    );
    assert!(s.ctx.sync().events().iter().all(|e| e.entity == "user"));
  }

  #[tokio::test]
  async fn test_update_refreshes_logged_in_user() {
    let s = setup();
    assert!(s.store.login("alice", "secret").await.is_success());

    s.store.update(1, dto("alice.w")).await.unwrap();

    assert_eq!(
      s.store.current_user().map(|u| u.username),
      Some("alice.w".to_string())
    );
  }
}
