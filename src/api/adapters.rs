//! HTTP-backed adapters, one per entity endpoint family.

use color_eyre::Result;

use super::client::ApiClient;
use super::types::{
  LoginRequest, LoginResponse, Project, ProjectDto, Report, ReportDto, Todo, TodoDto, TodoStatus,
  User, UserDto,
};
use crate::store::Adapter;
use crate::stores::{AuthEndpoints, ProjectEndpoints, TodoEndpoints};

#[derive(Clone)]
pub struct ProjectApi {
  client: ApiClient,
}

impl ProjectApi {
  pub fn new(client: ApiClient) -> Self {
    Self { client }
  }
}

impl Adapter for ProjectApi {
  type Entity = Project;
  type Payload = ProjectDto;

  async fn get_list(&self) -> Result<Vec<Project>> {
    self.client.get("projects").await
  }

  async fn get_detail(&self, id: u64) -> Result<Project> {
    self.client.get(&format!("projects/{}", id)).await
  }

  async fn create(&self, payload: ProjectDto) -> Result<Project> {
    self.client.post("projects", &payload).await
  }

  async fn update(&self, id: u64, payload: ProjectDto) -> Result<Project> {
    self.client.put(&format!("projects/{}", id), &payload).await
  }

  async fn delete(&self, id: u64) -> Result<()> {
    self.client.delete(&format!("projects/{}", id)).await
  }
}

impl ProjectEndpoints for ProjectApi {
  async fn update_progress(&self, id: u64, progress: u8) -> Result<()> {
    self
      .client
      .put_query(
        &format!("projects/{}/progress", id),
        &[("progress", progress.to_string())],
      )
      .await
  }
}

#[derive(Clone)]
pub struct TodoApi {
  client: ApiClient,
}

impl TodoApi {
  pub fn new(client: ApiClient) -> Self {
    Self { client }
  }
}

impl Adapter for TodoApi {
  type Entity = Todo;
  type Payload = TodoDto;

  async fn get_list(&self) -> Result<Vec<Todo>> {
    self.client.get("todos").await
  }

  async fn get_detail(&self, id: u64) -> Result<Todo> {
    self.client.get(&format!("todos/{}", id)).await
  }

  async fn create(&self, payload: TodoDto) -> Result<Todo> {
    self.client.post("todos", &payload).await
  }

  async fn update(&self, id: u64, payload: TodoDto) -> Result<Todo> {
    self.client.put(&format!("todos/{}", id), &payload).await
  }

  async fn delete(&self, id: u64) -> Result<()> {
    self.client.delete(&format!("todos/{}", id)).await
  }
}

impl TodoEndpoints for TodoApi {
  async fn get_today(&self) -> Result<Vec<Todo>> {
    self.client.get("todos/today").await
  }

  async fn get_week(&self) -> Result<Vec<Todo>> {
    self.client.get("todos/week").await
  }

  async fn get_high_priority(&self) -> Result<Vec<Todo>> {
    self.client.get("todos/high").await
  }

  async fn update_status(&self, id: u64, status: TodoStatus) -> Result<()> {
    self
      .client
      .put_query(
        &format!("todos/{}/status", id),
        &[("status", status.as_str().to_string())],
      )
      .await
  }

  async fn send_email(&self, email: &str, user_id: Option<u64>) -> Result<()> {
    let mut query = vec![("email", email.to_string())];
    if let Some(user_id) = user_id {
      query.push(("userId", user_id.to_string()));
    }
    self.client.post_query("todos/send-email", &query).await
  }
}

#[derive(Clone)]
pub struct ReportApi {
  client: ApiClient,
}

impl ReportApi {
  pub fn new(client: ApiClient) -> Self {
    Self { client }
  }
}

impl Adapter for ReportApi {
  type Entity = Report;
  type Payload = ReportDto;

  async fn get_list(&self) -> Result<Vec<Report>> {
    self.client.get("reports").await
  }

  async fn get_detail(&self, id: u64) -> Result<Report> {
    self.client.get(&format!("reports/{}", id)).await
  }

  /// Reports are generated server-side from the DTO
  async fn create(&self, payload: ReportDto) -> Result<Report> {
    self.client.post("reports/generate", &payload).await
  }

  async fn update(&self, id: u64, payload: ReportDto) -> Result<Report> {
    self.client.put(&format!("reports/{}", id), &payload).await
  }

  async fn delete(&self, id: u64) -> Result<()> {
    self.client.delete(&format!("reports/{}", id)).await
  }
}

#[derive(Clone)]
pub struct UserApi {
  client: ApiClient,
}

impl UserApi {
  pub fn new(client: ApiClient) -> Self {
    Self { client }
  }
}

impl Adapter for UserApi {
  type Entity = User;
  type Payload = UserDto;

  async fn get_list(&self) -> Result<Vec<User>> {
    self.client.get("users").await
  }

  async fn get_detail(&self, id: u64) -> Result<User> {
    self.client.get(&format!("users/{}", id)).await
  }

  async fn create(&self, payload: UserDto) -> Result<User> {
    self.client.post("users", &payload).await
  }

  async fn update(&self, id: u64, payload: UserDto) -> Result<User> {
    self.client.put(&format!("users/{}", id), &payload).await
  }

  async fn delete(&self, id: u64) -> Result<()> {
    self.client.delete(&format!("users/{}", id)).await
  }
}

impl AuthEndpoints for UserApi {
  async fn login(&self, request: LoginRequest) -> Result<LoginResponse> {
    self.client.post("auth/login", &request).await
  }

  async fn logout(&self) -> Result<()> {
    self.client.post_empty("auth/logout").await
  }

  async fn current_user(&self) -> Result<User> {
    self.client.get("auth/current").await
  }

  async fn get_dashboard_users(&self) -> Result<Vec<User>> {
    self.client.get("users/dashboard").await
  }

  async fn search(&self, keyword: &str) -> Result<Vec<User>> {
    self
      .client
      .get_query("users/search", &[("keyword", keyword.to_string())])
      .await
  }
}
