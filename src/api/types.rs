//! Domain types exchanged with the project management API.
//!
//! Field names follow the API's camelCase JSON; dates without a time
//! component use `YYYY-MM-DD`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cache::Entity;

// ============================================================================
// Users and authentication
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: u64,
  pub username: String,
  #[serde(default)]
  pub nickname: String,
  #[serde(default)]
  pub email: String,
  pub phone: Option<String>,
  pub avatar: Option<String>,
  #[serde(default)]
  pub status: i32,
  pub create_time: Option<String>,
  pub update_time: Option<String>,
}

impl User {
  /// Nickname when set, otherwise the username
  pub fn display_name(&self) -> &str {
    if self.nickname.is_empty() {
      &self.username
    } else {
      &self.nickname
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
  pub username: String,
  pub nickname: Option<String>,
  pub email: Option<String>,
  pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
  #[serde(default)]
  pub success: bool,
  pub token: Option<String>,
  pub user: Option<User>,
  pub message: Option<String>,
}

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
  Pending,
  Progress,
  Completed,
  Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
  pub name: String,
  pub status: ProjectStatus,
  pub due_date: Option<NaiveDate>,
  pub description: Option<String>,
  pub completed_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  pub id: u64,
  pub name: String,
  pub description: Option<String>,
  pub status: ProjectStatus,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
  #[serde(default)]
  pub progress: u8,
  #[serde(default)]
  pub creator_id: u64,
  pub assignee_id: Option<u64>,
  /// Milestones as a JSON string
  pub milestones: Option<String>,
  pub this_week_work: Option<String>,
  pub next_week_plan: Option<String>,
  pub create_time: Option<String>,
  pub update_time: Option<String>,
  pub creator: Option<User>,
  pub assignee: Option<User>,
  #[serde(default)]
  pub members: Vec<User>,
}

impl Project {
  /// Parse the embedded milestone JSON. Malformed or missing data yields
  /// an empty list.
  pub fn milestones(&self) -> Vec<Milestone> {
    self
      .milestones
      .as_deref()
      .filter(|raw| !raw.trim().is_empty())
      .and_then(|raw| serde_json::from_str(raw).ok())
      .unwrap_or_default()
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
  pub name: String,
  pub description: Option<String>,
  pub status: Option<ProjectStatus>,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
  pub progress: Option<u8>,
  pub creator_id: Option<u64>,
  pub assignee_id: Option<u64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub member_ids: Vec<u64>,
  pub milestones: Option<String>,
  pub this_week_work: Option<String>,
  pub next_week_plan: Option<String>,
}

// ============================================================================
// Todos
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TodoStatus {
  Todo,
  Progress,
  Done,
}

impl TodoStatus {
  /// Wire name used in query parameters
  pub fn as_str(self) -> &'static str {
    match self {
      TodoStatus::Todo => "TODO",
      TodoStatus::Progress => "PROGRESS",
      TodoStatus::Done => "DONE",
    }
  }
}

impl std::str::FromStr for TodoStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "TODO" => Ok(TodoStatus::Todo),
      "PROGRESS" => Ok(TodoStatus::Progress),
      "DONE" => Ok(TodoStatus::Done),
      other => Err(format!("Unknown todo status: {}", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
  pub id: u64,
  pub title: String,
  pub description: Option<String>,
  pub project_id: Option<u64>,
  pub assignee_id: Option<u64>,
  pub priority: Priority,
  pub status: TodoStatus,
  pub due_date: Option<NaiveDate>,
  pub completed_time: Option<String>,
  #[serde(default)]
  pub creator_id: u64,
  pub create_time: Option<String>,
  pub update_time: Option<String>,
  pub assignee: Option<User>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoDto {
  pub title: String,
  pub description: Option<String>,
  pub project_id: Option<u64>,
  pub assignee_id: Option<u64>,
  pub priority: Option<Priority>,
  pub status: Option<TodoStatus>,
  pub due_date: Option<NaiveDate>,
  pub email_enabled: Option<bool>,
  pub creator_id: u64,
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
  Weekly,
  Biweekly,
  Monthly,
  Stage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
  pub id: u64,
  pub project_id: Option<u64>,
  #[serde(rename = "type")]
  pub report_type: ReportType,
  pub title: String,
  pub content: Option<String>,
  pub report_date: NaiveDate,
  #[serde(default)]
  pub creator_id: u64,
  pub create_time: Option<String>,
  pub update_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDto {
  pub project_id: Option<u64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub project_ids: Vec<u64>,
  #[serde(rename = "type")]
  pub report_type: ReportType,
  pub title: String,
  pub content: Option<String>,
  pub report_date: NaiveDate,
  pub creator_id: u64,
  /// Fuzzy content generation, on by default server-side
  pub fuzzy_mode: Option<bool>,
}

// ============================================================================
// Entity implementations
// ============================================================================

impl Entity for User {
  fn id(&self) -> u64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "user"
  }
}

impl Entity for Project {
  fn id(&self) -> u64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "project"
  }
}

impl Entity for Todo {
  fn id(&self) -> u64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "todo"
  }
}

impl Entity for Report {
  fn id(&self) -> u64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "report"
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_todo_deserializes_from_api_json() {
    let json = r#"{
      "id": 3,
      "title": "Write report",
      "priority": "HIGH",
      "status": "PROGRESS",
      "dueDate": "2024-05-01",
      "creatorId": 1
    }"#;

    let todo: Todo = serde_json::from_str(json).unwrap();
    assert_eq!(todo.id, 3);
    assert_eq!(todo.priority, Priority::High);
    assert_eq!(todo.status, TodoStatus::Progress);
    assert_eq!(todo.due_date, NaiveDate::from_ymd_opt(2024, 5, 1));
    assert!(todo.assignee.is_none());
  }

  #[test]
  fn test_report_type_uses_type_field() {
    let json = r#"{"id": 1, "type": "BIWEEKLY", "title": "R", "reportDate": "2024-01-15"}"#;
    let report: Report = serde_json::from_str(json).unwrap();
    assert_eq!(report.report_type, ReportType::Biweekly);
  }

  #[test]
  fn test_project_milestones_parse() {
    let mut project: Project = serde_json::from_str(
      r#"{"id": 1, "name": "P", "status": "PENDING"}"#,
    )
    .unwrap();
    assert!(project.milestones().is_empty());

    project.milestones =
      Some(r#"[{"name": "Beta", "status": "PROGRESS", "dueDate": "2024-06-30"}]"#.to_string());
    let milestones = project.milestones();
    assert_eq!(milestones.len(), 1);
    assert_eq!(milestones[0].status, ProjectStatus::Progress);

    project.milestones = Some("not json".to_string());
    assert!(project.milestones().is_empty());
  }

  #[test]
  fn test_todo_status_from_str() {
    assert_eq!("done".parse::<TodoStatus>(), Ok(TodoStatus::Done));
    assert!("later".parse::<TodoStatus>().is_err());
  }
}
