//! CLI subcommands and their handlers.

use chrono::Local;
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};

use pmdeck::api::types::{Project, Report, Todo, TodoStatus, User};
use pmdeck::app::App;
use pmdeck::config::Config;
use pmdeck::store::FetchPolicy;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Log in and remember the session
  Login {
    username: String,
    /// Password (default: $PMDECK_PASSWORD)
    #[arg(short, long)]
    password: Option<String>,
  },
  /// Log out and forget the session
  Logout,
  /// Show the logged-in user
  Whoami,
  /// Browse projects
  #[command(alias = "p")]
  Projects {
    #[command(subcommand)]
    action: Option<ProjectsAction>,
  },
  /// Browse and complete todos
  #[command(alias = "t")]
  Todos {
    #[command(subcommand)]
    action: Option<TodosAction>,
  },
  /// Browse reports
  #[command(alias = "r")]
  Reports {
    #[command(subcommand)]
    action: Option<ReportsAction>,
  },
  /// Browse and search users
  #[command(alias = "u")]
  Users {
    #[command(subcommand)]
    action: Option<UsersAction>,
  },
}

#[derive(Subcommand, Debug)]
pub enum ProjectsAction {
  List,
  Show { id: u64 },
  /// Projects in progress
  Active,
  Stats,
}

#[derive(Subcommand, Debug)]
pub enum TodosAction {
  List,
  Today,
  Week,
  High,
  Overdue,
  /// Mark a todo as done
  Done { id: u64 },
  /// Set a todo's status (todo, progress, done)
  Status { id: u64, status: TodoStatus },
  /// Email the todo digest
  Email {
    email: String,
    /// Send the digest for this user instead of yourself
    #[arg(short, long)]
    user: Option<u64>,
  },
}

#[derive(Subcommand, Debug)]
pub enum ReportsAction {
  List,
  Show { id: u64 },
}

#[derive(Subcommand, Debug)]
pub enum UsersAction {
  List,
  Search { keyword: String },
}

pub async fn run(app: &App, command: Command) -> Result<()> {
  app.context().sync().touch();
  match command {
    Command::Login { username, password } => {
      let password = match password {
        Some(p) => p,
        None => Config::get_password()?,
      };
      let outcome = app.users.login(&username, &password).await;
      if outcome.is_success() {
        println!("{}", outcome.message());
        Ok(())
      } else {
        Err(eyre!("{}", outcome.message()))
      }
    }
    Command::Logout => {
      app.users.logout().await;
      println!("Logged out");
      Ok(())
    }
    Command::Whoami => {
      match app.users.current_user() {
        Some(user) => println!("{} ({})", user.display_name(), user.username),
        None => println!("Not logged in"),
      }
      Ok(())
    }
    other => {
      if !app.users.is_logged_in() {
        return Err(eyre!(
          "Not logged in. Run `pmdeck login <username>` first."
        ));
      }
      run_authenticated(app, other).await
    }
  }
}

async fn run_authenticated(app: &App, command: Command) -> Result<()> {
  match command {
    Command::Projects { action } => projects(app, action.unwrap_or(ProjectsAction::List)).await,
    Command::Todos { action } => todos(app, action.unwrap_or(TodosAction::List)).await,
    Command::Reports { action } => reports(app, action.unwrap_or(ReportsAction::List)).await,
    Command::Users { action } => users(app, action.unwrap_or(UsersAction::List)).await,
    Command::Login { .. } | Command::Logout | Command::Whoami => Ok(()),
  }
}

async fn projects(app: &App, action: ProjectsAction) -> Result<()> {
  let store = &app.projects;
  match action {
    ProjectsAction::List => {
      print_projects(&store.fetch_list(FetchPolicy::CacheFirst).await?);
    }
    ProjectsAction::Show { id } => {
      let project = store.fetch_detail(id, FetchPolicy::CacheFirst).await?;
      println!("#{} {}", project.id, project.name);
      println!("Status:   {}", label(project.status));
      println!("Progress: {}%", project.progress);
      if let Some(description) = &project.description {
        println!("\n{}", description);
      }
      let milestones = project.milestones();
      if !milestones.is_empty() {
        println!("\nMilestones:");
        for milestone in milestones {
          let due = milestone
            .due_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
          println!("  {:<30} {:<10} {}", milestone.name, label(milestone.status), due);
        }
      }
    }
    ProjectsAction::Active => {
      store.fetch_list(FetchPolicy::CacheFirst).await?;
      print_projects(&store.active());
    }
    ProjectsAction::Stats => {
      store.fetch_list(FetchPolicy::CacheFirst).await?;
      let stats = store.stats();
      println!("Total:       {}", stats.total);
      println!("Pending:     {}", stats.pending);
      println!("In progress: {}", stats.in_progress);
      println!("Completed:   {}", stats.completed);
      println!("Cancelled:   {}", stats.cancelled);
      println!("Avg progress {:.1}%", stats.average_progress);
    }
  }
  Ok(())
}

async fn todos(app: &App, action: TodosAction) -> Result<()> {
  let store = &app.todos;
  match action {
    TodosAction::List => print_todos(&store.fetch_list(FetchPolicy::CacheFirst).await?),
    TodosAction::Today => print_todos(&store.fetch_today(FetchPolicy::CacheFirst).await?),
    TodosAction::Week => print_todos(&store.fetch_week(FetchPolicy::CacheFirst).await?),
    TodosAction::High => print_todos(&store.fetch_high(FetchPolicy::CacheFirst).await?),
    TodosAction::Overdue => {
      store.fetch_list(FetchPolicy::CacheFirst).await?;
      print_todos(&store.overdue(Local::now().date_naive()));
    }
    TodosAction::Done { id } => {
      store.update_status(id, TodoStatus::Done).await?;
      println!("Todo #{} marked as done", id);
    }
    TodosAction::Status { id, status } => {
      store.update_status(id, status).await?;
      println!("Todo #{} is now {}", id, status.as_str());
    }
    TodosAction::Email { email, user } => {
      store.send_email(&email, user).await?;
    }
  }
  Ok(())
}

async fn reports(app: &App, action: ReportsAction) -> Result<()> {
  let store = &app.reports;
  match action {
    ReportsAction::List => print_reports(&store.fetch_list(FetchPolicy::CacheFirst).await?),
    ReportsAction::Show { id } => {
      let report = store.fetch_detail(id, FetchPolicy::CacheFirst).await?;
      println!(
        "#{} {} ({}, {})",
        report.id,
        report.title,
        label(report.report_type),
        report.report_date
      );
      if let Some(content) = &report.content {
        println!("\n{}", content);
      }
    }
  }
  Ok(())
}

async fn users(app: &App, action: UsersAction) -> Result<()> {
  let store = &app.users;
  match action {
    UsersAction::List => print_users(&store.fetch_users(false).await?),
    UsersAction::Search { keyword } => {
      if let Some(found) = store.search(&keyword).await?.results() {
        print_users(&found);
      }
    }
  }
  Ok(())
}

/// Debug name of an enum, padded by the caller.
fn label(value: impl std::fmt::Debug) -> String {
  format!("{:?}", value)
}

fn print_projects(projects: &[Project]) {
  for p in projects {
    println!("{:>5}  {:<10} {:>3}%  {}", p.id, label(p.status), p.progress, p.name);
  }
}

fn print_todos(todos: &[Todo]) {
  for t in todos {
    let due = t
      .due_date
      .map(|d| d.to_string())
      .unwrap_or_else(|| "-".to_string());
    println!(
      "{:>5}  {:<8} {:<6} {:<10}  {}",
      t.id,
      label(t.status),
      label(t.priority),
      due,
      t.title
    );
  }
}

fn print_reports(reports: &[Report]) {
  for r in reports {
    println!(
      "{:>5}  {:<8} {}  {}",
      r.id,
      label(r.report_type),
      r.report_date,
      r.title
    );
  }
}

fn print_users(users: &[User]) {
  for u in users {
    println!("{:>5}  {:<20} {}", u.id, u.username, u.display_name());
  }
}
