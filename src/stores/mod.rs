//! Per-entity stores composed over the generic `EntityStore`.
//!
//! Each store adds derived views, the sync-emitting variants of the CRUD
//! mutations, and entity-specific cache keys. Every store registers itself
//! with the `AppContext` on construction so that `clear_all_stores` reaches
//! it without the auth flow knowing the concrete types.

mod projects;
mod reports;
mod todos;
mod users;

pub use projects::{ProjectEndpoints, ProjectStats, ProjectStore};
pub use reports::ReportStore;
pub use todos::{TodoEndpoints, TodoStore, HIGH_KEY, TODAY_KEY, WEEK_KEY};
pub use users::{AuthEndpoints, LoginOutcome, UserStore, DASHBOARD_KEY};
