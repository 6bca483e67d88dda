//! Project management REST API: transport, domain types, and the
//! per-entity adapters the stores are built on.

mod adapters;
mod client;
pub mod types;

pub use adapters::{ProjectApi, ReportApi, TodoApi, UserApi};
pub use client::{status_message, ApiClient, ApiResponse};
