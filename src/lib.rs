pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod context;
pub mod event;
pub mod logging;
pub mod search;
pub mod session;
pub mod store;
pub mod stores;
pub mod sync;
