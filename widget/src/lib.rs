//! Core of the CurseForge widget service: resolves request paths to upstream
//! projects, keeps a persisted projection of each project and its authors in
//! sync, and serves the result through a short-lived response cache.

pub mod api;
pub mod authors;
pub mod config;
pub mod errors;
pub mod flight;
pub mod metrics_defs;
pub mod models;
pub mod resolver;
pub mod response_cache;
pub mod service;
pub mod store;
pub mod sync;
mod workers;

#[cfg(test)]
mod testutils;

pub use errors::{ResolveError, StoreError, WidgetError};
pub use service::{Lookup, Widget};
pub use store::{MemoryStore, Store};
