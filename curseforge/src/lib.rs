//! Client for the CurseForge core API and the process-wide reference data
//! (games and category taxonomies) derived from it.

pub mod client;
pub mod error;
pub mod metrics_defs;
pub mod models;
pub mod reference;
pub mod release;

pub use client::{CurseForge, PAGE_SIZE, SearchQuery};
pub use error::UpstreamError;
pub use reference::ReferenceCache;
