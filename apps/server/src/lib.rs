//! Beacon Server
//!
//! Hosts the Beacon query engine behind an HTTP API:
//! - GET and POST Beacon v2 queries per entity
//! - Handover access ids for paging and reusing result sets
//! - Filtering-terms service over the collations collections
//! - Postgres-backed document store and handover persistence

#![allow(
    clippy::too_many_arguments,      // Functions with many args are acceptable for domain operations
    clippy::large_enum_variant,      // Large enum variants acceptable; boxing may impact performance
)]

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod request_context;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
