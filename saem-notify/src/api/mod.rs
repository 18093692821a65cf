//! HTTP API for saem-notify
//!
//! Read-only: the health check and build identification. Roster management is
//! done through the CLI.

pub mod buildinfo;
pub mod health;

pub use buildinfo::get_build_info;
pub use health::health_routes;
