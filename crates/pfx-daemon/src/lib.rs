//! pfx-daemon library target.
//!
//! Exposes the supervisor, router and state for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod cli;
pub mod routes;
pub mod signals;
pub mod state;
pub mod supervisor;
