//! Rune server library.
//!
//! The service facade, HTTP routes, configuration, and shared state. The
//! binary in `main.rs` wires these together with the storage backend, the
//! consensus node, and the seal lifecycle.

pub mod config;
pub mod error;
pub mod routes;
pub mod service;
pub mod state;
