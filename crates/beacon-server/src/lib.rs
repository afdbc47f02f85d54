//! # beacon-server
//!
//! The Beacon chat server: axum WebSocket endpoint, configuration,
//! Prometheus metrics, and an in-memory reference store behind the hub's
//! persistence callbacks.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod store;

pub use config::Config;
pub use handlers::{app, run_server, AppState};
pub use store::MemoryStore;
