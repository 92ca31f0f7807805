//! HTTP endpoint handlers for the PAL server.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/`: Landing page
//! - `/metrics`: Prometheus metrics endpoint
//! - `/health`: Enumeration and lock status
//! - `/dump`: Dump strings or property sets of every instance

pub mod dump;
pub mod health;
pub mod metrics;
pub mod root;

// Re-export handlers
pub use dump::dump_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use root::root_handler;
