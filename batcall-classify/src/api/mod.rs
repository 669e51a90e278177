//! HTTP API handlers for batcall-classify

pub mod health;
pub mod runs;

pub use health::health_routes;
pub use runs::run_routes;
