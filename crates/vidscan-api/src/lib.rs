//! Axum HTTP API server.
//!
//! This crate provides:
//! - Synchronous image and camera-frame detection
//! - Video job submission, progress polling and artifact download
//! - Request ids, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod upload;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
