#![deny(missing_docs)]

//! Shared configuration, error types, IDs, and observability primitives for SkyShard crates.
//!
//! Architecture role:
//! - defines executive/controller configuration passed across layers
//! - provides common [`SksError`] / [`Result`] contracts
//! - hosts the multi-error accumulator used for user-query diagnostics
//! - hosts metrics utilities
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]
//! - [`multi_error`]
//! - [`resource`]

/// Shared executive/controller configuration types.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;
/// Metrics registry and Prometheus rendering helpers.
pub mod metrics;
/// Accumulating error container for user-query diagnostics.
pub mod multi_error;
/// Worker resource path helpers.
pub mod resource;

pub use config::{ControllerConfig, ExecutiveConfig, MOCK_SERVICE_URL};
pub use error::{Result, SksError};
pub use ids::*;
pub use metrics::MetricsRegistry;
pub use multi_error::MultiError;
pub use resource::ResourceUnit;
