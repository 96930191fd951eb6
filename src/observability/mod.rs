//! # Observability
//!
//! - `logging`: tracing subscriber setup
//! - `metrics`: Prometheus metrics for the run

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
