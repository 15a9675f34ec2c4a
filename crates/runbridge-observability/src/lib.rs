//! runbridge Observability
//!
//! This crate provides observability features:
//! - Structured logging setup and tracing-backed invocation log sinks
//! - Metrics collection (Prometheus)
//! - Health and metrics endpoints

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthState, health_router};
pub use logging::{LogFormat, LoggingConfig, TracingLogSink, init_logging};
pub use metrics::Metrics;
