//! # Observability Infrastructure
//!
//! Structured logging via the tracing ecosystem and Prometheus metrics for
//! every outbound backend call.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, observe_call};
