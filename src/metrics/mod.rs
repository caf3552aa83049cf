//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks build sessions, per-stage durations and prompt-flow outcomes.
//!
//! # Example
//!
//! ```ignore
//! use pipeline_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! MetricsCollector::new().record_stage("classify", 0.9);
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ANALYSIS_FALLBACKS_TOTAL, FLOW_LATENCY, FLOW_REQUESTS_TOTAL, REGISTRY, SESSIONS_IN_PROGRESS,
    SESSIONS_TOTAL, STAGE_DURATION,
};
