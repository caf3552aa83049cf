//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run, so library users who never export metrics pay nothing for them.

use super::prometheus::{
    ANALYSIS_FALLBACKS_TOTAL, FLOW_LATENCY, FLOW_REQUESTS_TOTAL, SESSIONS_IN_PROGRESS,
    SESSIONS_TOTAL, STAGE_DURATION,
};

/// Metrics collector for recording build-session operational metrics.
///
/// # Example
///
/// ```ignore
/// use pipeline_forge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_stage("training", 42.0);
/// collector.record_session_finished("completed");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record that a build session started running.
    pub fn record_session_started(&self) {
        if let Some(gauge) = SESSIONS_IN_PROGRESS.get() {
            gauge.inc();
        }
    }

    /// Record that a build session reached a terminal `status`.
    pub fn record_session_finished(&self, status: &str) {
        if let Some(gauge) = SESSIONS_IN_PROGRESS.get() {
            gauge.dec();
        }
        if let Some(sessions) = SESSIONS_TOTAL.get() {
            sessions.with_label_values(&[status]).inc();
        }

        tracing::trace!(status = status, "Recorded session metric");
    }

    /// Record how long one stage took.
    pub fn record_stage(&self, stage: &str, duration_secs: f64) {
        if let Some(durations) = STAGE_DURATION.get() {
            durations.with_label_values(&[stage]).observe(duration_secs);
        }

        tracing::trace!(
            stage = stage,
            duration_secs = duration_secs,
            "Recorded stage metric"
        );
    }

    /// Record one prompt-flow invocation.
    ///
    /// `outcome` is `"success"` or the failure kind, e.g. `"schema_mismatch"`.
    pub fn record_flow_request(&self, flow: &str, outcome: &str, latency_secs: f64) {
        if let Some(requests) = FLOW_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[flow, outcome]).inc();
        }
        if let Some(latency) = FLOW_LATENCY.get() {
            latency.with_label_values(&[flow]).observe(latency_secs);
        }

        tracing::trace!(
            flow = flow,
            outcome = outcome,
            latency_secs = latency_secs,
            "Recorded flow metric"
        );
    }

    /// Record that the canned dataset profile was substituted.
    pub fn record_analysis_fallback(&self) {
        if let Some(fallbacks) = ANALYSIS_FALLBACKS_TOTAL.get() {
            fallbacks.inc();
        }
    }
}
