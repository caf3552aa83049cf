//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by pipeline-forge and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all pipeline-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Build sessions that reached a terminal status, labeled by status.
pub static SESSIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of build sessions currently running.
pub static SESSIONS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Stage execution duration in seconds, labeled by stage.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Prompt-flow invocations, labeled by flow and outcome.
pub static FLOW_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Prompt-flow latency in seconds, labeled by flow.
pub static FLOW_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Times the canned dataset profile replaced a failed analysis.
pub static ANALYSIS_FALLBACKS_TOTAL: OnceLock<prometheus::Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Recording before initialization is a no-op, and
/// calling this twice keeps the first set of metrics.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
///
/// # Example
///
/// ```ignore
/// use pipeline_forge::metrics::init_metrics;
///
/// init_metrics().expect("Failed to initialize metrics");
/// ```
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let sessions_total = CounterVec::new(
        Opts::new(
            "pipeline_forge_sessions_total",
            "Build sessions that reached a terminal status",
        ),
        &["status"],
    )?;

    let sessions_in_progress = Gauge::new(
        "pipeline_forge_sessions_in_progress",
        "Number of build sessions currently running",
    )?;

    let stage_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "pipeline_forge_stage_duration_seconds",
            "Stage execution duration in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 600.0, 1800.0]),
        &["stage"],
    )?;

    let flow_requests_total = CounterVec::new(
        Opts::new(
            "pipeline_forge_flow_requests_total",
            "Prompt-flow invocations",
        ),
        &["flow", "outcome"],
    )?;

    let flow_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "pipeline_forge_flow_latency_seconds",
            "Prompt-flow latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["flow"],
    )?;

    let analysis_fallbacks = prometheus::Counter::new(
        "pipeline_forge_analysis_fallbacks_total",
        "Times the canned dataset profile replaced a failed analysis",
    )?;

    registry.register(Box::new(sessions_total.clone()))?;
    registry.register(Box::new(sessions_in_progress.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(flow_requests_total.clone()))?;
    registry.register(Box::new(flow_latency.clone()))?;
    registry.register(Box::new(analysis_fallbacks.clone()))?;

    // Already-set statics mean a previous call won; keep those.
    let _ = REGISTRY.set(registry);
    let _ = SESSIONS_TOTAL.set(sessions_total);
    let _ = SESSIONS_IN_PROGRESS.set(sessions_in_progress);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = FLOW_REQUESTS_TOTAL.set(flow_requests_total);
    let _ = FLOW_LATENCY.set(flow_latency);
    let _ = ANALYSIS_FALLBACKS_TOTAL.set(analysis_fallbacks);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line instead when the registry has not
/// been initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
