// Prometheus metrics for the nser engine
//
// Exposed on the API server's /metrics endpoint:
// - Runs started / finished (counters)
// - Active runs (gauge)
// - Run duration (histogram)
// - Output lines and subscriber lag (counters)
// - Health probe duration (histogram)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::{Arc, OnceLock};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Run lifecycle
    pub static ref RUNS_STARTED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("nser_runs_started_total", "Total number of tool runs started"),
        &["tool"]
    ).expect("Failed to create runs started metric");

    pub static ref RUNS_FINISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("nser_runs_finished_total", "Total number of tool runs finalized"),
        &["tool", "status"]
    ).expect("Failed to create runs finished metric");

    pub static ref ACTIVE_RUNS: IntGauge = IntGauge::new(
        "nser_active_runs",
        "Number of tool processes currently running"
    ).expect("Failed to create active runs metric");

    pub static ref RUN_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("nser_run_duration_seconds", "Tool run wall-clock duration")
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0, 7200.0]),
        &["tool"]
    ).expect("Failed to create run duration metric");

    // Streaming
    pub static ref OUTPUT_LINES_TOTAL: IntCounter = IntCounter::new(
        "nser_output_lines_total",
        "Total number of output lines captured from tools"
    ).expect("Failed to create output lines metric");

    pub static ref SUBSCRIBER_LAG_EVENTS_TOTAL: IntCounter = IntCounter::new(
        "nser_subscriber_lag_events_total",
        "Events skipped by subscribers that fell behind"
    ).expect("Failed to create subscriber lag metric");

    // Health
    pub static ref HEALTH_PROBE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("nser_health_probe_duration_seconds", "Duration of a full tool health check"),
    ).expect("Failed to create health probe duration metric");
}

static INIT: OnceLock<prometheus::Result<()>> = OnceLock::new();

fn register_all() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(RUNS_STARTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RUNS_FINISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_RUNS.clone()))?;
    REGISTRY.register(Box::new(RUN_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(OUTPUT_LINES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SUBSCRIBER_LAG_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HEALTH_PROBE_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Register all metrics with [`REGISTRY`]. Safe to call more than once.
pub fn init() -> anyhow::Result<()> {
    match INIT.get_or_init(register_all) {
        Ok(()) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Failed to register metrics: {}", e)),
    }
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
