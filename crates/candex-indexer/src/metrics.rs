//! Prometheus metrics for the indexing pipeline

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_counter,
    CounterVec, GaugeVec, HistogramVec, IntCounter,
};

lazy_static! {
    // ============================================================================
    // Job Metrics
    // ============================================================================

    /// Jobs taken off the queue by type and outcome
    pub static ref JOBS_PROCESSED: CounterVec = register_counter_vec!(
        "candex_jobs_processed_total",
        "Jobs processed by type and outcome",
        &["job_type", "outcome"]
    ).unwrap();

    /// Jobs re-enqueued after a failed attempt
    pub static ref JOBS_REQUEUED: IntCounter =
        register_int_counter!("candex_jobs_requeued_total", "Jobs re-enqueued after a failure").unwrap();

    // ============================================================================
    // Pipeline Metrics
    // ============================================================================

    /// Records upserted and marked indexed
    pub static ref RECORDS_INDEXED: IntCounter =
        register_int_counter!("candex_records_indexed_total", "Candidate records indexed").unwrap();

    /// Records dropped by the transformer
    pub static ref RECORDS_SKIPPED: CounterVec = register_counter_vec!(
        "candex_records_skipped_total",
        "Candidate records skipped during transform",
        &["reason"]
    ).unwrap();

    /// Points removed from the collection
    pub static ref POINTS_DELETED: IntCounter =
        register_int_counter!("candex_points_deleted_total", "Points deleted from the collection").unwrap();

    /// Pipeline run duration
    pub static ref RUN_DURATION: HistogramVec = register_histogram_vec!(
        "candex_pipeline_run_seconds",
        "Pipeline run duration in seconds",
        &["kind", "status"],
        vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]
    ).unwrap();

    /// Retries performed around external calls
    pub static ref RETRY_ATTEMPTS: CounterVec = register_counter_vec!(
        "candex_retry_attempts_total",
        "Retries of external calls by operation",
        &["operation"]
    ).unwrap();

    // ============================================================================
    // System Metrics
    // ============================================================================

    /// Build information
    pub static ref BUILD_INFO: GaugeVec = register_gauge_vec!(
        "candex_build_info",
        "Build information",
        &["version"]
    ).unwrap();
}

/// Initialize metrics
pub fn init_metrics() {
    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);
}

/// Export metrics in Prometheus text format
pub fn export() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_can_be_exported() {
        init_metrics();
        JOBS_PROCESSED.with_label_values(&["etl_sync", "ok"]).inc();
        RECORDS_SKIPPED.with_label_values(&["skills"]).inc();

        let exported = export();
        assert!(exported.contains("candex_jobs_processed_total"));
        assert!(exported.contains("candex_records_skipped_total"));
        assert!(exported.contains("candex_build_info"));
    }
}
