//! Prometheus metrics for coverage ingestion.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// A new build row was created.
pub fn build_created() {
    counter!("cov_builds_created_total").increment(1);
}

/// A report was attached to an existing build (`incomplete` or `commit`).
pub fn build_reused(reason: &'static str) {
    counter!("cov_builds_reused_total", "reason" => reason).increment(1);
}

/// A create lost a uniqueness race and fell back to a lookup.
pub fn duplicate_race(constraint: &str) {
    counter!("cov_build_duplicate_races_total", "constraint" => constraint.to_string())
        .increment(1);
}

pub fn job_recorded() {
    counter!("cov_jobs_recorded_total").increment(1);
}

/// Record a freshly computed build coverage.
pub fn coverage_computed(coverage: f64) {
    histogram!("cov_build_coverage_percent").record(coverage);
}

pub fn no_coverage_data() {
    counter!("cov_no_coverage_data_total").increment(1);
}

/// Record the outcome of a project cascade (`ok` or `failed`).
pub fn cascade(outcome: &'static str) {
    counter!("cov_project_cascades_total", "outcome" => outcome).increment(1);
}
