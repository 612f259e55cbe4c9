use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process and publish the
    /// static pipeline settings as gauges. Later calls reuse the handle.
    pub fn init(max_per_run: usize, cache_ttl_days: i64) -> anyhow::Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                let h = PrometheusBuilder::new()
                    .install_recorder()
                    .context("prometheus: install recorder")?;
                describe_pipeline_metrics();
                Ok::<_, anyhow::Error>(h)
            })?
            .clone();

        gauge!("verify_max_per_run").set(max_per_run as f64);
        gauge!("verification_cache_ttl_days").set(cache_ttl_days as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe_pipeline_metrics() {
    describe_counter!("quality_passed_total", "Candidates that passed the quality gate.");
    describe_counter!(
        "quality_rejected_total",
        "Candidates rejected by the quality gate before any network call."
    );
    describe_counter!("verify_runs_total", "Pipeline runs served.");
    describe_counter!("verify_removed_total", "Candidates removed as cancelled (high confidence).");
}
