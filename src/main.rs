//! Event Verifier: binary entrypoint.
//! Boots the Axum HTTP server: pipeline config, trust pipeline, metrics,
//! routes.

use event_verifier::metrics::Metrics;
use event_verifier::{api, init_tracing, AppState, PipelineConfig, TrustPipeline};
use shuttle_axum::ShuttleAxum;
use tracing::info;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = PipelineConfig::load()?;
    let metrics = Metrics::init(cfg.verifier.max_per_run, cfg.verifier.cache_ttl_days)?;
    let pipeline = TrustPipeline::from_config(&cfg)?;

    info!(
        cache = %cfg.verifier.cache_path.display(),
        strategy = ?cfg.verifier.strategy,
        "event verifier starting"
    );

    let router = api::router(AppState::new(pipeline), Some(&metrics));
    Ok(router.into())
}
