use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::cache::CacheStats;
use crate::config::PipelineConfig;
use crate::event::{Confidence, EventCandidate};
use crate::metrics::Metrics;
use crate::quality::QualityScore;
use crate::source_confidence::SourceConfidenceRegistry;
use crate::verifier::{RunOutcome, TrustPipeline};

/// Runs hold the lock end to end, so concurrent `/verify` calls queue
/// instead of interleaving cache writes.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Mutex<TrustPipeline>>,
}

impl AppState {
    pub fn new(pipeline: TrustPipeline) -> Self {
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
        }
    }
}

pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/verify", post(verify))
        .route("/debug/source-tier", get(debug_source_tier))
        .route("/debug/score", post(debug_score))
        .route("/debug/cache-stats", get(debug_cache_stats))
        .route("/admin/reload-sources", post(admin_reload_sources))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    match metrics {
        Some(m) => app.merge(m.router()),
        None => app,
    }
}

async fn verify(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
    Json(candidates): Json<Vec<EventCandidate>>,
) -> Result<Json<RunOutcome>, (StatusCode, String)> {
    let max = match q.get("max") {
        Some(v) => Some(v.trim().parse::<usize>().map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                format!("max must be a non-negative integer, got '{v}'"),
            )
        })?),
        None => None,
    };

    let pipeline = state.pipeline.lock().await;
    Ok(Json(pipeline.run(candidates, max).await))
}

#[derive(Serialize)]
struct SourceTierOut {
    source: String,
    tier: Confidence,
    trusted: bool,
}

async fn debug_source_tier(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<SourceTierOut> {
    let source = q.get("source").cloned().unwrap_or_default();
    let pipeline = state.pipeline.lock().await;
    let reg = pipeline.registry();
    Json(SourceTierOut {
        tier: reg.classify(&source),
        trusted: reg.is_trusted(&source),
        source,
    })
}

#[derive(Serialize)]
struct ScoreOut {
    #[serde(flatten)]
    score: QualityScore,
    min_score: u8,
    passes: bool,
}

async fn debug_score(
    State(state): State<AppState>,
    Json(candidate): Json<EventCandidate>,
) -> Json<ScoreOut> {
    let pipeline = state.pipeline.lock().await;
    let scorer = pipeline.scorer();
    let score = scorer.score_explained(&candidate);
    let min_score = scorer.min_score();
    Json(ScoreOut {
        passes: score.score >= min_score,
        score,
        min_score,
    })
}

async fn debug_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    let pipeline = state.pipeline.lock().await;
    Json(pipeline.cache().stats())
}

/// Re-read the tier tables from the pipeline config and swap them in.
async fn admin_reload_sources(State(state): State<AppState>) -> (StatusCode, String) {
    let cfg = match PipelineConfig::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(target: "verifier", error = %e, "source reload failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("failed: {e:#}"));
        }
    };
    let registry = Arc::new(SourceConfidenceRegistry::new(&cfg.sources));
    state.pipeline.lock().await.replace_registry(registry);
    info!(
        target: "verifier",
        high = cfg.sources.high.len(),
        low = cfg.sources.low.len(),
        "source tiers reloaded"
    );
    (StatusCode::OK, "reloaded".to_string())
}
