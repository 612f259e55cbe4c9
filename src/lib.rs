// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod agent;
pub mod api;
pub mod batch_filter;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod quality;
pub mod source_confidence;
pub mod verifier;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::{FailurePolicy, PipelineConfig};
pub use crate::error::{VerifyError, VerifyResult};
pub use crate::event::{Confidence, EventCandidate, VerificationResult, VerifiedEvent};
pub use crate::verifier::{RunOutcome, RunReport, TrustPipeline, VerifierReport};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the fmt subscriber: compact by default, JSON lines when
/// `VERIFIER_LOG_JSON=1`. `RUST_LOG` overrides the default filter.
/// A no-op when the host runtime already installed a subscriber.
pub fn init_tracing() {
    let json = std::env::var("VERIFIER_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("event_verifier=info,warn"));

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
