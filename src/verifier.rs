//! Trust pipeline: classify → quality gate → skip trusted → cache or
//! corroborate → assemble output + report.
//!
//! Runs are sequential. Every cache miss awaits one agent run; nothing fans
//! out. A candidate leaves the output only when its verdict says
//! `cancelled` with `high` confidence; every other outcome keeps it.

use crate::agent::{build_llm_client, CorroborationAgent, DynLlm, HtmlSearch, SearchTool};
use crate::batch_filter::BatchLlmFilter;
use crate::cache::{cache_key, VerificationCache};
use crate::config::PipelineConfig;
use crate::event::{EventCandidate, VerifiedEvent};
use crate::quality::{QualityPatterns, QualityScorer};
use crate::source_confidence::SourceConfidenceRegistry;
use anyhow::Context;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Which stage decides the ambiguous candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Per-candidate web corroboration with caching.
    #[default]
    Agent,
    /// Grouped "which are real?" prompts, no search.
    BatchLlm,
}

/// `[verifier]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub strategy: Strategy,
    pub max_per_run: usize,
    pub cache_path: PathBuf,
    pub cache_ttl_days: i64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Agent,
            max_per_run: 20,
            cache_path: PathBuf::from("cache/verification.json"),
            cache_ttl_days: crate::cache::DEFAULT_TTL_DAYS,
        }
    }
}

/// Run-scoped counters. `checked + skipped_trusted + deferred == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerifierReport {
    pub total: usize,
    pub skipped_trusted: usize,
    pub checked: usize,
    pub cache_hits: usize,
    pub verified: usize,
    pub unverified: usize,
    pub cancelled: usize,
    pub removed: usize,
    pub deferred: usize,
    pub agent_failures: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualitySummary {
    pub passed: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub quality: QualitySummary,
    pub verifier: VerifierReport,
    pub batch_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub events: Vec<VerifiedEvent>,
    pub report: VerifierReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    pub events: Vec<VerifiedEvent>,
    pub report: RunReport,
}

pub struct TrustPipeline {
    scorer: QualityScorer,
    cache: Arc<VerificationCache>,
    agent: CorroborationAgent,
    batch: BatchLlmFilter,
    cfg: VerifierConfig,
}

impl TrustPipeline {
    /// Wire every component from config: tier tables, pattern banks, cache
    /// file, LLM provider, HTML search.
    pub fn from_config(cfg: &PipelineConfig) -> anyhow::Result<Self> {
        let llm = build_llm_client(&cfg.llm)?;
        let search = HtmlSearch::new(
            &cfg.agent.search_endpoint,
            Duration::from_secs(cfg.agent.search_timeout_secs),
            cfg.agent.max_results,
        )
        .context("building search client")?;
        let cache = Arc::new(VerificationCache::open(
            cfg.verifier.cache_path.clone(),
            cfg.verifier.cache_ttl_days,
        ));
        Self::with_components(cfg, llm, Arc::new(search), cache)
    }

    /// Like `from_config`, with the network-facing parts supplied.
    pub fn with_components(
        cfg: &PipelineConfig,
        llm: DynLlm,
        search: Arc<dyn SearchTool>,
        cache: Arc<VerificationCache>,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(SourceConfidenceRegistry::new(&cfg.sources));
        let patterns = Arc::new(QualityPatterns::load(&cfg.quality.patterns)?);
        let scorer = QualityScorer::new(registry, patterns, cfg.quality.clone());
        let agent = CorroborationAgent::new(
            llm.clone(),
            search,
            cache.clone(),
            cfg.failure_policy,
            &cfg.agent,
        );
        let batch = BatchLlmFilter::new(llm, cfg.batch_filter.clone(), cfg.failure_policy);

        info!(
            target: "verifier",
            strategy = ?cfg.verifier.strategy,
            provider = agent.provider_name(),
            max_per_run = cfg.verifier.max_per_run,
            policy = ?cfg.failure_policy,
            "trust pipeline ready"
        );

        Ok(Self {
            scorer,
            cache,
            agent,
            batch,
            cfg: cfg.verifier.clone(),
        })
    }

    pub fn scorer(&self) -> &QualityScorer {
        &self.scorer
    }

    pub fn registry(&self) -> &Arc<SourceConfidenceRegistry> {
        self.scorer.registry()
    }

    pub fn cache(&self) -> &Arc<VerificationCache> {
        &self.cache
    }

    pub fn max_per_run(&self) -> usize {
        self.cfg.max_per_run
    }

    pub fn strategy(&self) -> Strategy {
        self.cfg.strategy
    }

    /// Swap the tier tables (and thus the trusted set) between runs.
    pub fn replace_registry(&mut self, registry: Arc<SourceConfidenceRegistry>) {
        self.scorer = self.scorer.with_registry(registry);
    }

    /// Full run. Trusted items bypass the quality gate entirely.
    pub async fn run(&self, candidates: Vec<EventCandidate>, max: Option<usize>) -> RunOutcome {
        let max = max.unwrap_or(self.cfg.max_per_run);
        let batch_id = batch_fingerprint(&candidates);

        let (trusted, rest): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|ev| self.registry().is_trusted(&ev.source));

        let gate = self.scorer.filter_by_quality(rest, self.scorer.min_score());
        let quality = QualitySummary {
            passed: gate.passed.len(),
            rejected: gate.rejected.len(),
        };

        let outcome = match self.cfg.strategy {
            Strategy::Agent => {
                let mut input = trusted;
                input.extend(gate.passed);
                self.verify_event_batch(input, max).await
            }
            Strategy::BatchLlm => self.batch_llm_stage(trusted, gate.passed).await,
        };

        let r = &outcome.report;
        counter!("verify_runs_total").increment(1);
        counter!("verify_removed_total").increment(r.removed as u64);
        info!(
            target: "verifier",
            batch_id = %batch_id,
            quality_passed = quality.passed,
            quality_rejected = quality.rejected,
            total = r.total,
            skipped_trusted = r.skipped_trusted,
            checked = r.checked,
            cache_hits = r.cache_hits,
            verified = r.verified,
            unverified = r.unverified,
            cancelled = r.cancelled,
            removed = r.removed,
            deferred = r.deferred,
            agent_failures = r.agent_failures,
            "verification run complete"
        );

        RunOutcome {
            events: outcome.events,
            report: RunReport {
                quality,
                verifier: outcome.report,
                batch_id,
            },
        }
    }

    /// Verify up to `max` non-trusted candidates. Output order: trusted,
    /// kept checked items, deferred items (each in input order).
    pub async fn verify_event_batch(
        &self,
        candidates: Vec<EventCandidate>,
        max: usize,
    ) -> BatchOutcome {
        let mut report = VerifierReport {
            total: candidates.len(),
            ..VerifierReport::default()
        };

        let (trusted, mut to_check): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|ev| self.registry().is_trusted(&ev.source));
        report.skipped_trusted = trusted.len();
        let deferred = to_check.split_off(max.min(to_check.len()));
        report.deferred = deferred.len();

        let mut events: Vec<VerifiedEvent> =
            trusted.into_iter().map(VerifiedEvent::unchecked).collect();

        for ev in to_check {
            report.checked += 1;
            let verdict = match self.cache.get(&cache_key(&ev)) {
                Some(hit) => {
                    report.cache_hits += 1;
                    hit
                }
                None => {
                    let run = self.agent.verify(&ev).await;
                    if run.recovered() {
                        report.agent_failures += 1;
                    }
                    run.result
                }
            };

            if verdict.verified {
                report.verified += 1;
            } else {
                report.unverified += 1;
            }
            if verdict.cancelled {
                report.cancelled += 1;
            }
            if verdict.is_removal() {
                report.removed += 1;
                info!(
                    target: "verifier",
                    title = %ev.title,
                    venue = %ev.venue_label(),
                    reasoning = %verdict.reasoning,
                    "removed cancelled event"
                );
                continue;
            }
            events.push(VerifiedEvent::with_verdict(ev, verdict));
        }

        events.extend(deferred.into_iter().map(VerifiedEvent::unchecked));

        if let Err(e) = self.cache.flush() {
            warn!(target: "verifier", error = %e, "cache flush failed");
        }

        BatchOutcome { events, report }
    }

    async fn batch_llm_stage(
        &self,
        trusted: Vec<EventCandidate>,
        ambiguous: Vec<EventCandidate>,
    ) -> BatchOutcome {
        let mut report = VerifierReport {
            total: trusted.len() + ambiguous.len(),
            skipped_trusted: trusted.len(),
            ..VerifierReport::default()
        };

        let (kept, fr) = self.batch.filter(ambiguous, &self.scorer).await;
        report.checked = fr.sent;
        report.verified = fr.kept;
        report.removed = fr.dropped;
        report.agent_failures = fr.fallback_items;

        let events = trusted
            .into_iter()
            .chain(kept)
            .map(VerifiedEvent::unchecked)
            .collect();
        BatchOutcome { events, report }
    }
}

/// Short SHA-256 over the batch's cache keys, for log correlation.
pub fn batch_fingerprint(candidates: &[EventCandidate]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for ev in candidates {
        hasher.update(cache_key(ev).as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
