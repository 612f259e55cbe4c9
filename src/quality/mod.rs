//! Deterministic, network-free quality scoring and the quality gate.
//!
//! Order of evaluation (first hit wins):
//! 1) venue/title blacklist or government-meeting pattern → 0, any tier
//! 2) low-tier source → 0
//! 3) base score plus/minus content signals, clamped to [0,100]
//!
//! The gate runs before any network call so only ambiguous, non-rejected
//! candidates ever reach the LLM stage.

pub mod patterns;

use crate::event::{Confidence, EventCandidate};
use crate::source_confidence::SourceConfidenceRegistry;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub use patterns::{PatternBank, PatternPaths, QualityPatterns};

/// Rejections logged individually per run; the rest only count.
pub const REJECT_LOG_SAMPLE: usize = 10;

/// `[quality]` section of the pipeline config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_score: u8,
    pub base_score: i32,
    pub url_bonus: i32,
    pub long_description_bonus: i32,
    pub performer_bonus: i32,
    pub short_description_penalty: i32,
    /// Descriptions longer than this earn the bonus.
    pub long_description_chars: usize,
    /// Descriptions shorter than this take the penalty.
    pub short_description_chars: usize,
    pub patterns: PatternPaths,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_score: 50,
            base_score: 70,
            url_bonus: 10,
            long_description_bonus: 5,
            performer_bonus: 10,
            short_description_penalty: 15,
            long_description_chars: 100,
            short_description_chars: 30,
            patterns: PatternPaths::default(),
        }
    }
}

/// Score plus the rules that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityScore {
    pub score: u8,
    pub tier: Confidence,
    pub reasons: Vec<String>,
}

/// A candidate that failed the gate.
#[derive(Debug, Clone)]
pub struct Rejected {
    pub event: EventCandidate,
    pub score: u8,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QualityOutcome {
    pub passed: Vec<EventCandidate>,
    pub rejected: Vec<Rejected>,
}

#[derive(Debug, Clone)]
pub struct QualityScorer {
    registry: Arc<SourceConfidenceRegistry>,
    patterns: Arc<QualityPatterns>,
    cfg: QualityConfig,
}

impl QualityScorer {
    pub fn new(
        registry: Arc<SourceConfidenceRegistry>,
        patterns: Arc<QualityPatterns>,
        cfg: QualityConfig,
    ) -> Self {
        Self {
            registry,
            patterns,
            cfg,
        }
    }

    pub fn min_score(&self) -> u8 {
        self.cfg.min_score
    }

    pub fn registry(&self) -> &Arc<SourceConfidenceRegistry> {
        &self.registry
    }

    /// Swap the tier tables (admin reload). Patterns and weights stay.
    pub fn with_registry(&self, registry: Arc<SourceConfidenceRegistry>) -> Self {
        Self {
            registry,
            patterns: self.patterns.clone(),
            cfg: self.cfg.clone(),
        }
    }

    pub fn score_event(&self, ev: &EventCandidate) -> u8 {
        self.score_explained(ev).score
    }

    pub fn score_explained(&self, ev: &EventCandidate) -> QualityScore {
        let tier = self.registry.classify(&ev.source);
        let p = &self.patterns;

        // (1) Content blacklists, regardless of tier.
        let venue = ev.venue_name.as_str();
        let hit = p
            .venue_blacklist
            .first_match(venue)
            .map(|m| format!("blacklist:venue:{m}"))
            .or_else(|| {
                p.venue_blacklist
                    .first_match(&ev.title)
                    .map(|m| format!("blacklist:venue:{m}"))
            })
            .or_else(|| {
                p.title_blacklist
                    .first_match(&ev.title)
                    .map(|m| format!("blacklist:title:{m}"))
            })
            .or_else(|| {
                let text = format!("{} {}", ev.title, ev.description);
                p.government
                    .first_match(&text)
                    .map(|m| format!("government:{m}"))
            });
        if let Some(reason) = hit {
            return QualityScore {
                score: 0,
                tier,
                reasons: vec![reason],
            };
        }

        // (2) Low tier auto-reject.
        if tier == Confidence::Low {
            return QualityScore {
                score: 0,
                tier,
                reasons: vec!["tier:low".into()],
            };
        }

        // (3) Content signals.
        let c = &self.cfg;
        let mut score = c.base_score;
        let mut reasons = vec![format!("base:{}", c.base_score)];
        let desc_len = ev.description_len();

        if ev.has_source_url() {
            score += c.url_bonus;
            reasons.push(format!("+url:{}", c.url_bonus));
        }
        if desc_len > c.long_description_chars {
            score += c.long_description_bonus;
            reasons.push(format!("+description:{}", c.long_description_bonus));
        }
        if p.performer.is_match(&ev.title) {
            score += c.performer_bonus;
            reasons.push(format!("+performer:{}", c.performer_bonus));
        }
        if desc_len < c.short_description_chars {
            score -= c.short_description_penalty;
            reasons.push(format!("-short_description:{}", c.short_description_penalty));
        }

        QualityScore {
            score: score.clamp(0, 100) as u8,
            tier,
            reasons,
        }
    }

    /// Partition into passed (score >= `min_score`) and rejected, in input order.
    /// Logs a bounded sample of rejections plus the total.
    pub fn filter_by_quality(&self, candidates: Vec<EventCandidate>, min_score: u8) -> QualityOutcome {
        let mut out = QualityOutcome::default();

        for ev in candidates {
            let q = self.score_explained(&ev);
            if q.score >= min_score {
                out.passed.push(ev);
                continue;
            }
            if out.rejected.len() < REJECT_LOG_SAMPLE {
                info!(
                    target: "quality",
                    title = %ev.title,
                    score = q.score,
                    source = %ev.source,
                    reasons = ?q.reasons,
                    "rejected"
                );
            }
            out.rejected.push(Rejected {
                event: ev,
                score: q.score,
                reasons: q.reasons,
            });
        }

        if out.rejected.len() > REJECT_LOG_SAMPLE {
            info!(
                target: "quality",
                shown = REJECT_LOG_SAMPLE,
                total = out.rejected.len(),
                "more rejections not logged individually"
            );
        }

        counter!("quality_passed_total").increment(out.passed.len() as u64);
        counter!("quality_rejected_total").increment(out.rejected.len() as u64);
        out
    }
}
