//! Batch LLM filter: the search-free verification strategy.
//!
//! Ambiguous candidates go to the model in fixed-size groups with one
//! question: which of these look like real events? The reply is a JSON list
//! of indices. A failed batch (provider error or unparseable reply) follows
//! the failure policy: `closed` re-filters the batch with the quality scorer
//! at the stricter fallback threshold, `open` keeps the whole batch.

use crate::agent::llm::{ChatMessage, CompletionRequest, DynLlm};
use crate::agent::strip_code_fences;
use crate::config::FailurePolicy;
use crate::error::{VerifyError, VerifyResult};
use crate::event::EventCandidate;
use crate::quality::QualityScorer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You review scraped local event listings. Some are real, scheduled events; others are generated guesses, recurring promotions or noise. Reply with ONLY a JSON array of the indices of the listings that look like real events, e.g. [0, 2, 5]. No prose.";

/// `[batch_filter]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchFilterConfig {
    pub batch_size: usize,
    /// Pause between batches (not after the last one).
    pub delay_ms: u64,
    /// Quality threshold applied to a failed batch under the closed policy.
    pub fallback_min_score: u8,
    pub max_tokens: u32,
}

impl Default for BatchFilterConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            delay_ms: 1500,
            fallback_min_score: 55,
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchFilterReport {
    pub batches: usize,
    pub sent: usize,
    pub kept: usize,
    pub dropped: usize,
    pub failed_batches: usize,
    /// Items decided by the failure policy instead of the model.
    pub fallback_items: usize,
}

pub struct BatchLlmFilter {
    llm: DynLlm,
    cfg: BatchFilterConfig,
    policy: FailurePolicy,
}

impl BatchLlmFilter {
    pub fn new(llm: DynLlm, cfg: BatchFilterConfig, policy: FailurePolicy) -> Self {
        Self { llm, cfg, policy }
    }

    /// Keep the candidates the model calls real, in input order.
    pub async fn filter(
        &self,
        candidates: Vec<EventCandidate>,
        scorer: &QualityScorer,
    ) -> (Vec<EventCandidate>, BatchFilterReport) {
        let mut report = BatchFilterReport::default();
        let mut kept = Vec::with_capacity(candidates.len());
        let size = self.cfg.batch_size.max(1);

        let mut rest = candidates;
        while !rest.is_empty() {
            if report.batches > 0 && self.cfg.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.cfg.delay_ms)).await;
            }
            let tail = rest.split_off(size.min(rest.len()));
            let batch = std::mem::replace(&mut rest, tail);
            report.batches += 1;
            report.sent += batch.len();

            match self.ask(&batch).await {
                Ok(real) => {
                    for (i, ev) in batch.into_iter().enumerate() {
                        if real.contains(&i) {
                            kept.push(ev);
                        } else {
                            report.dropped += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        target: "verifier",
                        error = %e,
                        size = batch.len(),
                        policy = ?self.policy,
                        "batch filter failed; applying failure policy"
                    );
                    report.failed_batches += 1;
                    report.fallback_items += batch.len();
                    for ev in batch {
                        let keep = match self.policy {
                            FailurePolicy::Open => true,
                            FailurePolicy::Closed => {
                                scorer.score_event(&ev) >= self.cfg.fallback_min_score
                            }
                        };
                        if keep {
                            kept.push(ev);
                        } else {
                            report.dropped += 1;
                        }
                    }
                }
            }
        }

        report.kept = kept.len();
        info!(
            target: "verifier",
            batches = report.batches,
            sent = report.sent,
            kept = report.kept,
            dropped = report.dropped,
            failed_batches = report.failed_batches,
            "batch filter done"
        );
        (kept, report)
    }

    async fn ask(&self, batch: &[EventCandidate]) -> VerifyResult<BTreeSet<usize>> {
        let messages = [ChatMessage::User(batch_prompt(batch))];
        let req = CompletionRequest {
            system: SYSTEM_PROMPT,
            messages: &messages,
            tools: &[],
            max_tokens: self.cfg.max_tokens,
        };
        let reply = self.llm.complete(req).await?;
        let indices = parse_indices(&reply.text)?;
        Ok(indices.into_iter().filter(|i| *i < batch.len()).collect())
    }
}

fn batch_prompt(batch: &[EventCandidate]) -> String {
    let mut s = String::from("Listings:\n");
    for (i, ev) in batch.iter().enumerate() {
        let desc: String = ev.description.trim().chars().take(120).collect();
        s.push_str(&format!(
            "{i}. {} | {} | {} | source: {}",
            ev.title,
            ev.venue_label(),
            ev.date_key(),
            ev.source
        ));
        if !desc.is_empty() {
            s.push_str(&format!(" | {desc}"));
        }
        s.push('\n');
    }
    s
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IndexReply {
    List(Vec<usize>),
    Wrapped { real: Vec<usize> },
}

/// Accepts `[0, 2]`, `{"real": [0, 2]}` or either wrapped in prose/fences.
pub fn parse_indices(text: &str) -> VerifyResult<Vec<usize>> {
    let body = strip_code_fences(text);
    let parsed = serde_json::from_str::<IndexReply>(body).or_else(|first| {
        let span = match (body.find('{'), body.rfind('}')) {
            (Some(a), Some(b)) if a < b => Some(&body[a..=b]),
            _ => match (body.find('['), body.rfind(']')) {
                (Some(a), Some(b)) if a < b => Some(&body[a..=b]),
                _ => None,
            },
        };
        match span {
            Some(s) => serde_json::from_str::<IndexReply>(s),
            None => Err(first),
        }
    });
    match parsed {
        Ok(IndexReply::List(v)) | Ok(IndexReply::Wrapped { real: v }) => Ok(v),
        Err(e) => Err(VerifyError::AgentParse(e.to_string())),
    }
}
