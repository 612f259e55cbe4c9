// tests/common/mod.rs
//
// Shared fakes for integration tests: a scripted LLM, a counting search
// tool and candidate builders. No network.

#![allow(dead_code)]

use async_trait::async_trait;
use event_verifier::agent::{
    ChatMessage, Completion, CompletionRequest, LlmClient, SearchHit, SearchTool, ToolCall,
};
use event_verifier::cache::VerificationCache;
use event_verifier::{EventCandidate, PipelineConfig, TrustPipeline, VerifyError, VerifyResult};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const NO_CORROBORATION: &str = r#"{"verified": false, "confidence": "low", "reasoning": "no results", "cancelled": false}"#;
pub const CONFIRMED: &str = r#"{"verified": true, "confidence": "high", "reasoning": "venue calendar lists it", "cancelled": false}"#;
pub const CANCELLED_HIGH: &str = r#"{"verified": true, "confidence": "high", "reasoning": "venue posted cancellation", "cancelled": true}"#;
pub const CANCELLED_MEDIUM: &str = r#"{"verified": false, "confidence": "medium", "reasoning": "a forum says cancelled", "cancelled": true}"#;

type Verdict = dyn Fn(&str) -> String + Send + Sync;

/// Searches once (first turn), then answers with `verdict(user prompt)`.
pub struct FakeLlm {
    verdict: Box<Verdict>,
    search_first: bool,
    pub calls: AtomicUsize,
}

impl FakeLlm {
    pub fn answering(reply: &'static str) -> Self {
        Self::with(move |_| reply.to_string())
    }

    pub fn with(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            verdict: Box::new(f),
            search_first: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn without_search(mut self) -> Self {
        self.search_first = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn complete(&self, req: CompletionRequest<'_>) -> VerifyResult<Completion> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = match req.messages.first() {
            Some(ChatMessage::User(p)) => p.clone(),
            _ => String::new(),
        };
        let searched = req
            .messages
            .iter()
            .any(|m| matches!(m, ChatMessage::ToolResult { .. }));
        if self.search_first && !searched && !req.tools.is_empty() {
            return Ok(Completion {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: format!("call_{n}"),
                    name: "search_web".into(),
                    input: json!({ "query": "event listing" }),
                }],
            });
        }
        Ok(Completion::text((self.verdict)(&prompt)))
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// Requests a search on every turn, never answers.
pub struct EndlessSearcher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for EndlessSearcher {
    async fn complete(&self, _req: CompletionRequest<'_>) -> VerifyResult<Completion> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Completion {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: format!("loop_{n}"),
                name: "search_web".into(),
                input: json!({ "query": "again" }),
            }],
        })
    }

    fn provider_name(&self) -> &'static str {
        "endless"
    }
}

/// Provider that always errors (network down, bad key).
pub struct BrokenLlm;

#[async_trait]
impl LlmClient for BrokenLlm {
    async fn complete(&self, _req: CompletionRequest<'_>) -> VerifyResult<Completion> {
        Err(VerifyError::Provider("http 503: overloaded".into()))
    }

    fn provider_name(&self) -> &'static str {
        "broken"
    }
}

pub enum SearchMode {
    Hits(Vec<SearchHit>),
    Empty,
    Timeout,
}

pub struct FakeSearch {
    mode: SearchMode,
    pub calls: AtomicUsize,
    pub queries: std::sync::Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn new(mode: SearchMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            queries: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchTool for FakeSearch {
    async fn search(&self, query: &str) -> VerifyResult<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        match &self.mode {
            SearchMode::Hits(h) => Ok(h.clone()),
            SearchMode::Empty => Ok(Vec::new()),
            SearchMode::Timeout => Err(VerifyError::Tool("operation timed out".into())),
        }
    }

    fn name(&self) -> &'static str {
        "fake_search"
    }
}

/// Candidate on 2026-10-24 at a plain venue; tweak fields as needed.
pub fn candidate(title: &str, source: &str) -> EventCandidate {
    serde_json::from_value(json!({
        "title": title,
        "start": "2026-10-24T21:00:00-04:00",
        "venue_name": "Ball & Chain",
        "neighborhood": "Little Havana",
        "city": "Miami",
        "description": "Live band on the back patio, doors at nine, no cover before ten.",
        "source": source,
        "source_url": "https://example.org/listing",
    }))
    .unwrap()
}

pub fn medium_batch(n: usize) -> Vec<EventCandidate> {
    (0..n)
        .map(|i| candidate(&format!("Salsa Social {i}"), "local blog"))
        .collect()
}

pub fn test_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.batch_filter.delay_ms = 0;
    cfg
}

pub fn pipeline(
    cfg: &PipelineConfig,
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchTool>,
) -> (TrustPipeline, Arc<VerificationCache>) {
    let cache = Arc::new(VerificationCache::in_memory(7));
    let p = TrustPipeline::with_components(cfg, llm, search, cache.clone()).unwrap();
    (p, cache)
}
