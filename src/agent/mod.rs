//! Corroboration agent: one candidate in, one verdict out.
//!
//! The model gets a single tool, `search_web`, and must finish with a strict
//! JSON verdict. The loop is an explicit state machine:
//!
//! ```text
//! AwaitingModel ──tool calls──▶ AwaitingToolResult ──results──▶ AwaitingModel
//!       │                                                          …
//!       ├──final text──▶ Done ──▶ parsed verdict (cached) | recovery
//!       └──turn cap────▶ TurnLimitExceeded ──▶ recovery
//! ```
//!
//! A turn is one model completion; `max_turns` bounds cost per candidate.
//! Nothing in here returns an error: tool failures become `{found:false,
//! error}` results and parse/provider/turn-limit failures become the
//! configured failure-policy verdict.

pub mod llm;
pub mod search;

use crate::cache::{cache_key, VerificationCache};
use crate::config::FailurePolicy;
use crate::error::{VerifyError, VerifyResult};
use crate::event::{Confidence, EventCandidate, VerificationResult};
use chrono::Utc;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub use llm::{
    build_llm_client, ChatMessage, Completion, CompletionRequest, DynLlm, LlmClient,
    MockLlmClient, ToolCall, ToolSpec,
};
pub use search::{HtmlSearch, SearchHit, SearchOutcome, SearchTool, DEFAULT_SEARCH_ENDPOINT};

pub const SEARCH_TOOL_NAME: &str = "search_web";

const SYSTEM_PROMPT: &str = r#"You check whether a local event listing is real and still happening.

You may call the search_web tool to look for corroborating evidence: the venue's own site or social accounts, ticketing pages, local press. Use at most three searches and prefer specific queries (event title + venue + date).

When you are done, reply with ONLY a JSON object, no prose and no code fences:
{"verified": true|false, "confidence": "high"|"medium"|"low", "reasoning": "<one sentence>", "cancelled": true|false}

Rules:
- verified=true only when a result clearly refers to this event (same venue and date, or a matching published recurring schedule).
- If searches fail or find nothing relevant, answer verified=false, cancelled=false, confidence="low". Missing evidence is not cancellation.
- cancelled=true only when a result explicitly says this event is cancelled or postponed. Use confidence="high" for that only when the statement comes from the venue, the organizer or the ticket seller."#;

/// `[agent]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_turns: u32,
    pub max_tokens: u32,
    pub search_endpoint: String,
    pub search_timeout_secs: u64,
    pub max_results: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 4,
            max_tokens: 1024,
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            search_timeout_secs: 8,
            max_results: 5,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    /// Model produced a parseable verdict (cached).
    Verdict,
    ParseError,
    ProviderError,
    TurnLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRun {
    pub result: VerificationResult,
    pub outcome: AgentOutcome,
    /// Model completions requested.
    pub turns: u32,
    /// Searches actually executed.
    pub searches: u32,
}

impl AgentRun {
    pub fn recovered(&self) -> bool {
        self.outcome != AgentOutcome::Verdict
    }
}

#[derive(Debug)]
enum LoopState {
    AwaitingModel,
    AwaitingToolResult(Vec<ToolCall>),
    Done(String),
    TurnLimitExceeded,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("agent_runs_total", "Candidates sent to the corroboration agent.");
        describe_counter!("agent_search_calls_total", "search_web tool invocations.");
        describe_counter!(
            "agent_search_errors_total",
            "search_web failures reported to the model as no evidence."
        );
        describe_counter!(
            "agent_recoveries_total",
            "Runs that ended in the failure-policy verdict."
        );
        describe_histogram!("agent_duration_ms", "Wall time per agent run in milliseconds.");
    });
}

pub struct CorroborationAgent {
    llm: DynLlm,
    search: Arc<dyn SearchTool>,
    cache: Arc<VerificationCache>,
    policy: FailurePolicy,
    max_turns: u32,
    max_tokens: u32,
}

impl CorroborationAgent {
    pub fn new(
        llm: DynLlm,
        search: Arc<dyn SearchTool>,
        cache: Arc<VerificationCache>,
        policy: FailurePolicy,
        cfg: &AgentConfig,
    ) -> Self {
        Self {
            llm,
            search,
            cache,
            policy,
            max_turns: cfg.max_turns.max(1),
            max_tokens: cfg.max_tokens,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.llm.provider_name()
    }

    /// Run the tool loop for one candidate. Never fails.
    pub async fn verify(&self, ev: &EventCandidate) -> AgentRun {
        ensure_metrics_described();
        counter!("agent_runs_total").increment(1);
        let started = Instant::now();

        let tools = [search_tool_spec()];
        let mut messages = vec![ChatMessage::User(user_prompt(ev))];
        let mut turns = 0u32;
        let mut searches = 0u32;
        let mut state = LoopState::AwaitingModel;

        let run = loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if turns >= self.max_turns {
                        LoopState::TurnLimitExceeded
                    } else {
                        turns += 1;
                        let req = CompletionRequest {
                            system: SYSTEM_PROMPT,
                            messages: &messages,
                            tools: &tools,
                            max_tokens: self.max_tokens,
                        };
                        let reply = self.llm.complete(req).await;
                        match reply {
                            Ok(c) if c.tool_calls.is_empty() => LoopState::Done(c.text),
                            // No turn left to read the results.
                            Ok(_) if turns >= self.max_turns => LoopState::TurnLimitExceeded,
                            Ok(c) => {
                                let calls = c.tool_calls.clone();
                                messages.push(ChatMessage::Assistant {
                                    text: c.text,
                                    tool_calls: c.tool_calls,
                                });
                                LoopState::AwaitingToolResult(calls)
                            }
                            Err(e) => {
                                break self.recover(AgentOutcome::ProviderError, &e, ev, turns, searches)
                            }
                        }
                    }
                }
                LoopState::AwaitingToolResult(calls) => {
                    for call in calls {
                        let content = self.run_tool(&call, &mut searches).await;
                        messages.push(ChatMessage::ToolResult {
                            call_id: call.id,
                            content,
                        });
                    }
                    LoopState::AwaitingModel
                }
                LoopState::Done(text) => match parse_verdict(&text) {
                    Ok(result) => {
                        self.cache.set(&cache_key(ev), result.clone());
                        debug!(
                            target: "agent",
                            title = %ev.title,
                            verified = result.verified,
                            confidence = %result.confidence,
                            cancelled = result.cancelled,
                            turns,
                            searches,
                            "verdict"
                        );
                        break AgentRun {
                            result,
                            outcome: AgentOutcome::Verdict,
                            turns,
                            searches,
                        };
                    }
                    Err(e) => break self.recover(AgentOutcome::ParseError, &e, ev, turns, searches),
                },
                LoopState::TurnLimitExceeded => {
                    let e = VerifyError::TurnLimit(self.max_turns);
                    break self.recover(AgentOutcome::TurnLimit, &e, ev, turns, searches);
                }
            };
        };

        histogram!("agent_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        run
    }

    /// Execute one tool call; always yields a JSON tool result.
    async fn run_tool(&self, call: &ToolCall, searches: &mut u32) -> String {
        if call.name != SEARCH_TOOL_NAME {
            return SearchOutcome::failed(format!("unknown tool `{}`", call.name)).to_json();
        }
        let query = call
            .input
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty());
        let Some(query) = query else {
            return SearchOutcome::failed("missing `query` argument").to_json();
        };

        *searches += 1;
        counter!("agent_search_calls_total").increment(1);
        match self.search.search(query).await {
            Ok(hits) => SearchOutcome::from_hits(hits).to_json(),
            Err(e) => {
                warn!(target: "agent", query, error = %e, "search failed");
                counter!("agent_search_errors_total").increment(1);
                SearchOutcome::failed(e.to_string()).to_json()
            }
        }
    }

    fn recover(
        &self,
        outcome: AgentOutcome,
        err: &VerifyError,
        ev: &EventCandidate,
        turns: u32,
        searches: u32,
    ) -> AgentRun {
        warn!(
            target: "agent",
            title = %ev.title,
            source = %ev.source,
            error = %err,
            policy = ?self.policy,
            "verification degraded"
        );
        counter!("agent_recoveries_total").increment(1);
        let reason = match outcome {
            AgentOutcome::ParseError => "parse error",
            AgentOutcome::ProviderError => "provider error",
            AgentOutcome::TurnLimit => "turn limit exceeded",
            AgentOutcome::Verdict => "verdict",
        };
        AgentRun {
            result: fallback_verdict(self.policy, reason),
            outcome,
            turns,
            searches,
        }
    }
}

/// Verdict used when the agent could not produce one. Never a removal.
pub fn fallback_verdict(policy: FailurePolicy, reasoning: &str) -> VerificationResult {
    VerificationResult {
        verified: policy == FailurePolicy::Open,
        confidence: Confidence::Low,
        reasoning: reasoning.to_string(),
        cancelled: false,
    }
}

pub fn search_tool_spec() -> ToolSpec {
    ToolSpec {
        name: SEARCH_TOOL_NAME,
        description: "Search the web. Returns up to 5 result titles and snippets, or found=false.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" }
            },
            "required": ["query"]
        }),
    }
}

fn user_prompt(ev: &EventCandidate) -> String {
    let mut s = format!(
        "Today is {}.\nVerify this event listing:\n- Title: {}\n- Starts: {}\n- Venue: {}\n",
        Utc::now().format("%Y-%m-%d"),
        ev.title,
        ev.start.format("%A %Y-%m-%d %H:%M %:z"),
        ev.venue_label(),
    );
    if !ev.venue_address.trim().is_empty() {
        s.push_str(&format!("- Address: {}\n", ev.venue_address.trim()));
    }
    if !ev.city.trim().is_empty() {
        s.push_str(&format!("- City: {}\n", ev.city.trim()));
    }
    if let Some(url) = ev.source_url.as_deref().filter(|u| !u.trim().is_empty()) {
        s.push_str(&format!("- Listing URL: {url}\n"));
    }
    s.push_str(&format!("- Listed by: {}\n", ev.source));
    let desc: String = ev.description.trim().chars().take(500).collect();
    if !desc.is_empty() {
        s.push_str(&format!("- Description: {desc}\n"));
    }
    s
}

#[derive(Deserialize)]
struct RawVerdict {
    verified: bool,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    cancelled: bool,
}

/// Parse the model's final text into a verdict.
pub fn parse_verdict(text: &str) -> VerifyResult<VerificationResult> {
    let body = strip_code_fences(text);
    let raw: RawVerdict = serde_json::from_str(body)
        .or_else(|first| match (body.find('{'), body.rfind('}')) {
            (Some(a), Some(b)) if a < b => serde_json::from_str(&body[a..=b]),
            _ => Err(first),
        })
        .map_err(|e| VerifyError::AgentParse(e.to_string()))?;

    Ok(VerificationResult {
        verified: raw.verified,
        confidence: raw
            .confidence
            .as_deref()
            .map(Confidence::parse_lenient)
            .unwrap_or(Confidence::Low),
        reasoning: raw.reasoning,
        cancelled: raw.cancelled,
    })
}

/// Remove a surrounding Markdown code fence (```json … ```), if any.
pub fn strip_code_fences(s: &str) -> &str {
    let t = s.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn parses_fenced_verdict() {
        let v = parse_verdict(
            "```json\n{\"verified\": true, \"confidence\": \"HIGH\", \"reasoning\": \"venue site\", \"cancelled\": false}\n```",
        )
        .unwrap();
        assert!(v.verified);
        assert_eq!(v.confidence, Confidence::High);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let v = parse_verdict(
            "Here you go: {\"verified\": false, \"confidence\": \"medium\", \"reasoning\": \"nothing\"} thanks",
        )
        .unwrap();
        assert!(!v.verified);
        assert!(!v.cancelled);
        assert_eq!(v.confidence, Confidence::Medium);
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_verdict("I could not find anything."),
            Err(VerifyError::AgentParse(_))
        ));
        assert!(parse_verdict("{\"confidence\": \"high\"}").is_err());
    }

    #[test]
    fn fallback_is_never_a_removal() {
        for p in [FailurePolicy::Open, FailurePolicy::Closed] {
            let v = fallback_verdict(p, "parse error");
            assert!(!v.is_removal());
            assert_eq!(v.confidence, Confidence::Low);
        }
        assert!(fallback_verdict(FailurePolicy::Open, "x").verified);
        assert!(!fallback_verdict(FailurePolicy::Closed, "x").verified);
    }
}
