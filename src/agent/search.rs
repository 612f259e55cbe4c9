//! `search_web` tool: GET a public HTML results page and scrape the first
//! few titles/snippets.
//!
//! Best effort only. Zero results is a normal outcome; transport failures
//! come back as `VerifyError::Tool` and the agent turns them into a
//! `{found:false, error}` tool result.

use crate::error::{VerifyError, VerifyResult};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

/// Tool result shape fed back to the model:
/// `{found:true, results:[..]}` or `{found:false, message|error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn from_hits(hits: Vec<SearchHit>) -> Self {
        if hits.is_empty() {
            return Self {
                found: false,
                results: Vec::new(),
                message: Some("No results found".into()),
                error: None,
            };
        }
        Self {
            found: true,
            results: hits,
            message: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            found: false,
            results: Vec::new(),
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"found":false}"#.to_string())
    }
}

#[async_trait]
pub trait SearchTool: Send + Sync {
    async fn search(&self, query: &str) -> VerifyResult<Vec<SearchHit>>;
    fn name(&self) -> &'static str;
}

/// DuckDuckGo-style HTML endpoint scraper.
pub struct HtmlSearch {
    http: reqwest::Client,
    endpoint: String,
    max_results: usize,
}

impl HtmlSearch {
    pub fn new(endpoint: &str, timeout: Duration, max_results: usize) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; event-verifier/0.1)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            max_results,
        })
    }
}

#[async_trait]
impl SearchTool for HtmlSearch {
    async fn search(&self, query: &str) -> VerifyResult<Vec<SearchHit>> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| VerifyError::Tool(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(VerifyError::Tool(format!("search http {status}")));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| VerifyError::Tool(e.to_string()))?;
        Ok(extract_results(&html, self.max_results))
    }

    fn name(&self) -> &'static str {
        "html_search"
    }
}

/// Pull titles and snippets out of a results page, in page order.
pub fn extract_results(html: &str, max: usize) -> Vec<SearchHit> {
    static RE_TITLE: OnceCell<Regex> = OnceCell::new();
    static RE_SNIPPET: OnceCell<Regex> = OnceCell::new();
    let re_title = RE_TITLE.get_or_init(|| {
        Regex::new(r#"(?is)<a[^>]*class="[^"]*\bresult__a\b[^"]*"[^>]*>(.*?)</a>"#)
            .expect("title regex")
    });
    let re_snippet = RE_SNIPPET.get_or_init(|| {
        Regex::new(r#"(?is)<(a|div|td)[^>]*class="[^"]*\bresult__snippet\b[^"]*"[^>]*>(.*?)</(?:a|div|td)>"#)
            .expect("snippet regex")
    });

    // Each result runs from its title anchor to the next one, so a result
    // without a snippet never borrows its neighbour's.
    let anchors: Vec<_> = re_title.captures_iter(html).collect();
    let mut hits = Vec::new();
    for (i, caps) in anchors.iter().enumerate() {
        if hits.len() >= max {
            break;
        }
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let title = clean_fragment(inner.as_str());
        if title.is_empty() {
            continue;
        }
        let end = anchors
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(html.len(), |m| m.start());
        let snippet = re_snippet
            .captures(&html[whole.end()..end])
            .and_then(|c| c.get(2))
            .map(|m| clean_fragment(m.as_str()))
            .unwrap_or_default();
        hits.push(SearchHit { title, snippet });
    }
    hits
}

/// Strip tags, decode entities, collapse whitespace.
fn clean_fragment(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex"));
    let stripped = re_tags.replace_all(s, "");
    let decoded = html_escape::decode_html_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
