//! LLM provider abstraction for tool-use conversations.
//!
//! The agent only depends on `LlmClient::complete`: a system prompt plus a
//! conversation (user turns, assistant turns with tool calls, tool results)
//! in, assistant text and/or tool calls out. Concrete providers translate to
//! their wire formats. `MockLlmClient` and `DisabledClient` cover local runs.

use crate::config::LlmConfig;
use crate::error::{VerifyError, VerifyResult};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = "event-verifier/0.1";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// One conversation entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    User(String),
    Assistant {
        text: String,
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        content: String,
    },
}

/// Tool declaration offered to the model.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolSpec],
    pub max_tokens: u32,
}

/// Model reply. No tool calls means the text is final.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            text: s.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, req: CompletionRequest<'_>) -> VerifyResult<Completion>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynLlm = Arc<dyn LlmClient>;

/// Build a client from config and environment.
///
/// * `AI_TEST_MODE=mock` → `MockLlmClient` with a "no corroboration" verdict.
/// * `enabled == false` → `DisabledClient`.
/// * otherwise the configured provider.
pub fn build_llm_client(cfg: &LlmConfig) -> anyhow::Result<DynLlm> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockLlmClient::no_corroboration()));
    }
    if !cfg.enabled {
        return Ok(Arc::new(DisabledClient));
    }

    let timeout = Duration::from_secs(cfg.timeout_secs);
    match cfg.provider.as_str() {
        "anthropic" | "claude" => Ok(Arc::new(AnthropicClient::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
            cfg.base_url.clone(),
            timeout,
        )?)),
        "openai" => Ok(Arc::new(OpenAiClient::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
            cfg.base_url.clone(),
            timeout,
        )?)),
        other => anyhow::bail!("unsupported llm provider `{other}`"),
    }
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(4))
        .timeout(timeout)
        .build()
        .context("building llm http client")
}

async fn post_json(req: reqwest::RequestBuilder, body: &Value) -> VerifyResult<Value> {
    let resp = req.json(body).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let snippet: String = text.chars().take(200).collect();
        return Err(VerifyError::Provider(format!("http {status}: {snippet}")));
    }
    Ok(resp.json::<Value>().await?)
}

// ------------------------------------------------------------
// Anthropic Messages API
// ------------------------------------------------------------

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl AnthropicClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            model: model.unwrap_or_else(|| "claude-3-5-haiku-latest".to_string()),
            url: base_url.unwrap_or_else(|| ANTHROPIC_URL.to_string()),
        })
    }
}

#[derive(Deserialize)]
struct AnthropicResp {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Conversation → Anthropic `messages`. Consecutive tool results share one
/// user turn, as the API requires.
pub(crate) fn anthropic_messages(msgs: &[ChatMessage]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(msgs.len());
    for m in msgs {
        match m {
            ChatMessage::User(text) => out.push(json!({ "role": "user", "content": text })),
            ChatMessage::Assistant { text, tool_calls } => {
                let mut blocks = Vec::new();
                if !text.is_empty() {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
                for c in tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": c.id,
                        "name": c.name,
                        "input": c.input,
                    }));
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            ChatMessage::ToolResult { call_id, content } => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": content,
                });
                let merge = out
                    .last()
                    .is_some_and(|l| l["role"] == "user" && l["content"].is_array());
                if merge {
                    if let Some(arr) = out.last_mut().and_then(|l| l["content"].as_array_mut()) {
                        arr.push(block);
                    }
                } else {
                    out.push(json!({ "role": "user", "content": [block] }));
                }
            }
        }
    }
    out
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, req: CompletionRequest<'_>) -> VerifyResult<Completion> {
        if self.api_key.is_empty() {
            return Err(VerifyError::Provider("missing anthropic api key".into()));
        }
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        let mut body = json!({
            "model": self.model,
            "max_tokens": req.max_tokens,
            "system": req.system,
            "messages": anthropic_messages(req.messages),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }

        let raw = post_json(
            self.http
                .post(&self.url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            &body,
        )
        .await?;
        let resp: AnthropicResp = serde_json::from_value(raw)
            .map_err(|e| VerifyError::Provider(format!("unexpected anthropic response: {e}")))?;

        let mut out = Completion::default();
        for block in resp.content {
            match block {
                AnthropicBlock::Text { text } => out.text.push_str(&text),
                AnthropicBlock::ToolUse { id, name, input } => {
                    out.tool_calls.push(ToolCall { id, name, input })
                }
                AnthropicBlock::Other => {}
            }
        }
        Ok(out)
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

// ------------------------------------------------------------
// OpenAI Chat Completions API
// ------------------------------------------------------------

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            url: base_url.unwrap_or_else(|| OPENAI_URL.to_string()),
        })
    }
}

#[derive(Deserialize)]
struct OaResp {
    choices: Vec<OaChoice>,
}

#[derive(Deserialize)]
struct OaChoice {
    message: OaMessage,
}

#[derive(Deserialize)]
struct OaMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaToolCall>,
}

#[derive(Deserialize)]
struct OaToolCall {
    id: String,
    function: OaFunction,
}

#[derive(Deserialize)]
struct OaFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

pub(crate) fn openai_messages(system: &str, msgs: &[ChatMessage]) -> Vec<Value> {
    let mut out = vec![json!({ "role": "system", "content": system })];
    for m in msgs {
        out.push(match m {
            ChatMessage::User(text) => json!({ "role": "user", "content": text }),
            ChatMessage::Assistant { text, tool_calls } => {
                let mut msg = json!({ "role": "assistant", "content": text });
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": { "name": c.name, "arguments": c.input.to_string() },
                            })
                        })
                        .collect();
                }
                msg
            }
            ChatMessage::ToolResult { call_id, content } => {
                json!({ "role": "tool", "tool_call_id": call_id, "content": content })
            }
        });
    }
    out
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, req: CompletionRequest<'_>) -> VerifyResult<Completion> {
        if self.api_key.is_empty() {
            return Err(VerifyError::Provider("missing openai api key".into()));
        }
        let mut body = json!({
            "model": self.model,
            "max_tokens": req.max_tokens,
            "temperature": 0.0,
            "messages": openai_messages(req.system, req.messages),
        });
        if !req.tools.is_empty() {
            body["tools"] = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        },
                    })
                })
                .collect();
        }

        let raw = post_json(self.http.post(&self.url).bearer_auth(&self.api_key), &body).await?;
        let resp: OaResp = serde_json::from_value(raw)
            .map_err(|e| VerifyError::Provider(format!("unexpected openai response: {e}")))?;
        let msg = resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| VerifyError::Provider("openai response without choices".into()))?;

        Ok(Completion {
            text: msg.content.unwrap_or_default(),
            tool_calls: msg
                .tool_calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.function.name,
                    // Bad arguments surface later as a tool error, not here.
                    input: serde_json::from_str(&c.function.arguments).unwrap_or(Value::Null),
                })
                .collect(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Local clients
// ------------------------------------------------------------

/// Always fails with a provider error; used when the LLM stage is disabled.
pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    async fn complete(&self, _req: CompletionRequest<'_>) -> VerifyResult<Completion> {
        Err(VerifyError::Provider("llm disabled".into()))
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Returns the same final text for every request.
#[derive(Debug, Clone)]
pub struct MockLlmClient {
    pub reply: String,
}

impl MockLlmClient {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }

    pub fn no_corroboration() -> Self {
        Self::new(
            r#"{"verified": false, "confidence": "low", "reasoning": "mock: no corroboration attempted", "cancelled": false}"#,
        )
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _req: CompletionRequest<'_>) -> VerifyResult<Completion> {
        Ok(Completion::text(self.reply.clone()))
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convo() -> Vec<ChatMessage> {
        vec![
            ChatMessage::User("check this".into()),
            ChatMessage::Assistant {
                text: String::new(),
                tool_calls: vec![
                    ToolCall {
                        id: "t1".into(),
                        name: "search_web".into(),
                        input: json!({"query": "a"}),
                    },
                    ToolCall {
                        id: "t2".into(),
                        name: "search_web".into(),
                        input: json!({"query": "b"}),
                    },
                ],
            },
            ChatMessage::ToolResult {
                call_id: "t1".into(),
                content: "{}".into(),
            },
            ChatMessage::ToolResult {
                call_id: "t2".into(),
                content: "{}".into(),
            },
        ]
    }

    #[test]
    fn anthropic_groups_tool_results_into_one_user_turn() {
        let msgs = anthropic_messages(&convo());
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1]["content"].as_array().unwrap().len(), 2);
        let results = msgs[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["tool_use_id"], "t2");
    }

    #[test]
    fn openai_uses_tool_role_and_string_arguments() {
        let msgs = openai_messages("sys", &convo());
        assert_eq!(msgs.len(), 5);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(
            msgs[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"a"}"#
        );
        assert_eq!(msgs[3]["role"], "tool");
        assert_eq!(msgs[4]["tool_call_id"], "t2");
    }

    #[test]
    fn anthropic_response_blocks_decode() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "x", "name": "search_web", "input": {"query": "q"}},
                {"type": "thinking", "thinking": "..."}
            ]
        });
        let resp: AnthropicResp = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.content.len(), 3);
        assert!(matches!(resp.content[2], AnthropicBlock::Other));
    }
}
