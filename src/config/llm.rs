// src/config/llm.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "anthropic" | "openai" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from ANTHROPIC_API_KEY / OPENAI_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Override the provider endpoint (proxies, gateways).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: None,
            api_key: default_api_key(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    /// Normalize the provider name and resolve an `"ENV"` api key.
    /// A missing key is only an error when the LLM stage is enabled.
    pub fn resolve(&mut self) -> anyhow::Result<()> {
        self.provider = self.provider.trim().to_lowercase();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            let var = match self.provider.as_str() {
                "anthropic" | "claude" => Some("ANTHROPIC_API_KEY"),
                "openai" => Some("OPENAI_API_KEY"),
                _ => None,
            };
            self.api_key = match var.map(|v| (v, env::var(v))) {
                Some((_, Ok(k))) => k,
                _ if !self.enabled => String::new(),
                Some((v, Err(_))) => anyhow::bail!("Missing {v} env var"),
                None => anyhow::bail!("Unsupported llm provider in config: {}", self.provider),
            };
        }

        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        Ok(())
    }
}
