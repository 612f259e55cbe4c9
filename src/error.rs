//! Error taxonomy for the verification stage.
//!
//! None of these escape a batch run: each is recovered where it occurs
//! (tool boundary, agent loop, cache flush) and only logged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    /// Search endpoint unreachable, timed out or returned garbage.
    #[error("search tool failed: {0}")]
    Tool(String),

    /// Model output was not the expected JSON verdict.
    #[error("agent output unparseable: {0}")]
    AgentParse(String),

    /// LLM API unreachable, non-2xx, or an unexpected response envelope.
    #[error("llm provider error: {0}")]
    Provider(String),

    #[error("agent exceeded {0} turns without a verdict")]
    TurnLimit(u32),

    #[error("cache io: {0}")]
    CacheIo(#[from] std::io::Error),

    #[error("cache format: {0}")]
    CacheFormat(#[from] serde_json::Error),
}

impl From<reqwest::Error> for VerifyError {
    fn from(e: reqwest::Error) -> Self {
        VerifyError::Provider(e.to_string())
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;
