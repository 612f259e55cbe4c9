//! Pipeline configuration.
//!
//! One TOML file (default `config/pipeline.toml`, override with
//! `PIPELINE_CONFIG_PATH`) with a section per component. Every field has a
//! default, so a missing file or section means "built-in behavior".
//!
//! Env overrides applied after the file:
//! - `VERIFY_MAX_PER_RUN`    → `verifier.max_per_run`
//! - `VERIFY_CACHE_PATH`     → `verifier.cache_path`
//! - `VERIFY_FAILURE_POLICY` → `failure_policy` ("open" | "closed")

pub mod llm;

use crate::agent::AgentConfig;
use crate::batch_filter::BatchFilterConfig;
use crate::quality::QualityConfig;
use crate::source_confidence::SourcesConfig;
use crate::verifier::VerifierConfig;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use llm::LlmConfig;

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_MAX_PER_RUN: &str = "VERIFY_MAX_PER_RUN";
pub const ENV_CACHE_PATH: &str = "VERIFY_CACHE_PATH";
pub const ENV_FAILURE_POLICY: &str = "VERIFY_FAILURE_POLICY";

/// What to do with a candidate when verification itself breaks
/// (provider down, unparseable output, batch call failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep it and treat it as verified (low confidence).
    #[default]
    Open,
    /// Treat it as unverified; the batch filter falls back to the stricter
    /// quality threshold.
    Closed,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailurePolicy::Open),
            "closed" => Ok(FailurePolicy::Closed),
            other => Err(anyhow!("unknown failure policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub failure_policy: FailurePolicy,
    pub verifier: VerifierConfig,
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub quality: QualityConfig,
    pub sources: SourcesConfig,
    pub batch_filter: BatchFilterConfig,
}

impl PipelineConfig {
    /// Resolve the path, load, apply env overrides.
    /// 1) $PIPELINE_CONFIG_PATH (must exist)
    /// 2) config/pipeline.toml (if present)
    /// 3) built-in defaults
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_PIPELINE_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                ));
            }
            Self::read_file(&pb)?
        } else {
            let default = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
            if default.exists() {
                Self::read_file(&default)?
            } else {
                Self::default()
            }
        };

        cfg.apply_env_overrides()?;
        cfg.llm.resolve()?;
        Ok(cfg)
    }

    /// Load one file without env overrides or key resolution.
    pub fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing pipeline config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var(ENV_MAX_PER_RUN) {
            self.verifier.max_per_run = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_PER_RUN}={v} is not a count"))?;
        }
        if let Ok(v) = std::env::var(ENV_CACHE_PATH) {
            if !v.trim().is_empty() {
                self.verifier.cache_path = PathBuf::from(v.trim());
            }
        }
        if let Ok(v) = std::env::var(ENV_FAILURE_POLICY) {
            self.failure_policy = v.parse()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Confidence;
    use crate::verifier::Strategy;
    use std::env;

    #[test]
    fn empty_file_means_defaults() {
        let cfg = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.failure_policy, FailurePolicy::Open);
        assert_eq!(cfg.verifier.max_per_run, 20);
        assert_eq!(cfg.verifier.cache_ttl_days, 7);
        assert_eq!(cfg.agent.max_turns, 4);
        assert_eq!(cfg.quality.min_score, 50);
        assert_eq!(cfg.batch_filter.batch_size, 25);
        assert_eq!(cfg.batch_filter.fallback_min_score, 55);
        assert_eq!(cfg.sources.default_tier, Confidence::Medium);
        assert!(!cfg.sources.high.is_empty());
    }

    #[test]
    fn sections_parse() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            failure_policy = "closed"

            [verifier]
            strategy = "batch_llm"
            max_per_run = 5

            [quality]
            min_score = 60
            url_bonus = 20

            [sources]
            high = ["venue calendar"]
            low = ["templates"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.failure_policy, FailurePolicy::Closed);
        assert_eq!(cfg.verifier.strategy, Strategy::BatchLlm);
        assert_eq!(cfg.verifier.max_per_run, 5);
        assert_eq!(cfg.quality.min_score, 60);
        assert_eq!(cfg.quality.url_bonus, 20);
        assert_eq!(cfg.quality.base_score, 70);
        assert_eq!(cfg.sources.high, vec!["venue calendar".to_string()]);
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_apply() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("pipeline.toml");
        fs::write(&p, "[verifier]\nmax_per_run = 3\n").unwrap();

        env::set_var(ENV_PIPELINE_CONFIG_PATH, p.display().to_string());
        env::set_var(ENV_MAX_PER_RUN, "7");
        env::set_var(ENV_FAILURE_POLICY, "closed");
        let cfg = PipelineConfig::load();
        env::remove_var(ENV_PIPELINE_CONFIG_PATH);
        env::remove_var(ENV_MAX_PER_RUN);
        env::remove_var(ENV_FAILURE_POLICY);

        let cfg = cfg.unwrap();
        assert_eq!(cfg.verifier.max_per_run, 7);
        assert_eq!(cfg.failure_policy, FailurePolicy::Closed);
    }

    #[serial_test::serial]
    #[test]
    fn missing_env_path_is_an_error() {
        env::set_var(ENV_PIPELINE_CONFIG_PATH, "/definitely/not/here.toml");
        let res = PipelineConfig::load();
        env::remove_var(ENV_PIPELINE_CONFIG_PATH);
        assert!(res.is_err());
    }
}
