//! # Source Confidence
//!
//! Maps an upstream source name (e.g. "ticketmaster", "recurring_templates")
//! to a trust tier:
//!
//! - allow-list membership → `high`
//! - deny-list membership (generic, unconfirmed recurrence) → `low`
//! - anything else → the configured default (`medium`, benefit of the doubt)
//!
//! Lookup is case-insensitive and tolerant of separators (`-`, `_`, `.`),
//! aliases are resolved first, and membership is exact on the normalized
//! name. The registry also carries the trusted-source set whose events skip
//! verification entirely.

use crate::event::Confidence;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// `[sources]` section of the pipeline config. Keys left out keep the
/// built-in seed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Tier for names in neither list.
    pub default_tier: Confidence,
    /// Allow-list: verified ticketing/venue feeds.
    pub high: Vec<String>,
    /// Deny-list: templates and social inference.
    pub low: Vec<String>,
    /// Sources that skip verification. Defaults to the allow-list.
    pub trusted: Option<Vec<String>>,
    /// Alternative spelling → canonical name.
    pub aliases: HashMap<String, String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl SourcesConfig {
    /// Built-in seed used when no config is found.
    pub fn default_seed() -> Self {
        let high = [
            "ticketmaster",
            "eventbrite",
            "dice",
            "resident advisor",
            "songkick",
            "bandsintown",
            "seatgeek",
            "axs",
            "venue calendar",
            "live nation",
        ];
        let low = [
            "recurring templates",
            "recurring generator",
            "weekly specials",
            "instagram inferred",
            "social inference",
            "facebook inferred",
            "happy hour templates",
        ];
        let aliases = [
            ("ra", "resident advisor"),
            ("residentadvisor", "resident advisor"),
            ("tm", "ticketmaster"),
            ("livenation", "live nation"),
            ("ig inferred", "instagram inferred"),
            ("templates", "recurring templates"),
        ];

        Self {
            default_tier: Confidence::Medium,
            high: high.iter().map(|s| s.to_string()).collect(),
            low: low.iter().map(|s| s.to_string()).collect(),
            trusted: None,
            aliases: aliases
                .iter()
                .map(|(a, c)| (a.to_string(), c.to_string()))
                .collect(),
        }
    }
}

/// Injected classifier. Built once; tiers never change after construction.
#[derive(Debug, Clone)]
pub struct SourceConfidenceRegistry {
    default_tier: Confidence,
    high: HashSet<String>,
    low: HashSet<String>,
    trusted: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl SourceConfidenceRegistry {
    pub fn new(cfg: &SourcesConfig) -> Self {
        let low: HashSet<String> = cfg.low.iter().map(|s| normalize(s)).collect();
        let mut high: HashSet<String> = HashSet::new();
        for name in &cfg.high {
            let n = normalize(name);
            if low.contains(&n) {
                // Stricter list wins.
                warn!(target: "sources", source = %n, "source in both allow and deny lists; treating as low");
                continue;
            }
            high.insert(n);
        }

        let trusted = match &cfg.trusted {
            Some(list) => list.iter().map(|s| normalize(s)).collect(),
            None => high.clone(),
        };

        let aliases = cfg
            .aliases
            .iter()
            .map(|(a, c)| (normalize(a), normalize(c)))
            .collect();

        Self {
            default_tier: cfg.default_tier,
            high,
            low,
            trusted,
            aliases,
        }
    }

    /// Tier for a source name.
    pub fn classify(&self, source: &str) -> Confidence {
        let key = self.canonical(source);
        if self.low.contains(&key) {
            Confidence::Low
        } else if self.high.contains(&key) {
            Confidence::High
        } else {
            self.default_tier
        }
    }

    /// True if events from this source bypass verification.
    pub fn is_trusted(&self, source: &str) -> bool {
        self.trusted.contains(&self.canonical(source))
    }

    pub fn default_tier(&self) -> Confidence {
        self.default_tier
    }

    fn canonical(&self, source: &str) -> String {
        let s = normalize(source);
        match self.aliases.get(&s) {
            Some(c) => c.clone(),
            None => s,
        }
    }
}

impl Default for SourceConfidenceRegistry {
    fn default() -> Self {
        Self::new(&SourcesConfig::default_seed())
    }
}

/// Lowercase, turn separators into spaces, collapse runs of whitespace.
pub(crate) fn normalize(s: &str) -> String {
    let out = s
        .trim()
        .to_ascii_lowercase()
        .replace(['-', '_', '.', '/', '\\', '—', '–'], " ");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
