//! Candidate events and verification verdicts.
//!
//! `EventCandidate` is produced upstream by scrapers/generators and is never
//! mutated here. The pipeline only attaches a `VerificationResult` to it.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Coarse trust tier. Used both for source classification and for the
/// confidence an agent attaches to its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    /// Lenient parse used for model output: unknown values map to `Low`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" | "med" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prospective event from an untrusted upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCandidate {
    pub title: String,
    /// Local start time including the venue's UTC offset.
    pub start: DateTime<FixedOffset>,
    #[serde(default)]
    pub venue_name: String,
    #[serde(default)]
    pub venue_address: String,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub description: String,
    pub source: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl EventCandidate {
    /// Venue label used for keys and prompts; falls back to the neighborhood.
    pub fn venue_label(&self) -> &str {
        if self.venue_name.trim().is_empty() {
            self.neighborhood.trim()
        } else {
            self.venue_name.trim()
        }
    }

    /// Calendar date in the event's own offset, `YYYY-MM-DD`.
    pub fn date_key(&self) -> String {
        self.start.date_naive().format("%Y-%m-%d").to_string()
    }

    /// Description length in chars after trimming.
    pub fn description_len(&self) -> usize {
        self.description.trim().chars().count()
    }

    pub fn has_source_url(&self) -> bool {
        self.source_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }
}

/// Outcome of corroborating one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub confidence: Confidence,
    pub reasoning: String,
    #[serde(default)]
    pub cancelled: bool,
}

impl VerificationResult {
    /// The only verdict that removes a candidate from the output.
    pub fn is_removal(&self) -> bool {
        self.cancelled && self.confidence == Confidence::High
    }
}

/// Output item: the candidate plus the verdict, when one was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedEvent {
    #[serde(flatten)]
    pub event: EventCandidate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
}

impl VerifiedEvent {
    pub fn unchecked(event: EventCandidate) -> Self {
        Self {
            event,
            verification: None,
        }
    }

    pub fn with_verdict(event: EventCandidate, verdict: VerificationResult) -> Self {
        Self {
            event,
            verification: Some(verdict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventCandidate {
        serde_json::from_str(
            r#"{
                "title": "Jazz Night",
                "start": "2026-10-24T21:00:00-04:00",
                "venue_name": "  ",
                "neighborhood": "Wynwood",
                "source": "eventbrite"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn date_key_uses_local_offset() {
        // 21:00 at -04:00 is already the next day in UTC.
        assert_eq!(sample().date_key(), "2026-10-24");
    }

    #[test]
    fn venue_label_falls_back_to_neighborhood() {
        assert_eq!(sample().venue_label(), "Wynwood");
    }

    #[test]
    fn removal_requires_cancelled_and_high() {
        let mut v = VerificationResult {
            verified: false,
            confidence: Confidence::Medium,
            reasoning: "venue says cancelled".into(),
            cancelled: true,
        };
        assert!(!v.is_removal());
        v.confidence = Confidence::High;
        assert!(v.is_removal());
    }

    #[test]
    fn lenient_confidence_parse() {
        assert_eq!(Confidence::parse_lenient(" HIGH "), Confidence::High);
        assert_eq!(Confidence::parse_lenient("maybe"), Confidence::Low);
    }
}
