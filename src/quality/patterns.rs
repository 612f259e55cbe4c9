//! Portable pattern banks.
//!
//! A bank is plain text: one regex per line, `#` starts a comment line,
//! blank lines are skipped. Every bank is matched case-insensitively. The
//! built-in banks live in `config/patterns/` and are embedded at compile time;
//! the config may point at replacement files.

use anyhow::{anyhow, Context, Result};
use regex::{Regex, RegexSet, RegexSetBuilder};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const BUILTIN_VENUE_BLACKLIST: &str = include_str!("../../config/patterns/venue_blacklist.txt");
const BUILTIN_TITLE_BLACKLIST: &str = include_str!("../../config/patterns/title_blacklist.txt");
const BUILTIN_GOVERNMENT: &str = include_str!("../../config/patterns/government.txt");
const BUILTIN_PERFORMER: &str = include_str!("../../config/patterns/performer.txt");

/// A named, compiled list of patterns.
#[derive(Debug, Clone)]
pub struct PatternBank {
    name: String,
    patterns: Vec<String>,
    set: RegexSet,
}

impl PatternBank {
    /// Parse a line-delimited bank. Errors name the bank and 1-based line.
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let mut patterns = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // Validate one by one so the error points at the line.
            Regex::new(line)
                .map_err(|e| anyhow!("pattern bank `{name}` line {}: {e}", i + 1))?;
            patterns.push(line.to_string());
        }

        let set = RegexSetBuilder::new(&patterns)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("compiling pattern bank `{name}`"))?;

        Ok(Self {
            name: name.to_string(),
            patterns,
            set,
        })
    }

    pub fn from_file(name: &str, path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading pattern bank `{name}` from {}", path.display()))?;
        Self::parse(name, &text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.set.is_match(text)
    }

    /// Source text of the first matching pattern, for reasons/logs.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.set
            .matches(text)
            .iter()
            .next()
            .map(|i| self.patterns[i].as_str())
    }
}

/// Optional replacement files for the built-in banks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatternPaths {
    pub venue_blacklist: Option<PathBuf>,
    pub title_blacklist: Option<PathBuf>,
    pub government: Option<PathBuf>,
    pub performer: Option<PathBuf>,
}

/// The four banks the quality scorer consults.
#[derive(Debug, Clone)]
pub struct QualityPatterns {
    pub venue_blacklist: PatternBank,
    pub title_blacklist: PatternBank,
    pub government: PatternBank,
    pub performer: PatternBank,
}

impl QualityPatterns {
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            venue_blacklist: PatternBank::parse("venue_blacklist", BUILTIN_VENUE_BLACKLIST)?,
            title_blacklist: PatternBank::parse("title_blacklist", BUILTIN_TITLE_BLACKLIST)?,
            government: PatternBank::parse("government", BUILTIN_GOVERNMENT)?,
            performer: PatternBank::parse("performer", BUILTIN_PERFORMER)?,
        })
    }

    /// Built-ins, with any bank replaced by its configured file.
    pub fn load(paths: &PatternPaths) -> Result<Self> {
        fn pick(name: &str, path: &Option<PathBuf>, builtin: &str) -> Result<PatternBank> {
            match path {
                Some(p) => PatternBank::from_file(name, p),
                None => PatternBank::parse(name, builtin),
            }
        }

        Ok(Self {
            venue_blacklist: pick(
                "venue_blacklist",
                &paths.venue_blacklist,
                BUILTIN_VENUE_BLACKLIST,
            )?,
            title_blacklist: pick(
                "title_blacklist",
                &paths.title_blacklist,
                BUILTIN_TITLE_BLACKLIST,
            )?,
            government: pick("government", &paths.government, BUILTIN_GOVERNMENT)?,
            performer: pick("performer", &paths.performer, BUILTIN_PERFORMER)?,
        })
    }
}
