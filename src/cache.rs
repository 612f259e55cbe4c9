//! Persistent verification cache: JSON file + in-memory map, lazy TTL.
//!
//! Keys are `normalized title | normalized venue | YYYY-MM-DD`. Recurrence
//! templates regenerate the same tuples every day, so outcomes must survive
//! restarts. Entries older than the TTL are never returned; they are evicted
//! on read and drop out at the next flush.
//!
//! Writes go to memory; `flush()` persists atomically (tmp + rename) and is a
//! no-op when nothing changed. Single writer: two processes flushing the same
//! file will overwrite each other.

use crate::error::VerifyResult;
use crate::event::{EventCandidate, VerificationResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

pub const DEFAULT_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    result: VerificationResult,
    cached_at: DateTime<Utc>,
}

/// Counters since the cache was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub writes: u64,
    pub dirty: bool,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

#[derive(Debug)]
pub struct VerificationCache {
    path: Option<PathBuf>,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl VerificationCache {
    /// Open (or start) the cache file at `path`. A missing file is an empty
    /// cache; an unreadable one is logged and replaced at the next flush.
    pub fn open(path: impl Into<PathBuf>, ttl_days: i64) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str::<HashMap<String, CacheEntry>>(&s).unwrap_or_else(|e| {
                warn!(target: "cache", path = %path.display(), error = %e, "corrupt cache file, starting empty");
                HashMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(target: "cache", path = %path.display(), error = %e, "unreadable cache file, starting empty");
                HashMap::new()
            }
        };
        debug!(target: "cache", path = %path.display(), entries = entries.len(), "cache opened");

        Self {
            path: Some(path),
            ttl: Duration::days(ttl_days),
            inner: Mutex::new(Inner {
                entries,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Memory-only cache; `flush()` does nothing.
    pub fn in_memory(ttl_days: i64) -> Self {
        Self {
            path: None,
            ttl: Duration::days(ttl_days),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<VerificationResult> {
        self.get_at(key, Utc::now())
    }

    /// Lookup against an explicit clock.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<VerificationResult> {
        let mut g = self.lock();
        let found = g
            .entries
            .get(key)
            .map(|e| (e.cached_at, e.result.clone()));
        let fresh = match found {
            None => None,
            Some((at, _)) if now.signed_duration_since(at) >= self.ttl => {
                g.entries.remove(key);
                g.stats.expired += 1;
                g.stats.dirty = true;
                None
            }
            Some((_, r)) => Some(r),
        };
        match fresh {
            Some(r) => {
                g.stats.hits += 1;
                Some(r)
            }
            None => {
                g.stats.misses += 1;
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: VerificationResult) {
        self.set_at(key, value, Utc::now());
    }

    pub fn set_at(&self, key: &str, value: VerificationResult, now: DateTime<Utc>) {
        let mut g = self.lock();
        g.entries.insert(
            key.to_string(),
            CacheEntry {
                result: value,
                cached_at: now,
            },
        );
        g.stats.writes += 1;
        g.stats.dirty = true;
    }

    /// Persist if anything changed since the last flush.
    pub fn flush(&self) -> VerifyResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut g = self.lock();
        if !g.stats.dirty {
            return Ok(());
        }
        let json = serde_json::to_string(&g.entries)?;
        write_atomic(path, json.as_bytes())?;
        g.stats.dirty = false;
        debug!(target: "cache", path = %path.display(), entries = g.entries.len(), "cache flushed");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let g = self.lock();
        CacheStats {
            entries: g.entries.len(),
            ..g.stats
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic mid-update leaves a usable map; keep going.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    fs::rename(tmp, path)?;
    Ok(())
}

/// Composite key for a candidate: title, venue and local date.
pub fn cache_key(ev: &EventCandidate) -> String {
    compose_key(&ev.title, ev.venue_label(), &ev.date_key())
}

pub fn compose_key(title: &str, venue: &str, date: &str) -> String {
    format!("{}|{}|{}", normalize_part(title), normalize_part(venue), date.trim())
}

/// Lowercase; every run of non-alphanumerics becomes one space.
fn normalize_part(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut gap = false;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            if gap && !out.is_empty() {
                out.push(' ');
            }
            out.extend(ch.to_lowercase());
            gap = false;
        } else {
            gap = true;
        }
    }
    out
}
