//! Per-day statistics cache with differential expiry.
//!
//! Past days are immutable history once the day has ended, so they are
//! cached for a week. Today's totals keep changing as the user logs
//! meals, so today's entry expires after a few hours.
//!
//! The whole cache persists as a single versioned blob; a schema-version
//! mismatch on load discards all entries exactly once per installation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{date_key, local_today, DailyStatistics};
use crate::store::KeyValueStore;

const STORE_KEY: &str = "stats.daily_cache";

/// Bumped when cached record semantics change; a mismatch wipes the cache.
const SCHEMA_VERSION: u32 = 2;

const TODAY_TTL_HOURS: i64 = 4;
const PAST_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedEntry {
    stats: DailyStatistics,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheBlob {
    version: u32,
    entries: HashMap<String, CachedEntry>,
}

impl Default for CacheBlob {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            entries: HashMap::new(),
        }
    }
}

/// Cached per-day nutrition summaries keyed by canonical date key.
///
/// Not internally synchronized; read-modify-write sequences must come
/// from a single serialized caller (see [`crate::stats::StatisticsService`]).
pub struct StatisticsCache {
    store: Arc<dyn KeyValueStore>,
}

impl StatisticsCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The cached record for the key, only if present and not expired.
    /// A stale entry reads as absent; the caller must refetch.
    pub fn get(&self, key: &str) -> Option<DailyStatistics> {
        let entries = self.load();
        let now = Utc::now();
        entries
            .get(key)
            .filter(|e| is_valid(key, e.cached_at, now))
            .map(|e| e.stats.clone())
    }

    /// Stores the record under its own date key, replacing any previous
    /// entry and stamping a fresh cache time.
    pub fn put(&self, stats: DailyStatistics) {
        let mut entries = self.load();
        entries.insert(
            stats.date_key(),
            CachedEntry {
                stats,
                cached_at: Utc::now(),
            },
        );
        self.persist(entries);
    }

    /// All cached-and-valid records among the given keys. Order is not
    /// guaranteed to follow the input.
    pub fn get_many(&self, keys: &[String]) -> Vec<DailyStatistics> {
        let entries = self.load();
        let now = Utc::now();
        keys.iter()
            .filter_map(|key| {
                entries
                    .get(key)
                    .filter(|e| is_valid(key, e.cached_at, now))
                    .map(|e| e.stats.clone())
            })
            .collect()
    }

    /// The subsequence of keys that are absent or expired, in input order.
    pub fn missing(&self, keys: &[String]) -> Vec<String> {
        let entries = self.load();
        let now = Utc::now();
        keys.iter()
            .filter(|key| {
                !entries
                    .get(key.as_str())
                    .map(|e| is_valid(key.as_str(), e.cached_at, now))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Drops entries that fail their own expiry check. Housekeeping only;
    /// reads already filter by expiry.
    pub fn clear_expired(&self) {
        let mut entries = self.load();
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|key, e| is_valid(key, e.cached_at, now));
        if entries.len() != before {
            debug!("dropped {} expired statistics entries", before - entries.len());
            self.persist(entries);
        }
    }

    /// Wipes every entry.
    pub fn clear_all(&self) {
        self.persist(HashMap::new());
    }

    fn load(&self) -> HashMap<String, CachedEntry> {
        let Some(bytes) = self.store.get_bytes(STORE_KEY) else {
            return HashMap::new();
        };
        let blob: CacheBlob = match serde_json::from_slice(&bytes) {
            Ok(blob) => blob,
            Err(e) => {
                // Unreadable blob reads as empty and heals on next save.
                warn!("statistics cache blob unreadable, starting fresh: {e}");
                return HashMap::new();
            }
        };
        if blob.version != SCHEMA_VERSION {
            debug!(
                "statistics cache schema {} -> {}, wiping",
                blob.version, SCHEMA_VERSION
            );
            // Persist the empty current-version blob so the wipe runs
            // at most once per installation.
            self.persist(HashMap::new());
            return HashMap::new();
        }
        blob.entries
    }

    fn persist(&self, entries: HashMap<String, CachedEntry>) {
        let blob = CacheBlob {
            version: SCHEMA_VERSION,
            entries,
        };
        match serde_json::to_vec(&blob) {
            Ok(bytes) => {
                if let Err(e) = self.store.set_bytes(STORE_KEY, &bytes) {
                    warn!("failed to persist statistics cache: {e}");
                }
            }
            Err(e) => warn!("failed to encode statistics cache: {e}"),
        }
    }
}

/// An entry is valid while its age is within the TTL for its key:
/// 4 hours when the key is today's, 7 days otherwise.
fn is_valid(key: &str, cached_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let ttl = if key == date_key(local_today()) {
        Duration::hours(TODAY_TTL_HOURS)
    } else {
        Duration::days(PAST_TTL_DAYS)
    };
    now - cached_at <= ttl
}
