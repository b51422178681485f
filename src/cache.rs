//! Two-level search cache fronting the search provider.
//!
//! # Levels
//!
//! - **L1**: an in-process map, checked first and refilled from L2 hits.
//! - **L2**: the `research_cache` SQLite table (see [`crate::migrate`]),
//!   shared by every run that points at the same database file.
//!
//! Both levels hold the same TTL-stamped payload: the JSON-encoded hits and
//! the provider summary for one normalized query.
//!
//! # Rules
//!
//! - Keys are `"<version>:<normalized query>"` so bumping `cache.version`
//!   invalidates every older entry without a migration.
//! - Time-sensitive queries (`today`, `latest`, a year within one of the
//!   current year, ...) bypass the cache entirely: `get` misses and `set`
//!   is a no-op.
//! - An entry whose age reaches `ttl_secs` is a miss and is deleted on the
//!   access that notices it. [`CacheManager::cleanup`] additionally purges
//!   expired rows and rows unused for `stale_days`.
//! - When L2 holds more than `max_entries` rows, the least recently
//!   accessed rows are deleted (ordered by `last_access`, then by the
//!   store-wide `touch_seq` counter).
//!
//! Each SQL operation is a single statement, so concurrent readers and
//! writers need no extra locking.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use deep_research_core::models::RawHit;
use deep_research_core::query::{cache_key, is_time_sensitive};

use crate::config::CacheConfig;
use crate::db;
use crate::migrate;

/// Source of the current time, injectable so TTL behaviour is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    secs: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            secs: AtomicI64::new(start.timestamp()),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.secs.load(Ordering::SeqCst), 0).unwrap_or_default()
    }
}

/// Cached value for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSearch {
    pub results: Vec<RawHit>,
    pub summary: Option<String>,
}

struct L1Entry {
    payload: CachedSearch,
    created_at: i64,
    last_access: i64,
    seq: u64,
}

#[derive(Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    bypassed: AtomicU64,
    writes: AtomicU64,
}

/// Snapshot returned by [`CacheManager::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub l1_entries: usize,
    pub l2_entries: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub bypassed: u64,
    pub writes: u64,
}

pub struct CacheManager {
    pool: SqlitePool,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    l1: Mutex<HashMap<String, L1Entry>>,
    l1_seq: AtomicU64,
    counters: Counters,
    purged_on_open: u64,
}

impl CacheManager {
    /// Open the cache database named in `config`, creating the schema and
    /// purging stale rows.
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let pool = db::connect(&config.path)
            .await
            .with_context(|| format!("Failed to open cache at {}", config.path.display()))?;
        migrate::migrate(&pool).await?;

        let mut cache = Self {
            pool,
            config: config.clone(),
            clock,
            l1: Mutex::new(HashMap::new()),
            l1_seq: AtomicU64::new(0),
            counters: Counters::default(),
            purged_on_open: 0,
        };

        cache.purged_on_open = cache.cleanup().await?;
        if cache.purged_on_open > 0 {
            tracing::debug!(purged = cache.purged_on_open, "purged stale cache entries");
        }
        Ok(cache)
    }

    fn now_ts(&self) -> i64 {
        self.clock.now().timestamp()
    }

    fn ttl(&self) -> i64 {
        i64::try_from(self.config.ttl_secs).unwrap_or(i64::MAX)
    }

    fn is_expired(&self, created_at: i64, now: i64) -> bool {
        now.saturating_sub(created_at) >= self.ttl()
    }

    /// Cache key for `query`, or `None` when the query is time-sensitive.
    pub fn key_for(&self, query: &str) -> Option<String> {
        if is_time_sensitive(query, self.clock.now().year()) {
            return None;
        }
        Some(cache_key(
            &self.config.version,
            query,
            self.config.max_key_chars,
        ))
    }

    fn lock_l1(&self) -> std::sync::MutexGuard<'_, HashMap<String, L1Entry>> {
        // A poisoned map only means another task panicked mid-update; the
        // entries themselves are still valid cache data.
        self.l1.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_l1_seq(&self) -> u64 {
        self.l1_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Look up `query`. Returns the stored payload verbatim on a hit.
    pub async fn get(&self, query: &str) -> Result<Option<CachedSearch>> {
        let Some(key) = self.key_for(query) else {
            self.counters.bypassed.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        let now = self.now_ts();

        // L1
        let l1_result = {
            let mut l1 = self.lock_l1();
            match l1.get(&key).map(|e| self.is_expired(e.created_at, now)) {
                Some(true) => {
                    l1.remove(&key);
                    Some(None)
                }
                Some(false) => {
                    let seq = self.next_l1_seq();
                    l1.get_mut(&key).map(|entry| {
                        entry.last_access = now;
                        entry.seq = seq;
                        Some(entry.payload.clone())
                    })
                }
                None => None,
            }
        };

        match l1_result {
            Some(Some(payload)) => {
                self.touch(&key, now).await?;
                self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(payload));
            }
            Some(None) => {
                self.delete(&key).await?;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            None => {}
        }

        // L2
        let row = sqlx::query("SELECT value, created_at FROM research_cache WHERE key = ?")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let value: String = row.get("value");
        let created_at: i64 = row.get("created_at");

        if self.is_expired(created_at, now) {
            self.delete(&key).await?;
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let payload: CachedSearch = match serde_json::from_str(&value) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "dropping unreadable cache entry");
                self.delete(&key).await?;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        self.touch(&key, now).await?;
        self.insert_l1(key, payload.clone(), created_at, now);
        self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(payload))
    }

    /// Store the results of `query`. No-op for time-sensitive queries.
    pub async fn set(&self, query: &str, results: &[RawHit], summary: Option<&str>) -> Result<()> {
        let Some(key) = self.key_for(query) else {
            self.counters.bypassed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };
        let now = self.now_ts();
        let payload = CachedSearch {
            results: results.to_vec(),
            summary: summary.map(str::to_string),
        };
        let value = serde_json::to_string(&payload)?;

        sqlx::query(
            r#"
            INSERT INTO research_cache (key, value, created_at, last_access, access_count, touch_seq)
            VALUES (?, ?, ?, ?, 0, (SELECT COALESCE(MAX(touch_seq), 0) + 1 FROM research_cache))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at,
                last_access = excluded.last_access,
                access_count = 0,
                touch_seq = excluded.touch_seq
            "#,
        )
        .bind(&key)
        .bind(&value)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.insert_l1(key, payload, now, now);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.evict_over_cap().await?;
        Ok(())
    }

    fn insert_l1(&self, key: String, payload: CachedSearch, created_at: i64, now: i64) {
        let seq = self.next_l1_seq();
        let mut l1 = self.lock_l1();
        l1.insert(
            key,
            L1Entry {
                payload,
                created_at,
                last_access: now,
                seq,
            },
        );
        while l1.len() > self.config.max_entries {
            let oldest = l1
                .iter()
                .min_by_key(|(_, e)| (e.last_access, e.seq))
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    l1.remove(&k);
                }
                None => break,
            }
        }
    }

    async fn touch(&self, key: &str, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE research_cache
            SET last_access = ?,
                access_count = access_count + 1,
                touch_seq = (SELECT COALESCE(MAX(touch_seq), 0) + 1 FROM research_cache)
            WHERE key = ?
            "#,
        )
        .bind(now)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM research_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        self.lock_l1().remove(key);
        Ok(())
    }

    async fn evict_over_cap(&self) -> Result<()> {
        let count = self.len().await?;
        let cap = self.config.max_entries as u64;
        if count <= cap {
            return Ok(());
        }
        let excess = (count - cap) as i64;

        let evicted: Vec<String> = sqlx::query_scalar(
            r#"
            DELETE FROM research_cache
            WHERE key IN (
                SELECT key FROM research_cache
                ORDER BY last_access ASC, touch_seq ASC
                LIMIT ?
            )
            RETURNING key
            "#,
        )
        .bind(excess)
        .fetch_all(&self.pool)
        .await?;

        let mut l1 = self.lock_l1();
        for key in &evicted {
            l1.remove(key);
        }
        tracing::debug!(evicted = evicted.len(), "evicted least recently used cache rows");
        Ok(())
    }

    /// Number of rows in the persistent store.
    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM research_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Delete expired rows and rows not accessed for `stale_days`.
    /// Returns the number of persistent rows removed.
    pub async fn cleanup(&self) -> Result<u64> {
        let now = self.now_ts();
        let expired_before = now.saturating_sub(self.ttl());
        let stale_secs = i64::try_from(self.config.stale_days.saturating_mul(86_400))
            .unwrap_or(i64::MAX);
        let unused_before = now.saturating_sub(stale_secs);

        let result = sqlx::query(
            "DELETE FROM research_cache WHERE created_at <= ? OR last_access <= ?",
        )
        .bind(expired_before)
        .bind(unused_before)
        .execute(&self.pool)
        .await?;

        self.lock_l1()
            .retain(|_, e| e.created_at > expired_before && e.last_access > unused_before);

        Ok(result.rows_affected())
    }

    /// Remove every entry from both levels.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM research_cache")
            .execute(&self.pool)
            .await?;
        self.lock_l1().clear();
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let l2_entries = self.len().await?;
        let l1_entries = self.lock_l1().len();
        Ok(CacheStats {
            l1_entries,
            l2_entries,
            l1_hits: self.counters.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.counters.l2_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            bypassed: self.counters.bypassed.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        })
    }

    /// Drop the in-process level only. The next `get` repopulates it from L2.
    pub fn clear_l1(&self) {
        self.lock_l1().clear();
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// `research cache stats|cleanup|clear`.
pub async fn run_cache_command(config: &CacheConfig, action: &str) -> Result<()> {
    let cache = CacheManager::open(config).await?;
    match action {
        "stats" => {
            let stats = cache.stats().await?;
            println!("cache {}", config.path.display());
            println!("  entries: {}", stats.l2_entries);
            println!("  in memory: {}", stats.l1_entries);
            println!(
                "  this session: {} memory hits, {} disk hits, {} misses, {} bypassed",
                stats.l1_hits, stats.l2_hits, stats.misses, stats.bypassed
            );
            println!("  ttl: {}s", config.ttl_secs);
            println!("  max entries: {}", config.max_entries);
            println!("  key version: {}", config.version);
        }
        "cleanup" => {
            let removed = cache.purged_on_open + cache.cleanup().await?;
            println!("cache cleanup");
            println!("  removed: {}", removed);
            println!("  remaining: {}", cache.len().await?);
        }
        "clear" => {
            let removed = cache.clear().await?;
            println!("cache clear");
            println!("  removed: {}", removed);
        }
        other => anyhow::bail!("Unknown cache action: {}. Use stats, cleanup, or clear.", other),
    }
    cache.close().await;
    Ok(())
}
