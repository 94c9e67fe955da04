//! Content-addressed LLM response cache.
//!
//! Keys are `{prefix}{sha256(resolved_prompt ‖ reference_data)}`. The
//! durable SQLite backend is authoritative; an in-process map takes over
//! reads and writes when the durable backend errors (not when it merely
//! misses). Entries expire by wall clock, 24 hours by default.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_KEY_PREFIX: &str = "lookup:llm:";

/// Advisory cache statistics; not required to be exact under concurrency.
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub memory_entries: usize,
    pub ttl_hours: i64,
    pub key_prefix: String,
}

/// LLM response cache with a durable backend and in-process fallback.
pub struct ResponseCache {
    pool: SqlitePool,
    memory: DashMap<String, (String, DateTime<Utc>)>,
    ttl: Duration,
    key_prefix: String,
    counters: CacheCounters,
}

impl ResponseCache {
    pub fn new(pool: SqlitePool, ttl_hours: i64, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            memory: DashMap::new(),
            ttl: Duration::hours(ttl_hours),
            key_prefix: key_prefix.into(),
            counters: CacheCounters::default(),
        }
    }

    /// Cache key for a (resolved prompt, reference data) pair.
    ///
    /// Deterministic and collision-resistant: equal inputs produce the same
    /// key bitwise, any differing byte produces a different key.
    pub fn generate_cache_key(&self, prompt: &str, reference_data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(reference_data.as_bytes());
        format!("{}{:x}", self.key_prefix, hasher.finalize())
    }

    /// Get a cached response, or None when absent or expired.
    pub async fn get(&self, key: &str) -> Option<String> {
        let now = Utc::now();

        let row: Result<Option<String>, sqlx::Error> = sqlx::query_scalar(
            "SELECT response FROM lookup_llm_cache WHERE cache_key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(value)) => {
                tracing::debug!("Cache hit for key: {}...", &key[..key.len().min(24)]);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                let _ = sqlx::query(
                    r#"UPDATE lookup_llm_cache
                       SET hit_count = hit_count + 1, last_accessed_at = ?
                       WHERE cache_key = ?"#,
                )
                .bind(now)
                .bind(key)
                .execute(&self.pool)
                .await;
                Some(value)
            }
            Ok(None) => {
                tracing::debug!("Cache miss for key: {}...", &key[..key.len().min(24)]);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::error!("Durable cache get error, using memory fallback: {}", e);
                self.memory_get(key, now)
            }
        }
    }

    /// Store a response. Idempotent per key; a retry with the same value is
    /// a no-op apart from refreshing the expiry.
    pub async fn set(&self, key: &str, value: &str, ttl_override: Option<Duration>) -> bool {
        let ttl = ttl_override.unwrap_or(self.ttl);
        let now = Utc::now();
        let expires_at = now + ttl;

        let result = sqlx::query(
            r#"INSERT INTO lookup_llm_cache (cache_key, response, created_at, expires_at, last_accessed_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(cache_key) DO UPDATE SET response = excluded.response,
                                                    expires_at = excluded.expires_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                self.counters.sets.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::error!("Durable cache set error, using memory fallback: {}", e);
                self.memory.insert(key.to_string(), (value.to_string(), expires_at));
                true
            }
        }
    }

    /// Delete one entry from both backends.
    pub async fn delete(&self, key: &str) -> bool {
        let mut deleted = self.memory.remove(key).is_some();

        match sqlx::query("DELETE FROM lookup_llm_cache WHERE cache_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
        {
            Ok(result) => deleted |= result.rows_affected() > 0,
            Err(e) => tracing::error!("Durable cache delete error: {}", e),
        }

        deleted
    }

    /// Best-effort, non-atomic delete of all keys matching a glob pattern
    /// (e.g. `lookup:llm:project:abc*`). Returns the number of entries
    /// removed.
    pub async fn clear_pattern(&self, pattern: &str) -> u64 {
        let like_pattern = pattern.replace('%', "\\%").replace('*', "%");
        let mut count = 0u64;

        match sqlx::query("DELETE FROM lookup_llm_cache WHERE cache_key LIKE ? ESCAPE '\\'")
            .bind(&like_pattern)
            .execute(&self.pool)
            .await
        {
            Ok(result) => count += result.rows_affected(),
            Err(e) => tracing::error!("Durable cache clear_pattern error: {}", e),
        }

        let matching: Vec<String> = self
            .memory
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in matching {
            if self.memory.remove(&key).is_some() {
                count += 1;
            }
        }

        tracing::info!("Cleared {} cache entries matching: {}", count, pattern);
        count
    }

    /// Preload prompt → response pairs under a project namespace.
    pub async fn warmup(
        &self,
        project_id: &str,
        preload: &[(String, String)],
    ) -> u64 {
        let mut count = 0;
        for (prompt, response) in preload {
            let mut hasher = Sha256::new();
            hasher.update(prompt.as_bytes());
            let key =
                format!("{}project:{}:{:x}", self.key_prefix, project_id, hasher.finalize());
            if self.set(&key, response, None).await {
                count += 1;
            }
        }
        tracing::info!("Warmed up cache with {} entries for project {}", count, project_id);
        count
    }

    /// Drop expired durable rows and stale memory entries.
    pub async fn cleanup_expired(&self) -> u64 {
        let now = Utc::now();
        let mut count = 0u64;

        match sqlx::query("DELETE FROM lookup_llm_cache WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
        {
            Ok(result) => count += result.rows_affected(),
            Err(e) => tracing::error!("Durable cache cleanup error: {}", e),
        }

        let stale: Vec<String> = self
            .memory
            .iter()
            .filter(|entry| entry.value().1 <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for key in stale {
            if self.memory.remove(&key).is_some() {
                count += 1;
            }
        }

        if count > 0 {
            tracing::info!("Cleaned up {} expired cache entries", count);
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            memory_entries: self.memory.len(),
            ttl_hours: self.ttl.num_hours(),
            key_prefix: self.key_prefix.clone(),
        }
    }

    fn memory_get(&self, key: &str, now: DateTime<Utc>) -> Option<String> {
        let entry = self.memory.get(key).map(|e| e.value().clone());
        match entry {
            Some((value, expires_at)) if expires_at > now => Some(value),
            Some(_) => {
                self.memory.remove(key);
                None
            }
            None => None,
        }
    }
}

/// Minimal `*` glob matching for memory-cache patterns.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut remainder = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match remainder.strip_prefix(part) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return remainder.ends_with(part);
        } else {
            match remainder.find(part) {
                Some(pos) => remainder = &remainder[pos + part.len()..],
                None => return false,
            }
        }
    }

    parts.last().is_none_or(|last| last.is_empty()) || remainder.is_empty()
}
