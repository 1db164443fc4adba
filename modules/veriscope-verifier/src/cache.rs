//! Bounded, time-expiring caches for fetched source content, credibility
//! lookups, and verification verdicts, plus the key derivation rules that
//! make entries collide exactly when the underlying work would repeat.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use veriscope_common::types::{truncate_str, Credibility, SourceContent, Verdict};

pub const CONTENT_CACHE_MAX: usize = 1000;
pub const CONTENT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const VERIFICATION_CACHE_MAX: usize = 500;
pub const VERIFICATION_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// Domain classification rarely changes, so this tier lives the longest.
pub const CREDIBILITY_CACHE_MAX: usize = 2000;
pub const CREDIBILITY_CACHE_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// How much of each source's content feeds the verification cache key.
const KEY_SNIPPET_BYTES: usize = 1000;

struct Entry<V> {
    value: V,
    last_access: Instant,
}

/// Bounded key→value cache with a sliding TTL: reads refresh an entry's
/// clock, expired entries count as misses and are dropped on touch, and
/// inserting over capacity evicts the entry unused the longest.
pub struct TtlCache<V> {
    name: &'static str,
    entries: Mutex<HashMap<String, Entry<V>>>,
    max_entries: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, max_entries: usize, ttl: Duration) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            max_entries,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_access) < self.ttl => {
                entry.last_access = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: String, value: V) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let now = Instant::now();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            // Drop expired entries first; if still full, evict the
            // oldest-unused one.
            entries.retain(|_, e| now.duration_since(e.last_access) < self.ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_access)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    debug!(cache = self.name, key = %oldest, "Evicting oldest-unused cache entry");
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            Entry {
                value,
                last_access: now,
            },
        );
    }

    /// Live entry count; expired entries are pruned before counting.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let now = Instant::now();
        entries.retain(|_, e| now.duration_since(e.last_access) < self.ttl);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Hits over total lookups since the counters were last reset.
    /// 0.0 when nothing has been looked up yet.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Drops cached data; hit/miss counters survive. `VerifierCaches::clear_all`
    /// resets both together.
    pub fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }

    fn reset_counters(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            max: self.max_entries,
            hit_rate: self.hit_rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max: usize,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStatsReport {
    pub content: CacheStats,
    pub verification: CacheStats,
    pub credibility: CacheStats,
}

/// The three cache tiers, shared across fetcher and engine as one `Arc`.
pub struct VerifierCaches {
    pub content: TtlCache<SourceContent>,
    pub verification: TtlCache<Verdict>,
    pub credibility: TtlCache<Credibility>,
}

impl VerifierCaches {
    pub fn new() -> Self {
        Self {
            content: TtlCache::new("content", CONTENT_CACHE_MAX, CONTENT_CACHE_TTL),
            verification: TtlCache::new(
                "verification",
                VERIFICATION_CACHE_MAX,
                VERIFICATION_CACHE_TTL,
            ),
            credibility: TtlCache::new(
                "credibility",
                CREDIBILITY_CACHE_MAX,
                CREDIBILITY_CACHE_TTL,
            ),
        }
    }

    /// Reset hook: drops all data and zeroes the hit/miss counters.
    pub fn clear_all(&self) {
        self.content.clear();
        self.content.reset_counters();
        self.verification.clear();
        self.verification.reset_counters();
        self.credibility.clear();
        self.credibility.reset_counters();
    }

    pub fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            content: self.content.stats(),
            verification: self.verification.stats(),
            credibility: self.credibility.stats(),
        }
    }
}

impl Default for VerifierCaches {
    fn default() -> Self {
        Self::new()
    }
}

// --- Key derivation ---

/// Content cache key: the whole URL lowercased, fragment stripped, trailing
/// slash stripped, query preserved.
pub fn content_key(url: &str) -> String {
    let lowered = url.trim().to_lowercase();
    let without_fragment = lowered.split('#').next().unwrap_or(&lowered);
    let trimmed = without_fragment.strip_suffix('/').unwrap_or(without_fragment);
    trimmed.to_string()
}

/// Credibility cache key: the bare hostname, lowercased, leading `www.`
/// stripped. Falls back to the raw input when the URL does not parse.
pub fn credibility_key(url: &str) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_else(|| url.trim().to_lowercase());
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

/// Verification cache key: SHA-256 over the paragraph text, its link set
/// (order-insensitive), and the first 1000 bytes of each source's content
/// with sources ordered by URL. Completion order can never change the key;
/// any snippet differing by one source produces a different key.
pub fn verification_key(paragraph_text: &str, links: &[String], sources: &[SourceContent]) -> String {
    let mut sorted_links: Vec<&str> = links.iter().map(String::as_str).collect();
    sorted_links.sort_unstable();

    let mut snippets: Vec<(&str, &str)> = sources
        .iter()
        .map(|s| (s.url.as_str(), truncate_str(&s.content, KEY_SNIPPET_BYTES)))
        .collect();
    snippets.sort_unstable_by_key(|(url, _)| *url);

    let mut hasher = Sha256::new();
    hasher.update(paragraph_text.as_bytes());
    hasher.update([0u8]);
    for link in &sorted_links {
        hasher.update(link.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([1u8]);
    for (url, snippet) in &snippets {
        hasher.update(url.as_bytes());
        hasher.update([0u8]);
        hasher.update(snippet.as_bytes());
        hasher.update([0u8]);
    }

    use std::fmt::Write;
    let digest = hasher.finalize();
    let mut key = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn source(url: &str, content: &str) -> SourceContent {
        SourceContent {
            url: url.to_string(),
            title: None,
            content: content.to_string(),
            credibility: Credibility::Unknown,
            error: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_then_expiry() {
        let cache: TtlCache<String> =
            TtlCache::new("test", 10, Duration::from_secs(60));
        cache.set("k".to_string(), "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));

        advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_refresh_the_ttl() {
        let cache: TtlCache<u32> = TtlCache::new("test", 10, Duration::from_secs(10));
        cache.set("k".to_string(), 1);

        // Keep touching the entry just inside the window
        advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k"), Some(1));
        advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k"), Some(1));

        // Then let it lapse
        advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_removes_oldest_unused() {
        let cache: TtlCache<u32> = TtlCache::new("test", 2, Duration::from_secs(3600));
        cache.set("a".to_string(), 1);
        advance(Duration::from_secs(1)).await;
        cache.set("b".to_string(), 2);
        advance(Duration::from_secs(1)).await;

        // Touch "a" so "b" becomes the oldest-unused
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c".to_string(), 3);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overwriting_existing_key_never_evicts() {
        let cache: TtlCache<u32> = TtlCache::new("test", 2, Duration::from_secs(3600));
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("a".to_string(), 10);

        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn hit_rate_tracks_hits_and_misses() {
        let cache: TtlCache<u32> = TtlCache::new("test", 10, Duration::from_secs(60));
        assert_eq!(cache.hit_rate(), 0.0);

        assert_eq!(cache.get("k"), None);
        cache.set("k".to_string(), 1);
        assert_eq!(cache.get("k"), Some(1));

        // One miss, one hit
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_resets_data_and_counters() {
        let caches = VerifierCaches::new();
        caches.content.set("k".to_string(), source("https://a.test", "text"));
        caches.content.get("k");
        caches.content.get("missing");
        assert!(caches.content.hit_rate() > 0.0);

        caches.clear_all();
        assert_eq!(caches.content.len(), 0);
        assert_eq!(caches.content.hit_rate(), 0.0);
        assert_eq!(caches.verification.len(), 0);
        assert_eq!(caches.credibility.len(), 0);
    }

    #[test]
    fn content_key_normalizes() {
        assert_eq!(
            content_key("HTTPS://Example.com/Path/"),
            "https://example.com/path"
        );
        assert_eq!(
            content_key("https://example.com/path#section-2"),
            "https://example.com/path"
        );
        assert_eq!(
            content_key("https://example.com/path?q=1&b=2"),
            "https://example.com/path?q=1&b=2"
        );
    }

    #[test]
    fn credibility_key_is_bare_host() {
        assert_eq!(credibility_key("https://www.Example.com/a/b?c=1"), "example.com");
        assert_eq!(credibility_key("https://sub.example.com/x"), "sub.example.com");
        assert_eq!(credibility_key("not a url"), "not a url");
    }

    #[test]
    fn verification_key_ignores_link_and_source_order() {
        let links_a = vec!["https://a.test".to_string(), "https://b.test".to_string()];
        let links_b = vec!["https://b.test".to_string(), "https://a.test".to_string()];
        let sources_a = vec![source("https://a.test", "alpha"), source("https://b.test", "beta")];
        let sources_b = vec![source("https://b.test", "beta"), source("https://a.test", "alpha")];

        let k1 = verification_key("text", &links_a, &sources_a);
        let k2 = verification_key("text", &links_b, &sources_b);
        assert_eq!(k1, k2);
    }

    #[test]
    fn verification_key_changes_with_any_snippet() {
        let links = vec!["https://a.test".to_string()];
        let k1 = verification_key("text", &links, &[source("https://a.test", "alpha")]);
        let k2 = verification_key("text", &links, &[source("https://a.test", "alphb")]);
        let k3 = verification_key("other", &links, &[source("https://a.test", "alpha")]);
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn verification_key_only_hashes_leading_snippet() {
        let links = vec!["https://a.test".to_string()];
        let long_a = format!("{}{}", "x".repeat(1000), "tail one");
        let long_b = format!("{}{}", "x".repeat(1000), "tail two");
        let k1 = verification_key("text", &links, &[source("https://a.test", &long_a)]);
        let k2 = verification_key("text", &links, &[source("https://a.test", &long_b)]);
        assert_eq!(k1, k2);
    }
}
