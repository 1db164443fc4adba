//! Concurrent retrieval of cited sources: bounded worker pool, content
//! cache consult/populate, readable-text extraction, credibility tagging.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use veriscope_common::classify_domain;
use veriscope_common::types::{truncate_str, Credibility, SourceContent};

use crate::cache::{content_key, credibility_key, VerifierCaches};

/// Verification cost is bounded: only the first 5 cited links are fetched.
pub const MAX_LINKS_PER_PARAGRAPH: usize = 5;
/// Upper bound on concurrent fetch workers per paragraph.
pub const MAX_FETCH_WORKERS: usize = 7;
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
/// Extracted text is capped to this many bytes before caching.
pub const MAX_CONTENT_BYTES: usize = 10_000;
// Body bytes beyond this are dropped before any charset decoding.
const MAX_BODY_BYTES: usize = 2_000_000;
const HEAD_LIMIT: usize = 50_000;

const USER_AGENT: &str = "veriscope/0.1 (citation verification)";

/// Batch source retrieval for one paragraph's links.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Output order always matches input order regardless of completion
    /// order. Per-URL failures are recorded on the returned `SourceContent`,
    /// never propagated.
    async fn fetch_many(&self, urls: &[String]) -> Vec<SourceContent>;
}

/// Raw page retrieval, split out so tests can serve canned HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url).map_err(|e| anyhow!("Invalid URL: {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("Unsupported URL scheme: {}", parsed.scheme());
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP status {status}");
        }

        let raw = response.bytes().await?;
        Ok(decode_body(&raw))
    }
}

/// Production fetcher: page retrieval + extraction + caching + credibility.
pub struct WebSourceFetcher {
    pages: Arc<dyn PageFetcher>,
    caches: Arc<VerifierCaches>,
    classify: fn(&str) -> Credibility,
}

impl WebSourceFetcher {
    pub fn new(pages: Arc<dyn PageFetcher>, caches: Arc<VerifierCaches>) -> Self {
        Self {
            pages,
            caches,
            classify: classify_domain,
        }
    }

    pub fn with_classifier(mut self, classify: fn(&str) -> Credibility) -> Self {
        self.classify = classify;
        self
    }

    fn credibility_for(&self, url: &str) -> Credibility {
        let key = credibility_key(url);
        if let Some(hit) = self.caches.credibility.get(&key) {
            return hit;
        }
        let credibility = (self.classify)(url);
        self.caches.credibility.set(key, credibility);
        credibility
    }

    async fn fetch_one(&self, url: &str) -> SourceContent {
        let key = content_key(url);
        if let Some(cached) = self.caches.content.get(&key) {
            debug!(url, "Source content cache hit");
            return cached;
        }

        let credibility = self.credibility_for(url);

        let html = match self.pages.fetch(url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url, error = %e, "Source fetch failed");
                return SourceContent::failed(url, credibility, e.to_string());
            }
        };

        let title = extract_title(&html);
        let text = html_to_plain_text(&html);
        let content = truncate_str(&text, MAX_CONTENT_BYTES).to_string();

        let source = SourceContent {
            url: url.to_string(),
            title,
            content,
            credibility,
            error: None,
        };
        // Only clean fetches enter the cache; errored sources are retried
        // on the next request that cites them.
        self.caches.content.set(key, source.clone());
        source
    }
}

#[async_trait]
impl SourceFetcher for WebSourceFetcher {
    async fn fetch_many(&self, urls: &[String]) -> Vec<SourceContent> {
        let capped = &urls[..urls.len().min(MAX_LINKS_PER_PARAGRAPH)];
        if capped.is_empty() {
            return Vec::new();
        }
        if urls.len() > capped.len() {
            debug!(
                cited = urls.len(),
                kept = capped.len(),
                "Capping cited links for fetch"
            );
        }

        let workers = capped.len().min(MAX_FETCH_WORKERS);
        // Built with a plain loop: a closure returning an async block that
        // borrows its argument trips rustc's "FnOnce is not general enough"
        // limitation here.
        let mut futs = Vec::with_capacity(capped.len());
        for (idx, url) in capped.iter().enumerate() {
            futs.push(async move { (idx, self.fetch_one(url).await) });
        }
        let fetched: Vec<(usize, SourceContent)> = stream::iter(futs)
            .buffer_unordered(workers)
            .collect()
            .await;

        // Re-slot by original index so completion order never leaks out.
        let mut slots: Vec<Option<SourceContent>> = vec![None; capped.len()];
        for (idx, source) in fetched {
            slots[idx] = Some(source);
        }
        slots.into_iter().flatten().collect()
    }
}

/// Page title: `og:title` meta first, `<title>` as fallback. Only the
/// `<head>` section (or the first `HEAD_LIMIT` bytes) is scanned.
pub(crate) fn extract_title(html: &str) -> Option<String> {
    let scan = truncate_str(html, HEAD_LIMIT);
    let head = match scan.find("</head>") {
        Some(end) => &scan[..end],
        None => scan,
    };

    let og_re = Regex::new(
        r#"(?i)<meta\s+(?:[^>]*?\s)?(?:property|name)\s*=\s*["']og:title["'][^>]*?\scontent\s*=\s*["']([^"']*)["']"#,
    )
    .unwrap();
    if let Some(cap) = og_re.captures(head) {
        let title = cap[1].trim().to_string();
        if !title.is_empty() {
            return Some(title);
        }
    }

    let title_re = Regex::new(r"(?i)<title[^>]*>([^<]+)</title>").unwrap();
    if let Some(cap) = title_re.captures(head) {
        let title = cap[1].trim().to_string();
        if !title.is_empty() {
            return Some(title);
        }
    }

    None
}

fn html_to_plain_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 80).unwrap_or_default()
}

/// Caps the raw body before any charset work. A multibyte sequence split at
/// the cap decodes lossily.
fn decode_body(raw: &[u8]) -> String {
    let capped = if raw.len() > MAX_BODY_BYTES {
        &raw[..MAX_BODY_BYTES]
    } else {
        raw
    };
    String::from_utf8_lossy(capped).into_owned()
}
