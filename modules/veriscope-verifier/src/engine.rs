//! Verification engine: deterministic prompt construction, schema-forced
//! model call, strict output validation, and the cache-then-retry policy.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use ai_client::Claude;
use veriscope_common::types::{truncate_str, Confidence, Paragraph, SourceContent, Verdict};

use crate::cache::{verification_key, VerifierCaches};

/// Per-source content budget inside the prompt.
const PROMPT_SOURCE_BYTES: usize = 2000;

const SYSTEM_PROMPT: &str = r#"You are a citation verification assistant. You are given one paragraph from a research document, the links it cites, and the text fetched from those sources.

Judge how well the cited sources support the paragraph's factual claims.

Rules:
- Only weigh the provided sources. Do not use outside knowledge to fill gaps.
- Weigh source credibility: academic and official sources count for more than blogs or unknown domains.
- A source that failed to fetch is missing evidence, not counter-evidence. Missing evidence lowers confidence.
- If there are no usable sources at all, confidence is low.
- Contradictions between the paragraph and its sources lower confidence sharply.

Report exactly:
- confidence: "high" (claims directly supported), "medium" (partially supported or mixed), or "low" (unsupported, contradicted, or no usable sources)
- summary_of_sources: one or two sentences on what the sources collectively say
- reasoning: why you chose this confidence, naming specific sources"#;

/// Retry schedule for model calls: up to `max_retries` extra attempts after
/// the first, sleeping `backoff(attempt)` between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Doubles per failed attempt: 1s, 2s, 4s...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// What the model must fill in. Confidence arrives as a string and is
/// validated for membership before anything downstream sees it.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub(crate) struct RawVerdict {
    /// "high", "medium", or "low".
    confidence: String,
    summary_of_sources: String,
    reasoning: String,
}

/// One model attempt. Split from the engine so retry behavior is testable
/// without network.
#[async_trait]
pub(crate) trait VerdictBackend: Send + Sync {
    async fn request_verdict(&self, system: &str, user: &str) -> Result<RawVerdict>;
}

struct ClaudeBackend {
    claude: Claude,
}

#[async_trait]
impl VerdictBackend for ClaudeBackend {
    async fn request_verdict(&self, system: &str, user: &str) -> Result<RawVerdict> {
        self.claude.extract(system, user).await
    }
}

/// Orchestrator-facing seam. Infallible by construction: fallback verdicts
/// absorb exhausted retries.
#[async_trait]
pub trait ParagraphVerifier: Send + Sync {
    async fn verify(&self, paragraph: &Paragraph, sources: &[SourceContent]) -> Verdict;
}

pub struct VerificationEngine {
    backend: Option<Arc<dyn VerdictBackend>>,
    caches: Arc<VerifierCaches>,
    retry: RetryPolicy,
}

impl VerificationEngine {
    pub fn new(api_key: Option<&str>, model: &str, caches: Arc<VerifierCaches>) -> Self {
        let backend = api_key.map(|key| {
            Arc::new(ClaudeBackend {
                claude: Claude::new(key, model),
            }) as Arc<dyn VerdictBackend>
        });
        if backend.is_none() {
            warn!("No API key configured; verification will produce labeled stand-in verdicts");
        }
        Self {
            backend,
            caches,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One verification attempt: cache consult, stand-in path, model call,
    /// strict validation, cache populate. Only validated model verdicts are
    /// cached; the stand-in is not, so real attempts are never shadowed once
    /// a key is configured.
    pub async fn verify_once(
        &self,
        paragraph: &Paragraph,
        sources: &[SourceContent],
    ) -> Result<Verdict> {
        let key = verification_key(&paragraph.text, &paragraph.links, sources);
        if let Some(hit) = self.caches.verification.get(&key) {
            debug!(paragraph_id = paragraph.id, "Verification cache hit");
            return Ok(hit);
        }

        let Some(backend) = &self.backend else {
            return Ok(stand_in_verdict(sources));
        };

        let prompt = build_prompt(paragraph, sources);
        let raw = backend.request_verdict(SYSTEM_PROMPT, &prompt).await?;
        let verdict = validate(raw)?;

        self.caches.verification.set(key, verdict.clone());
        Ok(verdict)
    }

    /// `verify_once` under the retry schedule. Only failed attempts are
    /// retried; after exhausting them the returned verdict is low confidence
    /// with the final error in its reasoning, never an `Err`.
    pub async fn verify_with_retry(
        &self,
        paragraph: &Paragraph,
        sources: &[SourceContent],
    ) -> Verdict {
        let mut attempt = 0;
        loop {
            match self.verify_once(paragraph, sources).await {
                Ok(verdict) => return verdict,
                Err(e) if attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        paragraph_id = paragraph.id,
                        attempt = attempt + 1,
                        error = %e,
                        "Verification attempt failed, backing off {delay:?}"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        paragraph_id = paragraph.id,
                        error = %e,
                        "Verification failed after retries"
                    );
                    return Verdict {
                        confidence: Confidence::Low,
                        summary_of_sources: "Verification did not complete.".to_string(),
                        reasoning: format!(
                            "Verification failed after {} attempts: {e}",
                            self.retry.max_retries + 1
                        ),
                    };
                }
            }
        }
    }
}

#[async_trait]
impl ParagraphVerifier for VerificationEngine {
    async fn verify(&self, paragraph: &Paragraph, sources: &[SourceContent]) -> Verdict {
        self.verify_with_retry(paragraph, sources).await
    }
}

/// Produced when no API key is configured: clearly labeled, always low
/// confidence, never cached.
fn stand_in_verdict(sources: &[SourceContent]) -> Verdict {
    Verdict {
        confidence: Confidence::Low,
        summary_of_sources: format!(
            "[no API key] {} source(s) fetched but not analyzed",
            sources.len()
        ),
        reasoning: "No language model credentials are configured; this is a stand-in verdict, \
                    not a real verification."
            .to_string(),
    }
}

fn validate(raw: RawVerdict) -> Result<Verdict> {
    let confidence = Confidence::from_str_loose(&raw.confidence)
        .ok_or_else(|| anyhow!("Model returned invalid confidence: {:?}", raw.confidence))?;
    if raw.summary_of_sources.trim().is_empty() {
        return Err(anyhow!("Model returned empty summary_of_sources"));
    }
    if raw.reasoning.trim().is_empty() {
        return Err(anyhow!("Model returned empty reasoning"));
    }
    Ok(Verdict {
        confidence,
        summary_of_sources: raw.summary_of_sources,
        reasoning: raw.reasoning,
    })
}

/// Deterministic: identical paragraph and sources (in order) produce
/// identical prompt bytes.
pub(crate) fn build_prompt(paragraph: &Paragraph, sources: &[SourceContent]) -> String {
    use std::fmt::Write;

    let mut prompt = String::new();
    let _ = writeln!(prompt, "PARAGRAPH:\n{}", paragraph.text);

    if paragraph.links.is_empty() {
        prompt.push_str("\nCITED LINKS: none\n");
    } else {
        prompt.push_str("\nCITED LINKS:\n");
        for link in &paragraph.links {
            let _ = writeln!(prompt, "- {link}");
        }
    }

    if sources.is_empty() {
        prompt.push_str("\nFETCHED SOURCES: none were retrievable\n");
    } else {
        prompt.push_str("\nFETCHED SOURCES:\n");
        for (i, source) in sources.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "--- Source {} [credibility: {}] {} ---",
                i + 1,
                source.credibility,
                source.url
            );
            match &source.error {
                Some(error) => {
                    let _ = writeln!(prompt, "(fetch failed: {error})");
                }
                None => {
                    let _ = writeln!(prompt, "{}", truncate_str(&source.content, PROMPT_SOURCE_BYTES));
                }
            }
        }
    }

    prompt
}
