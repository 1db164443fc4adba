use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Paragraph (upstream extractor output) ---

/// One citation-linked unit of document text, produced by the upstream
/// extractor. Immutable once created; `id` is assigned in document order
/// starting at 1. Heading paragraphs carry no checkable claims and bypass
/// verification entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: u32,
    pub order: u32,
    pub text: String,
    pub links: Vec<String>,
    #[serde(default)]
    pub is_heading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_level: Option<u8>,
}

// --- Enums ---

/// Domain-based trust category for a cited source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Credibility {
    Academic,
    Official,
    News,
    Blog,
    Unknown,
}

impl std::fmt::Display for Credibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credibility::Academic => write!(f, "academic"),
            Credibility::Official => write!(f, "official"),
            Credibility::News => write!(f, "news"),
            Credibility::Blog => write!(f, "blog"),
            Credibility::Unknown => write!(f, "unknown"),
        }
    }
}

/// Three-level verdict on how well a paragraph is supported by its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Parse a model-produced confidence string. Strict on membership,
    /// lenient on case/whitespace; anything else is rejected upstream.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InProgress => write!(f, "in_progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

// --- Fetched sources ---

/// Readable text fetched from one cited URL, tagged with the domain's
/// credibility category. On fetch failure `error` is set and `content` is
/// empty; errored sources still reach the engine as weak evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContent {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub credibility: Credibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceContent {
    pub fn failed(url: impl Into<String>, credibility: Credibility, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            content: String::new(),
            credibility,
            error: Some(error.into()),
        }
    }
}

// --- Verification output ---

/// The engine's judgment on one paragraph: how well its sources support it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub confidence: Confidence,
    pub summary_of_sources: String,
    pub reasoning: String,
}

/// Compact per-source summary attached to a result for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDigest {
    pub url: String,
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub doc_id: String,
    pub paragraph_id: u32,
    pub confidence: Confidence,
    pub summary_of_sources: String,
    pub reasoning: String,
    pub link_digests: Vec<LinkDigest>,
    pub verified_at: DateTime<Utc>,
}

// --- Jobs ---

/// The tracked lifecycle of verifying one paragraph within one document.
/// Keyed by `(doc_id, paragraph.id)`; mutated only through the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationJob {
    pub doc_id: String,
    pub paragraph: Paragraph,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<VerificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationJob {
    pub fn new(doc_id: impl Into<String>, paragraph: Paragraph) -> Self {
        let now = Utc::now();
        Self {
            doc_id: doc_id.into(),
            paragraph,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// --- Progress, stats, events ---

/// Point-in-time view of a document's verification run, derived from job
/// statuses. `total == 0` means the document is unknown to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub percent_complete: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub documents: usize,
    pub jobs: usize,
    pub results: usize,
}

/// Fired once per document, after its last job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentCompleted {
    pub doc_id: String,
    pub completed: usize,
    pub failed: usize,
}

/// Fired once per stored error, independent of the completion event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    pub doc_id: String,
    pub paragraph_id: u32,
    pub message: String,
}

// --- Helpers ---

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
pub fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_paragraph() -> Paragraph {
        Paragraph {
            id: 1,
            order: 1,
            text: "The sky is blue.".to_string(),
            links: vec!["https://example.edu/sky".to_string()],
            is_heading: false,
            heading_level: None,
        }
    }

    #[test]
    fn job_status_terminality() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn job_status_wire_format_is_snake_case() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn confidence_parses_loosely_but_rejects_junk() {
        assert_eq!(Confidence::from_str_loose(" High "), Some(Confidence::High));
        assert_eq!(Confidence::from_str_loose("MEDIUM"), Some(Confidence::Medium));
        assert_eq!(Confidence::from_str_loose("low"), Some(Confidence::Low));
        assert_eq!(Confidence::from_str_loose("very high"), None);
        assert_eq!(Confidence::from_str_loose(""), None);
    }

    #[test]
    fn credibility_wire_format_is_lowercase() {
        let json = serde_json::to_string(&Credibility::Academic).unwrap();
        assert_eq!(json, "\"academic\"");
    }

    #[test]
    fn paragraph_deserializes_with_defaults() {
        let p: Paragraph =
            serde_json::from_str(r#"{"id":3,"order":3,"text":"Intro","links":[]}"#).unwrap();
        assert!(!p.is_heading);
        assert!(p.heading_level.is_none());
        assert_eq!(p.id, 3);
    }

    #[test]
    fn new_job_starts_pending_with_no_result() {
        let job = VerificationJob::new("doc-1", test_paragraph());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn failed_source_has_empty_content() {
        let s = SourceContent::failed("https://a.test", Credibility::Unknown, "HTTP status 404");
        assert!(s.content.is_empty());
        assert_eq!(s.error.as_deref(), Some("HTTP status 404"));
        assert!(s.title.is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 3), "hel");
        // "é" is two bytes; cutting mid-char backs off to the boundary
        assert_eq!(truncate_str("caféx", 4), "caf");
        assert_eq!(truncate_str("", 5), "");
    }
}
