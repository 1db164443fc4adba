//! Drives a document's paragraphs to terminal job states: fetch sources,
//! verify, store, in parallel or sequentially with a configurable gap.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use tokio::time::sleep;
use tracing::{error, info, warn};
use url::Url;

use veriscope_common::types::{
    truncate_str, Confidence, JobStatus, LinkDigest, Paragraph, ProgressSnapshot, SourceContent,
    VerificationJob, VerificationResult,
};

use crate::engine::ParagraphVerifier;
use crate::fetcher::SourceFetcher;
use crate::store::JobStore;

/// Per-source summary budget in a result's link digests.
const DIGEST_SNIPPET_BYTES: usize = 200;

/// How one run walks the paragraph list.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// One paragraph at a time, in input order, instead of all at once.
    pub sequential: bool,
    /// Gap between paragraphs in sequential mode; skipped after the last.
    pub delay_between: Duration,
}

/// Stats from one verification run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub doc_id: String,
    pub paragraphs: u32,
    pub verified: u32,
    pub failed: u32,
    pub headings: u32,
    pub elapsed: Duration,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Verification Run Complete ===")?;
        writeln!(f, "Document:   {}", self.doc_id)?;
        writeln!(f, "Paragraphs: {}", self.paragraphs)?;
        writeln!(f, "Verified:   {}", self.verified)?;
        writeln!(f, "Failed:     {}", self.failed)?;
        writeln!(f, "Headings:   {}", self.headings)?;
        writeln!(f, "Elapsed:    {:.1}s", self.elapsed.as_secs_f64())
    }
}

pub struct Orchestrator {
    store: Arc<JobStore>,
    fetcher: Arc<dyn SourceFetcher>,
    verifier: Arc<dyn ParagraphVerifier>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        fetcher: Arc<dyn SourceFetcher>,
        verifier: Arc<dyn ParagraphVerifier>,
    ) -> Self {
        Self {
            store,
            fetcher,
            verifier,
        }
    }

    /// Registers jobs and drives every paragraph to a terminal state.
    pub async fn run(
        &self,
        doc_id: &str,
        paragraphs: &[Paragraph],
        options: RunOptions,
    ) -> RunStats {
        let started = tokio::time::Instant::now();
        self.store.create_jobs(doc_id, paragraphs);
        info!(
            doc_id,
            paragraphs = paragraphs.len(),
            sequential = options.sequential,
            "Starting verification run"
        );

        if options.sequential {
            for (i, paragraph) in paragraphs.iter().enumerate() {
                self.verify_paragraph(doc_id, paragraph).await;
                if i + 1 < paragraphs.len() && !options.delay_between.is_zero() {
                    sleep(options.delay_between).await;
                }
            }
        } else {
            join_all(
                paragraphs
                    .iter()
                    .map(|paragraph| self.verify_paragraph(doc_id, paragraph)),
            )
            .await;
        }

        let jobs = self.store.get_jobs(doc_id);
        let stats = RunStats {
            doc_id: doc_id.to_string(),
            paragraphs: paragraphs.len() as u32,
            verified: jobs
                .iter()
                .filter(|j| j.status == JobStatus::Completed)
                .count() as u32,
            failed: jobs
                .iter()
                .filter(|j| j.status == JobStatus::Failed)
                .count() as u32,
            headings: paragraphs.iter().filter(|p| p.is_heading).count() as u32,
            elapsed: started.elapsed(),
        };
        info!("{stats}");
        stats
    }

    /// Fire-and-forget: spawns the run and returns immediately. Failures
    /// surface in logs and per-job errors, never to the caller.
    pub fn start(self: Arc<Self>, doc_id: &str, paragraphs: Vec<Paragraph>, options: RunOptions) {
        let doc_id = doc_id.to_string();
        tokio::spawn(async move {
            self.run(&doc_id, &paragraphs, options).await;
        });
    }

    /// Fails every still-pending job; in-progress jobs finish on their own.
    pub fn cancel(&self, doc_id: &str) -> usize {
        self.store.cancel_pending(doc_id, "verification cancelled")
    }

    /// Pure read over current job statuses.
    pub fn progress(&self, doc_id: &str) -> ProgressSnapshot {
        snapshot_from(&self.store.get_jobs(doc_id))
    }

    /// Never propagates: any failure lands in the store as a job error so
    /// the document still reaches completion.
    async fn verify_paragraph(&self, doc_id: &str, paragraph: &Paragraph) {
        if let Some(job) = self.store.get_job(doc_id, paragraph.id) {
            // Cancelled (or otherwise settled) before this paragraph's turn
            if job.status.is_terminal() {
                return;
            }
        }
        if let Err(e) = self.try_verify_paragraph(doc_id, paragraph).await {
            error!(
                doc_id,
                paragraph_id = paragraph.id,
                error = %e,
                "Verification job failed"
            );
            if let Err(store_err) = self.store.store_error(doc_id, paragraph.id, &e.to_string()) {
                warn!(
                    doc_id,
                    paragraph_id = paragraph.id,
                    error = %store_err,
                    "Could not record job failure"
                );
            }
        }
    }

    async fn try_verify_paragraph(&self, doc_id: &str, paragraph: &Paragraph) -> Result<()> {
        if paragraph.is_heading {
            self.store
                .store_result(doc_id, heading_result(doc_id, paragraph))?;
            return Ok(());
        }

        self.store
            .update_job_status(doc_id, paragraph.id, JobStatus::InProgress)?;

        let sources = self.fetcher.fetch_many(&paragraph.links).await;
        let verdict = self.verifier.verify(paragraph, &sources).await;

        let result = VerificationResult {
            doc_id: doc_id.to_string(),
            paragraph_id: paragraph.id,
            confidence: verdict.confidence,
            summary_of_sources: verdict.summary_of_sources,
            reasoning: verdict.reasoning,
            link_digests: sources.iter().map(link_digest).collect(),
            verified_at: Utc::now(),
        };
        self.store.store_result(doc_id, result)?;
        Ok(())
    }
}

/// Headings carry no checkable claims: stored as high confidence with no
/// digests, through the same store/notify path as real results.
fn heading_result(doc_id: &str, paragraph: &Paragraph) -> VerificationResult {
    VerificationResult {
        doc_id: doc_id.to_string(),
        paragraph_id: paragraph.id,
        confidence: Confidence::High,
        summary_of_sources: "Heading paragraph; no sources to verify.".to_string(),
        reasoning: "Headings are structural and carry no checkable claims.".to_string(),
        link_digests: Vec::new(),
        verified_at: Utc::now(),
    }
}

fn link_digest(source: &SourceContent) -> LinkDigest {
    let summary = match &source.error {
        Some(error) => format!("fetch failed: {error}"),
        None => truncate_str(&source.content, DIGEST_SNIPPET_BYTES).to_string(),
    };
    LinkDigest {
        url: source.url.clone(),
        title: source
            .title
            .clone()
            .unwrap_or_else(|| host_of(&source.url)),
        summary,
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

fn snapshot_from(jobs: &[VerificationJob]) -> ProgressSnapshot {
    let total = jobs.len();
    let completed = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .count();
    let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();
    let in_progress = jobs
        .iter()
        .filter(|j| j.status == JobStatus::InProgress)
        .count();
    let percent_complete = if total == 0 {
        0
    } else {
        (((completed + failed) * 100 + total / 2) / total) as u8
    };
    ProgressSnapshot {
        total,
        completed,
        failed,
        pending: total - completed - failed - in_progress,
        in_progress,
        percent_complete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veriscope_common::types::Credibility;

    fn job_with_status(id: u32, status: JobStatus) -> VerificationJob {
        let mut job = VerificationJob::new(
            "doc",
            Paragraph {
                id,
                order: id,
                text: format!("p{id}"),
                links: vec![],
                is_heading: false,
                heading_level: None,
            },
        );
        job.status = status;
        job
    }

    #[test]
    fn snapshot_counts_every_state() {
        let jobs = vec![
            job_with_status(1, JobStatus::Completed),
            job_with_status(2, JobStatus::Failed),
            job_with_status(3, JobStatus::InProgress),
            job_with_status(4, JobStatus::Pending),
        ];

        let snapshot = snapshot_from(&jobs);

        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.in_progress, 1);
        assert_eq!(snapshot.pending, 1);
        assert_eq!(snapshot.percent_complete, 50);
    }

    #[test]
    fn snapshot_rounds_percent_and_handles_empty() {
        let jobs = vec![
            job_with_status(1, JobStatus::Completed),
            job_with_status(2, JobStatus::Pending),
            job_with_status(3, JobStatus::Pending),
        ];
        assert_eq!(snapshot_from(&jobs).percent_complete, 33);

        assert_eq!(snapshot_from(&[]).percent_complete, 0);
        assert_eq!(snapshot_from(&[]).total, 0);
    }

    #[test]
    fn heading_results_are_high_confidence_with_no_digests() {
        let heading = Paragraph {
            id: 7,
            order: 7,
            text: "Background".to_string(),
            links: vec![],
            is_heading: true,
            heading_level: Some(2),
        };

        let result = heading_result("doc", &heading);

        assert_eq!(result.confidence, Confidence::High);
        assert!(result.link_digests.is_empty());
        assert_eq!(result.paragraph_id, 7);
    }

    #[test]
    fn digest_snips_content_and_falls_back_to_host() {
        let ok = SourceContent {
            url: "https://journal.test/articles/1".to_string(),
            title: None,
            content: "z".repeat(DIGEST_SNIPPET_BYTES * 2),
            credibility: Credibility::Academic,
            error: None,
        };
        let digest = link_digest(&ok);
        assert_eq!(digest.title, "journal.test");
        assert_eq!(digest.summary.len(), DIGEST_SNIPPET_BYTES);

        let failed = SourceContent::failed(
            "https://dead.test/x",
            Credibility::Unknown,
            "timed out after 15s",
        );
        let digest = link_digest(&failed);
        assert_eq!(digest.summary, "fetch failed: timed out after 15s");
    }
}
