//! In-memory job and result store with channel-based progress events.
//!
//! One lock guards all documents and subscriber lists. Mutation and event
//! dispatch happen in the same critical section so subscribers observe
//! store order; senders are unbounded, so dispatch never blocks the lock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use veriscope_common::error::VeriscopeError;
use veriscope_common::types::{
    DocumentCompleted, JobFailure, JobStatus, Paragraph, StoreStats, VerificationJob,
    VerificationResult,
};

// --- Subscriptions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriberChannel {
    Update,
    Completion,
    Error,
}

/// Returned by `subscribe_*`; pass back to `unsubscribe` to stop delivery.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionHandle {
    id: Uuid,
    channel: SubscriberChannel,
}

/// Send to every live subscriber, pruning the disconnected ones.
fn send_all<T: Clone>(subs: &mut HashMap<Uuid, UnboundedSender<T>>, event: &T, kind: &str) {
    subs.retain(|id, tx| match tx.send(event.clone()) {
        Ok(()) => true,
        Err(_) => {
            debug!(subscriber = %id, kind, "Dropping disconnected subscriber");
            false
        }
    });
}

// --- Documents ---

struct DocumentEntry {
    jobs: Vec<VerificationJob>,
    results: Vec<VerificationResult>,
    completion_fired: bool,
}

impl DocumentEntry {
    /// Some(event) exactly once: when every job is terminal and the event has
    /// not fired yet. Documents with no jobs never complete.
    fn completion_event(&mut self, doc_id: &str) -> Option<DocumentCompleted> {
        if self.completion_fired || self.jobs.is_empty() {
            return None;
        }
        if !self.jobs.iter().all(|j| j.status.is_terminal()) {
            return None;
        }
        self.completion_fired = true;
        let completed = self
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Completed)
            .count();
        Some(DocumentCompleted {
            doc_id: doc_id.to_string(),
            completed,
            failed: self.jobs.len() - completed,
        })
    }
}

#[derive(Default)]
struct StoreInner {
    documents: HashMap<String, DocumentEntry>,
    update_subs: HashMap<Uuid, UnboundedSender<VerificationResult>>,
    completion_subs: HashMap<Uuid, UnboundedSender<DocumentCompleted>>,
    error_subs: HashMap<Uuid, UnboundedSender<JobFailure>>,
}

impl StoreInner {
    fn job_mut(
        &mut self,
        doc_id: &str,
        paragraph_id: u32,
    ) -> Result<&mut VerificationJob, VeriscopeError> {
        let entry = self
            .documents
            .get_mut(doc_id)
            .ok_or_else(|| VeriscopeError::UnknownDocument(doc_id.to_string()))?;
        entry
            .jobs
            .iter_mut()
            .find(|j| j.paragraph.id == paragraph_id)
            .ok_or_else(|| VeriscopeError::UnknownJob {
                doc_id: doc_id.to_string(),
                paragraph_id,
            })
    }
}

// --- Store ---

#[derive(Default)]
pub struct JobStore {
    inner: Mutex<StoreInner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("job store lock poisoned")
    }

    /// Registers one pending job per paragraph, replacing any prior state
    /// for the document.
    pub fn create_jobs(&self, doc_id: &str, paragraphs: &[Paragraph]) -> Vec<VerificationJob> {
        let jobs: Vec<VerificationJob> = paragraphs
            .iter()
            .map(|p| VerificationJob::new(doc_id, p.clone()))
            .collect();

        let mut inner = self.lock();
        inner.documents.insert(
            doc_id.to_string(),
            DocumentEntry {
                jobs: jobs.clone(),
                results: Vec::new(),
                completion_fired: false,
            },
        );
        debug!(doc_id, jobs = jobs.len(), "Created verification jobs");
        jobs
    }

    /// Moves a job to `status`. A job never leaves a terminal state: such
    /// writes are ignored with a warning.
    pub fn update_job_status(
        &self,
        doc_id: &str,
        paragraph_id: u32,
        status: JobStatus,
    ) -> Result<(), VeriscopeError> {
        let mut inner = self.lock();
        let job = inner.job_mut(doc_id, paragraph_id)?;
        if job.status.is_terminal() {
            warn!(
                doc_id,
                paragraph_id,
                current = %job.status,
                requested = %status,
                "Ignoring status write to terminal job"
            );
            return Ok(());
        }
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    /// Upserts the paragraph's result (replace by paragraph id, latest wins),
    /// mirrors it onto the job, flips the job to completed, and notifies
    /// update subscribers. Fires the document completion event when this was
    /// the last unfinished job. A failed job stays failed: its result is
    /// dropped with a warning.
    pub fn store_result(
        &self,
        doc_id: &str,
        result: VerificationResult,
    ) -> Result<(), VeriscopeError> {
        let mut inner = self.lock();

        let completion = {
            let job = inner.job_mut(doc_id, result.paragraph_id)?;
            if job.status == JobStatus::Failed {
                warn!(
                    doc_id,
                    paragraph_id = result.paragraph_id,
                    "Dropping result for failed job"
                );
                return Ok(());
            }
            job.status = JobStatus::Completed;
            job.result = Some(result.clone());
            job.error = None;
            job.updated_at = Utc::now();

            // job_mut already proved the document exists
            let entry = inner
                .documents
                .get_mut(doc_id)
                .ok_or_else(|| VeriscopeError::UnknownDocument(doc_id.to_string()))?;
            match entry
                .results
                .iter_mut()
                .find(|r| r.paragraph_id == result.paragraph_id)
            {
                Some(existing) => *existing = result.clone(),
                None => entry.results.push(result.clone()),
            }
            entry.completion_event(doc_id)
        };

        send_all(&mut inner.update_subs, &result, "update");
        if let Some(event) = completion {
            info!(
                doc_id,
                completed = event.completed,
                failed = event.failed,
                "Document verification complete"
            );
            send_all(&mut inner.completion_subs, &event, "completion");
        }
        Ok(())
    }

    /// Flips the job to failed with `message` and notifies error
    /// subscribers. Triggers the same completion check as `store_result`.
    pub fn store_error(
        &self,
        doc_id: &str,
        paragraph_id: u32,
        message: &str,
    ) -> Result<(), VeriscopeError> {
        let mut inner = self.lock();

        let completion = {
            let job = inner.job_mut(doc_id, paragraph_id)?;
            if job.status.is_terminal() {
                warn!(
                    doc_id,
                    paragraph_id,
                    current = %job.status,
                    "Dropping error for terminal job"
                );
                return Ok(());
            }
            job.status = JobStatus::Failed;
            job.error = Some(message.to_string());
            job.updated_at = Utc::now();

            let entry = inner
                .documents
                .get_mut(doc_id)
                .ok_or_else(|| VeriscopeError::UnknownDocument(doc_id.to_string()))?;
            entry.completion_event(doc_id)
        };

        let failure = JobFailure {
            doc_id: doc_id.to_string(),
            paragraph_id,
            message: message.to_string(),
        };
        send_all(&mut inner.error_subs, &failure, "error");
        if let Some(event) = completion {
            info!(
                doc_id,
                completed = event.completed,
                failed = event.failed,
                "Document verification complete"
            );
            send_all(&mut inner.completion_subs, &event, "completion");
        }
        Ok(())
    }

    /// Fails every still-pending job with `message` in one critical section.
    /// In-progress jobs are left alone. Returns the number cancelled.
    pub fn cancel_pending(&self, doc_id: &str, message: &str) -> usize {
        let mut inner = self.lock();

        let (failures, completion) = {
            let Some(entry) = inner.documents.get_mut(doc_id) else {
                return 0;
            };
            let mut failures = Vec::new();
            for job in entry
                .jobs
                .iter_mut()
                .filter(|j| j.status == JobStatus::Pending)
            {
                job.status = JobStatus::Failed;
                job.error = Some(message.to_string());
                job.updated_at = Utc::now();
                failures.push(JobFailure {
                    doc_id: doc_id.to_string(),
                    paragraph_id: job.paragraph.id,
                    message: message.to_string(),
                });
            }
            (failures, entry.completion_event(doc_id))
        };

        for failure in &failures {
            send_all(&mut inner.error_subs, failure, "error");
        }
        if let Some(event) = completion {
            send_all(&mut inner.completion_subs, &event, "completion");
        }
        if !failures.is_empty() {
            info!(doc_id, cancelled = failures.len(), "Cancelled pending jobs");
        }
        failures.len()
    }

    // --- Reads ---

    /// Empty for unknown documents; callers treat an empty list as "unknown".
    pub fn get_jobs(&self, doc_id: &str) -> Vec<VerificationJob> {
        self.lock()
            .documents
            .get(doc_id)
            .map(|e| e.jobs.clone())
            .unwrap_or_default()
    }

    pub fn get_job(&self, doc_id: &str, paragraph_id: u32) -> Option<VerificationJob> {
        self.lock()
            .documents
            .get(doc_id)?
            .jobs
            .iter()
            .find(|j| j.paragraph.id == paragraph_id)
            .cloned()
    }

    pub fn get_results(&self, doc_id: &str) -> Vec<VerificationResult> {
        self.lock()
            .documents
            .get(doc_id)
            .map(|e| e.results.clone())
            .unwrap_or_default()
    }

    pub fn get_result(&self, doc_id: &str, paragraph_id: u32) -> Option<VerificationResult> {
        self.lock()
            .documents
            .get(doc_id)?
            .results
            .iter()
            .find(|r| r.paragraph_id == paragraph_id)
            .cloned()
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.lock();
        StoreStats {
            documents: inner.documents.len(),
            jobs: inner.documents.values().map(|e| e.jobs.len()).sum(),
            results: inner.documents.values().map(|e| e.results.len()).sum(),
        }
    }

    // --- Lifecycle ---

    pub fn clear_document(&self, doc_id: &str) -> bool {
        self.lock().documents.remove(doc_id).is_some()
    }

    /// Drops all documents. Subscribers stay registered.
    pub fn clear_all(&self) {
        self.lock().documents.clear();
    }

    // --- Pub/sub ---

    pub fn subscribe_updates(
        &self,
    ) -> (SubscriptionHandle, UnboundedReceiver<VerificationResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().update_subs.insert(id, tx);
        (
            SubscriptionHandle {
                id,
                channel: SubscriberChannel::Update,
            },
            rx,
        )
    }

    pub fn subscribe_completions(
        &self,
    ) -> (SubscriptionHandle, UnboundedReceiver<DocumentCompleted>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().completion_subs.insert(id, tx);
        (
            SubscriptionHandle {
                id,
                channel: SubscriberChannel::Completion,
            },
            rx,
        )
    }

    pub fn subscribe_errors(&self) -> (SubscriptionHandle, UnboundedReceiver<JobFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().error_subs.insert(id, tx);
        (
            SubscriptionHandle {
                id,
                channel: SubscriberChannel::Error,
            },
            rx,
        )
    }

    /// True if the handle was still registered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut inner = self.lock();
        match handle.channel {
            SubscriberChannel::Update => inner.update_subs.remove(&handle.id).is_some(),
            SubscriberChannel::Completion => inner.completion_subs.remove(&handle.id).is_some(),
            SubscriberChannel::Error => inner.error_subs.remove(&handle.id).is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veriscope_common::types::Confidence;

    fn paragraphs(n: u32) -> Vec<Paragraph> {
        (1..=n)
            .map(|id| Paragraph {
                id,
                order: id,
                text: format!("Paragraph {id}"),
                links: vec![format!("https://s{id}.test")],
                is_heading: false,
                heading_level: None,
            })
            .collect()
    }

    fn result(doc_id: &str, paragraph_id: u32, summary: &str) -> VerificationResult {
        VerificationResult {
            doc_id: doc_id.to_string(),
            paragraph_id,
            confidence: Confidence::Medium,
            summary_of_sources: summary.to_string(),
            reasoning: "because".to_string(),
            link_digests: Vec::new(),
            verified_at: Utc::now(),
        }
    }

    #[test]
    fn create_jobs_registers_pending_jobs() {
        let store = JobStore::new();
        let jobs = store.create_jobs("doc", &paragraphs(3));

        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Pending));
        assert_eq!(
            store.stats(),
            StoreStats {
                documents: 1,
                jobs: 3,
                results: 0
            }
        );
    }

    #[test]
    fn create_jobs_replaces_prior_state() {
        let store = JobStore::new();
        store.create_jobs("doc", &paragraphs(3));
        store.store_result("doc", result("doc", 1, "first run")).unwrap();

        store.create_jobs("doc", &paragraphs(2));

        let jobs = store.get_jobs("doc");
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Pending));
        assert!(store.get_results("doc").is_empty());
    }

    #[test]
    fn jobs_never_leave_a_terminal_state() {
        let store = JobStore::new();
        store.create_jobs("doc", &paragraphs(1));
        store.store_error("doc", 1, "boom").unwrap();

        store
            .update_job_status("doc", 1, JobStatus::InProgress)
            .unwrap();

        let job = store.get_job("doc", 1).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn store_result_upserts_latest_per_paragraph() {
        let store = JobStore::new();
        store.create_jobs("doc", &paragraphs(2));

        store.store_result("doc", result("doc", 1, "first")).unwrap();
        store.store_result("doc", result("doc", 1, "second")).unwrap();

        let results = store.get_results("doc");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].summary_of_sources, "second");

        let job = store.get_job("doc", 1).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.result.as_ref().map(|r| r.summary_of_sources.as_str()),
            Some("second")
        );
    }

    #[test]
    fn store_result_never_revives_a_failed_job() {
        let store = JobStore::new();
        store.create_jobs("doc", &paragraphs(1));
        store.store_error("doc", 1, "cancelled").unwrap();

        store.store_result("doc", result("doc", 1, "late")).unwrap();

        assert_eq!(store.get_job("doc", 1).unwrap().status, JobStatus::Failed);
        assert!(store.get_results("doc").is_empty());
    }

    #[test]
    fn completion_fires_exactly_once_after_last_terminal_transition() {
        let store = JobStore::new();
        let (_handle, mut completions) = store.subscribe_completions();
        store.create_jobs("doc", &paragraphs(2));

        store.store_result("doc", result("doc", 1, "ok")).unwrap();
        assert!(completions.try_recv().is_err());

        store.store_error("doc", 2, "boom").unwrap();
        let event = completions.try_recv().unwrap();
        assert_eq!(event.doc_id, "doc");
        assert_eq!(event.completed, 1);
        assert_eq!(event.failed, 1);

        // Re-storing after completion never re-fires
        store.store_result("doc", result("doc", 1, "again")).unwrap();
        assert!(completions.try_recv().is_err());
    }

    #[test]
    fn updates_arrive_in_store_order() {
        let store = JobStore::new();
        let (_handle, mut updates) = store.subscribe_updates();
        store.create_jobs("doc", &paragraphs(3));

        store.store_result("doc", result("doc", 2, "second paragraph")).unwrap();
        store.store_result("doc", result("doc", 1, "first paragraph")).unwrap();

        assert_eq!(updates.try_recv().unwrap().paragraph_id, 2);
        assert_eq!(updates.try_recv().unwrap().paragraph_id, 1);
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let store = JobStore::new();
        let (handle, mut updates) = store.subscribe_updates();
        store.create_jobs("doc", &paragraphs(1));

        assert!(store.unsubscribe(handle));
        assert!(!store.unsubscribe(handle));

        store.store_result("doc", result("doc", 1, "ok")).unwrap();
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_does_not_block_other_subscribers() {
        let store = JobStore::new();
        let (_gone, dead) = store.subscribe_updates();
        let (_kept, mut alive) = store.subscribe_updates();
        drop(dead);
        store.create_jobs("doc", &paragraphs(2));

        store.store_result("doc", result("doc", 1, "one")).unwrap();
        store.store_result("doc", result("doc", 2, "two")).unwrap();

        assert_eq!(alive.try_recv().unwrap().paragraph_id, 1);
        assert_eq!(alive.try_recv().unwrap().paragraph_id, 2);
    }

    #[test]
    fn errors_fan_out_per_stored_error() {
        let store = JobStore::new();
        let (_handle, mut errors) = store.subscribe_errors();
        store.create_jobs("doc", &paragraphs(1));

        store.store_error("doc", 1, "fetch exploded").unwrap();

        let failure = errors.try_recv().unwrap();
        assert_eq!(failure.paragraph_id, 1);
        assert_eq!(failure.message, "fetch exploded");
    }

    #[test]
    fn cancel_fails_pending_jobs_only() {
        let store = JobStore::new();
        let (_handle, mut completions) = store.subscribe_completions();
        store.create_jobs("doc", &paragraphs(3));
        store
            .update_job_status("doc", 1, JobStatus::InProgress)
            .unwrap();

        let cancelled = store.cancel_pending("doc", "verification cancelled");

        assert_eq!(cancelled, 2);
        assert_eq!(
            store.get_job("doc", 1).unwrap().status,
            JobStatus::InProgress
        );
        for id in [2, 3] {
            let job = store.get_job("doc", id).unwrap();
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.error.as_deref(), Some("verification cancelled"));
        }
        // In-progress job still running, so no completion yet
        assert!(completions.try_recv().is_err());

        store.store_result("doc", result("doc", 1, "ok")).unwrap();
        let event = completions.try_recv().unwrap();
        assert_eq!(event.completed, 1);
        assert_eq!(event.failed, 2);
    }

    #[test]
    fn cancel_on_unknown_document_is_a_no_op() {
        let store = JobStore::new();
        assert_eq!(store.cancel_pending("nope", "cancelled"), 0);
    }

    #[test]
    fn unknown_document_and_job_are_errors() {
        let store = JobStore::new();
        assert!(matches!(
            store.update_job_status("nope", 1, JobStatus::InProgress),
            Err(VeriscopeError::UnknownDocument(_))
        ));

        store.create_jobs("doc", &paragraphs(1));
        assert!(matches!(
            store.store_error("doc", 99, "boom"),
            Err(VeriscopeError::UnknownJob { .. })
        ));
        assert!(store.get_jobs("nope").is_empty());
    }

    #[test]
    fn clear_document_and_clear_all_reset_state() {
        let store = JobStore::new();
        store.create_jobs("a", &paragraphs(2));
        store.create_jobs("b", &paragraphs(1));

        assert!(store.clear_document("a"));
        assert!(!store.clear_document("a"));
        assert_eq!(
            store.stats(),
            StoreStats {
                documents: 1,
                jobs: 1,
                results: 0
            }
        );

        store.clear_all();
        assert_eq!(store.stats(), StoreStats::default());
    }
}
