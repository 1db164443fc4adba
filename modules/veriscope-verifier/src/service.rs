//! Wires the pipeline together and owns its lifecycle. Everything is an
//! explicitly constructed instance; tests build as many independent
//! services as they need and `reset()` puts one back to a blank slate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;

use veriscope_common::types::{
    DocumentCompleted, JobFailure, Paragraph, ProgressSnapshot, StoreStats, VerificationJob,
    VerificationResult,
};
use veriscope_common::Config;

use crate::cache::{CacheStatsReport, VerifierCaches};
use crate::engine::{ParagraphVerifier, VerificationEngine};
use crate::fetcher::{HttpPageFetcher, SourceFetcher, WebSourceFetcher};
use crate::orchestrator::{Orchestrator, RunOptions, RunStats};
use crate::store::{JobStore, SubscriptionHandle};

pub struct VerificationService {
    store: Arc<JobStore>,
    caches: Arc<VerifierCaches>,
    orchestrator: Arc<Orchestrator>,
}

impl VerificationService {
    /// Production wiring: HTTP source fetcher and Claude-backed engine
    /// sharing one cache set.
    pub fn new(config: &Config) -> Result<Self> {
        let caches = Arc::new(VerifierCaches::new());
        let pages = HttpPageFetcher::new(Duration::from_secs(config.fetch_timeout_secs))?;
        let fetcher: Arc<dyn SourceFetcher> =
            Arc::new(WebSourceFetcher::new(Arc::new(pages), Arc::clone(&caches)));
        let verifier: Arc<dyn ParagraphVerifier> = Arc::new(VerificationEngine::new(
            config.anthropic_api_key.as_deref(),
            &config.claude_model,
            Arc::clone(&caches),
        ));
        Ok(Self::assemble(caches, fetcher, verifier))
    }

    /// Custom wiring for tests: stub fetchers and verifiers drop in at the
    /// trait seams.
    pub fn with_parts(
        fetcher: Arc<dyn SourceFetcher>,
        verifier: Arc<dyn ParagraphVerifier>,
    ) -> Self {
        Self::assemble(Arc::new(VerifierCaches::new()), fetcher, verifier)
    }

    fn assemble(
        caches: Arc<VerifierCaches>,
        fetcher: Arc<dyn SourceFetcher>,
        verifier: Arc<dyn ParagraphVerifier>,
    ) -> Self {
        let store = Arc::new(JobStore::new());
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&store), fetcher, verifier));
        Self {
            store,
            caches,
            orchestrator,
        }
    }

    /// Fire-and-forget: registers and verifies in the background.
    pub fn submit(&self, doc_id: &str, paragraphs: Vec<Paragraph>, options: RunOptions) {
        Arc::clone(&self.orchestrator).start(doc_id, paragraphs, options);
    }

    /// Drives a run to completion on the caller's task.
    pub async fn run(
        &self,
        doc_id: &str,
        paragraphs: &[Paragraph],
        options: RunOptions,
    ) -> RunStats {
        self.orchestrator.run(doc_id, paragraphs, options).await
    }

    pub fn cancel(&self, doc_id: &str) -> usize {
        self.orchestrator.cancel(doc_id)
    }

    pub fn progress(&self, doc_id: &str) -> ProgressSnapshot {
        self.orchestrator.progress(doc_id)
    }

    pub fn jobs(&self, doc_id: &str) -> Vec<VerificationJob> {
        self.store.get_jobs(doc_id)
    }

    pub fn results(&self, doc_id: &str) -> Vec<VerificationResult> {
        self.store.get_results(doc_id)
    }

    pub fn subscribe_updates(
        &self,
    ) -> (SubscriptionHandle, UnboundedReceiver<VerificationResult>) {
        self.store.subscribe_updates()
    }

    pub fn subscribe_completions(
        &self,
    ) -> (SubscriptionHandle, UnboundedReceiver<DocumentCompleted>) {
        self.store.subscribe_completions()
    }

    pub fn subscribe_errors(&self) -> (SubscriptionHandle, UnboundedReceiver<JobFailure>) {
        self.store.subscribe_errors()
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.store.unsubscribe(handle)
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn cache_stats(&self) -> CacheStatsReport {
        self.caches.stats()
    }

    /// Back to a blank slate: drops all documents, cached values, and
    /// hit/miss counters.
    pub fn reset(&self) {
        self.store.clear_all();
        self.caches.clear_all();
    }
}
