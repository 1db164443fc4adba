use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use veriscope_common::types::Paragraph;
use veriscope_common::Config;
use veriscope_verifier::orchestrator::RunOptions;
use veriscope_verifier::service::VerificationService;

/// Input file shape: a document id plus its extracted paragraphs.
#[derive(Debug, Deserialize)]
struct DocumentFile {
    doc_id: String,
    paragraphs: Vec<Paragraph>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("veriscope=info".parse()?))
        .init();

    info!("Veriscope verifier starting...");

    // Load config
    let config = Config::from_env()?;
    config.log_redacted();

    let path = std::env::args()
        .nth(1)
        .context("usage: veriscope-verifier <document.json>")?;
    let document = load_document(Path::new(&path))?;
    info!(
        doc_id = document.doc_id.as_str(),
        paragraphs = document.paragraphs.len(),
        "Loaded document"
    );

    let service = VerificationService::new(&config)?;
    let (_updates_handle, mut updates) = service.subscribe_updates();
    let (_completions_handle, mut completions) = service.subscribe_completions();

    service.submit(&document.doc_id, document.paragraphs, RunOptions::default());

    // Log per-paragraph results as they land, until the document completes
    loop {
        tokio::select! {
            Some(result) = updates.recv() => {
                info!(
                    paragraph_id = result.paragraph_id,
                    confidence = %result.confidence,
                    "Paragraph verified"
                );
            }
            Some(done) = completions.recv() => {
                info!(
                    doc_id = done.doc_id.as_str(),
                    completed = done.completed,
                    failed = done.failed,
                    "Document verification finished"
                );
                break;
            }
            else => break,
        }
    }
    // A result stored in the same breath as the completion may still be queued
    while let Ok(result) = updates.try_recv() {
        info!(
            paragraph_id = result.paragraph_id,
            confidence = %result.confidence,
            "Paragraph verified"
        );
    }

    let mut results = service.results(&document.doc_id);
    results.sort_by_key(|r| r.paragraph_id);
    for result in &results {
        info!(
            paragraph_id = result.paragraph_id,
            confidence = %result.confidence,
            "{}",
            result.summary_of_sources
        );
    }

    let stats = service.store_stats();
    info!(
        documents = stats.documents,
        jobs = stats.jobs,
        results = stats.results,
        "Store contents"
    );
    info!(caches = ?service.cache_stats(), "Cache stats");

    Ok(())
}

fn load_document(path: &Path) -> Result<DocumentFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let document: DocumentFile =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    if document.paragraphs.is_empty() {
        bail!("document {} has no paragraphs", document.doc_id);
    }
    Ok(document)
}
