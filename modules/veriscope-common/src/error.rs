use thiserror::Error;

/// Errors that cross module boundaries as values. Fetch failures live on
/// `SourceContent::error` and model failures ride `anyhow` through the
/// engine's retry loop, so what remains is store addressing.
#[derive(Error, Debug)]
pub enum VeriscopeError {
    #[error("Unknown document: {0}")]
    UnknownDocument(String),

    #[error("Unknown job: {doc_id} paragraph {paragraph_id}")]
    UnknownJob { doc_id: String, paragraph_id: u32 },
}
