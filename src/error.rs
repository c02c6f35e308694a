//! Error kinds raised by the retrieval core (spec.md §7).
//!
//! `ModelError` during rerank is recovered locally by the hybrid engine (it
//! falls back to the unreranked ranking) — everything else propagates to the
//! caller. Nothing here is retried; retry policy belongs to the host.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Caller-visible: bad subject id, chunk-size bounds, out-of-range limit.
    #[error("validation error: {0}")]
    Validation(String),

    /// PDF bytes unparseable; carries the underlying cause.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// The ANN store refused an operation, or a BM25 invariant was violated.
    #[error("index error: {0}")]
    Index(String),

    /// The embedder or reranker invocation failed.
    #[error("model error: {0}")]
    Model(String),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;

impl RetrievalError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }
}
