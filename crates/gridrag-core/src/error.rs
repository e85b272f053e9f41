use std::fmt;

use thiserror::Error;

/// External service or store a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Embedding,
    Generation,
    SparseIndex,
    DenseIndex,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Backend::Embedding => "embedding backend",
            Backend::Generation => "generation backend",
            Backend::SparseIndex => "sparse index",
            Backend::DenseIndex => "dense index",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    /// Chunks reached the sparse index and are queued for dense retry.
    #[error("embedding backend unavailable ({pending} chunks queued for dense retry): {reason}")]
    EmbeddingUnavailable { pending: usize, reason: String },

    #[error("{backend} failed: {reason}")]
    Store { backend: Backend, reason: String },
}

impl IndexError {
    pub fn store(backend: Backend, err: impl fmt::Display) -> Self {
        IndexError::Store { backend, reason: err.to_string() }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IngestError {
    #[error("document {document_id} has no extractable text: {reason}")]
    UnsupportedFormat { document_id: String, reason: String },

    #[error("embedding backend unavailable for {document_id}: {reason}")]
    EmbeddingUnavailable { document_id: String, reason: String },

    #[error("{backend} failed while ingesting {document_id}: {reason}")]
    Storage { document_id: String, backend: Backend, reason: String },
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, IngestError::UnsupportedFormat { .. })
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetrievalError {
    #[error("both indices unavailable (dense: {dense}; sparse: {sparse})")]
    BothIndicesUnavailable { dense: String, sparse: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompositionError {
    #[error("no candidate reached the admission threshold (best score {best_score:.3})")]
    InsufficientEvidence { best_score: f32 },

    #[error("role '{role}' may not receive '{category}' answers")]
    AccessDenied { role: String, category: String },

    #[error("{backend} unavailable: {reason}")]
    GenerationUnavailable { backend: Backend, reason: String, timed_out: bool },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Composition(#[from] CompositionError),
}

impl QueryError {
    /// Whether the caller may retry the same request later with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::Retrieval(RetrievalError::BothIndicesUnavailable { .. })
                | QueryError::Composition(CompositionError::GenerationUnavailable { .. })
        )
    }

    /// Message suitable for an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            QueryError::EmptyQuery | QueryError::InvalidTopK => "Please enter a question.",
            QueryError::Retrieval(_) => "The document indices are temporarily unavailable. Please try again shortly.",
            QueryError::Composition(CompositionError::InsufficientEvidence { .. }) => {
                "No confident answer found in the documented material."
            }
            QueryError::Composition(CompositionError::AccessDenied { .. }) => {
                "Your role is not permitted to receive this information."
            }
            QueryError::Composition(CompositionError::GenerationUnavailable { .. }) => {
                "The answering service is temporarily unavailable. Please try again shortly."
            }
        }
    }
}
