//! Error taxonomy shared by the ingestion and retrieval engines.

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, RagError>;

/// Failures surfaced by the chunking, embedding, storage and retrieval layers.
#[derive(Debug, Error)]
pub enum RagError {
    /// A request field was missing or malformed.
    #[error("invalid request: {0}")]
    Validation(String),
    /// The embedding service or the datastore failed.
    #[error("{service} request failed: {message}")]
    Upstream {
        /// Collaborator that failed (`embedding`, `datastore`, ...).
        service: &'static str,
        /// Raw error text reported by the collaborator.
        message: String,
    },
    /// The embedding service returned a vector of the wrong length.
    #[error("embedding dimension mismatch: expected {expected} dimensions, not {actual}")]
    DimensionMismatch {
        /// Dimensionality required by the active profile.
        expected: usize,
        /// Length of the vector actually returned.
        actual: usize,
    },
    /// The embedding payload was present but unusable.
    #[error("malformed embedding response: {0}")]
    MalformedEmbedding(String),
    /// A referenced document, agent or queue item does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind, e.g. `document`.
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
}

impl RagError {
    /// Builds a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wraps an embedding-service failure.
    pub fn embedding(message: impl ToString) -> Self {
        Self::Upstream {
            service: "embedding",
            message: message.to_string(),
        }
    }

    /// Wraps a datastore failure.
    pub fn datastore(message: impl ToString) -> Self {
        Self::Upstream {
            service: "datastore",
            message: message.to_string(),
        }
    }

    /// Builds a not-found error for a document id.
    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "document",
            id: id.into(),
        }
    }
}

impl From<tokio_postgres::Error> for RagError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::datastore(err)
    }
}
