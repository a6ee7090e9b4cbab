//! Embedding profiles, validated vectors and the provider seam.

pub mod openai;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RagError, Result};

/// Default model for ingestion and query embeddings.
pub const DEFAULT_LARGE_MODEL: &str = "text-embedding-3-large";
/// Default model for incremental backlog embeddings.
pub const DEFAULT_SMALL_MODEL: &str = "text-embedding-3-small";

/// Supported embedding dimensionalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorDims {
    /// 1536-dimension models.
    D1536,
    /// 3072-dimension models.
    D3072,
}

impl VectorDims {
    /// Number of components a vector of this profile must have.
    pub fn get(self) -> usize {
        match self {
            Self::D1536 => 1536,
            Self::D3072 => 3072,
        }
    }
}

/// Model, dimensionality and input ceiling for one embedding use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingProfile {
    /// Model identifier sent to the service.
    pub model: String,
    /// Dimensionality the returned vector must have.
    pub dims: VectorDims,
    /// Input is truncated to this many characters before sending.
    pub max_input_chars: usize,
}

impl EmbeddingProfile {
    /// Document ingestion: large model, 3072 dimensions, 8000 characters.
    pub fn ingestion() -> Self {
        Self {
            model: DEFAULT_LARGE_MODEL.to_string(),
            dims: VectorDims::D3072,
            max_input_chars: 8000,
        }
    }

    /// Query-time embedding; must live in the same space as ingested chunks.
    pub fn query() -> Self {
        Self::ingestion()
    }

    /// Backlog re-embedding: small model, 1536 dimensions, 2000 characters.
    pub fn incremental() -> Self {
        Self {
            model: DEFAULT_SMALL_MODEL.to_string(),
            dims: VectorDims::D1536,
            max_input_chars: 2000,
        }
    }

    /// Overrides the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Dimension hint for the request body; only `text-embedding-3*` models accept it.
    pub fn request_dimensions(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3")
            .then(|| self.dims.get())
    }
}

/// A vector that passed dimensionality and numeric checks.
///
/// Store writes take this type, so an unchecked vector cannot be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Vec<f32>,
}

impl EmbeddingVector {
    /// Accepts `values` only when its length matches `dims`.
    pub fn try_new(values: Vec<f32>, dims: VectorDims) -> Result<Self> {
        if values.len() != dims.get() {
            return Err(RagError::DimensionMismatch {
                expected: dims.get(),
                actual: values.len(),
            });
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(RagError::MalformedEmbedding(format!(
                "embedding element {idx} is not a finite number"
            )));
        }
        Ok(Self { values })
    }

    /// Vector components.
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false for a validated vector.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the wrapper.
    pub fn into_inner(self) -> Vec<f32> {
        self.values
    }
}

/// Validates an embeddings API response body against the expected dimensionality.
///
/// Checks run in order: vector field present, field is a sequence, length matches, every
/// element is numeric.
pub fn parse_embedding_response(body: &Value, dims: VectorDims) -> Result<EmbeddingVector> {
    let field = body
        .get("data")
        .and_then(|data| data.get(0))
        .and_then(|entry| entry.get("embedding"))
        .ok_or_else(|| {
            RagError::MalformedEmbedding("response contains no embedding vector".to_string())
        })?;
    let items = field
        .as_array()
        .ok_or_else(|| RagError::MalformedEmbedding("embedding is not an array".to_string()))?;
    if items.len() != dims.get() {
        return Err(RagError::DimensionMismatch {
            expected: dims.get(),
            actual: items.len(),
        });
    }
    let mut values = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let value = item.as_f64().ok_or_else(|| {
            RagError::MalformedEmbedding(format!("embedding element {idx} is not numeric"))
        })?;
        values.push(value as f32);
    }
    EmbeddingVector::try_new(values, dims)
}

/// Produces embeddings for text under a given profile.
///
/// Implementations surface every failure to the caller; retry policy belongs to callers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds `text`, truncated to the profile's input ceiling.
    async fn embed(&self, text: &str, profile: &EmbeddingProfile) -> Result<EmbeddingVector>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body_with(vector: Value) -> Value {
        json!({ "data": [{ "embedding": vector, "index": 0 }], "usage": { "total_tokens": 3 } })
    }

    #[test]
    fn accepts_vector_of_expected_length() {
        let body = body_with(json!(vec![0.25; 1536]));
        let vector = parse_embedding_response(&body, VectorDims::D1536).expect("valid");
        assert_eq!(vector.len(), 1536);
        assert_eq!(vector.as_slice()[0], 0.25);
    }

    #[test]
    fn short_vector_reports_expected_and_actual() {
        let body = body_with(json!(vec![0.1; 1536]));
        let err = parse_embedding_response(&body, VectorDims::D3072).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 3072,
                actual: 1536
            }
        ));
        assert!(err.to_string().contains("expected 3072 dimensions, not 1536"));
    }

    #[test]
    fn missing_vector_field_is_malformed() {
        let err = parse_embedding_response(&json!({ "data": [] }), VectorDims::D1536).unwrap_err();
        assert!(matches!(err, RagError::MalformedEmbedding(_)));
        let err = parse_embedding_response(&json!({ "error": "x" }), VectorDims::D1536).unwrap_err();
        assert!(err.to_string().contains("no embedding vector"));
    }

    #[test]
    fn non_sequence_vector_is_malformed() {
        let err = parse_embedding_response(&body_with(json!("0.1,0.2")), VectorDims::D1536)
            .unwrap_err();
        assert!(err.to_string().contains("not an array"));
    }

    #[test]
    fn non_numeric_element_is_rejected() {
        let mut values: Vec<Value> = vec![json!(0.5); 1536];
        values[7] = json!("oops");
        let err = parse_embedding_response(&body_with(Value::Array(values)), VectorDims::D1536)
            .unwrap_err();
        assert!(err.to_string().contains("element 7 is not numeric"));
    }

    #[test]
    fn profiles_carry_expected_limits() {
        assert_eq!(EmbeddingProfile::ingestion().dims.get(), 3072);
        assert_eq!(EmbeddingProfile::ingestion().max_input_chars, 8000);
        assert_eq!(EmbeddingProfile::incremental().dims.get(), 1536);
        assert_eq!(EmbeddingProfile::incremental().max_input_chars, 2000);
        assert_eq!(
            EmbeddingProfile::query().request_dimensions(),
            Some(3072)
        );
        assert_eq!(
            EmbeddingProfile::incremental()
                .with_model("text-embedding-ada-002")
                .request_dimensions(),
            None
        );
    }

    #[test]
    fn try_new_rejects_wrong_length() {
        assert!(EmbeddingVector::try_new(vec![0.0; 512], VectorDims::D3072).is_err());
        assert!(EmbeddingVector::try_new(vec![0.0; 3072], VectorDims::D3072).is_ok());
    }
}
