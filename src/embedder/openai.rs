//! OpenAI-compatible embeddings client.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{parse_embedding_response, Embedder, EmbeddingProfile, EmbeddingVector};
use crate::error::{RagError, Result};
use crate::normalizer::truncate_chars;

/// Async embeddings client that talks to OpenAI-compatible `/embeddings` endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
}

impl OpenAiEmbedder {
    /// Builds a new client; `base_url` is the API root (e.g. `https://api.openai.com/v1`).
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self { client, endpoint })
    }

    /// Full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str, profile: &EmbeddingProfile) -> Result<EmbeddingVector> {
        let input = truncate_chars(text, profile.max_input_chars);
        if input.trim().is_empty() {
            return Err(RagError::validation("cannot embed empty text"));
        }
        let request = EmbeddingRequest {
            model: &profile.model,
            input,
            dimensions: profile.request_dimensions(),
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(RagError::embedding)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RagError::embedding(format!("({status}): {body}")));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|err| RagError::embedding(format!("failed to parse response: {err}")))?;
        if let Some(tokens) = body.pointer("/usage/total_tokens").and_then(Value::as_u64) {
            debug!(model = %profile.model, tokens, "embedding usage");
        }
        parse_embedding_response(&body, profile.dims)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}
