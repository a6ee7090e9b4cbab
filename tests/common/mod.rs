#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use knowledge_rag::{Embedder, EmbeddingProfile, EmbeddingVector, RagError, Result, VectorDims};
use serde_json::{json, Value};

/// Embeds everything onto one axis of the profile's space.
pub struct UnitEmbedder {
    pub axis: usize,
}

#[async_trait]
impl Embedder for UnitEmbedder {
    async fn embed(&self, _text: &str, profile: &EmbeddingProfile) -> Result<EmbeddingVector> {
        EmbeddingVector::try_new(unit(profile.dims, &[(self.axis, 1.0)]), profile.dims)
    }
}

/// Always fails like a rate-limited upstream.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str, _profile: &EmbeddingProfile) -> Result<EmbeddingVector> {
        Err(RagError::embedding("(429 Too Many Requests): slow down"))
    }
}

/// Dense vector with the given axis weights.
pub fn unit(dims: VectorDims, weights: &[(usize, f32)]) -> Vec<f32> {
    let mut values = vec![0.0; dims.get()];
    for &(idx, weight) in weights {
        values[idx] = weight;
    }
    values
}

pub fn vector(dims: VectorDims, weights: &[(usize, f32)]) -> EmbeddingVector {
    EmbeddingVector::try_new(unit(dims, weights), dims).expect("valid test vector")
}

/// Body shaped like an embeddings API success.
pub fn embedding_body(len: usize) -> Value {
    json!({
        "data": [{ "embedding": vec![0.01; len], "index": 0 }],
        "usage": { "prompt_tokens": 4, "total_tokens": 4 }
    })
}

type Reply = Arc<dyn Fn(&Value) -> (StatusCode, String) + Send + Sync>;

#[derive(Clone)]
struct StubState {
    reply: Reply,
    seen: Arc<Mutex<Vec<Value>>>,
}

/// Local stand-in for the embeddings service.
pub struct EmbeddingStub {
    pub base_url: String,
    pub seen: Arc<Mutex<Vec<Value>>>,
}

impl EmbeddingStub {
    /// Serves `reply` for every `POST /v1/embeddings` on an ephemeral port.
    pub async fn spawn<F>(reply: F) -> Self
    where
        F: Fn(&Value) -> (StatusCode, String) + Send + Sync + 'static,
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            reply: Arc::new(reply),
            seen: seen.clone(),
        };
        let app = Router::new()
            .route("/v1/embeddings", post(embeddings))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub server");
        });
        Self {
            base_url: format!("http://{addr}/v1"),
            seen,
        }
    }

    /// Replies with a vector of `len` components.
    pub async fn with_vector_len(len: usize) -> Self {
        Self::spawn(move |_| (StatusCode::OK, embedding_body(len).to_string())).await
    }

    pub fn requests(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }
}

async fn embeddings(State(state): State<StubState>, Json(request): Json<Value>) -> (StatusCode, String) {
    let reply = (state.reply)(&request);
    state.seen.lock().unwrap().push(request);
    reply
}
