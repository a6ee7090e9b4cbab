//! Wire form of a retrieval request and its normalization into typed parameters.

use serde::Deserialize;
use serde_json::Value;

use crate::config::RetrievalConfig;
use crate::error::{RagError, Result};

/// Threshold as sent by clients: a number, a level name, or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ThresholdInput {
    /// Raw similarity bar.
    Number(f64),
    /// `high`, `medium`, `low`, or a number in text form.
    Text(String),
}

impl ThresholdInput {
    /// Resolves to a bar in `[0, 1]`, or `None` when the input is unusable.
    pub fn resolve(&self) -> Option<f32> {
        let value = match self {
            Self::Number(value) => *value,
            Self::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "high" => 0.8,
                "medium" => 0.6,
                "low" => 0.4,
                other => other.parse::<f64>().ok()?,
            },
        };
        value.is_finite().then(|| value.clamp(0.0, 1.0) as f32)
    }
}

/// Tag filter as sent by clients: a list or a comma-separated string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    /// `["pricing", "faq"]`
    List(Vec<String>),
    /// `"pricing, faq"`
    Csv(String),
}

impl TagsInput {
    /// Trimmed, non-empty tags.
    pub fn resolve(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Self::List(items) => items.iter().map(String::as_str).collect(),
            Self::Csv(text) => text.split(',').collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Body of `POST /v1/retrieve`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveRequest {
    /// Agent whose knowledge bases are searched.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Query text; numbers and booleans are coerced to text.
    #[serde(default)]
    pub query: Option<Value>,
    /// Requested result count, clamped to `[1, 10]`.
    #[serde(default)]
    pub top_k: Option<Value>,
    /// Similarity bar.
    #[serde(default)]
    pub threshold: Option<ThresholdInput>,
    /// Optional tag filter.
    #[serde(default)]
    pub tags: Option<TagsInput>,
    /// Enables metadata bonuses on top of similarity.
    #[serde(default, alias = "useMetadataScoring")]
    pub use_metadata: Option<bool>,
}

impl RetrieveRequest {
    /// Request with only the required fields set.
    pub fn new(agent_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            query: Some(Value::String(query.into())),
            ..Self::default()
        }
    }

    /// Sets `topK`.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(Value::from(top_k));
        self
    }

    /// Sets a numeric threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(ThresholdInput::Number(threshold));
        self
    }

    /// Sets the tag filter.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(TagsInput::List(tags.into_iter().map(Into::into).collect()));
        self
    }

    /// Toggles metadata scoring.
    pub fn with_metadata_scoring(mut self, enabled: bool) -> Self {
        self.use_metadata = Some(enabled);
        self
    }

    /// Validates and resolves every field against `config`.
    pub fn normalize(&self, config: &RetrievalConfig) -> Result<RetrievalParams> {
        let agent_id = self
            .agent_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RagError::validation("agentId is required"))?
            .to_string();
        let query = coerce_query(self.query.as_ref())
            .ok_or_else(|| RagError::validation("query must be a non-empty string"))?;
        let top_k = self
            .top_k
            .as_ref()
            .and_then(coerce_count)
            .unwrap_or(config.default_top_k as f64);
        let top_k = top_k.clamp(1.0, config.max_top_k.max(1) as f64) as usize;
        let threshold = self
            .threshold
            .as_ref()
            .and_then(ThresholdInput::resolve)
            .unwrap_or(config.default_threshold);
        let tags = self.tags.as_ref().map(TagsInput::resolve).unwrap_or_default();

        Ok(RetrievalParams {
            agent_id,
            query,
            top_k,
            threshold,
            tags,
            use_metadata_scoring: self.use_metadata.unwrap_or(true),
        })
    }
}

/// Resolved, validated retrieval parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Agent scope.
    pub agent_id: String,
    /// Trimmed, non-empty query.
    pub query: String,
    /// Results returned, in `[1, max_top_k]`.
    pub top_k: usize,
    /// Primary similarity bar in `[0, 1]`.
    pub threshold: f32,
    /// Requested tags; empty means no filtering.
    pub tags: Vec<String>,
    /// Whether metadata bonuses apply.
    pub use_metadata_scoring: bool,
}

fn coerce_query(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn coerce_count(value: &Value) -> Option<f64> {
    let count = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    count.is_finite().then(|| count.round())
}
