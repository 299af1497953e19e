//! Embedding backend client (Ollama-compatible HTTP API).
//!
//! Maps free text to a fixed-length vector via `POST /api/embeddings` and
//! probes backend reachability via `GET /api/tags`. Every call takes an
//! explicit total timeout because the same endpoint serves both warm requests
//! (seconds) and cold-start requests that must tolerate model load time
//! (tens of seconds); the connect timeout stays short in both cases so an
//! unreachable host fails fast.

use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed one text, enforcing the configured dimensionality.
    ///
    /// A vector of the wrong length fails with
    /// [`EmbeddingError::DimensionMismatch`] before anything can use it —
    /// never coerced by truncation or padding.
    pub async fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

        let vector = parse_embedding(&json)?;

        if vector.len() != self.dims {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dims,
                got: vector.len(),
            });
        }

        debug!(model = %self.model, dims = vector.len(), "embedded text");
        Ok(vector)
    }

    /// List model names reported by the backend. Used as the cheap
    /// reachability probe for readiness reporting.
    pub async fn list_models(&self, timeout: Duration) -> Result<Vec<String>, EmbeddingError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| EmbeddingError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

        let models = json
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}

/// Extract the `embedding` array from a backend response.
fn parse_embedding(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = json
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::Malformed("missing embedding array".to_string()))?;

    let mut vector = Vec::with_capacity(values.len());
    for value in values {
        let n = value
            .as_f64()
            .ok_or_else(|| EmbeddingError::Malformed("non-numeric embedding element".to_string()))?;
        vector.push(n as f32);
    }

    if vector.is_empty() {
        return Err(EmbeddingError::Malformed("empty embedding array".to_string()));
    }

    Ok(vector)
}

/// Build the canonical embedding input for a capstone.
///
/// Three labeled lines — Title, Category (display name, placeholder when
/// lookup fails), Abstract — joined with newlines and trimmed. Indexing and
/// proposal checks MUST both go through this builder: embedding a different
/// structure on one side silently degrades match quality.
pub fn canonical_text(title: &str, category_name: &str, abstract_text: &str) -> String {
    format!(
        "Title: {}\nCategory: {}\nAbstract: {}",
        title.trim(),
        category_name.trim(),
        abstract_text.trim()
    )
    .trim()
    .to_string()
}

/// Placeholder category name when the lookup comes back empty.
pub const UNCATEGORIZED: &str = "Uncategorized";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_text_is_three_labeled_lines() {
        let text = canonical_text(" Smart Campus ", "AI", " An abstract. ");
        assert_eq!(text, "Title: Smart Campus\nCategory: AI\nAbstract: An abstract.");
    }

    #[test]
    fn canonical_text_identical_for_index_and_query() {
        // The round-trip guarantee rests on both flows producing this string.
        let a = canonical_text("T", "C", "A");
        let b = canonical_text("T ", " C", "A\n");
        assert_eq!(a, b);
    }

    #[test]
    fn parse_embedding_accepts_numeric_array() {
        let json = json!({"embedding": [0.1, -0.5, 2.0]});
        let vector = parse_embedding(&json).unwrap();
        assert_eq!(vector.len(), 3);
        assert!((vector[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn parse_embedding_rejects_missing_array() {
        let json = json!({"error": "model not found"});
        assert!(matches!(
            parse_embedding(&json),
            Err(EmbeddingError::Malformed(_))
        ));
    }

    #[test]
    fn parse_embedding_rejects_non_numeric_elements() {
        let json = json!({"embedding": [0.1, "oops", 0.3]});
        assert!(matches!(
            parse_embedding(&json),
            Err(EmbeddingError::Malformed(_))
        ));
    }

    #[test]
    fn parse_embedding_rejects_empty_array() {
        let json = json!({"embedding": []});
        assert!(matches!(
            parse_embedding(&json),
            Err(EmbeddingError::Malformed(_))
        ));
    }
}
