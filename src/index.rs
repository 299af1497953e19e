//! Vector index client (Qdrant-compatible HTTP API).
//!
//! Manages the external vector collection: point upsert/delete, filtered
//! nearest-neighbor search, and on-demand payload-field index creation.
//! Writes pass `wait=true` so a point is searchable the moment the call
//! returns. Searches filtered on an unindexed payload field auto-heal: the
//! missing field index is created and the search retried exactly once.

use std::time::Duration;

use anyhow::Result;
use reqwest::Method;
use serde::Deserialize;
use tracing::{error, warn};

use crate::config::IndexConfig;
use crate::error::{classify_search_failure, IndexError};
use crate::models::{PointPayload, SimilarityMatch};

/// Point deletes run under a shorter bound than the other operations.
const DELETE_TIMEOUT: Duration = Duration::from_secs(15);

pub struct VectorIndex {
    http: reqwest::Client,
    url: String,
    collection: String,
    api_key: Option<String>,
    dims: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: i64,
    score: f32,
    #[serde(default)]
    payload: Option<PointPayload>,
}

impl VectorIndex {
    pub fn new(config: &IndexConfig, dims: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.resolved_api_key(),
            dims,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{}", self.url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    /// Create the collection if it does not exist. Idempotent; used by
    /// `init` and the backfill command, not per-request.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let probe = self
            .request(Method::GET, &format!("/collections/{}", self.collection))
            .send()
            .await
            .map_err(|e| IndexError::Unreachable(e.to_string()))?;

        if probe.status().is_success() {
            return Ok(());
        }

        let response = self
            .request(Method::PUT, &format!("/collections/{}", self.collection))
            .json(&serde_json::json!({
                "vectors": { "size": self.dims, "distance": "Cosine" },
            }))
            .send()
            .await
            .map_err(|e| IndexError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::CollectionFailed {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Upsert one point, blocking until the index confirms write
    /// visibility. After this returns, the point is searchable.
    pub async fn upsert(
        &self,
        id: i64,
        vector: &[f32],
        payload: &PointPayload,
    ) -> Result<(), IndexError> {
        let response = self
            .request(
                Method::PUT,
                &format!("/collections/{}/points?wait=true", self.collection),
            )
            .json(&serde_json::json!({
                "points": [{ "id": id, "vector": vector, "payload": payload }],
            }))
            .send()
            .await
            .map_err(|e| IndexError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::UpsertFailed {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Delete one point, waiting for visibility. Callers using this as a
    /// compensating action should go through [`VectorIndex::delete_logged`].
    pub async fn delete(&self, id: i64) -> Result<(), IndexError> {
        let response = self
            .request(
                Method::POST,
                &format!("/collections/{}/points/delete?wait=true", self.collection),
            )
            .timeout(DELETE_TIMEOUT)
            .json(&serde_json::json!({ "points": [id] }))
            .send()
            .await
            .map_err(|e| IndexError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::DeleteFailed {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Compensating delete: failure is logged and swallowed, never allowed
    /// to mask the error already in flight.
    pub async fn delete_logged(&self, id: i64) {
        if let Err(e) = self.delete(id).await {
            warn!(point_id = id, error = %e, "compensating point delete failed");
        }
    }

    /// Nearest-neighbor search restricted to one category, most-similar
    /// first, at most `limit` results.
    ///
    /// If the search fails because `category_id` has no payload index yet,
    /// the index is created (integer schema) and the search retried exactly
    /// once. Any other failure, or a second failure, is fatal for the call.
    pub async fn search(
        &self,
        vector: &[f32],
        limit: u32,
        category_id: i64,
    ) -> Result<Vec<SimilarityMatch>, IndexError> {
        match self.search_once(vector, limit, category_id).await {
            Ok(matches) => Ok(matches),
            Err(IndexError::MissingPayloadIndex { field }) => {
                warn!(field = %field, "payload index missing; creating and retrying once");
                self.create_payload_index(&field).await?;
                self.search_once(vector, limit, category_id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn search_once(
        &self,
        vector: &[f32],
        limit: u32,
        category_id: i64,
    ) -> Result<Vec<SimilarityMatch>, IndexError> {
        let response = self
            .request(
                Method::POST,
                &format!("/collections/{}/points/search", self.collection),
            )
            .json(&serde_json::json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
                "filter": {
                    "must": [{ "key": "category_id", "match": { "value": category_id } }],
                },
            }))
            .send()
            .await
            .map_err(|e| IndexError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_search_failure(status.as_u16(), &body);
            if !matches!(err, IndexError::MissingPayloadIndex { .. }) {
                error!(status = status.as_u16(), body = %body, "vector search failed");
            }
            return Err(err);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Malformed(e.to_string()))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|hit| SimilarityMatch {
                id: hit.id,
                score: hit.score,
                payload: hit.payload,
            })
            .collect())
    }

    /// Create a secondary index for one payload field (integer schema —
    /// the only filterable field in this system is the category id).
    pub async fn create_payload_index(&self, field: &str) -> Result<(), IndexError> {
        let response = self
            .request(Method::PUT, &format!("/collections/{}/index", self.collection))
            .json(&serde_json::json!({
                "field_name": field,
                "field_schema": "integer",
            }))
            .send()
            .await
            .map_err(|e| IndexError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::IndexCreateFailed {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
