//! Similarity check orchestration.
//!
//! Composes the embedding client, the vector index, and the relational store
//! into the two end-to-end flows:
//!
//! - **check** — screen a proposed title/category/abstract against indexed
//!   capstones in the same category and partition results by a score
//!   threshold;
//! - **create** — persist a capstone record, embed and index it, and roll the
//!   vector point back if anything fails after the upsert.
//!
//! Validation failures carry field-level detail and never touch a backend.
//! Backend failures surface as one generic retryable outcome; the detail
//! lands in the log, never in the response.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::CheckerConfig;
use crate::embedding::{canonical_text, EmbeddingClient, UNCATEGORIZED};
use crate::index::VectorIndex;
use crate::models::{Capstone, NewCapstone, PointPayload, SimilarityMatch};
use crate::store;

/// One field-level validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

fn field_error(field: &'static str, message: impl Into<String>) -> FieldError {
    FieldError {
        field,
        message: message.into(),
    }
}

#[derive(Debug, Error)]
pub enum CheckerError {
    /// Input rejected before any backend call.
    #[error("validation failed")]
    Invalid(Vec<FieldError>),
    /// Embedding or index backend failure; detail is logged, not exposed.
    #[error("similarity backend unavailable")]
    Unavailable,
}

/// A proposal to screen.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CheckRequest {
    pub title: String,
    pub category_id: i64,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub threshold: Option<f32>,
}

/// Echo of the effective query, returned alongside results.
#[derive(Debug, Clone, Serialize)]
pub struct CheckQuery {
    pub title: String,
    pub category_id: i64,
    pub category: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub threshold: f32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub query: CheckQuery,
    /// Results clearing the threshold.
    pub matches: Vec<SimilarityMatch>,
    /// The full ranked list, so callers can offer a "show all" fallback.
    pub raw: Vec<SimilarityMatch>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub total: usize,
    pub synced: usize,
    pub failed: usize,
}

pub struct Checker {
    pool: SqlitePool,
    embedder: Arc<EmbeddingClient>,
    index: Arc<VectorIndex>,
    config: CheckerConfig,
    /// Timeout for check-flow embedding calls.
    embed_timeout: Duration,
    /// Timeout for create-flow embedding calls, sized for cold starts.
    cold_embed_timeout: Duration,
}

impl Checker {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<EmbeddingClient>,
        index: Arc<VectorIndex>,
        config: CheckerConfig,
        embed_timeout: Duration,
        cold_embed_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            embedder,
            index,
            config,
            embed_timeout,
            cold_embed_timeout,
        }
    }

    /// Screen a proposal against indexed capstones in the same category.
    pub async fn check_proposal(&self, req: &CheckRequest) -> Result<CheckOutcome, CheckerError> {
        let limit = req.limit.unwrap_or(self.config.default_limit);
        let threshold = req.threshold.unwrap_or(self.config.default_threshold);

        let mut errors = self.validate_record_fields(&req.title, &req.abstract_text);
        if limit < 1 || limit > self.config.max_limit {
            errors.push(field_error(
                "limit",
                format!("limit must be between 1 and {}", self.config.max_limit),
            ));
        }
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(field_error("threshold", "threshold must be between 0 and 1"));
        }
        self.check_category(req.category_id, &mut errors).await?;
        if !errors.is_empty() {
            return Err(CheckerError::Invalid(errors));
        }

        let category = self.category_display_name(req.category_id).await;
        let text = canonical_text(&req.title, &category, &req.abstract_text);

        let vector = self
            .embedder
            .embed(&text, self.embed_timeout)
            .await
            .map_err(|e| {
                error!(error = %e, "proposal check embedding failed");
                CheckerError::Unavailable
            })?;

        let results = self
            .index
            .search(&vector, limit, req.category_id)
            .await
            .map_err(|e| {
                error!(error = %e, "proposal check search failed");
                CheckerError::Unavailable
            })?;

        let (matches, raw) = partition_matches(results, threshold);

        Ok(CheckOutcome {
            query: CheckQuery {
                title: req.title.clone(),
                category_id: req.category_id,
                category,
                abstract_text: req.abstract_text.clone(),
                threshold,
                limit,
            },
            matches,
            raw,
        })
    }

    /// Create a capstone record and index it.
    ///
    /// The relational write commits first; it is never rolled back for an
    /// embedding or indexing failure — the record survives with
    /// `embedding_status = 'failed'`, a valid retryable state. If anything
    /// fails after a successful upsert, the point is deleted again so a
    /// half-synced point cannot stay searchable.
    pub async fn create_capstone(&self, new: &NewCapstone) -> Result<Capstone, CheckerError> {
        let mut errors = self.validate_record_fields(&new.title, &new.abstract_text);
        if let Some(year) = &new.academic_year {
            if year.trim().len() > 9 {
                errors.push(field_error("academic_year", "academic year is too long"));
            }
        }
        self.check_category(new.category_id, &mut errors).await?;
        if !errors.is_empty() {
            return Err(CheckerError::Invalid(errors));
        }

        let capstone = store::insert_capstone(&self.pool, new, Utc::now().timestamp())
            .await
            .map_err(|e| {
                if store::is_duplicate_title(&e) {
                    CheckerError::Invalid(vec![field_error(
                        "title",
                        "This title is already registered.",
                    )])
                } else {
                    error!(error = %e, "capstone insert failed");
                    CheckerError::Unavailable
                }
            })?;

        match self.index_capstone(&capstone).await {
            Ok(()) => {
                info!(capstone_id = capstone.id, "capstone created and indexed");
                store::get_capstone(&self.pool, capstone.id)
                    .await
                    .ok()
                    .flatten()
                    .ok_or(CheckerError::Unavailable)
            }
            Err(e) => {
                error!(capstone_id = capstone.id, error = %e, "capstone indexing failed");
                Err(CheckerError::Unavailable)
            }
        }
    }

    /// Embed and upsert one record's point, then mark it synced.
    ///
    /// On failure the record is marked `failed` with the error detail; if
    /// the failure struck after the upsert, the point is deleted again
    /// (compensation, logged-not-fatal).
    async fn index_capstone(&self, capstone: &Capstone) -> Result<()> {
        let category = self.category_display_name(capstone.category_id).await;
        let text = canonical_text(&capstone.title, &category, &capstone.abstract_text);

        let mut upserted = false;
        let result = self
            .embed_and_upsert(capstone, &category, &text, &mut upserted)
            .await;

        if let Err(e) = &result {
            if upserted {
                warn!(capstone_id = capstone.id, "rolling back point after post-upsert failure");
                self.index.delete_logged(capstone.id).await;
            }
            let detail = format!("{e:#}");
            if let Err(mark_err) =
                store::mark_failed(&self.pool, capstone.id, &detail, Utc::now().timestamp()).await
            {
                warn!(capstone_id = capstone.id, error = %mark_err, "failed to record embedding failure");
            }
        }

        result
    }

    async fn embed_and_upsert(
        &self,
        capstone: &Capstone,
        category: &str,
        text: &str,
        upserted: &mut bool,
    ) -> Result<()> {
        let vector = self
            .embedder
            .embed(text, self.cold_embed_timeout)
            .await
            .context("embedding failed")?;

        let payload = PointPayload {
            capstone_id: capstone.id,
            title: capstone.title.clone(),
            category_id: capstone.category_id,
            category: category.to_string(),
            abstract_text: capstone.abstract_text.clone(),
            updated_at: Some(
                chrono::DateTime::from_timestamp(capstone.updated_at, 0)
                    .unwrap_or_else(Utc::now)
                    .to_rfc3339(),
            ),
        };

        self.index
            .upsert(capstone.id, &vector, &payload)
            .await
            .context("point upsert failed")?;
        *upserted = true;

        store::mark_synced(&self.pool, capstone.id, Utc::now().timestamp())
            .await
            .context("embedding status update failed")?;

        Ok(())
    }

    /// Re-index records whose point is not confirmed in the index
    /// (pending or failed). Per-record failures are recorded and skipped.
    pub async fn sync_pending(&self, limit: Option<i64>) -> Result<SyncReport> {
        self.index
            .ensure_collection()
            .await
            .context("vector collection provisioning failed")?;

        let pending = store::pending_capstones(&self.pool, limit).await?;
        let mut report = SyncReport {
            total: pending.len(),
            ..SyncReport::default()
        };

        for capstone in &pending {
            match self.index_capstone(capstone).await {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    warn!(capstone_id = capstone.id, error = %e, "backfill indexing failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Soft-archive a record and drop its vector point so it stops
    /// surfacing as a similarity match. The point delete is best-effort.
    pub async fn archive(&self, id: i64) -> Result<bool> {
        if !store::archive_capstone(&self.pool, id, Utc::now().timestamp()).await? {
            return Ok(false);
        }
        self.index.delete_logged(id).await;
        info!(capstone_id = id, "capstone archived");
        Ok(true)
    }

    /// Un-archive a record. It returns in `pending` state; the next
    /// `sync pending` run re-indexes it.
    pub async fn restore(&self, id: i64) -> Result<bool> {
        let restored = store::restore_capstone(&self.pool, id, Utc::now().timestamp()).await?;
        if restored {
            info!(capstone_id = id, "capstone restored, queued for re-indexing");
        }
        Ok(restored)
    }

    fn validate_record_fields(&self, title: &str, abstract_text: &str) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let title = title.trim();
        if title.is_empty() {
            errors.push(field_error("title", "title is required"));
        } else if title.len() > 255 {
            errors.push(field_error("title", "title must be at most 255 characters"));
        }
        if abstract_text.trim().is_empty() {
            errors.push(field_error("abstract", "abstract is required"));
        }
        errors
    }

    async fn check_category(
        &self,
        category_id: i64,
        errors: &mut Vec<FieldError>,
    ) -> Result<(), CheckerError> {
        match store::category_exists(&self.pool, category_id).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                errors.push(field_error("category_id", "unknown category"));
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "category lookup failed");
                Err(CheckerError::Unavailable)
            }
        }
    }

    async fn category_display_name(&self, category_id: i64) -> String {
        store::category_name(&self.pool, category_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| UNCATEGORIZED.to_string())
    }
}

/// Order results most-similar first and split off those clearing the
/// threshold. `matches` is exactly the prefix-filtered view of `raw`.
fn partition_matches(
    mut raw: Vec<SimilarityMatch>,
    threshold: f32,
) -> (Vec<SimilarityMatch>, Vec<SimilarityMatch>) {
    raw.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let matches = raw.iter().filter(|m| m.score >= threshold).cloned().collect();
    (matches, raw)
}
