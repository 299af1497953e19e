//! Warm-up / readiness tracking for the embedding backend.
//!
//! The first embedding call after the backend has been idle pays the model
//! load time. This module lets any number of callers ask for a warm-up while
//! guaranteeing at most one in-flight warm-up embedding call — across every
//! process sharing the database, not just this one. Coordination state lives
//! in two `app_state` rows:
//!
//! - `embedding_warmed_until` — TTL'd timestamp; fresh ⇒ warmed.
//! - `embedding_warmup_lease` — short-lived lease taken by the caller doing
//!   the work. It auto-expires, so a holder that crashes mid-warm-up cannot
//!   block warm-up permanently.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WarmupConfig;
use crate::embedding::EmbeddingClient;
use crate::error::EmbeddingError;
use crate::models::{AiStatus, WarmupOutcome};
use crate::store;

const WARMED_KEY: &str = "embedding_warmed_until";
const LEASE_KEY: &str = "embedding_warmup_lease";

pub struct WarmupTracker {
    pool: SqlitePool,
    embedder: Arc<EmbeddingClient>,
    config: WarmupConfig,
}

impl WarmupTracker {
    pub fn new(pool: SqlitePool, embedder: Arc<EmbeddingClient>, config: WarmupConfig) -> Self {
        Self {
            pool,
            embedder,
            config,
        }
    }

    /// Cheap readiness probe. Never fails: any probe error collapses to the
    /// all-false snapshot so status polling can run unconditionally.
    pub async fn status(&self) -> AiStatus {
        let warmed_until = self.warmed_until().await;

        let models = match self
            .embedder
            .list_models(self.config.probe_timeout())
            .await
        {
            Ok(models) => models,
            Err(_) => return AiStatus::unreachable(self.embedder.model_name()),
        };

        let model = self.embedder.model_name();
        AiStatus {
            ollama_reachable: true,
            model_available: models.iter().any(|m| m.contains(model)),
            model: model.to_string(),
            warmed: warmed_until.is_some(),
            warmed_until,
        }
    }

    /// Warm the embedding backend, coordinating across concurrent callers.
    ///
    /// Idempotent while the cached warm window is fresh. When another caller
    /// already holds the warm-up lease, returns
    /// [`WarmupOutcome::AlreadyWarming`] immediately instead of blocking or
    /// duplicating the cold-start call. The lease is released on every exit
    /// path; if this process dies first, the lease expiry frees it.
    pub async fn warmup(&self) -> WarmupOutcome {
        if let Some(until) = self.warmed_until().await {
            return WarmupOutcome::AlreadyWarmed { until };
        }

        let now = Utc::now();
        let token = Uuid::new_v4().to_string();
        let lease_until = now.timestamp() + self.config.lease_secs as i64;

        match store::try_acquire_lease(&self.pool, LEASE_KEY, &token, now.timestamp(), lease_until)
            .await
        {
            Ok(true) => {}
            Ok(false) => return WarmupOutcome::AlreadyWarming,
            Err(e) => {
                warn!(error = %e, "warm-up lease acquisition failed");
                return WarmupOutcome::Unreachable;
            }
        }

        let result = self
            .embedder
            .embed(&self.config.prompt, self.config.embed_timeout())
            .await;

        let outcome = match result {
            Ok(_) => {
                let until = Utc::now() + ChronoDuration::seconds(self.config.warm_secs as i64);
                if let Err(e) =
                    store::put_state(&self.pool, WARMED_KEY, &until.to_rfc3339(), until.timestamp())
                        .await
                {
                    // The backend is warm either way; losing the cache entry
                    // only risks one redundant warm-up later.
                    warn!(error = %e, "failed to record warmed_until");
                }
                info!(until = %until, "embedding backend warmed");
                WarmupOutcome::Warmed { until }
            }
            Err(EmbeddingError::Unreachable(detail)) => {
                warn!(error = %detail, "warm-up call unreachable or timed out");
                WarmupOutcome::Unreachable
            }
            Err(e) => {
                warn!(error = %e, "warm-up embedding call failed");
                WarmupOutcome::EmbedFailed
            }
        };

        if let Err(e) = store::release_lease(&self.pool, LEASE_KEY, &token).await {
            // Expiry will free it.
            warn!(error = %e, "warm-up lease release failed");
        }

        outcome
    }

    async fn warmed_until(&self) -> Option<DateTime<Utc>> {
        let now = Utc::now().timestamp();
        let value = store::get_fresh_state(&self.pool, WARMED_KEY, now)
            .await
            .ok()
            .flatten()?;
        DateTime::parse_from_rfc3339(&value)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}
