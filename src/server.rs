//! JSON HTTP API.
//!
//! Exposes the similarity-check pipeline and the embedding-backend readiness
//! controls to the admin UI.
//!
//! # Endpoints
//!
//! | Method  | Path | Description |
//! |---------|------|-------------|
//! | `GET`   | `/health` | Health check (returns version) |
//! | `GET`   | `/ai/status` | Embedding backend readiness snapshot |
//! | `POST`  | `/ai/warmup` | Trigger (or join) a backend warm-up |
//! | `POST`  | `/checker/check` | Screen a proposal for similar capstones |
//! | `POST`  | `/capstones` | Create a capstone record and index it |
//! | `PATCH` | `/capstones/{id}/archive` | Archive a record, drop its point |
//! | `PATCH` | `/capstones/{id}/restore` | Restore a record, queue re-indexing |
//! | `GET`   | `/categories` | Active categories for the proposal form |
//!
//! # Error Contract
//!
//! Failures use a flat envelope: `{ "message": "..." }`, plus a field-keyed
//! `"errors"` map for validation failures (422). Backend outages return 503
//! with a generic retry message; raw backend detail is logged, never echoed.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::checker::{Checker, CheckerError, CheckRequest};
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::index::VectorIndex;
use crate::models::NewCapstone;
use crate::warmup::WarmupTracker;
use crate::{db, migrate, store};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
    checker: Arc<Checker>,
    warmup: Arc<WarmupTracker>,
}

/// Starts the HTTP server on the configured bind address.
///
/// Connects the database (running the idempotent migrations), builds the
/// backend clients, and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let embedder = Arc::new(EmbeddingClient::new(&config.embedding)?);
    let index = Arc::new(VectorIndex::new(&config.index, config.embedding.dims)?);

    let checker = Arc::new(Checker::new(
        pool.clone(),
        embedder.clone(),
        index,
        config.checker.clone(),
        config.embedding.timeout(),
        config.embedding.cold_timeout(),
    ));
    let warmup = Arc::new(WarmupTracker::new(
        pool.clone(),
        embedder,
        config.warmup.clone(),
    ));

    let state = AppState {
        pool,
        checker,
        warmup,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/ai/status", get(handle_ai_status))
        .route("/ai/warmup", post(handle_ai_warmup))
        .route("/checker/check", post(handle_check))
        .route("/capstones", post(handle_create_capstone))
        .route("/capstones/{id}/archive", patch(handle_archive))
        .route("/capstones/{id}/restore", patch(handle_restore))
        .route("/categories", get(handle_categories))
        .layer(cors)
        .with_state(state);

    info!(bind = %config.server.bind, "similarity service listening");

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error envelope ============

/// JSON failure body: `{message}` plus field errors for 422s.
#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<BTreeMap<String, Vec<String>>>,
}

struct AppError {
    status: StatusCode,
    body: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn unavailable(message: &str) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: ErrorBody {
            message: message.to_string(),
            errors: None,
        },
    }
}

fn not_found(message: &str) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        body: ErrorBody {
            message: message.to_string(),
            errors: None,
        },
    }
}

fn internal(message: &str) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorBody {
            message: message.to_string(),
            errors: None,
        },
    }
}

/// Map an orchestrator error to the wire envelope. Validation failures get
/// field-keyed detail; backend outages get the endpoint's generic message.
fn checker_error(err: CheckerError, unavailable_message: &str) -> AppError {
    match err {
        CheckerError::Invalid(field_errors) => {
            let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for fe in field_errors {
                errors.entry(fe.field.to_string()).or_default().push(fe.message);
            }
            AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                body: ErrorBody {
                    message: "The given data was invalid.".to_string(),
                    errors: Some(errors),
                },
            }
        }
        CheckerError::Unavailable => unavailable(unavailable_message),
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_ai_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.warmup.status().await;
    Json(serde_json::to_value(status).unwrap_or_else(|_| serde_json::json!({})))
}

async fn handle_ai_warmup(State(state): State<AppState>) -> Json<serde_json::Value> {
    let outcome = state.warmup.warmup().await;

    let mut body = serde_json::json!({ "warmed": outcome.warmed() });
    if let Some(reason) = outcome.reason() {
        body["reason"] = serde_json::json!(reason);
    }
    if let Some(until) = outcome.warmed_until() {
        body["warmed_until"] = serde_json::json!(until.to_rfc3339());
    }
    Json(body)
}

async fn handle_check(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state.checker.check_proposal(&req).await.map_err(|e| {
        checker_error(e, "Unable to check similarity right now. Please try again.")
    })?;

    Ok(Json(serde_json::json!({
        "message": "Similarity check completed.",
        "query": outcome.query,
        "matches": outcome.matches,
        "raw": outcome.raw,
    })))
}

async fn handle_create_capstone(
    State(state): State<AppState>,
    Json(req): Json<NewCapstone>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let capstone = state.checker.create_capstone(&req).await.map_err(|e| {
        checker_error(e, "Unable to create capstone right now. Please try again.")
    })?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Capstone created.",
            "data": capstone,
        })),
    ))
}

async fn handle_archive(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let archived = state
        .checker
        .archive(id)
        .await
        .map_err(|_| internal("Server error while archiving capstone."))?;

    if !archived {
        return Err(not_found("Capstone not found or already archived."));
    }
    Ok(Json(serde_json::json!({ "message": "Capstone archived." })))
}

async fn handle_restore(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let restored = state
        .checker
        .restore(id)
        .await
        .map_err(|_| internal("Server error while restoring capstone."))?;

    if !restored {
        return Err(not_found("Capstone not found or not archived."));
    }
    Ok(Json(serde_json::json!({ "message": "Capstone restored." })))
}

async fn handle_categories(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let categories = store::list_categories(&state.pool, true)
        .await
        .map_err(|_| internal("Server error while listing categories."))?;

    Ok(Json(serde_json::json!({ "categories": categories })))
}
