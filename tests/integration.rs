//! End-to-end tests driving the real clients and orchestrator against
//! in-process stub backends (an Ollama-shaped embedding endpoint and a
//! Qdrant-shaped vector index), with a scratch SQLite database per test.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use sqlx::SqlitePool;
use tempfile::TempDir;

use capstone_screen::checker::{Checker, CheckerError, CheckRequest};
use capstone_screen::config::{
    CheckerConfig, Config, DbConfig, EmbeddingConfig, IndexConfig, ServerConfig, WarmupConfig,
};
use capstone_screen::models::{EmbeddingStatus, NewCapstone, WarmupOutcome};
use capstone_screen::warmup::WarmupTracker;
use capstone_screen::{db, embedding, index, migrate, store};

const DIMS: usize = 16;
const MODEL: &str = "nomic-embed-text";

// ============ Deterministic fake embeddings ============

/// Pseudo-random but text-deterministic vector: identical texts embed to
/// identical vectors, so cosine against itself is 1.0.
fn fake_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut seed: u32 = 2_166_136_261;
    for b in text.bytes() {
        seed ^= u32::from(b);
        seed = seed.wrapping_mul(16_777_619);
    }
    let mut v = Vec::with_capacity(dims);
    for _ in 0..dims {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        v.push((seed >> 8) as f32 / (1 << 24) as f32 - 0.5);
    }
    v
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

// ============ Embedding backend stub ============

#[derive(Clone)]
struct OllamaStub {
    embed_calls: Arc<AtomicUsize>,
    /// Dimensionality of returned vectors (mismatch tests shrink this).
    dims: usize,
    delay: Duration,
}

impl OllamaStub {
    fn new(dims: usize) -> Self {
        Self {
            embed_calls: Arc::new(AtomicUsize::new(0)),
            dims,
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/api/embeddings", post(ollama_embed))
            .route("/api/tags", get(ollama_tags))
            .with_state(self.clone())
    }
}

async fn ollama_embed(
    State(stub): State<OllamaStub>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    stub.embed_calls.fetch_add(1, Ordering::SeqCst);
    if !stub.delay.is_zero() {
        tokio::time::sleep(stub.delay).await;
    }
    let prompt = body["prompt"].as_str().unwrap_or_default();
    Json(serde_json::json!({ "embedding": fake_vector(prompt, stub.dims) }))
}

async fn ollama_tags() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "models": [{ "name": format!("{MODEL}:latest") }] }))
}

// ============ Vector index stub ============

#[derive(Clone)]
struct QdrantStub {
    points: Arc<Mutex<HashMap<i64, (Vec<f32>, serde_json::Value)>>>,
    has_category_index: Arc<AtomicBool>,
    /// When false, creating the payload index does not fix search — the
    /// missing-index error keeps coming back.
    heal_on_index_create: bool,
    /// When false, search works without any payload index.
    require_category_index: bool,
    search_calls: Arc<AtomicUsize>,
    index_create_calls: Arc<AtomicUsize>,
    upsert_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
}

impl QdrantStub {
    fn new() -> Self {
        Self {
            points: Arc::new(Mutex::new(HashMap::new())),
            has_category_index: Arc::new(AtomicBool::new(false)),
            heal_on_index_create: true,
            require_category_index: false,
            search_calls: Arc::new(AtomicUsize::new(0)),
            index_create_calls: Arc::new(AtomicUsize::new(0)),
            upsert_calls: Arc::new(AtomicUsize::new(0)),
            delete_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn requiring_index(mut self) -> Self {
        self.require_category_index = true;
        self
    }

    fn never_healing(mut self) -> Self {
        self.require_category_index = true;
        self.heal_on_index_create = false;
        self
    }

    fn router(&self) -> Router {
        Router::new()
            .route(
                "/collections/{name}",
                get(qdrant_get_collection).put(qdrant_put_collection),
            )
            .route("/collections/{name}/points", put(qdrant_upsert))
            .route("/collections/{name}/points/delete", post(qdrant_delete))
            .route("/collections/{name}/points/search", post(qdrant_search))
            .route("/collections/{name}/index", put(qdrant_create_index))
            .with_state(self.clone())
    }

    fn point_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.points.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

async fn qdrant_get_collection(Path(_name): Path<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "result": { "status": "green" }, "status": "ok" }))
}

async fn qdrant_put_collection(Path(_name): Path<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "result": true, "status": "ok" }))
}

async fn qdrant_upsert(
    State(stub): State<QdrantStub>,
    Path(_name): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    stub.upsert_calls.fetch_add(1, Ordering::SeqCst);
    let mut points = stub.points.lock().unwrap();
    for point in body["points"].as_array().unwrap() {
        let id = point["id"].as_i64().unwrap();
        let vector: Vec<f32> = point["vector"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap() as f32)
            .collect();
        points.insert(id, (vector, point["payload"].clone()));
    }
    Json(serde_json::json!({ "result": { "status": "completed" }, "status": "ok" }))
}

async fn qdrant_delete(
    State(stub): State<QdrantStub>,
    Path(_name): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    stub.delete_calls.fetch_add(1, Ordering::SeqCst);
    let mut points = stub.points.lock().unwrap();
    for id in body["points"].as_array().unwrap() {
        points.remove(&id.as_i64().unwrap());
    }
    Json(serde_json::json!({ "result": { "status": "completed" }, "status": "ok" }))
}

async fn qdrant_search(
    State(stub): State<QdrantStub>,
    Path(_name): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    stub.search_calls.fetch_add(1, Ordering::SeqCst);

    if stub.require_category_index && !stub.has_category_index.load(Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": {
                    "error": "Bad request: Index required but not found for \"category_id\" of one of the following types: [integer]. Help: Create an index for this key or use a different filter."
                },
                "time": 0.0
            })),
        );
    }

    let query: Vec<f32> = body["vector"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap() as f32)
        .collect();
    let limit = body["limit"].as_u64().unwrap_or(10) as usize;
    let category = body["filter"]["must"][0]["match"]["value"].as_i64();

    let points = stub.points.lock().unwrap();
    let mut hits: Vec<serde_json::Value> = points
        .iter()
        .filter(|(_, (_, payload))| category.is_none() || payload["category_id"].as_i64() == category)
        .map(|(id, (vector, payload))| {
            serde_json::json!({
                "id": id,
                "version": 0,
                "score": cosine(&query, vector),
                "payload": payload,
            })
        })
        .collect();
    hits.sort_by(|a, b| {
        b["score"]
            .as_f64()
            .unwrap()
            .partial_cmp(&a["score"].as_f64().unwrap())
            .unwrap()
    });
    hits.truncate(limit);

    (
        StatusCode::OK,
        Json(serde_json::json!({ "result": hits, "status": "ok" })),
    )
}

async fn qdrant_create_index(
    State(stub): State<QdrantStub>,
    Path(_name): Path<String>,
) -> Json<serde_json::Value> {
    stub.index_create_calls.fetch_add(1, Ordering::SeqCst);
    if stub.heal_on_index_create {
        stub.has_category_index.store(true, Ordering::SeqCst);
    }
    Json(serde_json::json!({ "result": true, "status": "ok" }))
}

// ============ Test environment ============

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

struct TestEnv {
    _tmp: TempDir,
    pool: SqlitePool,
    config: Config,
    ollama: OllamaStub,
    qdrant: QdrantStub,
}

fn test_config(db_path: std::path::PathBuf, ollama: SocketAddr, qdrant: SocketAddr) -> Config {
    Config {
        db: DbConfig { path: db_path },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
        embedding: EmbeddingConfig {
            base_url: format!("http://{ollama}"),
            model: MODEL.to_string(),
            dims: DIMS,
            connect_timeout_secs: 1,
            timeout_secs: 5,
            cold_timeout_secs: 5,
        },
        index: IndexConfig {
            url: format!("http://{qdrant}"),
            api_key: None,
            collection: "capstones".to_string(),
            timeout_secs: 5,
        },
        checker: CheckerConfig::default(),
        warmup: WarmupConfig {
            lease_secs: 30,
            warm_secs: 600,
            probe_timeout_secs: 2,
            embed_timeout_secs: 5,
            prompt: "warmup".to_string(),
        },
    }
}

async fn setup(ollama: OllamaStub, qdrant: QdrantStub) -> TestEnv {
    let ollama_addr = spawn(ollama.router()).await;
    let qdrant_addr = spawn(qdrant.router()).await;

    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path().join("test.sqlite"), ollama_addr, qdrant_addr);

    let pool = db::connect(&config.db.path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    TestEnv {
        _tmp: tmp,
        pool,
        config,
        ollama,
        qdrant,
    }
}

impl TestEnv {
    fn checker(&self) -> Checker {
        let embedder = Arc::new(embedding::EmbeddingClient::new(&self.config.embedding).unwrap());
        let vector_index =
            Arc::new(index::VectorIndex::new(&self.config.index, self.config.embedding.dims).unwrap());
        Checker::new(
            self.pool.clone(),
            embedder,
            vector_index,
            self.config.checker.clone(),
            self.config.embedding.timeout(),
            self.config.embedding.cold_timeout(),
        )
    }

    fn warmup_tracker(&self) -> WarmupTracker {
        let embedder = Arc::new(embedding::EmbeddingClient::new(&self.config.embedding).unwrap());
        WarmupTracker::new(self.pool.clone(), embedder, self.config.warmup.clone())
    }

    async fn add_category(&self, name: &str) -> i64 {
        store::insert_category(&self.pool, name, 1).await.unwrap()
    }
}

fn new_capstone(title: &str, category_id: i64, abstract_text: &str) -> NewCapstone {
    NewCapstone {
        title: title.to_string(),
        category_id,
        abstract_text: abstract_text.to_string(),
        academic_year: Some("2025-2026".to_string()),
        authors: Some("A. Student".to_string()),
        adviser: None,
        statement_of_the_problem: None,
        objectives: None,
    }
}

fn check_request(title: &str, category_id: i64, abstract_text: &str) -> CheckRequest {
    CheckRequest {
        title: title.to_string(),
        category_id,
        abstract_text: abstract_text.to_string(),
        limit: Some(10),
        threshold: Some(0.9),
    }
}

// ============ Warm-up coordination ============

#[tokio::test]
async fn concurrent_warmups_issue_exactly_one_backend_call() {
    let env = setup(
        OllamaStub::new(DIMS).with_delay(Duration::from_millis(300)),
        QdrantStub::new(),
    )
    .await;
    let tracker = Arc::new(env.warmup_tracker());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move { tracker.warmup().await }));
    }

    let mut warmed = 0;
    let mut already_warming = 0;
    for handle in handles {
        match handle.await.unwrap() {
            WarmupOutcome::Warmed { .. } => warmed += 1,
            WarmupOutcome::AlreadyWarming => already_warming += 1,
            other => panic!("unexpected warm-up outcome: {other:?}"),
        }
    }

    assert_eq!(warmed, 1);
    assert_eq!(already_warming, 7);
    assert_eq!(env.ollama.embed_calls.load(Ordering::SeqCst), 1);

    // A later call inside the warm window is an idempotent no-op.
    assert!(matches!(
        tracker.warmup().await,
        WarmupOutcome::AlreadyWarmed { .. }
    ));
    assert_eq!(env.ollama.embed_calls.load(Ordering::SeqCst), 1);

    let status = tracker.status().await;
    assert!(status.warmed);
    assert!(status.ollama_reachable);
    assert!(status.model_available);
}

#[tokio::test]
async fn warmed_flag_expires_with_the_cache_entry() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new()).await;
    let tracker = env.warmup_tracker();

    assert!(matches!(tracker.warmup().await, WarmupOutcome::Warmed { .. }));
    assert!(tracker.status().await.warmed);

    // Force the cached warm window into the past.
    store::put_state(&env.pool, "embedding_warmed_until", "2020-01-01T00:00:00Z", 1)
        .await
        .unwrap();
    assert!(!tracker.status().await.warmed);

    // Expired cache means the next warm-up really calls the backend again.
    assert!(matches!(tracker.warmup().await, WarmupOutcome::Warmed { .. }));
    assert_eq!(env.ollama.embed_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn status_collapses_to_all_false_when_backend_is_down() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new()).await;

    let mut config = env.config.clone();
    config.embedding.base_url = "http://127.0.0.1:1".to_string();
    let embedder = Arc::new(embedding::EmbeddingClient::new(&config.embedding).unwrap());
    let tracker = WarmupTracker::new(env.pool.clone(), embedder, config.warmup.clone());

    let status = tracker.status().await;
    assert!(!status.ollama_reachable);
    assert!(!status.model_available);
    assert!(!status.warmed);
    assert_eq!(status.model, MODEL);

    assert!(matches!(tracker.warmup().await, WarmupOutcome::Unreachable));
}

// ============ Dimension enforcement ============

#[tokio::test]
async fn short_vector_fails_before_any_upsert() {
    // Backend returns 8-dim vectors while the service expects 16.
    let env = setup(OllamaStub::new(8), QdrantStub::new()).await;
    let checker = env.checker();
    let cat = env.add_category("AI").await;

    let err = checker
        .create_capstone(&new_capstone("Deep Grading", cat, "Automated essay grading."))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckerError::Unavailable));

    assert_eq!(env.qdrant.upsert_calls.load(Ordering::SeqCst), 0);

    // The record survives in a retryable failed state.
    let pending = store::pending_capstones(&env.pool, None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].embedding_status, EmbeddingStatus::Failed);
    assert!(pending[0]
        .embedding_error
        .as_deref()
        .unwrap()
        .contains("dimension mismatch"));
}

// ============ Auto-healed payload index ============

#[tokio::test]
async fn missing_payload_index_is_created_and_search_retried_once() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new().requiring_index()).await;
    let checker = env.checker();
    let cat = env.add_category("AI").await;

    // Seed one record (upserts do not need the payload index).
    checker
        .create_capstone(&new_capstone("Smart Irrigation", cat, "Soil moisture control."))
        .await
        .unwrap();

    let outcome = checker
        .check_proposal(&check_request("Smart Irrigation", cat, "Soil moisture control."))
        .await
        .unwrap();

    assert_eq!(env.qdrant.index_create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.qdrant.search_calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.raw.len(), 1);

    // Subsequent searches go straight through.
    checker
        .check_proposal(&check_request("Another Topic", cat, "Different abstract."))
        .await
        .unwrap();
    assert_eq!(env.qdrant.index_create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.qdrant.search_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistent_missing_index_error_is_fatal_after_one_retry() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new().never_healing()).await;
    let checker = env.checker();
    let cat = env.add_category("AI").await;

    let err = checker
        .check_proposal(&check_request("Any Topic", cat, "Any abstract."))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckerError::Unavailable));

    // Exactly one index creation and exactly one retry — no retry loop.
    assert_eq!(env.qdrant.index_create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.qdrant.search_calls.load(Ordering::SeqCst), 2);
}

// ============ Check flow ============

#[tokio::test]
async fn round_trip_same_text_is_top_match_and_partition_law_holds() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new()).await;
    let checker = env.checker();
    let cat = env.add_category("AI").await;

    let target = checker
        .create_capstone(&new_capstone(
            "Crop Disease Detection",
            cat,
            "CNN-based leaf disease classifier.",
        ))
        .await
        .unwrap();
    checker
        .create_capstone(&new_capstone("Library Kiosk", cat, "RFID book checkout kiosk."))
        .await
        .unwrap();
    checker
        .create_capstone(&new_capstone(
            "Attendance Tracker",
            cat,
            "QR code attendance logging.",
        ))
        .await
        .unwrap();

    let outcome = checker
        .check_proposal(&check_request(
            "Crop Disease Detection",
            cat,
            "CNN-based leaf disease classifier.",
        ))
        .await
        .unwrap();

    // Identical canonical text embeds identically: the seeded record wins.
    assert_eq!(outcome.raw.len(), 3);
    assert_eq!(outcome.raw[0].id, target.id);
    assert!(outcome.raw[0].score > 0.999);

    // raw is sorted most-similar first.
    let scores: Vec<f32> = outcome.raw.iter().map(|m| m.score).collect();
    let mut sorted = scores.clone();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    assert_eq!(scores, sorted);

    // Partition law: matches == raw filtered by threshold.
    let expected: Vec<i64> = outcome
        .raw
        .iter()
        .filter(|m| m.score >= outcome.query.threshold)
        .map(|m| m.id)
        .collect();
    let actual: Vec<i64> = outcome.matches.iter().map(|m| m.id).collect();
    assert_eq!(actual, expected);
    assert!(actual.contains(&target.id));

    // Payload snapshot carries the display fields.
    let payload = outcome.raw[0].payload.as_ref().unwrap();
    assert_eq!(payload.capstone_id, target.id);
    assert_eq!(payload.category, "AI");
}

#[tokio::test]
async fn cross_category_records_are_not_candidates() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new()).await;
    let checker = env.checker();
    let ai = env.add_category("AI").await;
    let iot = env.add_category("IoT").await;

    checker
        .create_capstone(&new_capstone("Flood Monitor", iot, "Water level sensor network."))
        .await
        .unwrap();

    let outcome = checker
        .check_proposal(&check_request("Flood Monitor", ai, "Water level sensor network."))
        .await
        .unwrap();

    assert!(outcome.raw.is_empty());
    assert!(outcome.matches.is_empty());
}

#[tokio::test]
async fn validation_failures_never_reach_the_backends() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new()).await;
    let checker = env.checker();

    let req = CheckRequest {
        title: "  ".to_string(),
        category_id: 999,
        abstract_text: String::new(),
        limit: Some(0),
        threshold: Some(1.5),
    };
    let err = checker.check_proposal(&req).await.unwrap_err();

    match err {
        CheckerError::Invalid(field_errors) => {
            let fields: Vec<&str> = field_errors.iter().map(|e| e.field).collect();
            for expected in ["title", "abstract", "category_id", "limit", "threshold"] {
                assert!(fields.contains(&expected), "missing field error: {expected}");
            }
        }
        other => panic!("expected Invalid, got {other:?}"),
    }

    assert_eq!(env.ollama.embed_calls.load(Ordering::SeqCst), 0);
    assert_eq!(env.qdrant.search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_title_is_a_field_error_not_an_outage() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new()).await;
    let checker = env.checker();
    let cat = env.add_category("AI").await;

    checker
        .create_capstone(&new_capstone("Smart Campus", cat, "Campus navigation."))
        .await
        .unwrap();
    let err = checker
        .create_capstone(&new_capstone("Smart Campus", cat, "Another abstract."))
        .await
        .unwrap_err();

    match err {
        CheckerError::Invalid(field_errors) => {
            assert_eq!(field_errors.len(), 1);
            assert_eq!(field_errors[0].field, "title");
        }
        other => panic!("expected Invalid, got {other:?}"),
    }
}

// ============ Create flow: success and compensation ============

#[tokio::test]
async fn successful_create_indexes_and_marks_synced() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new()).await;
    let checker = env.checker();
    let cat = env.add_category("AI").await;

    let capstone = checker
        .create_capstone(&new_capstone("Smart Campus", cat, "Campus navigation."))
        .await
        .unwrap();

    assert_eq!(capstone.embedding_status, EmbeddingStatus::Synced);
    assert!(capstone.embedded_at.is_some());
    assert_eq!(env.qdrant.point_ids(), vec![capstone.id]);
}

#[tokio::test]
async fn failure_after_upsert_deletes_the_point_and_keeps_the_record() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new()).await;
    let checker = env.checker();
    let cat = env.add_category("AI").await;

    // Make the post-upsert status write fail: the synced transition aborts,
    // while the failed transition still goes through.
    sqlx::query(
        r#"
        CREATE TRIGGER block_synced BEFORE UPDATE OF embedding_status ON capstones
        WHEN NEW.embedding_status = 'synced'
        BEGIN SELECT RAISE(ABORT, 'simulated status write failure'); END
        "#,
    )
    .execute(&env.pool)
    .await
    .unwrap();

    let err = checker
        .create_capstone(&new_capstone("Smart Campus", cat, "Campus navigation."))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckerError::Unavailable));

    // The point was upserted, then rolled back by the compensating delete.
    assert_eq!(env.qdrant.upsert_calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.qdrant.delete_calls.load(Ordering::SeqCst), 1);
    assert!(env.qdrant.point_ids().is_empty());

    // The relational record is never rolled back: it survives as failed.
    let pending = store::pending_capstones(&env.pool, None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].embedding_status, EmbeddingStatus::Failed);
    assert!(pending[0]
        .embedding_error
        .as_deref()
        .unwrap()
        .contains("status update"));
}

// ============ Backfill, archive, restore ============

#[tokio::test]
async fn sync_pending_indexes_records_created_without_a_point() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new()).await;
    let checker = env.checker();
    let cat = env.add_category("AI").await;

    // Inserted directly: pending, no vector point yet.
    let capstone = store::insert_capstone(
        &env.pool,
        &new_capstone("Waste Sorter", cat, "Image-based waste sorting."),
        1,
    )
    .await
    .unwrap();
    assert_eq!(capstone.embedding_status, EmbeddingStatus::Pending);

    let report = checker.sync_pending(None).await.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(env.qdrant.point_ids(), vec![capstone.id]);
    let synced = store::get_capstone(&env.pool, capstone.id).await.unwrap().unwrap();
    assert_eq!(synced.embedding_status, EmbeddingStatus::Synced);
}

#[tokio::test]
async fn archive_drops_the_point_and_restore_requeues_it() {
    let env = setup(OllamaStub::new(DIMS), QdrantStub::new()).await;
    let checker = env.checker();
    let cat = env.add_category("AI").await;

    let capstone = checker
        .create_capstone(&new_capstone("Smart Campus", cat, "Campus navigation."))
        .await
        .unwrap();
    assert_eq!(env.qdrant.point_ids(), vec![capstone.id]);

    // Archived records stop surfacing as similarity matches.
    assert!(checker.archive(capstone.id).await.unwrap());
    assert!(env.qdrant.point_ids().is_empty());
    let outcome = checker
        .check_proposal(&check_request("Smart Campus", cat, "Campus navigation."))
        .await
        .unwrap();
    assert!(outcome.raw.is_empty());

    // Restore queues the record for re-indexing; backfill brings it back.
    assert!(checker.restore(capstone.id).await.unwrap());
    let report = checker.sync_pending(None).await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(env.qdrant.point_ids(), vec![capstone.id]);

    let outcome = checker
        .check_proposal(&check_request("Smart Campus", cat, "Campus navigation."))
        .await
        .unwrap();
    assert_eq!(outcome.raw.len(), 1);
    assert_eq!(outcome.raw[0].id, capstone.id);
}
