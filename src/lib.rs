//! # Capstone Screen
//!
//! A capstone repository service with AI-assisted proposal similarity
//! screening.
//!
//! Capstone Screen keeps capstone records in SQLite and mirrors each record
//! as a point in an external vector index. A proposed title/category/abstract
//! is embedded by a remote model and screened against indexed records in the
//! same category, so near-duplicate proposals surface before they are
//! approved.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐    ┌───────────────┐    ┌─────────────────┐
//! │ UI / CLI │──▶│  Orchestrator  │──▶│ Embedding backend │
//! └──────────┘    │   (checker)    │    │  (Ollama HTTP)   │
//!                 │                │    └─────────────────┘
//!                 │                │    ┌─────────────────┐
//!                 │                │──▶│  Vector index     │
//!                 └──────┬────────┘    │  (Qdrant HTTP)    │
//!                        │             └─────────────────┘
//!                 ┌──────▼────────┐
//!                 │ SQLite (sqlx)  │  records, categories,
//!                 └───────────────┘  warm-up state + lease
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed backend-client errors |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Relational queries and shared app state |
//! | [`embedding`] | Embedding backend client + canonical text builder |
//! | [`index`] | Vector index client with auto-healed payload indexes |
//! | [`warmup`] | Coordinated embedding-backend warm-up |
//! | [`checker`] | Check and create+index orchestration |
//! | [`server`] | JSON HTTP API |

pub mod checker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod migrate;
pub mod models;
pub mod server;
pub mod store;
pub mod warmup;
