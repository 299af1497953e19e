//! # Capstone Screen CLI (`capscreen`)
//!
//! The `capscreen` binary drives the capstone similarity service: database
//! initialization, the HTTP server, embedding-backend readiness controls,
//! proposal checks, record creation, and vector-index backfill.
//!
//! ## Usage
//!
//! ```bash
//! capscreen --config ./config/capscreen.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `capscreen init` | Create the SQLite database and provision the vector collection |
//! | `capscreen serve` | Start the JSON HTTP API |
//! | `capscreen status` | Probe embedding-backend readiness |
//! | `capscreen warmup` | Warm the embedding backend (coordinated) |
//! | `capscreen check` | Screen a proposal for similar capstones |
//! | `capscreen add` | Create a capstone record and index it |
//! | `capscreen sync pending` | Re-index records with pending/failed embeddings |
//! | `capscreen category add\|list` | Manage categories |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use capstone_screen::checker::{Checker, CheckerError, CheckRequest};
use capstone_screen::config::{load_config, Config};
use capstone_screen::embedding::EmbeddingClient;
use capstone_screen::index::VectorIndex;
use capstone_screen::models::NewCapstone;
use capstone_screen::warmup::WarmupTracker;
use capstone_screen::{db, migrate, server, store};

/// Capstone Screen — a capstone repository service with AI-assisted
/// proposal similarity screening.
#[derive(Parser)]
#[command(
    name = "capscreen",
    about = "Capstone repository service with AI-assisted proposal similarity screening",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/capscreen.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and provision the vector collection.
    ///
    /// Idempotent — running it multiple times is safe. Collection
    /// provisioning is skipped with a warning when the vector index is
    /// unreachable; `sync pending` provisions it again later.
    Init,

    /// Start the JSON HTTP API.
    Serve,

    /// Probe embedding-backend readiness (reachability, model, warm state).
    Status,

    /// Warm the embedding backend.
    ///
    /// Coordinated across concurrent callers and processes: at most one
    /// warm-up call is in flight at any time; everyone else is told
    /// `already_warming`.
    Warmup,

    /// Screen a proposed title/category/abstract for similar capstones.
    Check {
        /// Proposed title.
        #[arg(long)]
        title: String,

        /// Category id to screen within.
        #[arg(long)]
        category_id: i64,

        /// Proposed abstract.
        #[arg(long, value_name = "TEXT")]
        r#abstract: String,

        /// Maximum number of candidates to return.
        #[arg(long)]
        limit: Option<u32>,

        /// Similarity score a candidate must reach to count as a match.
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Create a capstone record and index it.
    Add {
        #[arg(long)]
        title: String,

        #[arg(long)]
        category_id: i64,

        #[arg(long, value_name = "TEXT")]
        r#abstract: String,

        #[arg(long)]
        academic_year: Option<String>,

        #[arg(long)]
        authors: Option<String>,

        #[arg(long)]
        adviser: Option<String>,
    },

    /// Re-index records whose embeddings are pending or failed.
    ///
    /// Target format: `pending` is the only target today.
    Sync {
        /// What to sync.
        target: String,

        /// Maximum number of records to process.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Manage capstone categories.
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },
}

#[derive(Subcommand)]
enum CategoryCommands {
    /// Add a category.
    Add { name: String },
    /// List categories.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("capstone_screen=info,capscreen=info")
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Serve => server::run_server(&config).await,
        Commands::Status => run_status(&config).await,
        Commands::Warmup => run_warmup(&config).await,
        Commands::Check {
            title,
            category_id,
            r#abstract,
            limit,
            threshold,
        } => {
            let req = CheckRequest {
                title,
                category_id,
                abstract_text: r#abstract,
                limit,
                threshold,
            };
            run_check(&config, &req).await
        }
        Commands::Add {
            title,
            category_id,
            r#abstract,
            academic_year,
            authors,
            adviser,
        } => {
            let new = NewCapstone {
                title,
                category_id,
                abstract_text: r#abstract,
                academic_year,
                authors,
                adviser,
                statement_of_the_problem: None,
                objectives: None,
            };
            run_add(&config, &new).await
        }
        Commands::Sync { target, limit } => run_sync(&config, &target, limit).await,
        Commands::Category { command } => run_category(&config, command).await,
    }
}

async fn open_pool(config: &Config) -> Result<sqlx::SqlitePool> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(pool)
}

fn build_checker(config: &Config, pool: sqlx::SqlitePool) -> Result<Checker> {
    let embedder = Arc::new(EmbeddingClient::new(&config.embedding)?);
    let index = Arc::new(VectorIndex::new(&config.index, config.embedding.dims)?);
    Ok(Checker::new(
        pool,
        embedder,
        index,
        config.checker.clone(),
        config.embedding.timeout(),
        config.embedding.cold_timeout(),
    ))
}

async fn run_init(config: &Config) -> Result<()> {
    let _pool = open_pool(config).await?;
    println!("database initialized at {}", config.db.path.display());

    let index = VectorIndex::new(&config.index, config.embedding.dims)?;
    match index.ensure_collection().await {
        Ok(()) => println!("vector collection '{}' ready", config.index.collection),
        Err(e) => eprintln!(
            "Warning: vector collection not provisioned ({e}); run `capscreen sync pending` once the index is reachable"
        ),
    }

    Ok(())
}

async fn run_status(config: &Config) -> Result<()> {
    let pool = open_pool(config).await?;
    let embedder = Arc::new(EmbeddingClient::new(&config.embedding)?);
    let tracker = WarmupTracker::new(pool, embedder, config.warmup.clone());

    let status = tracker.status().await;
    println!("AI status");
    println!("  reachable: {}", status.ollama_reachable);
    println!(
        "  model: {} (available: {})",
        status.model, status.model_available
    );
    match status.warmed_until {
        Some(until) => println!("  warmed: true (until {})", until.to_rfc3339()),
        None => println!("  warmed: false"),
    }
    Ok(())
}

async fn run_warmup(config: &Config) -> Result<()> {
    let pool = open_pool(config).await?;
    let embedder = Arc::new(EmbeddingClient::new(&config.embedding)?);
    let tracker = WarmupTracker::new(pool, embedder, config.warmup.clone());

    let outcome = tracker.warmup().await;
    println!("warmup");
    println!("  warmed: {}", outcome.warmed());
    if let Some(reason) = outcome.reason() {
        println!("  reason: {reason}");
    }
    if let Some(until) = outcome.warmed_until() {
        println!("  warmed_until: {}", until.to_rfc3339());
    }
    Ok(())
}

async fn run_check(config: &Config, req: &CheckRequest) -> Result<()> {
    let pool = open_pool(config).await?;
    let checker = build_checker(config, pool)?;

    match checker.check_proposal(req).await {
        Ok(outcome) => {
            println!("similarity check");
            println!(
                "  category: {} (id {})",
                outcome.query.category, outcome.query.category_id
            );
            println!(
                "  threshold: {:.2}, limit: {}",
                outcome.query.threshold, outcome.query.limit
            );
            println!("  matches over threshold: {}", outcome.matches.len());
            for (rank, m) in outcome.raw.iter().enumerate() {
                let title = m
                    .payload
                    .as_ref()
                    .map(|p| p.title.as_str())
                    .unwrap_or("(payload missing)");
                let marker = if m.score >= outcome.query.threshold {
                    "*"
                } else {
                    " "
                };
                println!("  {marker}{:>2}. [{:.4}] #{} {}", rank + 1, m.score, m.id, title);
            }
            if outcome.raw.is_empty() {
                println!("  no candidates on file for this category");
            }
            Ok(())
        }
        Err(e) => report_checker_error(e),
    }
}

async fn run_add(config: &Config, new: &NewCapstone) -> Result<()> {
    let pool = open_pool(config).await?;
    let checker = build_checker(config, pool)?;

    match checker.create_capstone(new).await {
        Ok(capstone) => {
            println!("capstone created");
            println!("  id: {}", capstone.id);
            println!("  title: {}", capstone.title);
            println!("  embedding: {}", capstone.embedding_status.as_str());
            Ok(())
        }
        Err(e) => report_checker_error(e),
    }
}

fn report_checker_error(err: CheckerError) -> Result<()> {
    match err {
        CheckerError::Invalid(field_errors) => {
            eprintln!("validation failed:");
            for fe in field_errors {
                eprintln!("  {}: {}", fe.field, fe.message);
            }
        }
        CheckerError::Unavailable => {
            eprintln!("backend unavailable — try again (see logs for detail)");
        }
    }
    std::process::exit(1);
}

async fn run_sync(config: &Config, target: &str, limit: Option<i64>) -> Result<()> {
    if target != "pending" {
        anyhow::bail!("Unknown sync target: {target}. Use `pending`.");
    }

    let pool = open_pool(config).await?;
    let checker = build_checker(config, pool)?;

    let report = checker.sync_pending(limit).await?;
    println!("sync pending");
    println!("  total pending: {}", report.total);
    println!("  synced: {}", report.synced);
    println!("  failed: {}", report.failed);
    Ok(())
}

async fn run_category(config: &Config, command: CategoryCommands) -> Result<()> {
    let pool = open_pool(config).await?;

    match command {
        CategoryCommands::Add { name } => {
            let id = store::insert_category(&pool, &name, chrono::Utc::now().timestamp()).await?;
            println!("category created: {name} (id {id})");
        }
        CategoryCommands::List => {
            let categories = store::list_categories(&pool, false).await?;
            println!("categories: {}", categories.len());
            for c in categories {
                let flag = if c.is_active { "" } else { " (inactive)" };
                println!("  {:>4}  {}{}", c.id, c.name, flag);
            }
        }
    }
    Ok(())
}
