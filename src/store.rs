//! Relational queries: categories, capstone records with embedding-status
//! tracking, and the shared `app_state` key-value rows used by warm-up.

use anyhow::{bail, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Capstone, Category, EmbeddingStatus, NewCapstone};

// ============ Categories ============

pub async fn insert_category(pool: &SqlitePool, name: &str, now: i64) -> Result<i64> {
    let result = sqlx::query("INSERT INTO categories (name, is_active, created_at) VALUES (?, 1, ?)")
        .bind(name.trim())
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn list_categories(pool: &SqlitePool, active_only: bool) -> Result<Vec<Category>> {
    let sql = if active_only {
        "SELECT id, name, is_active FROM categories WHERE is_active = 1 ORDER BY name"
    } else {
        "SELECT id, name, is_active FROM categories ORDER BY name"
    };
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| Category {
            id: row.get("id"),
            name: row.get("name"),
            is_active: row.get::<i64, _>("is_active") != 0,
        })
        .collect())
}

pub async fn category_exists(pool: &SqlitePool, id: i64) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Best-effort category display-name lookup. `None` when the row is gone;
/// callers substitute a placeholder rather than failing.
pub async fn category_name(pool: &SqlitePool, id: i64) -> Result<Option<String>> {
    let name: Option<String> = sqlx::query_scalar("SELECT name FROM categories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(name)
}

// ============ Capstones ============

fn row_to_capstone(row: &SqliteRow) -> Capstone {
    Capstone {
        id: row.get("id"),
        title: row.get("title"),
        category_id: row.get("category_id"),
        abstract_text: row.get("abstract"),
        academic_year: row.get("academic_year"),
        authors: row.get("authors"),
        adviser: row.get("adviser"),
        statement_of_the_problem: row.get("statement_of_the_problem"),
        objectives: row.get("objectives"),
        embedding_status: EmbeddingStatus::parse(row.get::<String, _>("embedding_status").as_str()),
        embedding_error: row.get("embedding_error"),
        embedded_at: row.get("embedded_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        archived_at: row.get("archived_at"),
    }
}

/// Insert a capstone record with `embedding_status = 'pending'` inside a
/// transaction scoped to just this write. The system of record commits
/// before any indexing work starts.
pub async fn insert_capstone(pool: &SqlitePool, new: &NewCapstone, now: i64) -> Result<Capstone> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO capstones
            (title, abstract, statement_of_the_problem, objectives, authors,
             adviser, academic_year, category_id, embedding_status,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(new.title.trim())
    .bind(new.abstract_text.trim())
    .bind(new.statement_of_the_problem.as_deref())
    .bind(new.objectives.as_deref())
    .bind(new.authors.as_deref().map(str::trim))
    .bind(new.adviser.as_deref().map(str::trim))
    .bind(new.academic_year.as_deref().map(str::trim))
    .bind(new.category_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let id = result.last_insert_rowid();
    tx.commit().await?;

    let capstone = get_capstone(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("capstone {id} vanished after insert"))?;
    Ok(capstone)
}

/// True when an error from [`insert_capstone`] was a unique-title violation.
pub fn is_duplicate_title(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|db| db.message().contains("UNIQUE constraint failed: capstones.title"))
        .unwrap_or(false)
}

pub async fn get_capstone(pool: &SqlitePool, id: i64) -> Result<Option<Capstone>> {
    let row = sqlx::query("SELECT * FROM capstones WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_capstone))
}

pub async fn mark_synced(pool: &SqlitePool, id: i64, now: i64) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE capstones
        SET embedding_status = 'synced', embedding_error = NULL,
            embedded_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() != 1 {
        bail!("capstone {id} missing during embedding status update");
    }
    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, id: i64, error: &str, now: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE capstones
        SET embedding_status = 'failed', embedding_error = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(error)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Records whose point is not confirmed in the index: pending or failed,
/// excluding archived ones.
pub async fn pending_capstones(pool: &SqlitePool, limit: Option<i64>) -> Result<Vec<Capstone>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM capstones
        WHERE embedding_status != 'synced' AND archived_at IS NULL
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(limit.unwrap_or(-1))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_capstone).collect())
}

/// Soft-archive. Returns false when the record does not exist or is
/// already archived.
pub async fn archive_capstone(pool: &SqlitePool, id: i64, now: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE capstones SET archived_at = ?, updated_at = ? WHERE id = ? AND archived_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Un-archive and re-queue for indexing: the vector point was deleted at
/// archive time, so the record goes back to `pending`.
pub async fn restore_capstone(pool: &SqlitePool, id: i64, now: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE capstones
        SET archived_at = NULL, embedding_status = 'pending',
            embedding_error = NULL, embedded_at = NULL, updated_at = ?
        WHERE id = ? AND archived_at IS NOT NULL
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

// ============ Shared app state (warm-up TTL + lease) ============

/// Read a state value iff it has not expired.
pub async fn get_fresh_state(pool: &SqlitePool, key: &str, now: i64) -> Result<Option<String>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM app_state WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(now)
            .fetch_optional(pool)
            .await?;
    Ok(value)
}

pub async fn put_state(pool: &SqlitePool, key: &str, value: &str, expires_at: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO app_state (key, value, expires_at) VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Atomically take the keyed lease: succeeds when no row exists or the
/// previous holder's lease has expired. The single UPSERT is the
/// compare-and-set — concurrent callers cannot both win.
pub async fn try_acquire_lease(
    pool: &SqlitePool,
    key: &str,
    token: &str,
    now: i64,
    expires_at: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO app_state (key, value, expires_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
        WHERE app_state.expires_at <= ?4
        "#,
    )
    .bind(key)
    .bind(token)
    .bind(expires_at)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Release a lease only if this holder's token still owns it, so a slow
/// holder cannot clobber a successor that took over after expiry.
pub async fn release_lease(pool: &SqlitePool, key: &str, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM app_state WHERE key = ? AND value = ?")
        .bind(key)
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}
