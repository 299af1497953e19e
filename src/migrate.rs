use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Categories
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Capstone records. The row id doubles as the vector-index point id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS capstones (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL UNIQUE,
            abstract TEXT NOT NULL,
            statement_of_the_problem TEXT,
            objectives TEXT,
            authors TEXT,
            adviser TEXT,
            academic_year TEXT,
            category_id INTEGER NOT NULL,
            embedding_status TEXT NOT NULL DEFAULT 'pending',
            embedding_error TEXT,
            embedded_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            archived_at INTEGER,
            FOREIGN KEY (category_id) REFERENCES categories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Shared key-value state: warm-up TTL entry and the warm-up lease row.
    // Every process sharing this database observes the same state.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_capstones_category_id ON capstones(category_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_capstones_embedding_status ON capstones(embedding_status)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_capstones_archived_at ON capstones(archived_at)")
        .execute(pool)
        .await?;

    Ok(())
}
