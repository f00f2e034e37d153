use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::CoreError;

/// Re-exported so callers don't need to depend on `sqlx` directly.
pub use sqlx::SqlitePool as DbPool;

/// Opens (creating if needed) the SQLite database at `storage_dsn` and runs
/// the embedded migrations.
pub async fn establish_connection(storage_dsn: &str) -> Result<DbPool, CoreError> {
    if let Some(path) = storage_dsn.strip_prefix("sqlite://") {
        ensure_file_exists(path).await?;
    } else {
        ensure_file_exists(storage_dsn).await?;
    }

    // Each new connection against `:memory:` gets its own private database,
    // so a pool with more than one connection would silently lose writes
    // made on a sibling connection. A single-connection pool keeps the
    // whole test database on one connection without changing the on-disk
    // pooling behavior production callers get.
    let max_connections = if storage_dsn.contains(":memory:") { 1 } else { 10 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(storage_dsn)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    // WAL + a busy timeout let concurrent job-coordinator writers queue on
    // the single-writer lock instead of failing with SQLITE_BUSY.
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    MIGRATOR.run(&pool).await?;

    Ok(pool)
}

async fn ensure_file_exists(db_path: &str) -> Result<(), CoreError> {
    if db_path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    if !Path::new(db_path).exists() {
        tokio::fs::File::create(db_path).await?;
    }
    Ok(())
}

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
