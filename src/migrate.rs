use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

use crate::db;

/// Create the cache schema. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS research_cache (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_access INTEGER NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            touch_seq INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // TTL sweep scans by age; LRU eviction orders by recency of use.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_research_cache_created_at ON research_cache(created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_research_cache_lru ON research_cache(last_access, touch_seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// `research init`: create the database file and schema.
pub async fn run_migrations(db_path: &Path) -> Result<()> {
    let pool = db::connect(db_path).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}
