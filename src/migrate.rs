use anyhow::Result;
use sqlx::SqlitePool;

/// Create the chunks table and its indexes. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            vendor_name TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // vendor_name equality is the only metadata filter the store supports;
    // the comparison is case-sensitive.
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_vendor_name ON chunks(vendor_name)")
        .execute(pool)
        .await?;

    Ok(())
}
