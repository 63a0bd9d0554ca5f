use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::metadata::{ImageRecord, MetadataStore};

const COLUMNS: &str = "id, original_blob_key, original_file_name, content_type, file_extension, \
    width, height, size_bytes, uploaded_at, updated_at, is_compressed, compression_type";

/// Image records stored in a single SQLite table.
pub struct SqliteMetadata {
    pool: SqlitePool,
}

impl SqliteMetadata {
    pub async fn connect(path: &Path, pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.max(1))
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    #[cfg(test)]
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.ensure_tables().await?;
        Ok(store)
    }

    async fn ensure_tables(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                original_blob_key TEXT NOT NULL,
                original_file_name TEXT NOT NULL,
                content_type TEXT NOT NULL,
                file_extension TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                uploaded_at TEXT NOT NULL,
                updated_at TEXT,
                is_compressed BOOLEAN NOT NULL DEFAULT FALSE,
                compression_type TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_uploaded_at ON images(uploaded_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> anyhow::Result<ImageRecord> {
    let id: String = row.try_get("id")?;
    let width: i64 = row.try_get("width")?;
    let height: i64 = row.try_get("height")?;
    let size_bytes: i64 = row.try_get("size_bytes")?;

    Ok(ImageRecord {
        id: Uuid::parse_str(&id)?,
        original_blob_key: row.try_get("original_blob_key")?,
        original_file_name: row.try_get("original_file_name")?,
        content_type: row.try_get("content_type")?,
        file_extension: row.try_get("file_extension")?,
        width: u32::try_from(width)?,
        height: u32::try_from(height)?,
        size_bytes: u64::try_from(size_bytes)?,
        uploaded_at: row.try_get::<DateTime<Utc>, _>("uploaded_at")?,
        updated_at: row.try_get::<Option<DateTime<Utc>>, _>("updated_at")?,
        is_compressed: row.try_get("is_compressed")?,
        compression_type: row.try_get("compression_type")?,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadata {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, image_id: Uuid) -> anyhow::Result<Option<ImageRecord>> {
        let qry = format!("SELECT {} FROM images WHERE id = ? LIMIT 1;", COLUMNS);

        sqlx::query(&qry)
            .bind(image_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(record_from_row)
            .transpose()
    }

    async fn list(&self) -> anyhow::Result<Vec<ImageRecord>> {
        let qry = format!("SELECT {} FROM images ORDER BY uploaded_at DESC;", COLUMNS);

        sqlx::query(&qry)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(record_from_row)
            .collect()
    }

    #[instrument(skip_all, fields(image_id = %record.id), level = "debug")]
    async fn add(&self, record: &ImageRecord) -> anyhow::Result<()> {
        let qry = format!(
            "INSERT INTO images ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);",
            COLUMNS,
        );

        sqlx::query(&qry)
            .bind(record.id.to_string())
            .bind(&record.original_blob_key)
            .bind(&record.original_file_name)
            .bind(&record.content_type)
            .bind(&record.file_extension)
            .bind(record.width as i64)
            .bind(record.height as i64)
            .bind(record.size_bytes as i64)
            .bind(record.uploaded_at)
            .bind(record.updated_at)
            .bind(record.is_compressed)
            .bind(&record.compression_type)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(image_id = %record.id), level = "debug")]
    async fn update(&self, record: &ImageRecord) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE images SET
                original_blob_key = ?,
                original_file_name = ?,
                content_type = ?,
                file_extension = ?,
                width = ?,
                height = ?,
                size_bytes = ?,
                uploaded_at = ?,
                updated_at = ?,
                is_compressed = ?,
                compression_type = ?
            WHERE id = ?;
            "#,
        )
        .bind(&record.original_blob_key)
        .bind(&record.original_file_name)
        .bind(&record.content_type)
        .bind(&record.file_extension)
        .bind(record.width as i64)
        .bind(record.height as i64)
        .bind(record.size_bytes as i64)
        .bind(record.uploaded_at)
        .bind(record.updated_at)
        .bind(record.is_compressed)
        .bind(&record.compression_type)
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, image_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM images WHERE id = ?;")
            .bind(image_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
