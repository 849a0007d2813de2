//! The upload file registry (§4.I File Plane, ingest half).
//!
//! Stores the registry row for a client-uploaded input; the bytes
//! themselves live on disk under the configured uploads root, written by
//! the HTTP handler before this registry row is inserted.

use crate::error::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_ids::{ClientId, FileId};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// A registered upload (§3 Upload entity).
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    pub file_id: FileId,
    pub owner: ClientId,
    pub original_name: String,
    /// Date-partitioned relative path, e.g. `2025/07/26/140621_8b4dd229.png`.
    pub relative_path: String,
    pub size: u64,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait UploadRegistry: Send + Sync {
    async fn insert(&self, record: &UploadRecord) -> Result<(), DbError>;
    async fn get(&self, file_id: &FileId) -> Result<UploadRecord, DbError>;
    async fn get_by_relative_path(&self, relative_path: &str) -> Result<UploadRecord, DbError>;
    async fn delete(&self, file_id: &FileId, owner: &ClientId) -> Result<(), DbError>;
}

pub struct SqliteUploadRegistry {
    pool: SqlitePool,
}

impl SqliteUploadRegistry {
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let registry = Self { pool };
        registry.initialize_tables().await?;
        Ok(registry)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn initialize_tables(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
                file_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                original_name TEXT NOT NULL,
                relative_path TEXT NOT NULL UNIQUE,
                size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                width INTEGER,
                height INTEGER,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_uploads_owner ON uploads(owner)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<UploadRecord, DbError> {
        let file_id: String = row.try_get("file_id")?;
        let owner: String = row.try_get("owner")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(UploadRecord {
            file_id: FileId::parse(&file_id).map_err(|e| DbError::Corrupt(e.to_string()))?,
            owner: ClientId::parse(&owner).map_err(|e| DbError::Corrupt(e.to_string()))?,
            original_name: row.try_get("original_name")?,
            relative_path: row.try_get("relative_path")?,
            size: row.try_get::<i64, _>("size")? as u64,
            mime_type: row.try_get("mime_type")?,
            width: row.try_get::<Option<i64>, _>("width")?.map(|v| v as u32),
            height: row.try_get::<Option<i64>, _>("height")?.map(|v| v as u32),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DbError::Corrupt(e.to_string()))?,
        })
    }
}

#[async_trait]
impl UploadRegistry for SqliteUploadRegistry {
    async fn insert(&self, record: &UploadRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO uploads
                (file_id, owner, original_name, relative_path, size, mime_type, width, height, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.file_id.as_str())
        .bind(record.owner.as_str())
        .bind(&record.original_name)
        .bind(&record.relative_path)
        .bind(record.size as i64)
        .bind(&record.mime_type)
        .bind(record.width.map(|v| v as i64))
        .bind(record.height.map(|v| v as i64))
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, file_id: &FileId) -> Result<UploadRecord, DbError> {
        let row = sqlx::query("SELECT * FROM uploads WHERE file_id = ?")
            .bind(file_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::UploadNotFound(file_id.to_string()))?;
        Self::row_to_record(row)
    }

    async fn get_by_relative_path(&self, relative_path: &str) -> Result<UploadRecord, DbError> {
        let row = sqlx::query("SELECT * FROM uploads WHERE relative_path = ?")
            .bind(relative_path)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::UploadNotFound(relative_path.to_string()))?;
        Self::row_to_record(row)
    }

    async fn delete(&self, file_id: &FileId, owner: &ClientId) -> Result<(), DbError> {
        sqlx::query("DELETE FROM uploads WHERE file_id = ? AND owner = ?")
            .bind(file_id.as_str())
            .bind(owner.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(owner: ClientId) -> UploadRecord {
        UploadRecord {
            file_id: FileId::new(),
            owner,
            original_name: "cat.png".to_string(),
            relative_path: "2025/07/26/140621_8b4dd229.png".to_string(),
            size: 1024,
            mime_type: "image/png".to_string(),
            width: Some(512),
            height: Some(512),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let registry = SqliteUploadRegistry::connect("sqlite::memory:").await.unwrap();
        let owner = ClientId::new();
        let record = sample(owner.clone());
        registry.insert(&record).await.unwrap();

        let read = registry.get(&record.file_id).await.unwrap();
        assert_eq!(read, record);
    }

    #[tokio::test]
    async fn get_by_relative_path_finds_the_same_row() {
        let registry = SqliteUploadRegistry::connect("sqlite::memory:").await.unwrap();
        let record = sample(ClientId::new());
        registry.insert(&record).await.unwrap();

        let read = registry
            .get_by_relative_path(&record.relative_path)
            .await
            .unwrap();
        assert_eq!(read.file_id, record.file_id);
    }

    #[tokio::test]
    async fn delete_requires_matching_owner() {
        let registry = SqliteUploadRegistry::connect("sqlite::memory:").await.unwrap();
        let owner = ClientId::new();
        let other = ClientId::new();
        let record = sample(owner.clone());
        registry.insert(&record).await.unwrap();

        registry.delete(&record.file_id, &other).await.unwrap();
        assert!(registry.get(&record.file_id).await.is_ok());

        registry.delete(&record.file_id, &owner).await.unwrap();
        assert!(registry.get(&record.file_id).await.is_err());
    }
}
