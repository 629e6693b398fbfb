use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, migrate::Migrator};
use thiserror::Error;
use time::OffsetDateTime;

use super::media::MediaKind;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const RECORD_COLUMNS: &str =
    "relative_path, remote_id, media_kind, create_date, modify_date, indexed_at, downloaded";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid media kind: {0}")]
    InvalidMediaKind(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Durable sync state of one known media item, keyed by `relative_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub relative_path: String,
    pub remote_id: String,
    pub kind: MediaKind,
    pub create_date: Option<OffsetDateTime>,
    pub modify_date: OffsetDateTime,
    pub indexed_at: OffsetDateTime,
    pub downloaded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaQuery {
    pub kind: Option<MediaKind>,
    pub modified_after: Option<OffsetDateTime>,
    pub modified_before: Option<OffsetDateTime>,
    pub pending_only: bool,
}

/// SQLite-backed index.
///
/// `upsert` only buffers; nothing reaches the database until `flush`, which
/// writes the whole buffer in one transaction. Lookups see buffered records
/// first. Writes to the database are serialized through `write_lock`.
pub struct IndexStore {
    pool: SqlitePool,
    pending: Mutex<HashMap<String, IndexRecord>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl IndexStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            pending: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn new(database_url: &str) -> Result<Self, IndexError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), IndexError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn get_by_path(&self, relative_path: &str) -> Result<Option<IndexRecord>, IndexError> {
        if let Some(record) = self.pending().get(relative_path) {
            return Ok(Some(record.clone()));
        }
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM media WHERE relative_path = ?1"
        ))
        .bind(relative_path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Lookup by the directory (relative to the media root, `/`-joined) and
    /// file name of a local file.
    pub async fn get_by_location(
        &self,
        dir: &str,
        name: &str,
    ) -> Result<Option<IndexRecord>, IndexError> {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            self.get_by_path(name).await
        } else {
            self.get_by_path(&format!("{dir}/{name}")).await
        }
    }

    pub async fn get_by_remote_id(&self, remote_id: &str) -> Result<Option<IndexRecord>, IndexError> {
        if let Some(record) = self
            .pending()
            .values()
            .find(|record| record.remote_id == remote_id)
        {
            return Ok(Some(record.clone()));
        }
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM media WHERE remote_id = ?1"
        ))
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    pub fn upsert(&self, record: IndexRecord) {
        self.pending().insert(record.relative_path.clone(), record);
    }

    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    /// Writes every buffered record in a single transaction and returns how
    /// many were written. On failure the buffer is left intact.
    pub async fn flush(&self) -> Result<usize, IndexError> {
        let _guard = self.write_lock.lock().await;
        let batch: Vec<IndexRecord> = self.pending().values().cloned().collect();
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for record in &batch {
            sqlx::query(
                "INSERT INTO media (
                    relative_path,
                    remote_id,
                    media_kind,
                    create_date,
                    modify_date,
                    indexed_at,
                    downloaded
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(relative_path) DO UPDATE SET
                    remote_id = excluded.remote_id,
                    media_kind = excluded.media_kind,
                    create_date = excluded.create_date,
                    modify_date = excluded.modify_date,
                    indexed_at = excluded.indexed_at,
                    downloaded = excluded.downloaded",
            )
            .bind(&record.relative_path)
            .bind(&record.remote_id)
            .bind(record.kind.as_str())
            .bind(record.create_date.map(OffsetDateTime::unix_timestamp))
            .bind(record.modify_date.unix_timestamp())
            .bind(record.indexed_at.unix_timestamp())
            .bind(if record.downloaded { 1 } else { 0 })
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let mut pending = self.pending();
        for record in &batch {
            if pending.get(&record.relative_path) == Some(record) {
                pending.remove(&record.relative_path);
            }
        }
        Ok(batch.len())
    }

    /// Records matching `query`, oldest modification first. Buffered writes
    /// are flushed before querying.
    pub async fn query(&self, query: &MediaQuery) -> Result<Vec<IndexRecord>, IndexError> {
        self.flush().await?;

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {RECORD_COLUMNS} FROM media WHERE 1 = 1"));
        if let Some(kind) = query.kind {
            builder.push(" AND media_kind = ").push_bind(kind.as_str());
        }
        if let Some(after) = query.modified_after {
            builder
                .push(" AND modify_date >= ")
                .push_bind(after.unix_timestamp());
        }
        if let Some(before) = query.modified_before {
            builder
                .push(" AND modify_date <= ")
                .push_bind(before.unix_timestamp());
        }
        if query.pending_only {
            builder.push(" AND downloaded = 0");
        }
        builder.push(" ORDER BY modify_date ASC, relative_path ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn mark_downloaded(&self, relative_path: &str) -> Result<(), IndexError> {
        let _guard = self.write_lock.lock().await;
        if let Some(record) = self.pending().get_mut(relative_path) {
            record.downloaded = true;
        }
        sqlx::query("UPDATE media SET downloaded = 1 WHERE relative_path = ?1")
            .bind(relative_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn scan_window(&self) -> Result<Option<OffsetDateTime>, IndexError> {
        let row = sqlx::query("SELECT last_full_scan FROM scan_window WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let value: Option<i64> = row.try_get("last_full_scan")?;
        value.map(timestamp_from_unix).transpose()
    }

    pub async fn set_scan_window(&self, watermark: OffsetDateTime) -> Result<(), IndexError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO scan_window (id, last_full_scan)
             VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET last_full_scan = excluded.last_full_scan",
        )
        .bind(watermark.unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, IndexError> {
        self.flush().await?;
        let row = sqlx::query("SELECT COUNT(*) AS total FROM media")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    /// Drops every record and the scan window.
    pub async fn clear(&self) -> Result<(), IndexError> {
        let _guard = self.write_lock.lock().await;
        self.pending().clear();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM media").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM scan_window")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, IndexRecord>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<IndexRecord, IndexError> {
    let kind: String = row.try_get("media_kind")?;
    let create_date: Option<i64> = row.try_get("create_date")?;
    let modify_date: i64 = row.try_get("modify_date")?;
    let indexed_at: i64 = row.try_get("indexed_at")?;
    let downloaded: i64 = row.try_get("downloaded")?;
    Ok(IndexRecord {
        relative_path: row.try_get("relative_path")?,
        remote_id: row.try_get("remote_id")?,
        kind: MediaKind::parse(&kind).ok_or(IndexError::InvalidMediaKind(kind))?,
        create_date: create_date.map(timestamp_from_unix).transpose()?,
        modify_date: timestamp_from_unix(modify_date)?,
        indexed_at: timestamp_from_unix(indexed_at)?,
        downloaded: downloaded != 0,
    })
}

fn timestamp_from_unix(value: i64) -> Result<OffsetDateTime, IndexError> {
    OffsetDateTime::from_unix_timestamp(value).map_err(|_| IndexError::InvalidTimestamp(value))
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
