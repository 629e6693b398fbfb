use futures_util::{Stream, TryStreamExt, pin_mut};
use gphotos_core::PhotosError;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::index::{IndexError, IndexRecord, IndexStore};
use super::media::MediaItem;
use super::paths::{disambiguated_path_for, relative_path_for};
use crate::token_provider::TokenProviderError;

pub const DEFAULT_INDEX_BATCH: usize = 1000;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    Auth(PhotosError),
    #[error("remote catalog error: {0}")]
    Transport(PhotosError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credentials error: {0}")]
    Credentials(#[from] TokenProviderError),
}

impl From<PhotosError> for SyncError {
    fn from(err: PhotosError) -> Self {
        if err.is_auth() {
            SyncError::Auth(err)
        } else {
            SyncError::Transport(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    New,
    Stale,
    Current,
}

pub fn classify(item: &MediaItem, record: Option<&IndexRecord>) -> ItemState {
    match record {
        None => ItemState::New,
        Some(record) if item.modify_date > record.modify_date => ItemState::Stale,
        Some(_) => ItemState::Current,
    }
}

/// Latest modify date seen by an indexing pass, seeded with the stored
/// watermark so it never moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanProgress {
    latest: Option<OffsetDateTime>,
}

impl ScanProgress {
    pub fn starting_from(previous: Option<OffsetDateTime>) -> Self {
        Self { latest: previous }
    }

    pub fn observe(&mut self, item: &MediaItem) {
        if self.latest.is_none_or(|latest| item.modify_date > latest) {
            self.latest = Some(item.modify_date);
        }
    }

    pub fn watermark(&self) -> Option<OffsetDateTime> {
        self.latest
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl IndexStats {
    pub fn seen(&self) -> usize {
        self.added + self.updated + self.skipped
    }

    fn record(&mut self, state: ItemState) {
        match state {
            ItemState::New => self.added += 1,
            ItemState::Stale => self.updated += 1,
            ItemState::Current => self.skipped += 1,
        }
    }
}

pub struct SyncEngine {
    index: IndexStore,
    batch_size: usize,
}

impl SyncEngine {
    pub fn new(index: IndexStore) -> Self {
        Self {
            index,
            batch_size: DEFAULT_INDEX_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    /// Classifies and records every item the stream yields.
    ///
    /// The index is flushed every `batch_size` items and once more when the
    /// stream ends. A stream error stops the pass and leaves the unflushed
    /// tail buffered; `progress` only ever reflects items that were recorded.
    pub async fn index_catalog<S>(
        &self,
        items: S,
        progress: &mut ScanProgress,
    ) -> Result<IndexStats, SyncError>
    where
        S: Stream<Item = Result<MediaItem, PhotosError>>,
    {
        pin_mut!(items);
        let mut stats = IndexStats::default();
        let mut since_flush = 0usize;

        while let Some(item) = items.try_next().await? {
            let state = self.index_item(&item).await?;
            progress.observe(&item);
            stats.record(state);

            since_flush += 1;
            if since_flush >= self.batch_size {
                let written = self.index.flush().await?;
                debug!(written, "flushed index batch");
                since_flush = 0;
            }
        }

        self.index.flush().await?;
        Ok(stats)
    }

    pub async fn index_item(&self, item: &MediaItem) -> Result<ItemState, SyncError> {
        let (relative_path, existing) = self.resolve(item).await?;
        let state = classify(item, existing.as_ref());
        let now = now_seconds();

        match state {
            ItemState::New => {
                self.index.upsert(IndexRecord {
                    relative_path: relative_path.clone(),
                    remote_id: item.id.clone(),
                    kind: item.kind,
                    create_date: item.create_date,
                    modify_date: item.modify_date,
                    indexed_at: now,
                    downloaded: false,
                });
                info!(path = %relative_path, id = %item.id, "added");
            }
            ItemState::Stale => {
                let Some(mut record) = existing else {
                    return Ok(state);
                };
                record.remote_id = item.id.clone();
                record.modify_date = item.modify_date;
                record.indexed_at = now;
                self.index.upsert(record);
                info!(path = %relative_path, id = %item.id, "updated");
            }
            ItemState::Current => {
                debug!(path = %relative_path, id = %item.id, "skipped");
            }
        }
        Ok(state)
    }

    /// Persists the scan watermark after flushing everything buffered, so the
    /// stored watermark never runs ahead of the stored records.
    pub async fn commit_scan(
        &self,
        progress: &ScanProgress,
    ) -> Result<Option<OffsetDateTime>, SyncError> {
        self.index.flush().await?;
        let Some(watermark) = progress.watermark() else {
            return Ok(None);
        };
        self.index.set_scan_window(watermark).await?;
        info!(watermark = %watermark, "scan window advanced");
        Ok(Some(watermark))
    }

    /// Finds the path an item lives at. An item keeps the path it was first
    /// indexed under. A new item whose natural path is taken by another id
    /// gets an id-qualified name, numbered further until a free one is found.
    async fn resolve(
        &self,
        item: &MediaItem,
    ) -> Result<(String, Option<IndexRecord>), SyncError> {
        if let Some(record) = self.index.get_by_remote_id(&item.id).await? {
            return Ok((record.relative_path.clone(), Some(record)));
        }

        let mut candidate = relative_path_for(item);
        let mut attempt = 0u32;
        loop {
            match self.index.get_by_path(&candidate).await? {
                None => return Ok((candidate, None)),
                Some(record) if record.remote_id == item.id => {
                    return Ok((candidate, Some(record)));
                }
                Some(owner) => {
                    attempt += 1;
                    debug!(
                        path = %candidate,
                        owner = %owner.remote_id,
                        id = %item.id,
                        "path taken by another item"
                    );
                    candidate = disambiguated_path_for(item, attempt);
                }
            }
        }
    }
}

fn now_seconds() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
