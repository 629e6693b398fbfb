use std::collections::VecDeque;
use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use filetime::FileTime;
use futures_util::StreamExt;
use futures_util::future::try_join_all;
use gphotos_core::{PhotosClient, PhotosError};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::index::{IndexError, IndexRecord, IndexStore, MediaQuery};
use super::paths::{PathError, local_path_for};

/// Name of the scratch file, placed in the sync root, that content is
/// streamed into before it is renamed onto its final path.
pub const TEMP_FILE_NAME: &str = ".temp-photo";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("api error: {0}")]
    Api(#[from] PhotosError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("media item {0} has no content url")]
    MissingBaseUrl(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub downloaded: usize,
    pub present: usize,
    pub failed: usize,
}

impl AddAssign for DownloadStats {
    fn add_assign(&mut self, other: Self) {
        self.downloaded += other.downloaded;
        self.present += other.present;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded,
    AlreadyPresent,
}

pub struct DownloadExecutor {
    client: PhotosClient,
    root: PathBuf,
    media_root: PathBuf,
    concurrency: usize,
    placement: tokio::sync::Mutex<()>,
}

impl DownloadExecutor {
    pub fn new(client: PhotosClient, root: PathBuf, media_root: PathBuf) -> Self {
        Self {
            client,
            root,
            media_root,
            concurrency: 1,
            placement: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Scratch file for worker `slot`. Slot 0 uses the plain name so a
    /// sequential run always reuses (and overwrites) the same file.
    pub fn temp_path(&self, slot: usize) -> PathBuf {
        if slot == 0 {
            self.root.join(TEMP_FILE_NAME)
        } else {
            self.root.join(format!("{TEMP_FILE_NAME}.{slot}"))
        }
    }

    /// Downloads every record matched by `query`. A failure on one item is
    /// logged and counted; only index write failures end the pass early.
    pub async fn run(
        &self,
        index: &IndexStore,
        query: &MediaQuery,
    ) -> Result<DownloadStats, IndexError> {
        let records = index.query(query).await?;
        if records.is_empty() {
            debug!("nothing to download");
            return Ok(DownloadStats::default());
        }
        info!(
            items = records.len(),
            workers = self.concurrency,
            "starting download pass"
        );

        let queue = Mutex::new(VecDeque::from(records));
        let workers = (0..self.concurrency.min(queue_len(&queue)))
            .map(|slot| self.worker(slot, index, &queue));
        let per_worker = try_join_all(workers).await?;

        let mut stats = DownloadStats::default();
        for worker_stats in per_worker {
            stats += worker_stats;
        }
        Ok(stats)
    }

    async fn worker(
        &self,
        slot: usize,
        index: &IndexStore,
        queue: &Mutex<VecDeque<IndexRecord>>,
    ) -> Result<DownloadStats, IndexError> {
        let mut stats = DownloadStats::default();
        while let Some(record) = next_record(queue) {
            match self.download_one(&record, slot).await {
                Ok(outcome) => {
                    index.mark_downloaded(&record.relative_path).await?;
                    match outcome {
                        DownloadOutcome::Downloaded => {
                            stats.downloaded += 1;
                            info!(path = %record.relative_path, id = %record.remote_id, "downloaded");
                        }
                        DownloadOutcome::AlreadyPresent => {
                            stats.present += 1;
                            debug!(path = %record.relative_path, "already present");
                        }
                    }
                }
                Err(err) => {
                    stats.failed += 1;
                    error!(
                        path = %record.relative_path,
                        id = %record.remote_id,
                        error = %err,
                        "download failed"
                    );
                }
            }
        }
        Ok(stats)
    }

    pub async fn download_one(
        &self,
        record: &IndexRecord,
        slot: usize,
    ) -> Result<DownloadOutcome, DownloadError> {
        let target = local_path_for(&self.media_root, &record.relative_path)?;
        if is_file(&target).await {
            return Ok(DownloadOutcome::AlreadyPresent);
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let item = self.client.get_media_item(&record.remote_id).await?;
        let base_url = item
            .base_url
            .ok_or_else(|| DownloadError::MissingBaseUrl(record.remote_id.clone()))?;
        let content_url = format!("{base_url}{}", record.kind.download_suffix());
        let response = self.client.fetch_content(&content_url).await?;

        let partial = self.temp_path(slot);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        {
            let _guard = self.placement.lock().await;
            if is_file(&target).await {
                if let Err(err) = tokio::fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %err, "failed to remove temp file");
                }
                return Ok(DownloadOutcome::AlreadyPresent);
            }
            tokio::fs::rename(&partial, &target).await?;
        }

        if let Err(err) = apply_times(&target, record) {
            warn!(path = %record.relative_path, error = %err, "failed to set file times");
        }
        Ok(DownloadOutcome::Downloaded)
    }
}

fn apply_times(target: &Path, record: &IndexRecord) -> io::Result<()> {
    let modified = file_time(record.modify_date);
    let accessed = record.create_date.map(file_time).unwrap_or(modified);
    filetime::set_file_times(target, accessed, modified)
}

fn file_time(value: OffsetDateTime) -> FileTime {
    FileTime::from_unix_time(value.unix_timestamp(), value.nanosecond())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

fn next_record(queue: &Mutex<VecDeque<IndexRecord>>) -> Option<IndexRecord> {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .pop_front()
}

fn queue_len(queue: &Mutex<VecDeque<IndexRecord>>) -> usize {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .len()
}
