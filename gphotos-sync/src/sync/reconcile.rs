use std::io;
use std::path::PathBuf;

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::engine::SyncError;
use super::index::IndexStore;
use super::paths::index_location;

/// Deletes files under the media root that the index does not know about.
///
/// Only sound after an unfiltered indexing pass that ran to completion;
/// otherwise valid files outside the scanned window would be removed.
pub struct RemovalReconciler {
    media_root: PathBuf,
}

impl RemovalReconciler {
    pub fn new(media_root: PathBuf) -> Self {
        Self { media_root }
    }

    pub async fn run(&self, index: &IndexStore) -> Result<usize, SyncError> {
        if !tokio::fs::try_exists(&self.media_root).await? {
            return Ok(0);
        }

        let root = self.media_root.clone();
        let files = tokio::task::spawn_blocking(move || -> io::Result<Vec<PathBuf>> {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root) {
                let entry = entry.map_err(io::Error::from)?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
            Ok(files)
        })
        .await
        .map_err(io::Error::other)??;

        let mut removed = 0;
        for file in files {
            let Some((dir, name)) = index_location(&self.media_root, &file) else {
                debug!(path = %file.display(), "skipping file outside the index namespace");
                continue;
            };
            if index.get_by_location(&dir, &name).await?.is_some() {
                continue;
            }
            tokio::fs::remove_file(&file).await?;
            warn!(path = %file.display(), "removed file missing from index");
            removed += 1;
        }
        Ok(removed)
    }
}
