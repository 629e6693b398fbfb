use std::fmt;
use std::path::PathBuf;

use anyhow::Context;
use gphotos_core::{DEFAULT_API_BASE_URL, OAuthClient, PhotosClient, RetryPolicy};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::storage::TokenFile;
use crate::sync::download::{DownloadExecutor, DownloadStats};
use crate::sync::engine::{IndexStats, ScanProgress, SyncEngine, SyncError};
use crate::sync::index::{IndexStore, MediaQuery};
use crate::sync::media::MediaKind;
use crate::sync::paths::MEDIA_FOLDER;
use crate::sync::reconcile::RemovalReconciler;
use crate::sync::walker::{CatalogFilter, CatalogWalker};
use crate::token_provider::TokenProvider;

/// What a single invocation should do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub start_date: Option<OffsetDateTime>,
    pub end_date: Option<OffsetDateTime>,
    pub include_video: bool,
    pub skip_index: bool,
    pub skip_download: bool,
    pub flush_index: bool,
    pub remove_untracked: bool,
}

impl RunOptions {
    pub fn is_date_filtered(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    pub fn download_query(&self) -> MediaQuery {
        MediaQuery {
            kind: (!self.include_video).then_some(MediaKind::Photo),
            modified_after: self.start_date,
            modified_before: self.end_date,
            pending_only: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub index: IndexStats,
    pub download: DownloadStats,
    pub removed: usize,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.download.failed > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added={} updated={} skipped={} downloaded={} present={} failed={} removed={}",
            self.index.added,
            self.index.updated,
            self.index.skipped,
            self.download.downloaded,
            self.download.present,
            self.download.failed,
            self.removed
        )
    }
}

/// Runs the indexing, download and removal passes in order against one
/// sync root.
pub struct Synchronizer {
    client: PhotosClient,
    engine: SyncEngine,
    walker: CatalogWalker,
    executor: DownloadExecutor,
    reconciler: RemovalReconciler,
    tokens: Option<Mutex<TokenProvider>>,
}

impl Synchronizer {
    pub fn new(client: PhotosClient, index: IndexStore, root: PathBuf) -> Self {
        let media_root = root.join(MEDIA_FOLDER);
        Self {
            engine: SyncEngine::new(index),
            walker: CatalogWalker::new(client.clone()),
            executor: DownloadExecutor::new(client.clone(), root, media_root.clone()),
            reconciler: RemovalReconciler::new(media_root),
            tokens: None,
            client,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.walker = CatalogWalker::with_page_size(self.client.clone(), page_size);
        self
    }

    pub fn with_index_batch(mut self, batch_size: usize) -> Self {
        self.engine = self.engine.with_batch_size(batch_size);
        self
    }

    pub fn with_download_concurrency(mut self, concurrency: usize) -> Self {
        self.executor = self.executor.with_concurrency(concurrency);
        self
    }

    pub fn with_token_provider(mut self, provider: TokenProvider) -> Self {
        self.tokens = Some(Mutex::new(provider));
        self
    }

    pub fn index(&self) -> &IndexStore {
        self.engine.index()
    }

    pub async fn bootstrap(config: &SyncConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.root)
            .await
            .with_context(|| format!("failed to create sync root at {:?}", config.root))?;

        let (token, provider) = resolve_credentials(config).await?;
        let policy = RetryPolicy::default()
            .with_max_retries(config.max_retries)
            .with_backoff_factor(config.backoff);
        let base_url = config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL);
        let client = PhotosClient::with_policy(base_url, token, policy)
            .context("invalid photos api base url")?;
        let index = IndexStore::open(&config.index_db)
            .await
            .with_context(|| format!("failed to open index at {:?}", config.index_db))?;

        let mut synchronizer = Self::new(client, index, config.root.clone())
            .with_page_size(config.page_size)
            .with_index_batch(config.index_batch)
            .with_download_concurrency(config.download_concurrency);
        if let Some(provider) = provider {
            synchronizer = synchronizer.with_token_provider(provider);
        }
        Ok(synchronizer)
    }

    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary, SyncError> {
        let mut summary = RunSummary::default();

        if options.flush_index {
            self.index().clear().await?;
            info!("index cleared");
        }

        if !options.skip_index {
            self.refresh_token().await?;
            summary.index = self.index_phase(options).await?;
            info!(
                added = summary.index.added,
                updated = summary.index.updated,
                skipped = summary.index.skipped,
                "indexing finished"
            );
        }

        if !options.skip_download {
            self.refresh_token().await?;
            summary.download = self
                .executor
                .run(self.index(), &options.download_query())
                .await?;
        }

        if options.remove_untracked {
            if options.is_date_filtered() {
                warn!("not removing untracked files after a date-filtered run");
            } else if options.skip_index {
                warn!("not removing untracked files without an indexing pass");
            } else {
                summary.removed = self.reconciler.run(self.index()).await?;
            }
        }

        info!(summary = %summary, "run finished");
        Ok(summary)
    }

    /// Walks the catalog into the index. Unfiltered runs start at the stored
    /// watermark and save the new one even when the walk fails part way.
    async fn index_phase(&self, options: &RunOptions) -> Result<IndexStats, SyncError> {
        let filtered = options.is_date_filtered();
        let previous = if filtered {
            None
        } else {
            self.index().scan_window().await?
        };
        let filter = CatalogFilter {
            include_video: options.include_video,
            modified_after: if filtered { options.start_date } else { previous },
            modified_before: options.end_date,
        };
        info!(
            after = ?filter.modified_after,
            before = ?filter.modified_before,
            include_video = filter.include_video,
            "indexing remote catalog"
        );

        let mut progress = ScanProgress::starting_from(previous);
        let outcome = self
            .engine
            .index_catalog(self.walker.walk(filter), &mut progress)
            .await;
        let saved = if filtered {
            self.index().flush().await.map(drop).map_err(SyncError::from)
        } else {
            self.engine.commit_scan(&progress).await.map(drop)
        };

        match (outcome, saved) {
            (Ok(stats), Ok(())) => Ok(stats),
            (Ok(_), Err(err)) | (Err(err), Ok(())) => Err(err),
            (Err(err), Err(save_err)) => {
                error!(error = %save_err, "failed to save indexing progress");
                Err(err)
            }
        }
    }

    async fn refresh_token(&self) -> Result<(), SyncError> {
        let Some(tokens) = &self.tokens else {
            return Ok(());
        };
        let token = tokens.lock().await.valid_access_token().await?;
        self.client.set_access_token(token);
        Ok(())
    }
}

async fn resolve_credentials(
    config: &SyncConfig,
) -> anyhow::Result<(String, Option<TokenProvider>)> {
    if let Some(token) = &config.static_token {
        return Ok((token.clone(), None));
    }

    let token_file = TokenFile::new(config.token_file.clone());
    let state = token_file.load().with_context(|| {
        format!(
            "no usable token at {:?}; set GPHOTOS_TOKEN or provide a token file",
            config.token_file
        )
    })?;
    let mut provider =
        TokenProvider::new(state, oauth_client_from_config(config)?).with_token_file(token_file);
    let token = provider
        .valid_access_token()
        .await
        .context("failed to resolve valid access token")?;
    Ok((token, Some(provider)))
}

fn oauth_client_from_config(config: &SyncConfig) -> anyhow::Result<Option<OAuthClient>> {
    match (&config.client_id, &config.client_secret) {
        (Some(client_id), Some(client_secret)) => Ok(Some(match &config.oauth_base_url {
            Some(url) => OAuthClient::with_base_url(url, client_id, client_secret)
                .context("invalid oauth base url/config")?,
            None => OAuthClient::new(client_id, client_secret).context("invalid oauth config")?,
        })),
        _ => Ok(None),
    }
}
