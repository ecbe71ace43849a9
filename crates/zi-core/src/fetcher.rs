//! Downloading implementations into the store.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zi_schema::{Archive, FeedUri, Implementation};

use crate::Reporter;
use crate::io::download::{DownloadError, download_to_file};
use crate::io::extract::{ArchiveFormat, ExtractError, ExtractOptions};
use crate::paths::filename_from_url;
use crate::store::{ArchiveFileInfo, ImplementationStore, StoreError};

/// Implementations downloaded at the same time.
const MAX_PARALLEL: usize = 5;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No supported retrieval method for implementation {0}")]
    NotSupported(String),

    #[error("Implementation {0} has no manifest digest")]
    NoDigest(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Download cancelled")]
    Cancelled,
}

/// Makes implementations available in the store.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch every implementation that is not cached yet.
    async fn fetch(&self, implementations: &[Implementation]) -> Result<(), FetchError>;
}

/// Fetches archives over HTTP (or from local paths) and adds them to a store.
pub struct HttpFetcher {
    client: Client,
    store: Arc<dyn ImplementationStore>,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("store", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    /// Fetcher adding to `store` and reporting progress to `reporter`.
    pub fn new(
        client: Client,
        store: Arc<dyn ImplementationStore>,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            store,
            reporter,
            cancel,
        }
    }

    fn is_cached(&self, implementation: &Implementation) -> bool {
        implementation.local_path.is_some() || self.store.contains(&implementation.manifest_digest)
    }

    async fn fetch_one(&self, implementation: &Implementation) -> Result<(), FetchError> {
        let name = format!("{} {}", implementation_name(implementation), implementation.version);
        if implementation.manifest_digest.is_empty() {
            return Err(FetchError::NoDigest(implementation.id.clone()));
        }
        let Some(recipe) = implementation.recipes.first() else {
            return Err(FetchError::NotSupported(implementation.id.clone()));
        };

        let temp = tempfile::Builder::new().prefix("zi-fetch-").tempdir()?;
        let mut archives = Vec::with_capacity(recipe.steps.len());
        for (index, step) in recipe.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let path = self
                .retrieve(step, implementation.from_feed.as_ref(), temp.path(), index, &name)
                .await?;
            archives.push(ArchiveFileInfo {
                path,
                format: ArchiveFormat::detect(step.mime_type.as_deref(), &step.href)?,
                options: ExtractOptions {
                    extract: step.extract.clone(),
                    destination: step.destination.clone(),
                    start_offset: step.start_offset,
                },
            });
        }
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let store = self.store.clone();
        let reporter = self.reporter.clone();
        let cancel = self.cancel.clone();
        let digest = implementation.manifest_digest.clone();
        let result = tokio::task::spawn_blocking(move || {
            store.add_archives(&archives, &digest, &cancel, &*reporter)
        })
        .await
        .map_err(|e| FetchError::Task(e.to_string()))?;
        drop(temp);

        match result {
            Ok(path) => {
                self.reporter.done(&name, "stored");
                info!(path = %path.display(), "Fetched {name}");
                Ok(())
            }
            Err(StoreError::ImplementationAlreadyInStore(_)) => Ok(()),
            Err(StoreError::Cancelled) => Err(FetchError::Cancelled),
            Err(e) => {
                self.reporter.failed(&name, &e.to_string());
                Err(e.into())
            }
        }
    }

    /// Bring one archive to a local file.
    async fn retrieve(
        &self,
        step: &Archive,
        feed: Option<&FeedUri>,
        temp: &std::path::Path,
        index: usize,
        name: &str,
    ) -> Result<PathBuf, FetchError> {
        if step.href.starts_with("http://") || step.href.starts_with("https://") {
            let dest = temp.join(format!("{index}-{}", filename_from_url(&step.href)));
            let expected = (step.size > 0).then_some(step.size + step.start_offset);
            download_to_file(&self.client, &step.href, &dest, expected, name, &*self.reporter)
                .await?;
            return Ok(dest);
        }

        let href = step.href.strip_prefix("file://").unwrap_or(&step.href);
        let path = PathBuf::from(href);
        if path.is_absolute() {
            return Ok(path);
        }
        let base = feed
            .and_then(FeedUri::local_path)
            .and_then(|p| p.parent().map(std::path::Path::to_path_buf));
        match base {
            Some(base) => Ok(base.join(path)),
            None => Err(FetchError::NotSupported(step.href.clone())),
        }
    }
}

fn implementation_name(implementation: &Implementation) -> String {
    implementation
        .from_feed
        .as_ref()
        .and_then(|f| f.as_str().rsplit('/').next().map(str::to_string))
        .unwrap_or_else(|| implementation.id.clone())
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, implementations: &[Implementation]) -> Result<(), FetchError> {
        let pending: Vec<&Implementation> = implementations
            .iter()
            .filter(|i| !self.is_cached(i))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "Fetching implementations");
        self.reporter.section("Fetching");

        let futures: Vec<_> = pending
            .into_iter()
            .map(|implementation| self.fetch_one(implementation).boxed())
            .collect();
        let results: Vec<Result<(), FetchError>> = futures::stream::iter(futures)
            .buffer_unordered(MAX_PARALLEL)
            .collect()
            .await;

        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        results.into_iter().collect()
    }
}
