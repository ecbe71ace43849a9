//! Feed retrieval and caching.
//!
//! The solver reads feeds synchronously through [`FeedProvider`]; it never
//! touches the network. A feed that is missing from the cache surfaces as
//! [`FeedError::NotCached`], and async callers download it with
//! [`FeedCache::download`] before solving again.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};
use zi_schema::uri::escape_component;
use zi_schema::{Feed, FeedUri, ParseError};

use crate::config::{Config, NetworkLevel};
use crate::io::download::fetch_text;
use crate::paths::atomic_write;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Feed {0} is not cached")]
    NotCached(FeedUri),

    #[error("Feed {0} is not cached and network use is offline")]
    Offline(FeedUri),

    #[error("Feed {0} could not be found")]
    NotFound(FeedUri),

    #[error("Invalid feed {uri}: {source}")]
    Parse { uri: FeedUri, source: ParseError },

    #[error("Implementation {id} not found in feed {feed}")]
    ImplementationNotFound { feed: FeedUri, id: String },

    #[error("Feed downloaded from {expected} claims to be {actual}")]
    UriMismatch { expected: FeedUri, actual: FeedUri },

    #[error("Failed to read feed {uri}: {source}")]
    Io {
        uri: FeedUri,
        source: std::io::Error,
    },

    #[error("Failed to download feed {uri}: {source}")]
    Http { uri: FeedUri, source: reqwest::Error },
}

/// Read access to feeds for the solver.
pub trait FeedProvider: Send + Sync {
    /// The feed for `uri`.
    fn get_feed(&self, uri: &FeedUri) -> Result<Arc<Feed>, FeedError>;

    /// Whether the cached copy of `uri` is older than the freshness limit.
    fn is_stale(&self, uri: &FeedUri) -> bool;
}

/// Feeds read from local files and the on-disk feed cache.
#[derive(Debug)]
pub struct FeedCache {
    dir: PathBuf,
    freshness: Duration,
    network_use: NetworkLevel,
    mirror: Option<String>,
    refresh: bool,
    client: Client,
    fetched: Mutex<HashSet<FeedUri>>,
    parsed: Mutex<HashMap<FeedUri, Arc<Feed>>>,
}

impl FeedCache {
    /// Feed cache in `dir` using the freshness, network and mirror settings of `config`.
    pub fn new(dir: impl Into<PathBuf>, config: &Config, client: Client) -> Self {
        Self {
            dir: dir.into(),
            freshness: config.freshness(),
            network_use: config.network_use,
            mirror: (!config.feed_mirror.is_empty()).then(|| config.feed_mirror.clone()),
            refresh: false,
            client,
            fetched: Mutex::new(HashSet::new()),
            parsed: Mutex::new(HashMap::new()),
        }
    }

    /// Treat remote feeds as uncached until they were downloaded by this instance.
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh && self.network_use != NetworkLevel::Offline;
        self
    }

    /// Whether refresh mode is on.
    pub fn refresh(&self) -> bool {
        self.refresh
    }

    /// Configured network use.
    pub fn network_use(&self) -> NetworkLevel {
        self.network_use
    }

    /// Cache file for a remote feed.
    pub fn cache_path(&self, uri: &FeedUri) -> PathBuf {
        self.dir.join(uri.escape())
    }

    /// Whether the feed can be read without downloading.
    pub fn is_cached(&self, uri: &FeedUri) -> bool {
        if !uri.is_remote() {
            return true;
        }
        if self.refresh && !self.was_fetched(uri) {
            return false;
        }
        self.cache_path(uri).exists()
    }

    fn was_fetched(&self, uri: &FeedUri) -> bool {
        self.fetched.lock().is_ok_and(|f| f.contains(uri))
    }

    /// Mirror location for a remote feed.
    pub fn mirror_url(&self, uri: &FeedUri) -> Option<String> {
        let mirror = self.mirror.as_deref()?;
        let (scheme, host, path) = uri.remote_parts()?;
        let path = escape_component(&path.trim_matches('/').replace('/', "#"), b"-_.");
        Some(format!(
            "{}/feeds/{scheme}/{host}/{path}/latest.xml",
            mirror.trim_end_matches('/')
        ))
    }

    /// Download `uri`, check it, and store it in the cache.
    ///
    /// Falls back to the mirror when the primary location fails.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Offline`] when network use is offline, and
    /// download, parse or URI mismatch errors otherwise.
    pub async fn download(&self, uri: &FeedUri) -> Result<Arc<Feed>, FeedError> {
        if !uri.is_remote() {
            return self.get_feed(uri);
        }
        if self.network_use == NetworkLevel::Offline {
            return Err(FeedError::Offline(uri.clone()));
        }

        info!(feed = %uri, "Downloading feed");
        let text = match fetch_text(&self.client, uri.as_str()).await {
            Ok(Some(text)) => text,
            primary => {
                let Some(mirror) = self.mirror_url(uri) else {
                    return Err(primary_failure(uri, primary));
                };
                warn!(feed = %uri, mirror = %mirror, "Primary location failed, trying mirror");
                match fetch_text(&self.client, &mirror).await {
                    Ok(Some(text)) => text,
                    _ => return Err(primary_failure(uri, primary)),
                }
            }
        };

        let feed = Feed::parse(&text, uri).map_err(|source| FeedError::Parse {
            uri: uri.clone(),
            source,
        })?;
        if &feed.uri != uri {
            return Err(FeedError::UriMismatch {
                expected: uri.clone(),
                actual: feed.uri,
            });
        }

        atomic_write(&self.cache_path(uri), text.as_bytes()).map_err(|source| FeedError::Io {
            uri: uri.clone(),
            source,
        })?;
        let feed = Arc::new(feed);
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.insert(uri.clone());
        }
        if let Ok(mut parsed) = self.parsed.lock() {
            parsed.insert(uri.clone(), feed.clone());
        }
        Ok(feed)
    }

    /// Every remote feed in the cache.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the cache directory cannot be read.
    pub fn list_cached(&self) -> std::io::Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect::<Vec<_>>();
        paths.sort();
        Ok(paths)
    }

    fn read(&self, uri: &FeedUri, path: PathBuf) -> Result<Arc<Feed>, FeedError> {
        let text = fs::read_to_string(&path).map_err(|source| FeedError::Io {
            uri: uri.clone(),
            source,
        })?;
        let feed = Feed::parse(&text, uri).map_err(|source| FeedError::Parse {
            uri: uri.clone(),
            source,
        })?;
        Ok(Arc::new(feed))
    }
}

fn primary_failure(uri: &FeedUri, result: Result<Option<String>, reqwest::Error>) -> FeedError {
    match result {
        Err(source) => FeedError::Http {
            uri: uri.clone(),
            source,
        },
        Ok(_) => FeedError::NotFound(uri.clone()),
    }
}

impl FeedProvider for FeedCache {
    fn get_feed(&self, uri: &FeedUri) -> Result<Arc<Feed>, FeedError> {
        if let Some(feed) = self.parsed.lock().ok().and_then(|p| p.get(uri).cloned()) {
            return Ok(feed);
        }

        let feed = if let Some(path) = uri.local_path() {
            self.read(uri, path)?
        } else if uri.is_remote() {
            if !self.is_cached(uri) {
                if self.network_use == NetworkLevel::Offline {
                    return Err(FeedError::Offline(uri.clone()));
                }
                return Err(FeedError::NotCached(uri.clone()));
            }
            self.read(uri, self.cache_path(uri))?
        } else {
            return Err(FeedError::NotFound(uri.clone()));
        };

        debug!(feed = %uri, implementations = feed.implementations.len(), "Loaded feed");
        if let Ok(mut parsed) = self.parsed.lock() {
            parsed.insert(uri.clone(), feed.clone());
        }
        Ok(feed)
    }

    fn is_stale(&self, uri: &FeedUri) -> bool {
        if !uri.is_remote() || self.was_fetched(uri) {
            return false;
        }
        let Ok(modified) = fs::metadata(self.cache_path(uri)).and_then(|m| m.modified()) else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age > self.freshness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<interface xmlns="http://zero-install.sourceforge.net/2004/injector/interface" uri="URI">
  <name>Demo</name>
  <summary>demo app</summary>
  <implementation id="sha1new=abc" version="1.0" arch="*-*">
    <command name="run" path="demo"/>
  </implementation>
</interface>"#;

    fn cache(dir: &std::path::Path, mirror: &str) -> FeedCache {
        let config = Config {
            feed_mirror: mirror.to_string(),
            ..Config::default()
        };
        FeedCache::new(dir, &config, crate::io::download::http_client().unwrap())
    }

    #[test]
    fn missing_remote_feed_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), "");
        let uri = FeedUri::parse("http://example.com/demo.xml").unwrap();
        assert!(matches!(cache.get_feed(&uri), Err(FeedError::NotCached(_))));
    }

    #[test]
    fn cached_feed_is_read_and_refresh_hides_it() {
        let dir = tempfile::tempdir().unwrap();
        let uri = FeedUri::parse("http://example.com/demo.xml").unwrap();
        let cache = cache(dir.path(), "");
        fs::write(cache.cache_path(&uri), FEED.replace("URI", uri.as_str())).unwrap();

        assert_eq!(cache.get_feed(&uri).unwrap().name, "Demo");
        assert!(!cache.is_stale(&uri));

        let refreshing = self::cache(dir.path(), "").with_refresh(true);
        assert!(matches!(refreshing.get_feed(&uri), Err(FeedError::NotCached(_))));
    }

    #[test]
    fn local_feeds_are_read_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.xml");
        fs::write(&path, FEED.replace(" uri=\"URI\"", "")).unwrap();
        let uri = FeedUri::from_path(&path).unwrap();
        let feed = cache(dir.path(), "").get_feed(&uri).unwrap();
        assert_eq!(feed.uri, uri);
    }

    #[test]
    fn mirror_url_escapes_path() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), "http://mirror.example/0mirror/");
        let uri = FeedUri::parse("https://apps.example.com/feeds/demo.xml").unwrap();
        assert_eq!(
            cache.mirror_url(&uri).unwrap(),
            "http://mirror.example/0mirror/feeds/https/apps.example.com/feeds%23demo.xml/latest.xml"
        );
    }

    #[tokio::test]
    async fn download_saves_feed_and_falls_back_to_mirror() {
        let mut server = mockito::Server::new_async().await;
        let uri = FeedUri::parse(&format!("{}/demo.xml", server.url())).unwrap();
        let (_, host, _) = uri.remote_parts().unwrap();
        let _primary = server
            .mock("GET", "/demo.xml")
            .with_status(500)
            .create_async()
            .await;
        let _mirror = server
            .mock("GET", format!("/mirror/feeds/http/{host}/demo.xml/latest.xml").as_str())
            .with_status(200)
            .with_body(FEED.replace("URI", uri.as_str()))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), &format!("{}/mirror", server.url())).with_refresh(true);
        assert!(matches!(cache.get_feed(&uri), Err(FeedError::NotCached(_))));

        let feed = cache.download(&uri).await.unwrap();
        assert_eq!(feed.name, "Demo");
        assert!(cache.cache_path(&uri).exists());
        assert_eq!(cache.get_feed(&uri).unwrap().name, "Demo");
    }

    #[tokio::test]
    async fn download_rejects_foreign_uri() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/demo.xml")
            .with_body(FEED.replace("URI", "http://elsewhere.example/demo.xml"))
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let uri = FeedUri::parse(&format!("{}/demo.xml", server.url())).unwrap();
        let err = cache(dir.path(), "").download(&uri).await;
        assert!(matches!(err, Err(FeedError::UriMismatch { .. })));
        assert!(!cache(dir.path(), "").cache_path(&uri).exists());
    }
}
