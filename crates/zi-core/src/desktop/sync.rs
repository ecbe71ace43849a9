//! Synchronizing the application list with a remote server.
//!
//! The server stores one resource, `{server}app-list`: a zip archive holding
//! `data.xml`, AES encrypted with the user's crypto key. Local changes are
//! merged with remote ones three-way against the list saved after the last
//! successful sync.

use std::fmt;
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{ETAG, IF_MATCH};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

use super::IntegrationError;
use super::app_list::AppList;
use super::integration::IntegrationManager;
use super::merge::{three_way, two_way_by};
use crate::config::SyncConfig;
use crate::feeds::FeedProvider;

const DATA_ENTRY: &str = "data.xml";
const LAST_SYNC_SUFFIX: &str = ".last-sync";

/// Which side wins during a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncResetMode {
    /// Merge both sides.
    #[default]
    None,
    /// Replace the local list with the server's.
    Client,
    /// Replace the server's list with the local one.
    Server,
}

impl fmt::Display for SyncResetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

impl FromStr for SyncResetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            other => Err(format!("unknown reset mode '{other}'")),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync server credentials are not configured")]
    NotConfigured,

    #[error("The sync server rejected the user name or password")]
    CredentialsInvalid,

    #[error("The crypto key does not match the application list on the server")]
    CryptoKeyInvalid,

    #[error("The application list on the server is damaged: {0}")]
    ServerDataDamaged(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sync cancelled")]
    Cancelled,
}

enum Upload {
    Done,
    PreconditionFailed,
}

/// Keeps an [`IntegrationManager`]'s list in sync with a server.
#[derive(Debug)]
pub struct SyncIntegrationManager {
    manager: IntegrationManager,
    config: SyncConfig,
    client: Client,
    cancel: CancellationToken,
}

impl SyncIntegrationManager {
    /// Sync `manager`'s list using the server and credentials in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConfigured`] if the server or credentials are missing.
    pub fn new(manager: IntegrationManager, config: SyncConfig, client: Client) -> Result<Self, SyncError> {
        if !config.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        Ok(Self {
            manager,
            config,
            client,
            cancel: CancellationToken::new(),
        })
    }

    /// Abort retries when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The wrapped integration manager.
    pub fn manager(&self) -> &IntegrationManager {
        &self.manager
    }

    /// Current sync settings, including a changed crypto key.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Where the list is saved after each successful sync.
    pub fn last_sync_path(&self) -> PathBuf {
        let mut path = self.manager.app_list_path().as_os_str().to_owned();
        path.push(LAST_SYNC_SUFFIX);
        PathBuf::from(path)
    }

    fn app_list_url(&self) -> String {
        let mut url = self.config.server.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str("app-list");
        url
    }

    fn crypto_key(&self) -> Option<&str> {
        Some(self.config.crypto_key.as_str()).filter(|k| !k.is_empty())
    }

    /// Merge with the server and upload the result.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] for network, credential, key and data problems,
    /// or the integration error of applying a remote change.
    pub async fn sync(&mut self, reset: SyncResetMode, feeds: &dyn FeedProvider) -> Result<(), SyncError> {
        loop {
            let (remote, etag) = if reset == SyncResetMode::Server {
                (None, None)
            } else {
                self.download().await?
            };

            if let Some(remote) = remote {
                self.merge(&remote, reset, feeds)?;
                self.manager.finish()?;
            }

            if reset != SyncResetMode::Client {
                let etag = if reset == SyncResetMode::None { etag } else { None };
                if let Upload::PreconditionFailed = self.upload(etag.as_deref()).await? {
                    let pause = rand::rng().random_range(250..=1500);
                    debug!(pause_ms = pause, "Server list changed during sync, retrying");
                    tokio::time::sleep(Duration::from_millis(pause)).await;
                    if self.cancel.is_cancelled() {
                        return Err(SyncError::Cancelled);
                    }
                    continue;
                }
            }

            self.manager.app_list().save(&self.last_sync_path())?;
            info!(reset = %reset, entries = self.manager.app_list().entries.len(), "Sync complete");
            return Ok(());
        }
    }

    /// Switch to a new crypto key.
    ///
    /// Syncs with the old key first, then replaces the server's list with one
    /// encrypted with the new key. The key is restored if the second step fails.
    ///
    /// # Errors
    ///
    /// Returns the error of either sync.
    pub async fn change_crypto_key(&mut self, new_key: &str, feeds: &dyn FeedProvider) -> Result<(), SyncError> {
        self.sync(SyncResetMode::None, feeds).await?;
        let old_key = std::mem::replace(&mut self.config.crypto_key, new_key.to_string());
        if let Err(e) = self.sync(SyncResetMode::Server, feeds).await {
            self.config.crypto_key = old_key;
            return Err(e);
        }
        Ok(())
    }

    fn merge(&mut self, remote: &AppList, reset: SyncResetMode, feeds: &dyn FeedProvider) -> Result<(), SyncError> {
        let local = &self.manager.app_list().entries;
        let diff = if reset == SyncResetMode::Client {
            two_way_by(&remote.entries, local, |e| e.interface.clone())
        } else {
            let reference = AppList::load_safe(&self.last_sync_path());
            three_way(&reference.entries, &remote.entries, local)
        };
        debug!(added = diff.added.len(), removed = diff.removed.len(), "Merging remote list");

        for entry in &diff.removed {
            self.manager.remove_entry(&entry.interface)?;
        }
        for entry in &diff.added {
            let feed = feeds.get_feed(&entry.interface).ok();
            self.manager.add_app_from(entry, feed.as_deref())?;
        }
        Ok(())
    }

    async fn download(&self) -> Result<(Option<AppList>, Option<String>), SyncError> {
        let url = self.app_list_url();
        let request = || {
            self.client
                .get(&url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .send()
        };
        let response = match request().await {
            Err(e) if e.is_timeout() => {
                warn!(%url, "Sync download timed out, retrying");
                request().await?
            }
            other => other?,
        };

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(SyncError::CredentialsInvalid),
            StatusCode::NOT_FOUND => return Ok((None, None)),
            _ => {}
        }
        let response = response.error_for_status()?;
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response.bytes().await?;
        if data.is_empty() {
            return Ok((None, etag));
        }
        Ok((Some(decode(&data, self.crypto_key())?), etag))
    }

    async fn upload(&self, etag: Option<&str>) -> Result<Upload, SyncError> {
        let data = encode(self.manager.app_list(), self.crypto_key())?;
        let mut request = self
            .client
            .put(self.app_list_url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .body(data);
        if let Some(etag) = etag {
            request = request.header(IF_MATCH, etag);
        }
        let response = request.send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => Err(SyncError::CredentialsInvalid),
            StatusCode::PRECONDITION_FAILED => Ok(Upload::PreconditionFailed),
            _ => {
                response.error_for_status()?;
                Ok(Upload::Done)
            }
        }
    }
}

fn encode(list: &AppList, key: Option<&str>) -> Result<Vec<u8>, SyncError> {
    let xml = list.to_xml().map_err(IntegrationError::from)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
    let options = match key {
        Some(key) => options.with_aes_encryption(AesMode::Aes128, key),
        None => options,
    };
    writer.start_file(DATA_ENTRY, options).map_err(zip_io)?;
    writer.write_all(xml.as_bytes())?;
    Ok(writer.finish().map_err(zip_io)?.into_inner())
}

fn decode(data: &[u8], key: Option<&str>) -> Result<AppList, SyncError> {
    let damaged = |e: &dyn fmt::Display| SyncError::ServerDataDamaged(e.to_string());
    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(|e| damaged(&e))?;

    let xml = match read_data(&mut archive, key.map(str::as_bytes)) {
        // The entry may simply not be encrypted.
        Err(ZipError::InvalidPassword) => read_data(&mut archive, None),
        other => other,
    }
    .map_err(|e| match e {
        ZipError::InvalidPassword => SyncError::CryptoKeyInvalid,
        ZipError::UnsupportedArchive(msg) if msg == ZipError::PASSWORD_REQUIRED => SyncError::CryptoKeyInvalid,
        ZipError::Io(io) if io.kind() == std::io::ErrorKind::InvalidData => SyncError::CryptoKeyInvalid,
        e => damaged(&e),
    })?;

    AppList::parse(&xml).map_err(|e| damaged(&e))
}

fn read_data(archive: &mut ZipArchive<Cursor<&[u8]>>, key: Option<&[u8]>) -> Result<String, ZipError> {
    let mut file = match key {
        Some(key) => archive.by_name_decrypt(DATA_ENTRY, key)?,
        None => archive.by_name(DATA_ENTRY)?,
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml)?;
    Ok(xml)
}

fn zip_io(e: ZipError) -> std::io::Error {
    std::io::Error::other(e)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::desktop::app_list::AppEntry;
    use crate::desktop::environment::RecordingDesktop;
    use crate::feeds::FeedError;
    use zi_schema::{Feed, FeedUri};

    struct NoFeeds;

    impl FeedProvider for NoFeeds {
        fn get_feed(&self, uri: &FeedUri) -> Result<Arc<Feed>, FeedError> {
            Err(FeedError::NotCached(uri.clone()))
        }

        fn is_stale(&self, _uri: &FeedUri) -> bool {
            false
        }
    }

    fn uri(name: &str) -> FeedUri {
        FeedUri::parse(&format!("http://example.com/{name}.xml")).unwrap()
    }

    fn list(names: &[&str]) -> AppList {
        AppList {
            entries: names
                .iter()
                .map(|n| {
                    let mut entry = AppEntry::new(uri(n), n.to_uppercase());
                    entry.timestamp = 100;
                    entry
                })
                .collect(),
        }
    }

    fn names(list: &AppList) -> Vec<String> {
        list.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn config(server: &str, key: &str) -> SyncConfig {
        SyncConfig {
            server: format!("{server}/"),
            username: "user".into(),
            password: "secret".into(),
            crypto_key: key.into(),
        }
    }

    fn sync_manager(dir: &std::path::Path, local: &AppList, config: SyncConfig) -> SyncIntegrationManager {
        let path = dir.join("app-list.xml");
        local.save(&path).unwrap();
        let manager = IntegrationManager::new(path, Arc::new(RecordingDesktop::new())).unwrap();
        SyncIntegrationManager::new(manager, config, Client::new()).unwrap()
    }

    #[test]
    fn payload_encryption() {
        let original = list(&["a", "b"]);
        let encrypted = encode(&original, Some("key")).unwrap();
        assert_eq!(decode(&encrypted, Some("key")).unwrap(), original);
        assert!(matches!(decode(&encrypted, Some("wrong")), Err(SyncError::CryptoKeyInvalid)));
        assert!(matches!(decode(&encrypted, None), Err(SyncError::CryptoKeyInvalid)));

        let plain = encode(&original, None).unwrap();
        assert_eq!(decode(&plain, None).unwrap(), original);
        assert!(matches!(decode(b"not a zip", None), Err(SyncError::ServerDataDamaged(_))));
    }

    #[test]
    fn requires_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-list.xml");
        let manager = IntegrationManager::new(path, Arc::new(RecordingDesktop::new())).unwrap();
        assert!(matches!(
            SyncIntegrationManager::new(manager, SyncConfig::default(), Client::new()),
            Err(SyncError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn server_reset_pushes_local_list() {
        let mut server = mockito::Server::new_async().await;
        let get = server.mock("GET", "/app-list").expect(0).create_async().await;
        let put = server
            .mock("PUT", "/app-list")
            .match_header("authorization", mockito::Matcher::Regex("^Basic ".into()))
            .with_status(200)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut sync = sync_manager(dir.path(), &list(&["a", "b"]), config(&server.url(), "key"));
        sync.sync(SyncResetMode::Server, &NoFeeds).await.unwrap();

        get.assert_async().await;
        put.assert_async().await;
        assert_eq!(names(sync.manager().app_list()), ["A", "B"]);
        assert_eq!(names(&AppList::load(&sync.last_sync_path()).unwrap()), ["A", "B"]);
    }

    #[tokio::test]
    async fn client_reset_pulls_remote_list() {
        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/app-list")
            .with_body(encode(&list(&["a", "c"]), Some("key")).unwrap())
            .create_async()
            .await;
        let put = server.mock("PUT", "/app-list").expect(0).create_async().await;

        let dir = tempfile::tempdir().unwrap();
        let mut sync = sync_manager(dir.path(), &list(&["a", "b"]), config(&server.url(), "key"));
        sync.sync(SyncResetMode::Client, &NoFeeds).await.unwrap();

        put.assert_async().await;
        assert_eq!(names(sync.manager().app_list()), ["A", "C"]);
        assert_eq!(names(&AppList::load(sync.manager().app_list_path()).unwrap()), ["A", "C"]);
    }

    #[tokio::test]
    async fn three_way_merge_uses_last_sync() {
        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/app-list")
            .with_header("ETag", "\"v1\"")
            .with_body(encode(&list(&["a", "c"]), Some("key")).unwrap())
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/app-list")
            .match_header("if-match", "\"v1\"")
            .with_status(200)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut sync = sync_manager(dir.path(), &list(&["a", "b", "d"]), config(&server.url(), "key"));
        list(&["a", "b"]).save(&sync.last_sync_path()).unwrap();
        sync.sync(SyncResetMode::None, &NoFeeds).await.unwrap();

        put.assert_async().await;
        assert_eq!(names(sync.manager().app_list()), ["A", "D", "C"]);
    }

    #[tokio::test]
    async fn unauthorized_and_wrong_key() {
        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/app-list")
            .with_status(401)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let mut sync = sync_manager(dir.path(), &list(&["a"]), config(&server.url(), "key"));
        assert!(matches!(
            sync.sync(SyncResetMode::None, &NoFeeds).await,
            Err(SyncError::CredentialsInvalid)
        ));

        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/app-list")
            .with_body(encode(&list(&["a"]), Some("other")).unwrap())
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let mut sync = sync_manager(dir.path(), &list(&["a"]), config(&server.url(), "key"));
        assert!(matches!(
            sync.sync(SyncResetMode::None, &NoFeeds).await,
            Err(SyncError::CryptoKeyInvalid)
        ));
    }

    #[tokio::test]
    async fn precondition_failure_checks_cancellation() {
        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/app-list")
            .with_status(404)
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/app-list")
            .with_status(412)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sync = sync_manager(dir.path(), &list(&["a"]), config(&server.url(), ""))
            .with_cancellation(cancel);
        assert!(matches!(
            sync.sync(SyncResetMode::None, &NoFeeds).await,
            Err(SyncError::Cancelled)
        ));
        put.assert_async().await;
        assert!(!sync.last_sync_path().exists());
    }

    #[tokio::test]
    async fn change_crypto_key_reuploads() {
        let mut server = mockito::Server::new_async().await;
        let _get = server
            .mock("GET", "/app-list")
            .with_status(404)
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/app-list")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut sync = sync_manager(dir.path(), &list(&["a"]), config(&server.url(), "old"));
        sync.change_crypto_key("new", &NoFeeds).await.unwrap();
        put.assert_async().await;
        assert_eq!(sync.config().crypto_key, "new");
    }
}
