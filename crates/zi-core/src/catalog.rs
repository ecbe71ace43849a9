//! Catalog sources and the merged catalog cache.

use std::fs;
use std::path::PathBuf;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};
use zi_schema::catalog::CATALOG_NAMESPACE;
use zi_schema::xml::Element;
use zi_schema::{Catalog, FeedUri, ParseError};

use crate::io::download::fetch_text;
use crate::paths::{Locations, atomic_write};

/// Catalog used when no sources are configured.
pub const DEFAULT_SOURCE: &str = "http://0install.de/catalog/";

const MAX_PARALLEL_DOWNLOADS: usize = 5;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog: {0}")]
    Parse(#[from] ParseError),

    #[error("Catalog source {0} is already registered")]
    AlreadyRegistered(FeedUri),

    #[error("Catalog source {0} is not registered")]
    NotRegistered(FeedUri),
}

/// Maintains the list of catalog sources and the merged cache.
#[derive(Debug, Clone)]
pub struct CatalogManager {
    sources_file: PathBuf,
    cache_file: PathBuf,
    client: Client,
}

impl CatalogManager {
    /// Manager using the source list and cache below `locations`.
    pub fn new(locations: &Locations, client: Client) -> Self {
        Self {
            sources_file: locations.catalog_sources(),
            cache_file: locations.catalog_cache(),
            client,
        }
    }

    /// Configured sources, or the default source if none are configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources file exists but cannot be read or
    /// contains an invalid URI.
    pub fn sources(&self) -> Result<Vec<FeedUri>, CatalogError> {
        if !self.sources_file.exists() {
            return Ok(vec![FeedUri::parse(DEFAULT_SOURCE)?]);
        }
        let text = fs::read_to_string(&self.sources_file)?;
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| FeedUri::parse(line).map_err(CatalogError::from))
            .collect()
    }

    fn save_sources(&self, sources: &[FeedUri]) -> Result<(), CatalogError> {
        let mut text = String::new();
        for source in sources {
            text.push_str(source.as_str());
            text.push('\n');
        }
        atomic_write(&self.sources_file, text.as_bytes())?;
        Ok(())
    }

    /// Register an additional source.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::AlreadyRegistered`] if the source is already listed.
    pub fn add_source(&self, source: &FeedUri) -> Result<(), CatalogError> {
        let mut sources = self.sources()?;
        if sources.contains(source) {
            return Err(CatalogError::AlreadyRegistered(source.clone()));
        }
        sources.push(source.clone());
        self.save_sources(&sources)
    }

    /// Unregister a source.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotRegistered`] if the source is not listed.
    pub fn remove_source(&self, source: &FeedUri) -> Result<(), CatalogError> {
        let mut sources = self.sources()?;
        let before = sources.len();
        sources.retain(|s| s != source);
        if sources.len() == before {
            return Err(CatalogError::NotRegistered(source.clone()));
        }
        self.save_sources(&sources)
    }

    /// Go back to the default source.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sources file cannot be written.
    pub fn reset_sources(&self) -> Result<(), CatalogError> {
        self.save_sources(&[FeedUri::parse(DEFAULT_SOURCE)?])
    }

    /// The cached catalog, if one has been downloaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache exists but cannot be read or parsed.
    pub fn get_cached(&self) -> Result<Option<Catalog>, CatalogError> {
        if !self.cache_file.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.cache_file)?;
        let source = FeedUri::from_path(&self.cache_file)?;
        Ok(Some(Catalog::parse(&text, &source)?))
    }

    /// Download every source, merge them and update the cache.
    ///
    /// Sources that fail to download or parse are skipped; the first source
    /// listing a feed wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the source list cannot be read or the cache cannot
    /// be written.
    pub async fn get_online(&self) -> Result<Catalog, CatalogError> {
        let sources = self.sources()?;
        let documents: Vec<Option<Element>> = stream::iter(sources)
            .map(|source| async move { self.download(&source).await })
            .buffered(MAX_PARALLEL_DOWNLOADS)
            .collect()
            .await;

        let mut merged = Element::new("catalog");
        for document in documents.into_iter().flatten() {
            for interface in document.children_named("interface") {
                let uri = interface.attr("uri");
                let duplicate = merged
                    .children
                    .iter()
                    .any(|existing| existing.attr("uri") == uri);
                if !duplicate {
                    merged.children.push(interface.clone());
                }
            }
        }

        let xml = merged.to_document(Some(CATALOG_NAMESPACE));
        let source = FeedUri::from_path(&self.cache_file)?;
        let catalog = Catalog::parse(&xml, &source)?;
        atomic_write(&self.cache_file, xml.as_bytes())?;
        info!(feeds = catalog.feeds.len(), "Catalog updated");
        Ok(catalog)
    }

    /// The cached catalog, downloading it first if there is none.
    ///
    /// # Errors
    ///
    /// See [`Self::get_cached`] and [`Self::get_online`].
    pub async fn get(&self) -> Result<Catalog, CatalogError> {
        match self.get_cached()? {
            Some(catalog) => Ok(catalog),
            None => self.get_online().await,
        }
    }

    async fn download(&self, source: &FeedUri) -> Option<Element> {
        let text = if let Some(path) = source.local_path() {
            tokio::fs::read_to_string(&path).await.map_err(|e| e.to_string())
        } else {
            match fetch_text(&self.client, source.as_str()).await {
                Ok(Some(text)) => Ok(text),
                Ok(None) => Err("not found".to_string()),
                Err(e) => Err(e.to_string()),
            }
        };
        let parsed = text.and_then(|text| {
            Catalog::parse(&text, source).map_err(|e| e.to_string())?;
            Element::parse(&text).map_err(|e| e.to_string())
        });
        match parsed {
            Ok(document) => {
                debug!(%source, "Downloaded catalog");
                Some(document)
            }
            Err(reason) => {
                warn!(%source, %reason, "Skipping catalog source");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: &str = r#"<catalog xmlns="http://0install.de/schema/injector/catalog">
  <interface uri="http://example.com/firefox.xml"><name>Firefox</name><summary>browser</summary></interface>
  <interface uri="http://example.com/vlc.xml"><name>VLC</name></interface>
</catalog>"#;

    const SECOND: &str = r#"<catalog xmlns="http://0install.de/schema/injector/catalog">
  <interface uri="http://example.com/vlc.xml"><name>VLC duplicate</name></interface>
  <interface uri="http://example.com/gimp.xml"><name>GIMP</name></interface>
</catalog>"#;

    fn manager(home: &std::path::Path) -> CatalogManager {
        CatalogManager::new(&Locations::new(home), Client::new())
    }

    #[test]
    fn default_and_edited_sources() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        assert_eq!(manager.sources().unwrap(), [FeedUri::parse(DEFAULT_SOURCE).unwrap()]);

        let extra = FeedUri::parse("http://example.com/catalog.xml").unwrap();
        manager.add_source(&extra).unwrap();
        assert!(matches!(
            manager.add_source(&extra),
            Err(CatalogError::AlreadyRegistered(_))
        ));
        assert_eq!(manager.sources().unwrap().len(), 2);

        manager.remove_source(&extra).unwrap();
        assert!(matches!(
            manager.remove_source(&extra),
            Err(CatalogError::NotRegistered(_))
        ));

        fs::write(
            dir.path().join("catalog-sources"),
            "# comment\n\nhttp://example.com/a/\n",
        )
        .unwrap();
        assert_eq!(manager.sources().unwrap().len(), 1);
        manager.reset_sources().unwrap();
        assert_eq!(manager.sources().unwrap(), [FeedUri::parse(DEFAULT_SOURCE).unwrap()]);
    }

    #[tokio::test]
    async fn merges_sources_and_skips_failures() {
        let mut server = mockito::Server::new_async().await;
        let _a = server
            .mock("GET", "/first/")
            .with_body(FIRST)
            .create_async()
            .await;
        let _b = server
            .mock("GET", "/second/")
            .with_body(SECOND)
            .create_async()
            .await;
        let _c = server
            .mock("GET", "/broken/")
            .with_status(500)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        fs::write(
            dir.path().join("catalog-sources"),
            format!(
                "{url}/first/\n{url}/broken/\n{url}/second/\n",
                url = server.url()
            ),
        )
        .unwrap();

        assert!(manager.get_cached().unwrap().is_none());
        let catalog = manager.get_online().await.unwrap();
        let names: Vec<_> = catalog.feeds.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Firefox", "VLC", "GIMP"]);

        let cached = manager.get_cached().unwrap().unwrap();
        assert_eq!(cached.feeds.len(), 3);
        assert_eq!(cached.find_by_short_name("gimp").unwrap().name, "GIMP");
    }
}
