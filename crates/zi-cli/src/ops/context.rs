//! Shared command context.
//!
//! Groups the settings, locations and engines every command needs so they are
//! built in one place from the global flags.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zi_core::catalog::CatalogManager;
use zi_core::config::NetworkLevel;
use zi_core::desktop::{AppList, IntegrationManager, UnixDesktop};
use zi_core::feeds::FeedCache;
use zi_core::io::download::http_client;
use zi_core::store::DirectoryStore;
use zi_core::{Config, Locations, Reporter};
use zi_schema::FeedUri;

use super::error::CliError;
use crate::Cli;
use crate::ui::TerminalReporter;

/// State shared by all commands of one invocation.
#[derive(Clone)]
pub struct Context {
    pub locations: Locations,
    pub config: Config,
    pub client: reqwest::Client,
    pub reporter: Arc<dyn Reporter>,
    pub cancel: CancellationToken,
    pub refresh: bool,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("home", &self.locations.home())
            .field("network_use", &self.config.network_use)
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

/// An application name resolved to its feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApp {
    pub interface: FeedUri,
    /// Command bound to the alias the name was resolved through.
    pub command: Option<String>,
}

impl Context {
    /// Build the context for the global flags of `cli`.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let locations = Locations::from_env()?;
        let mut config = Config::load(&locations.config_file()).context("Failed to load configuration")?;
        config.apply_env()?;
        if cli.offline {
            config.network_use = NetworkLevel::Offline;
        }
        Self::new(locations, config, cli.refresh)
    }

    pub fn new(locations: Locations, config: Config, refresh: bool) -> Result<Self> {
        Ok(Self {
            locations,
            config,
            client: http_client()?,
            reporter: Arc::new(TerminalReporter::new()),
            cancel: CancellationToken::new(),
            refresh,
        })
    }

    pub fn offline(&self) -> bool {
        self.config.network_use == NetworkLevel::Offline
    }

    pub fn store(&self) -> Result<Arc<DirectoryStore>> {
        let store = DirectoryStore::new(self.locations.store()).context("Failed to open the implementation store")?;
        Ok(Arc::new(store))
    }

    pub fn feeds(&self) -> Arc<FeedCache> {
        Arc::new(
            FeedCache::new(self.locations.feed_cache(), &self.config, self.client.clone())
                .with_refresh(self.refresh),
        )
    }

    pub fn catalog(&self) -> CatalogManager {
        CatalogManager::new(&self.locations, self.client.clone())
    }

    pub fn integration(&self) -> Result<IntegrationManager> {
        let desktop = Arc::new(UnixDesktop::new(self.locations.clone()));
        IntegrationManager::new(self.locations.app_list(), desktop).context("Failed to open the application list")
    }

    /// Resolve a feed URI, local file, alias or catalog short name.
    pub async fn resolve(&self, name: &str) -> Result<ResolvedApp> {
        let apps = AppList::load_safe(&self.locations.app_list());

        if let Some(alias) = name.strip_prefix("alias:") {
            return find_alias(&apps, alias)
                .ok_or_else(|| CliError::invalid(format!("No application with the alias '{alias}'")).into());
        }
        if let Ok(interface) = FeedUri::parse(name) {
            return Ok(ResolvedApp {
                interface,
                command: None,
            });
        }
        if Path::new(name).exists() {
            return Ok(ResolvedApp {
                interface: FeedUri::from_path(Path::new(name))?,
                command: None,
            });
        }
        if let Some(app) = find_alias(&apps, name) {
            debug!(name, interface = %app.interface, "Resolved through app list alias");
            return Ok(app);
        }

        let catalog = self.catalog();
        let cached = catalog.get_cached()?;
        let catalog = match cached {
            Some(catalog) => catalog,
            None if !self.offline() => catalog.get_online().await?,
            None => return Err(CliError::invalid(format!("'{name}' is not a feed URI and no catalog is cached")).into()),
        };
        match catalog.find_by_short_name(name) {
            Some(feed) => {
                debug!(name, interface = %feed.uri, "Resolved through catalog");
                Ok(ResolvedApp {
                    interface: feed.uri.clone(),
                    command: None,
                })
            }
            None => Err(CliError::invalid(format!("'{name}' is neither a feed URI nor a known application")).into()),
        }
    }
}

fn find_alias(apps: &AppList, name: &str) -> Option<ResolvedApp> {
    apps.find_alias(name).map(|(entry, command)| ResolvedApp {
        interface: entry.interface.clone(),
        command: command.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zi_core::desktop::{AccessPoint, AppEntry};

    fn context(home: &Path) -> Context {
        let mut config = Config::default();
        config.network_use = NetworkLevel::Offline;
        Context::new(Locations::new(home), config, false).unwrap()
    }

    #[tokio::test]
    async fn resolves_uris_and_aliases() {
        let home = tempfile::tempdir().unwrap();
        let ctx = context(home.path());

        let uri = FeedUri::parse("http://example.com/editor.xml").unwrap();
        let mut entry = AppEntry::new(uri.clone(), "Editor");
        entry.access_points = Some(vec![AccessPoint::AppAlias {
            name: "ed".into(),
            command: Some("edit".into()),
        }]);
        AppList { entries: vec![entry] }
            .save(&ctx.locations.app_list())
            .unwrap();

        let direct = ctx.resolve("http://example.com/editor.xml").await.unwrap();
        assert_eq!(direct.interface, uri);
        assert_eq!(direct.command, None);

        for name in ["ed", "alias:ed"] {
            let app = ctx.resolve(name).await.unwrap();
            assert_eq!(app.interface, uri);
            assert_eq!(app.command.as_deref(), Some("edit"));
        }

        let err = ctx.resolve("unknown").await.unwrap_err();
        assert!(err.downcast_ref::<CliError>().is_some());
    }
}
