use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "ZI_HOME";

/// Returns the primary data directory, or None if the user's home cannot be resolved.
pub fn try_zi_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var(HOME_ENV) {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".zi"))
}

/// Well-known locations below a zi home directory.
///
/// Components receive these paths at construction instead of looking them up
/// globally, so tests can point everything at a temporary directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locations {
    home: PathBuf,
}

impl Locations {
    /// Locations below `home`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Locations below `$ZI_HOME` or `~/.zi`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if neither `ZI_HOME` is set nor a home directory exists.
    pub fn from_env() -> std::io::Result<Self> {
        try_zi_home().map(Self::new).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine home directory. Set ZI_HOME to override.",
            )
        })
    }

    /// Home directory: ~/.zi
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Implementation store: ~/.zi/store
    pub fn store(&self) -> PathBuf {
        self.home.join("store")
    }

    /// Cache root: ~/.zi/cache
    pub fn cache(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Cached feeds: ~/.zi/cache/interfaces
    pub fn feed_cache(&self) -> PathBuf {
        self.cache().join("interfaces")
    }

    /// Merged catalog cache: ~/.zi/cache/catalog.xml
    pub fn catalog_cache(&self) -> PathBuf {
        self.cache().join("catalog.xml")
    }

    /// Configuration file: ~/.zi/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    /// Catalog source list: ~/.zi/catalog-sources
    pub fn catalog_sources(&self) -> PathBuf {
        self.home.join("catalog-sources")
    }

    /// Application list: ~/.zi/app-list.xml
    pub fn app_list(&self) -> PathBuf {
        self.home.join("app-list.xml")
    }

    /// Alias stubs: ~/.zi/bin
    pub fn bin(&self) -> PathBuf {
        self.home.join("bin")
    }

    /// Menu entries: ~/.zi/applications
    pub fn applications(&self) -> PathBuf {
        self.home.join("applications")
    }

    /// Default handlers for MIME types and URL schemes.
    pub fn mime_apps(&self) -> PathBuf {
        self.applications().join("mimeapps.list")
    }

    /// Desktop icons: ~/.zi/desktop
    pub fn desktop(&self) -> PathBuf {
        self.home.join("desktop")
    }

    /// Autostart entries: ~/.zi/autostart
    pub fn autostart(&self) -> PathBuf {
        self.home.join("autostart")
    }
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.split('/').next_back().unwrap_or("")
}

/// Write `contents` to `path` via a temporary sibling and an atomic rename.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created or the write or
/// rename fails; the previous file is left untouched in that case.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
