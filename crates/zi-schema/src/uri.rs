//! Feed and interface identifiers.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Prefix marking an indirection resolved through the application list.
pub const ALIAS_PREFIX: &str = "alias:";

/// Canonical identifier for an interface or feed.
///
/// Either an `http(s)` URL, an absolute local path, or an `alias:` name.
/// Construction canonicalizes the input, and canonicalizing the canonical
/// form again yields the same value.
///
/// # Example
///
/// ```
/// use zi_schema::FeedUri;
///
/// let uri = FeedUri::parse("HTTP://Example.COM/app.xml").unwrap();
/// assert_eq!(uri.as_str(), "http://example.com/app.xml");
/// assert!(uri.is_remote());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedUri(String);

impl FeedUri {
    /// Parse and canonicalize a feed URI.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Uri`] if the value is neither a URL, an absolute
    /// path, nor an alias.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let value = value.trim();
        if let Some(name) = value.strip_prefix(ALIAS_PREFIX) {
            if name.is_empty() {
                return Err(ParseError::Uri(value.to_string()));
            }
            return Ok(Self(value.to_string()));
        }

        let lower = value.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = url::Url::parse(value).map_err(|_| ParseError::Uri(value.to_string()))?;
            if url.host_str().is_none() {
                return Err(ParseError::Uri(value.to_string()));
            }
            return Ok(Self(url.to_string()));
        }
        if lower.starts_with("file:") {
            let url = url::Url::parse(value).map_err(|_| ParseError::Uri(value.to_string()))?;
            let path = url
                .to_file_path()
                .map_err(|()| ParseError::Uri(value.to_string()))?;
            return Ok(Self(normalize_path(&path)));
        }

        let path = Path::new(value);
        if path.is_absolute() {
            return Ok(Self(normalize_path(path)));
        }

        Err(ParseError::Uri(value.to_string()))
    }

    /// Build a URI from a local path, resolving relative paths against the
    /// current directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the current directory cannot be determined.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(Self(normalize_path(&absolute)))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is an `http(s)` URL.
    pub fn is_remote(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    /// Whether this is a local file path.
    pub fn is_local(&self) -> bool {
        !self.is_remote() && !self.is_alias()
    }

    /// Whether this is an `alias:` indirection.
    pub fn is_alias(&self) -> bool {
        self.0.starts_with(ALIAS_PREFIX)
    }

    /// The alias name if this is an `alias:` URI.
    pub fn alias_name(&self) -> Option<&str> {
        self.0.strip_prefix(ALIAS_PREFIX)
    }

    /// The local file path if this is a local URI.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.is_local().then(|| PathBuf::from(&self.0))
    }

    /// Escape the URI into a single filesystem-safe name.
    ///
    /// Every byte outside `[A-Za-z0-9-_.]` becomes `%xx`.
    pub fn escape(&self) -> String {
        escape_component(&self.0, b"-_.")
    }

    /// Scheme, host (with port, if any) and path of a remote URI.
    pub fn remote_parts(&self) -> Option<(String, String, String)> {
        if !self.is_remote() {
            return None;
        }
        let url = url::Url::parse(&self.0).ok()?;
        let host = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str()?),
            None => url.host_str()?.to_string(),
        };
        Some((url.scheme().to_string(), host, url.path().to_string()))
    }
}

/// Percent-escape every byte of `value` that is not alphanumeric or listed in `keep`.
pub fn escape_component(value: &str, keep: &[u8]) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || keep.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02x}"));
        }
    }
    out
}

fn normalize_path(path: &Path) -> String {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                }
            }
            other => parts.push(other),
        }
    }
    let normalized: PathBuf = parts.iter().collect();
    normalized.to_string_lossy().into_owned()
}

impl fmt::Display for FeedUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FeedUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for FeedUri {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FeedUri {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FeedUri> for String {
    fn from(uri: FeedUri) -> Self {
        uri.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_is_idempotent() {
        for raw in [
            "HTTP://Example.COM/app.xml",
            "https://example.com",
            "/tmp/./feeds/../app.xml",
            "file:///tmp/app.xml",
            "alias:firefox",
        ] {
            let once = FeedUri::parse(raw).unwrap();
            let twice = FeedUri::parse(once.as_str()).unwrap();
            assert_eq!(once, twice, "{raw}");
        }
    }

    #[test]
    fn local_paths_are_normalized() {
        let uri = FeedUri::parse("/tmp/./feeds/../app.xml").unwrap();
        assert_eq!(uri.as_str(), "/tmp/app.xml");
        assert!(uri.is_local());
        assert_eq!(uri.local_path(), Some(PathBuf::from("/tmp/app.xml")));

        let from_url = FeedUri::parse("file:///tmp/app.xml").unwrap();
        assert_eq!(from_url, uri);
    }

    #[test]
    fn aliases_and_garbage() {
        let alias = FeedUri::parse("alias:vim").unwrap();
        assert!(alias.is_alias());
        assert_eq!(alias.alias_name(), Some("vim"));

        assert!(FeedUri::parse("relative/path.xml").is_err());
        assert!(FeedUri::parse("alias:").is_err());
        assert!(FeedUri::parse("ftp://example.com/x").is_err());
    }

    #[test]
    fn escape_produces_flat_name() {
        let uri = FeedUri::parse("http://example.com/my app.xml").unwrap();
        assert_eq!(uri.escape(), "http%3a%2f%2fexample.com%2fmy%2520app.xml");
    }
}
