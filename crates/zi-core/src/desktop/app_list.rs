//! The persisted list of applications known to the user.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use tracing::warn;
use zi_schema::capability::CAPABILITIES_NAMESPACE;
use zi_schema::xml::Element;
use zi_schema::{CapabilityList, FeedUri, ParseError, Requirements};

use super::access_point::AccessPoint;
use super::merge::Mergeable;
use crate::paths::atomic_write;

/// XML namespace of application list documents.
pub const APP_LIST_NAMESPACE: &str = "http://0install.de/schema/desktop-integration/app-list";

/// One application in the list.
///
/// `access_points == None` means the application was added but never
/// integrated; `Some(vec![])` means it is integrated without any access points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    /// Interface of the application.
    pub interface: FeedUri,
    /// Display name, usually the feed name.
    pub name: String,
    /// Keep the application updated in the background.
    pub auto_update: bool,
    /// Regular expression the hostname must match for access points to be applied.
    pub hostname: Option<String>,
    /// Custom requirements used instead of the defaults.
    pub requirements: Option<Requirements>,
    /// Capabilities copied from the feed.
    pub capability_lists: Vec<CapabilityList>,
    /// Applied access points.
    pub access_points: Option<Vec<AccessPoint>>,
    /// Last modification, seconds since the epoch.
    pub timestamp: i64,
}

impl AppEntry {
    /// A new, unintegrated entry stamped with the current time.
    pub fn new(interface: FeedUri, name: impl Into<String>) -> Self {
        Self {
            interface,
            name: name.into(),
            auto_update: true,
            hostname: None,
            requirements: None,
            capability_lists: Vec::new(),
            access_points: None,
            timestamp: now(),
        }
    }

    /// Update the timestamp to now.
    pub fn touch(&mut self) {
        self.timestamp = now();
    }

    /// Requirements to solve for this application.
    pub fn effective_requirements(&self) -> Requirements {
        self.requirements
            .clone()
            .unwrap_or_else(|| Requirements::new(self.interface.clone()))
    }

    /// Applied access points, empty if not integrated.
    pub fn access_points(&self) -> &[AccessPoint] {
        self.access_points.as_deref().unwrap_or_default()
    }

    /// Whether this entry's access points belong on the machine named `hostname`.
    pub fn applies_to_host(&self, hostname: &str) -> bool {
        let Some(pattern) = &self.hostname else {
            return true;
        };
        match Regex::new(pattern) {
            Ok(regex) => regex.is_match(hostname),
            Err(e) => {
                warn!(interface = %self.interface, %pattern, error = %e, "Invalid hostname filter");
                false
            }
        }
    }

    fn to_element(&self) -> Result<Element, serde_json::Error> {
        let mut el = Element::new("app")
            .with_attr("interface", self.interface.to_string())
            .with_attr("name", self.name.clone())
            .with_opt_attr("auto-update", (!self.auto_update).then_some("false"))
            .with_opt_attr("hostname", self.hostname.as_ref())
            .with_attr("timestamp", self.timestamp.to_string());
        for list in &self.capability_lists {
            let mut list = list.to_element();
            list.set_attr("xmlns", CAPABILITIES_NAMESPACE);
            el.children.push(list);
        }
        if let Some(requirements) = &self.requirements {
            el.children
                .push(Element::new("requirements-json").with_text(serde_json::to_string(requirements)?));
        }
        if let Some(points) = &self.access_points {
            let mut list = Element::new("access-points");
            list.children = points.iter().map(AccessPoint::to_element).collect();
            el.children.push(list);
        }
        Ok(el)
    }

    fn from_element(el: &Element) -> Result<Self, ParseError> {
        let requirements = el
            .child("requirements-json")
            .map(|r| serde_json::from_str(&r.text).map_err(|e| ParseError::invalid("requirements-json", e.to_string())))
            .transpose()?;
        let access_points = el
            .child("access-points")
            .map(|list| {
                list.children
                    .iter()
                    .map(AccessPoint::from_element)
                    .filter_map(Result::transpose)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        Ok(Self {
            interface: FeedUri::parse(el.required_attr("interface")?)?,
            name: el.attr("name").unwrap_or_default().to_string(),
            auto_update: el.attr("auto-update") != Some("false"),
            hostname: el.attr("hostname").map(str::to_string),
            requirements,
            capability_lists: el
                .children_named("capabilities")
                .map(CapabilityList::from_element)
                .collect::<Result<_, _>>()?,
            access_points,
            timestamp: el
                .attr("timestamp")
                .map(|t| t.parse().map_err(|_| ParseError::invalid("timestamp", t)))
                .transpose()?
                .unwrap_or(0),
        })
    }
}

impl Mergeable for AppEntry {
    fn merge_id(&self) -> &str {
        self.interface.as_str()
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// The entry and access point owning a conflict ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictData {
    /// Interface of the owning entry.
    pub interface: FeedUri,
    /// Owning access point.
    pub access_point: AccessPoint,
}

/// All applications known to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppList {
    /// Entries in insertion order; at most one per interface.
    pub entries: Vec<AppEntry>,
}

impl AppList {
    /// Load from `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read and a parse error if it
    /// is malformed.
    pub fn load(path: &Path) -> Result<Self, super::IntegrationError> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text)?)
    }

    /// Load from `path`, falling back to an empty list if the file is missing or damaged.
    pub fn load_safe(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(list) => list,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load application list, using an empty one");
                Self::default()
            }
        }
    }

    /// Save atomically to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<(), super::IntegrationError> {
        atomic_write(path, self.to_xml()?.as_bytes())?;
        Ok(())
    }

    /// Parse an `<app-list>` document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or lists an interface twice.
    pub fn parse(xml: &str) -> Result<Self, ParseError> {
        let root = Element::parse(xml)?;
        if root.name != "app-list" {
            return Err(ParseError::invalid("root element", root.name));
        }
        let mut list = Self::default();
        for el in root.children_named("app") {
            let entry = AppEntry::from_element(el)?;
            if list.contains(&entry.interface) {
                return Err(ParseError::invalid("duplicate app", entry.interface.to_string()));
            }
            list.entries.push(entry);
        }
        Ok(list)
    }

    /// Serialize to an `<app-list>` document.
    ///
    /// # Errors
    ///
    /// Returns an error if custom requirements cannot be serialized.
    pub fn to_xml(&self) -> Result<String, serde_json::Error> {
        let mut root = Element::new("app-list");
        root.children = self
            .entries
            .iter()
            .map(AppEntry::to_element)
            .collect::<Result<_, _>>()?;
        Ok(root.to_document(Some(APP_LIST_NAMESPACE)))
    }

    /// Entry for `interface`.
    pub fn get(&self, interface: &FeedUri) -> Option<&AppEntry> {
        self.entries.iter().find(|e| e.interface == *interface)
    }

    /// Mutable entry for `interface`.
    pub fn get_mut(&mut self, interface: &FeedUri) -> Option<&mut AppEntry> {
        self.entries.iter_mut().find(|e| e.interface == *interface)
    }

    /// Whether `interface` is in the list.
    pub fn contains(&self, interface: &FeedUri) -> bool {
        self.get(interface).is_some()
    }

    /// Entries whose name or interface contains every word of `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<&AppEntry> {
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        self.entries
            .iter()
            .filter(|entry| {
                let haystack = format!("{} {}", entry.name, entry.interface).to_lowercase();
                words.iter().all(|w| haystack.contains(w.as_str()))
            })
            .collect()
    }

    /// Entry owning the alias `name`, with the command the alias runs.
    pub fn find_alias(&self, name: &str) -> Option<(&AppEntry, Option<&str>)> {
        self.entries.iter().find_map(|entry| {
            entry.access_points().iter().find_map(|ap| match ap {
                AccessPoint::AppAlias { name: n, command } if n == name => {
                    Some((entry, command.as_deref()))
                }
                _ => None,
            })
        })
    }

    /// Every claimed OS resource mapped to its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if an access point refers to a capability its entry
    /// does not declare.
    pub fn conflict_map(&self) -> Result<HashMap<String, ConflictData>, ParseError> {
        let mut map = HashMap::new();
        for entry in &self.entries {
            for point in entry.access_points() {
                for id in point.conflict_ids(entry)? {
                    map.insert(
                        id,
                        ConflictData {
                            interface: entry.interface.clone(),
                            access_point: point.clone(),
                        },
                    );
                }
            }
        }
        Ok(map)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Name of this machine, for hostname filters.
pub fn current_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .find_map(|p| fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
