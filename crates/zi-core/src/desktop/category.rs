//! Integration by category instead of by individual access point.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use zi_schema::requirements::DEFAULT_COMMAND;
use zi_schema::{Feed, FeedUri};

use super::access_point::AccessPoint;
use super::app_list::AppEntry;
use super::integration::IntegrationManager;
use super::IntegrationError;

/// A group of access points the user can add or remove at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Capability registration.
    Capabilities,
    /// Default handlers for the registered capabilities.
    Defaults,
    /// Application menu entries.
    Menu,
    /// Desktop icons and autostart entries.
    Desktop,
    /// Command-line aliases.
    Aliases,
}

impl Category {
    /// Every category.
    pub const ALL: [Self; 5] = [
        Self::Capabilities,
        Self::Defaults,
        Self::Menu,
        Self::Desktop,
        Self::Aliases,
    ];

    /// Name used on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Capabilities => "capabilities",
            Self::Defaults => "defaults",
            Self::Menu => "menu",
            Self::Desktop => "desktop",
            Self::Aliases => "aliases",
        }
    }

    /// Categories used when none are requested: capabilities and icons.
    pub fn default_set() -> BTreeSet<Self> {
        BTreeSet::from([Self::Capabilities, Self::Menu, Self::Desktop])
    }

    /// Expand category names, including the `icons` and `all` groups.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::UnknownCategory`] for an unrecognized name.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<BTreeSet<Self>, IntegrationError> {
        let mut set = BTreeSet::new();
        for name in names {
            match name.as_ref() {
                "all" => set.extend(Self::ALL),
                "icons" => set.extend([Self::Menu, Self::Desktop]),
                other => {
                    set.insert(other.parse()?);
                }
            }
        }
        Ok(set)
    }

    /// Category an access point belongs to.
    pub fn of(access_point: &AccessPoint) -> Self {
        match access_point {
            AccessPoint::CapabilityRegistration => Self::Capabilities,
            AccessPoint::FileType { .. }
            | AccessPoint::UrlProtocol { .. }
            | AccessPoint::DefaultProgram { .. }
            | AccessPoint::AutoPlay { .. } => Self::Defaults,
            AccessPoint::MenuEntry { .. } => Self::Menu,
            AccessPoint::DesktopIcon { .. } | AccessPoint::AutoStart { .. } => Self::Desktop,
            AccessPoint::AppAlias { .. } => Self::Aliases,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = IntegrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| IntegrationError::UnknownCategory(s.to_string()))
    }
}

/// Access points suggested for `entry` in `categories`.
pub fn suggest(entry: &AppEntry, feed: &Feed, categories: &BTreeSet<Category>) -> Vec<AccessPoint> {
    let mut points = Vec::new();
    let non_default = |command: &str| (command != DEFAULT_COMMAND).then(|| command.to_string());

    if categories.contains(&Category::Capabilities) {
        points.push(AccessPoint::CapabilityRegistration);
    }
    if categories.contains(&Category::Defaults) {
        points.extend(
            entry
                .capability_lists
                .iter()
                .filter(|l| l.is_compatible())
                .flat_map(|l| &l.entries)
                .filter(|c| !c.explicit_only())
                .map(AccessPoint::default_for),
        );
    }
    if categories.contains(&Category::Menu) {
        let category = feed.categories.first().cloned();
        if feed.entry_points.is_empty() {
            points.push(AccessPoint::MenuEntry {
                name: entry.name.clone(),
                category: category.clone(),
                command: None,
            });
        }
        for entry_point in &feed.entry_points {
            let name = match &entry_point.name {
                Some(name) => name.clone(),
                None if entry_point.command == DEFAULT_COMMAND => entry.name.clone(),
                None => continue,
            };
            points.push(AccessPoint::MenuEntry {
                name,
                category: category.clone(),
                command: non_default(&entry_point.command),
            });
        }
    }
    if categories.contains(&Category::Desktop) {
        points.push(AccessPoint::DesktopIcon {
            name: entry.name.clone(),
            command: None,
        });
    }
    if categories.contains(&Category::Aliases) {
        let before = points.len();
        for entry_point in &feed.entry_points {
            if let Some(binary) = &entry_point.binary_name {
                points.push(AccessPoint::AppAlias {
                    name: binary.clone(),
                    command: non_default(&entry_point.command),
                });
            }
        }
        if points.len() == before {
            points.push(AccessPoint::AppAlias {
                name: entry.name.to_lowercase().replace(' ', "-"),
                command: None,
            });
        }
    }
    points
}

/// Adding and removing access points by [`Category`].
pub trait CategoryIntegration {
    /// Apply the suggested access points of `categories` and save.
    ///
    /// # Errors
    ///
    /// Returns the error of [`IntegrationManager::add_access_points`].
    fn add_access_point_categories(
        &mut self,
        interface: &FeedUri,
        feed: &Feed,
        categories: &BTreeSet<Category>,
    ) -> Result<(), IntegrationError>;

    /// Remove every access point in `categories` and save.
    ///
    /// # Errors
    ///
    /// Returns the error of [`IntegrationManager::remove_access_points`].
    fn remove_access_point_categories(
        &mut self,
        interface: &FeedUri,
        categories: &BTreeSet<Category>,
    ) -> Result<(), IntegrationError>;
}

impl CategoryIntegration for IntegrationManager {
    fn add_access_point_categories(
        &mut self,
        interface: &FeedUri,
        feed: &Feed,
        categories: &BTreeSet<Category>,
    ) -> Result<(), IntegrationError> {
        let entry = self
            .app_list()
            .get(interface)
            .ok_or_else(|| IntegrationError::NotInList(interface.clone()))?;
        let points = suggest(entry, feed, categories);
        self.add_access_points(interface, Some(feed), &points)?;
        self.finish()
    }

    fn remove_access_point_categories(
        &mut self,
        interface: &FeedUri,
        categories: &BTreeSet<Category>,
    ) -> Result<(), IntegrationError> {
        let entry = self
            .app_list()
            .get(interface)
            .ok_or_else(|| IntegrationError::NotInList(interface.clone()))?;
        let points: Vec<AccessPoint> = entry
            .access_points()
            .iter()
            .filter(|p| categories.contains(&Category::of(p)))
            .cloned()
            .collect();
        if points.is_empty() {
            return Ok(());
        }
        self.remove_access_points(interface, &points)?;
        self.finish()
    }
}
