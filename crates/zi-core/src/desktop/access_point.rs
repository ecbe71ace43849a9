//! Access points: the OS integration artifacts an application list entry owns.

use std::fmt;

use zi_schema::capability::find_capability;
use zi_schema::xml::Element;
use zi_schema::{Capability, ParseError};

use super::app_list::AppEntry;

/// One OS integration artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccessPoint {
    /// Command-line alias in the alias directory.
    AppAlias {
        /// Name typed on the command line.
        name: String,
        /// Command to run; the default command if `None`.
        command: Option<String>,
    },
    /// Entry in the application menu.
    MenuEntry {
        /// Label of the entry.
        name: String,
        /// Menu folder, if any.
        category: Option<String>,
        /// Command to run; the default command if `None`.
        command: Option<String>,
    },
    /// Icon on the desktop.
    DesktopIcon {
        /// Label of the icon.
        name: String,
        /// Command to run; the default command if `None`.
        command: Option<String>,
    },
    /// Started automatically on login.
    AutoStart {
        /// Name of the autostart entry.
        name: String,
        /// Command to run; the default command if `None`.
        command: Option<String>,
    },
    /// Default handler for a file type capability.
    FileType {
        /// Capability ID.
        capability: String,
    },
    /// Default handler for a URL protocol capability.
    UrlProtocol {
        /// Capability ID.
        capability: String,
    },
    /// System default program for a service.
    DefaultProgram {
        /// Capability ID.
        capability: String,
    },
    /// Handler for removable media events.
    AutoPlay {
        /// Capability ID.
        capability: String,
    },
    /// Registers every capability of the entry without making it the default.
    CapabilityRegistration,
}

/// Prefix for the conflict IDs of [`AccessPoint::CapabilityRegistration`].
const REGISTRATION_PREFIX: &str = "capability:";

impl AccessPoint {
    /// Capability ID referenced by a default access point.
    pub fn capability(&self) -> Option<&str> {
        match self {
            Self::FileType { capability }
            | Self::UrlProtocol { capability }
            | Self::DefaultProgram { capability }
            | Self::AutoPlay { capability } => Some(capability),
            _ => None,
        }
    }

    /// Whether this makes a capability the system default.
    pub fn is_default(&self) -> bool {
        self.capability().is_some()
    }

    /// Command run by icon-like access points.
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::AppAlias { command, .. }
            | Self::MenuEntry { command, .. }
            | Self::DesktopIcon { command, .. }
            | Self::AutoStart { command, .. } => command.as_deref(),
            _ => None,
        }
    }

    /// Default access point for a capability.
    pub fn default_for(capability: &Capability) -> Self {
        let id = capability.id().to_string();
        match capability {
            Capability::FileType(_) => Self::FileType { capability: id },
            Capability::UrlProtocol(_) => Self::UrlProtocol { capability: id },
            Capability::DefaultProgram(_) => Self::DefaultProgram { capability: id },
            Capability::AutoPlay(_) => Self::AutoPlay { capability: id },
        }
    }

    /// The capability a default access point refers to, resolved in `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Missing`] if the entry has no compatible
    /// capability of the right kind with that ID.
    pub fn resolve_capability<'a>(&self, entry: &'a AppEntry) -> Result<Option<&'a Capability>, ParseError> {
        let Some(id) = self.capability() else {
            return Ok(None);
        };
        let found = find_capability(&entry.capability_lists, id).filter(|c| {
            matches!(
                (self, c),
                (Self::FileType { .. }, Capability::FileType(_))
                    | (Self::UrlProtocol { .. }, Capability::UrlProtocol(_))
                    | (Self::DefaultProgram { .. }, Capability::DefaultProgram(_))
                    | (Self::AutoPlay { .. }, Capability::AutoPlay(_))
            )
        });
        found
            .map(Some)
            .ok_or_else(|| ParseError::missing(&format!("capability '{id}'"), self.element_name()))
    }

    /// OS resources claimed by this access point when applied for `entry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a default access point refers to a capability the
    /// entry does not declare.
    pub fn conflict_ids(&self, entry: &AppEntry) -> Result<Vec<String>, ParseError> {
        Ok(match self {
            Self::AppAlias { name, .. } => vec![format!("alias:{name}")],
            Self::MenuEntry { name, category, .. } => match category {
                Some(category) => vec![format!("menu:{category}/{name}")],
                None => vec![format!("menu:{name}")],
            },
            Self::DesktopIcon { name, .. } => vec![format!("desktop:{name}")],
            Self::AutoStart { name, .. } => vec![format!("autostart:{name}")],
            Self::CapabilityRegistration => entry
                .capability_lists
                .iter()
                .filter(|l| l.is_compatible())
                .flat_map(|l| &l.entries)
                .flat_map(Capability::identity_ids)
                .map(|id| format!("{REGISTRATION_PREFIX}{id}"))
                .collect(),
            _ => self
                .resolve_capability(entry)?
                .map(Capability::default_ids)
                .unwrap_or_default(),
        })
    }

    fn element_name(&self) -> &'static str {
        match self {
            Self::AppAlias { .. } => "alias",
            Self::MenuEntry { .. } => "menu-entry",
            Self::DesktopIcon { .. } => "desktop-icon",
            Self::AutoStart { .. } => "auto-start",
            Self::FileType { .. } => "file-type",
            Self::UrlProtocol { .. } => "url-protocol",
            Self::DefaultProgram { .. } => "default-program",
            Self::AutoPlay { .. } => "auto-play",
            Self::CapabilityRegistration => "capability-registration",
        }
    }

    /// Serialize to a child of `<access-points>`.
    pub fn to_element(&self) -> Element {
        let el = Element::new(self.element_name());
        match self {
            Self::AppAlias { name, command }
            | Self::DesktopIcon { name, command }
            | Self::AutoStart { name, command } => el
                .with_attr("name", name.clone())
                .with_opt_attr("command", command.as_ref()),
            Self::MenuEntry {
                name,
                category,
                command,
            } => el
                .with_attr("name", name.clone())
                .with_opt_attr("category", category.as_ref())
                .with_opt_attr("command", command.as_ref()),
            Self::FileType { capability }
            | Self::UrlProtocol { capability }
            | Self::DefaultProgram { capability }
            | Self::AutoPlay { capability } => el.with_attr("capability", capability.clone()),
            Self::CapabilityRegistration => el,
        }
    }

    /// Parse a child of `<access-points>`. Unknown elements yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required attribute is missing.
    pub fn from_element(el: &Element) -> Result<Option<Self>, ParseError> {
        let name = || el.required_attr("name").map(str::to_string);
        let command = el.attr("command").map(str::to_string);
        let capability = || el.required_attr("capability").map(str::to_string);
        Ok(Some(match el.name.as_str() {
            "alias" => Self::AppAlias {
                name: name()?,
                command,
            },
            "menu-entry" => Self::MenuEntry {
                name: name()?,
                category: el.attr("category").map(str::to_string),
                command,
            },
            "desktop-icon" => Self::DesktopIcon {
                name: name()?,
                command,
            },
            "auto-start" => Self::AutoStart {
                name: name()?,
                command,
            },
            "file-type" => Self::FileType {
                capability: capability()?,
            },
            "url-protocol" => Self::UrlProtocol {
                capability: capability()?,
            },
            "default-program" => Self::DefaultProgram {
                capability: capability()?,
            },
            "auto-play" => Self::AutoPlay {
                capability: capability()?,
            },
            "capability-registration" => Self::CapabilityRegistration,
            _ => return Ok(None),
        }))
    }
}

impl fmt::Display for AccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppAlias { name, .. } => write!(f, "alias '{name}'"),
            Self::MenuEntry {
                name,
                category: Some(category),
                ..
            } => write!(f, "menu entry '{category}/{name}'"),
            Self::MenuEntry { name, .. } => write!(f, "menu entry '{name}'"),
            Self::DesktopIcon { name, .. } => write!(f, "desktop icon '{name}'"),
            Self::AutoStart { name, .. } => write!(f, "autostart entry '{name}'"),
            Self::FileType { capability } => write!(f, "default file type '{capability}'"),
            Self::UrlProtocol { capability } => write!(f, "default URL protocol '{capability}'"),
            Self::DefaultProgram { capability } => write!(f, "default program '{capability}'"),
            Self::AutoPlay { capability } => write!(f, "auto-play handler '{capability}'"),
            Self::CapabilityRegistration => f.write_str("capability registration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zi_schema::capability::{FileType, FileTypeExtension, UrlProtocol};
    use zi_schema::{CapabilityList, FeedUri};

    fn entry() -> AppEntry {
        let mut entry = AppEntry::new(FeedUri::parse("http://example.com/editor.xml").unwrap(), "Editor");
        entry.capability_lists.push(CapabilityList {
            entries: vec![
                Capability::FileType(FileType {
                    id: "Editor.Text".into(),
                    explicit_only: false,
                    description: None,
                    extensions: vec![FileTypeExtension {
                        value: ".txt".into(),
                        mime_type: Some("text/plain".into()),
                    }],
                }),
                Capability::UrlProtocol(UrlProtocol {
                    id: "Editor.Url".into(),
                    explicit_only: true,
                    description: None,
                    known_prefixes: vec!["edit".into()],
                }),
            ],
            ..CapabilityList::default()
        });
        entry
    }

    #[test]
    fn conflict_ids_by_kind() {
        let entry = entry();
        let alias = AccessPoint::AppAlias {
            name: "edit".into(),
            command: None,
        };
        assert_eq!(alias.conflict_ids(&entry).unwrap(), ["alias:edit"]);

        let menu = AccessPoint::MenuEntry {
            name: "Editor".into(),
            category: Some("Office".into()),
            command: None,
        };
        assert_eq!(menu.conflict_ids(&entry).unwrap(), ["menu:Office/Editor"]);

        let default = AccessPoint::FileType {
            capability: "Editor.Text".into(),
        };
        assert_eq!(default.conflict_ids(&entry).unwrap(), ["extension:.txt"]);

        let registration = AccessPoint::CapabilityRegistration.conflict_ids(&entry).unwrap();
        assert_eq!(registration, ["capability:progid:Editor.Text", "capability:progid:Editor.Url"]);
    }

    #[test]
    fn default_with_unknown_or_mismatched_capability_fails() {
        let entry = entry();
        let unknown = AccessPoint::FileType {
            capability: "Missing".into(),
        };
        assert!(unknown.conflict_ids(&entry).is_err());

        let wrong_kind = AccessPoint::UrlProtocol {
            capability: "Editor.Text".into(),
        };
        assert!(wrong_kind.resolve_capability(&entry).is_err());
    }

    #[test]
    fn element_round_trip() {
        let points = [
            AccessPoint::AppAlias {
                name: "edit".into(),
                command: Some("edit".into()),
            },
            AccessPoint::MenuEntry {
                name: "Editor".into(),
                category: None,
                command: None,
            },
            AccessPoint::AutoPlay {
                capability: "Play".into(),
            },
            AccessPoint::CapabilityRegistration,
        ];
        for point in points {
            let parsed = AccessPoint::from_element(&point.to_element()).unwrap();
            assert_eq!(parsed, Some(point));
        }
        assert_eq!(AccessPoint::from_element(&Element::new("quick-launch")).unwrap(), None);
    }
}
