//! Capabilities an application declares for desktop integration.
//!
//! Capabilities come from feeds and are copied into application list entries
//! so access points can be reapplied without the feed at hand.

use crate::xml::Element;
use crate::{Os, ParseError};

/// XML namespace of `<capabilities>` elements.
pub const CAPABILITIES_NAMESPACE: &str =
    "http://0install.de/schema/desktop-integration/capabilities";

/// A file extension handled by a [`FileType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTypeExtension {
    /// Extension including the leading dot, e.g. `.txt`.
    pub value: String,
    /// MIME type of files with this extension.
    pub mime_type: Option<String>,
}

/// Ability to open a class of files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    /// Programmatic identifier.
    pub id: String,
    /// Only apply when explicitly requested.
    pub explicit_only: bool,
    /// Human-readable description.
    pub description: Option<String>,
    /// Extensions belonging to the file type.
    pub extensions: Vec<FileTypeExtension>,
}

/// Ability to handle a URL scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlProtocol {
    /// Programmatic identifier.
    pub id: String,
    /// Only apply when explicitly requested.
    pub explicit_only: bool,
    /// Human-readable description.
    pub description: Option<String>,
    /// URL prefixes such as `http`.
    pub known_prefixes: Vec<String>,
}

/// Ability to act as the system default for a service such as mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultProgram {
    /// Programmatic identifier.
    pub id: String,
    /// Only apply when explicitly requested.
    pub explicit_only: bool,
    /// Service name, e.g. `Mail`.
    pub service: String,
}

/// Ability to handle removable media events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoPlay {
    /// Programmatic identifier.
    pub id: String,
    /// Only apply when explicitly requested.
    pub explicit_only: bool,
    /// Name shown to the user.
    pub provider: Option<String>,
    /// Media events handled.
    pub events: Vec<String>,
}

/// One declared capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// File association.
    FileType(FileType),
    /// URL scheme handler.
    UrlProtocol(UrlProtocol),
    /// Default program for a service.
    DefaultProgram(DefaultProgram),
    /// Removable media handler.
    AutoPlay(AutoPlay),
}

impl Capability {
    /// Identifier unique within the application.
    pub fn id(&self) -> &str {
        match self {
            Self::FileType(c) => &c.id,
            Self::UrlProtocol(c) => &c.id,
            Self::DefaultProgram(c) => &c.id,
            Self::AutoPlay(c) => &c.id,
        }
    }

    /// Whether the capability is only applied on explicit request.
    pub fn explicit_only(&self) -> bool {
        match self {
            Self::FileType(c) => c.explicit_only,
            Self::UrlProtocol(c) => c.explicit_only,
            Self::DefaultProgram(c) => c.explicit_only,
            Self::AutoPlay(c) => c.explicit_only,
        }
    }

    /// Names this capability owns once registered with the OS.
    pub fn identity_ids(&self) -> Vec<String> {
        match self {
            Self::FileType(c) => vec![format!("progid:{}", c.id)],
            Self::UrlProtocol(c) => vec![format!("progid:{}", c.id)],
            Self::DefaultProgram(c) => vec![format!("clients:{}/{}", c.service, c.id)],
            Self::AutoPlay(c) => vec![format!("autoplay:{}", c.id)],
        }
    }

    /// Exclusive OS resources taken over when this capability is made the default.
    pub fn default_ids(&self) -> Vec<String> {
        match self {
            Self::FileType(c) => c.extensions.iter().map(|e| format!("extension:{}", e.value)).collect(),
            Self::UrlProtocol(c) => c.known_prefixes.iter().map(|p| format!("protocol:{p}")).collect(),
            Self::DefaultProgram(c) => vec![format!("clients:{}", c.service)],
            Self::AutoPlay(c) => c.events.iter().map(|e| format!("autoplay-event:{e}")).collect(),
        }
    }

    /// Parse from a child of `<capabilities>`. Unknown elements yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if a known element lacks its `id`.
    pub fn from_element(element: &Element) -> Result<Option<Self>, ParseError> {
        let explicit_only = element.attr("explicit-only") == Some("true");
        let description = element.child_text("description").map(str::to_string);
        let capability = match element.name.as_str() {
            "file-type" => Self::FileType(FileType {
                id: element.required_attr("id")?.to_string(),
                explicit_only,
                description,
                extensions: element
                    .children_named("extension")
                    .filter_map(|e| {
                        Some(FileTypeExtension {
                            value: e.attr("value")?.to_string(),
                            mime_type: e.attr("mime-type").map(str::to_string),
                        })
                    })
                    .collect(),
            }),
            "url-protocol" => Self::UrlProtocol(UrlProtocol {
                id: element.required_attr("id")?.to_string(),
                explicit_only,
                description,
                known_prefixes: element
                    .children_named("known-prefix")
                    .filter_map(|e| e.attr("value").map(str::to_string))
                    .collect(),
            }),
            "default-program" => Self::DefaultProgram(DefaultProgram {
                id: element.required_attr("id")?.to_string(),
                explicit_only,
                service: element.required_attr("service")?.to_string(),
            }),
            "auto-play" => Self::AutoPlay(AutoPlay {
                id: element.required_attr("id")?.to_string(),
                explicit_only,
                provider: element.attr("provider").map(str::to_string),
                events: element
                    .children_named("event")
                    .filter_map(|e| e.attr("name").map(str::to_string))
                    .collect(),
            }),
            _ => return Ok(None),
        };
        Ok(Some(capability))
    }

    /// Serialize to an element.
    pub fn to_element(&self) -> Element {
        fn base(name: &str, id: &str, explicit_only: bool) -> Element {
            let el = Element::new(name).with_attr("id", id);
            if explicit_only {
                el.with_attr("explicit-only", "true")
            } else {
                el
            }
        }
        fn describe(el: Element, description: Option<&String>) -> Element {
            match description {
                Some(d) => el.with_child(Element::new("description").with_text(d.clone())),
                None => el,
            }
        }

        match self {
            Self::FileType(c) => {
                let mut el = describe(base("file-type", &c.id, c.explicit_only), c.description.as_ref());
                for ext in &c.extensions {
                    el.children.push(
                        Element::new("extension")
                            .with_attr("value", ext.value.clone())
                            .with_opt_attr("mime-type", ext.mime_type.as_ref()),
                    );
                }
                el
            }
            Self::UrlProtocol(c) => {
                let mut el =
                    describe(base("url-protocol", &c.id, c.explicit_only), c.description.as_ref());
                for prefix in &c.known_prefixes {
                    el.children
                        .push(Element::new("known-prefix").with_attr("value", prefix.clone()));
                }
                el
            }
            Self::DefaultProgram(c) => base("default-program", &c.id, c.explicit_only)
                .with_attr("service", c.service.clone()),
            Self::AutoPlay(c) => {
                let mut el = base("auto-play", &c.id, c.explicit_only)
                    .with_opt_attr("provider", c.provider.as_ref());
                for event in &c.events {
                    el.children.push(Element::new("event").with_attr("name", event.clone()));
                }
                el
            }
        }
    }
}

/// Capabilities that apply to one operating system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityList {
    /// Operating system the list applies to; [`Os::All`] for any.
    pub os: Os,
    /// Declared capabilities.
    pub entries: Vec<Capability>,
}

impl CapabilityList {
    /// Parse a `<capabilities>` element.
    ///
    /// # Errors
    ///
    /// Returns an error if any known capability is malformed.
    pub fn from_element(element: &Element) -> Result<Self, ParseError> {
        let Ok(os) = element.attr("os").unwrap_or("*").parse::<Os>();
        let entries = element
            .children
            .iter()
            .map(Capability::from_element)
            .filter_map(Result::transpose)
            .collect::<Result<_, _>>()?;
        Ok(Self { os, entries })
    }

    /// Serialize to a `<capabilities>` element.
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("capabilities");
        if self.os != Os::All {
            el.set_attr("os", self.os.as_str());
        }
        el.children = self.entries.iter().map(Capability::to_element).collect();
        el
    }

    /// Whether the list applies to the running system.
    pub fn is_compatible(&self) -> bool {
        self.os.runs_on(Os::current())
    }
}

/// Look up a capability by ID across all lists compatible with this system.
pub fn find_capability<'a>(lists: &'a [CapabilityList], id: &str) -> Option<&'a Capability> {
    lists
        .iter()
        .filter(|l| l.is_compatible())
        .flat_map(|l| &l.entries)
        .find(|c| c.id() == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<capabilities>
  <file-type id="Demo.Text">
    <description>Text file</description>
    <extension value=".txt" mime-type="text/plain"/>
    <extension value=".text"/>
  </file-type>
  <url-protocol id="Demo.Web"><known-prefix value="demo"/></url-protocol>
  <default-program id="Demo.Mail" service="Mail" explicit-only="true"/>
  <auto-play id="Demo.Play"><event name="PlayDVDMovieOnArrival"/></auto-play>
  <context-menu id="ignored"/>
</capabilities>"#;

    #[test]
    fn parses_known_capabilities() {
        let list = CapabilityList::from_element(&Element::parse(XML).unwrap()).unwrap();
        assert_eq!(list.os, Os::All);
        assert_eq!(list.entries.len(), 4);
        assert!(list.entries[2].explicit_only());
        assert_eq!(list.entries[0].identity_ids(), vec!["progid:Demo.Text"]);
        assert_eq!(list.entries[0].default_ids(), vec!["extension:.txt", "extension:.text"]);
        assert_eq!(list.entries[2].identity_ids(), vec!["clients:Mail/Demo.Mail"]);
        assert_eq!(list.entries[2].default_ids(), vec!["clients:Mail"]);
        assert_eq!(list.entries[3].default_ids(), vec!["autoplay-event:PlayDVDMovieOnArrival"]);
    }

    #[test]
    fn element_round_trip() {
        let list = CapabilityList::from_element(&Element::parse(XML).unwrap()).unwrap();
        let again = CapabilityList::from_element(&list.to_element()).unwrap();
        assert_eq!(list, again);
        assert!(find_capability(&[list], "Demo.Web").is_some());
    }
}
