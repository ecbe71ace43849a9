//! The solver's output: one chosen implementation per interface.

use std::path::PathBuf;

use crate::feed::{Command, Dependency, EnvironmentBinding, FEED_NAMESPACE, Implementation};
use crate::xml::Element;
use crate::{Architecture, DigestAlgorithm, FeedUri, ImplementationVersion, ManifestDigest, ParseError};

/// A chosen implementation of one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplementationSelection {
    /// Interface this selection satisfies.
    pub interface: FeedUri,
    /// Feed the implementation came from, if different from the interface.
    pub from_feed: Option<FeedUri>,
    /// Implementation ID within its feed.
    pub id: String,
    /// Chosen version.
    pub version: ImplementationVersion,
    /// Target system.
    pub architecture: Architecture,
    /// Local directory, bypassing the store.
    pub local_path: Option<PathBuf>,
    /// Expected digest.
    pub manifest_digest: ManifestDigest,
    /// Commands needed by the selection (only those that were solved).
    pub commands: Vec<Command>,
    /// Dependencies of the implementation.
    pub dependencies: Vec<Dependency>,
    /// Environment bindings of the implementation.
    pub bindings: Vec<EnvironmentBinding>,
}

impl ImplementationSelection {
    /// Select `implementation` for `interface`, without commands.
    pub fn new(interface: FeedUri, implementation: &Implementation) -> Self {
        let from_feed = implementation
            .from_feed
            .clone()
            .filter(|feed| *feed != interface);
        Self {
            interface,
            from_feed,
            id: implementation.id.clone(),
            version: implementation.version.clone(),
            architecture: implementation.architecture,
            local_path: implementation.local_path.clone(),
            manifest_digest: implementation.manifest_digest.clone(),
            commands: Vec::new(),
            dependencies: implementation.dependencies.clone(),
            bindings: implementation.bindings.clone(),
        }
    }

    /// Feed the implementation was read from.
    pub fn feed(&self) -> &FeedUri {
        self.from_feed.as_ref().unwrap_or(&self.interface)
    }

    /// Solved command by name.
    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new("selection")
            .with_attr("interface", self.interface.to_string())
            .with_opt_attr("from-feed", self.from_feed.as_ref())
            .with_attr("id", self.id.clone())
            .with_attr("version", self.version.to_string())
            .with_opt_attr(
                "arch",
                (!self.architecture.is_any()).then(|| self.architecture.to_string()),
            )
            .with_opt_attr(
                "local-path",
                self.local_path.as_ref().map(|p| p.display().to_string()),
            );
        if !self.manifest_digest.is_empty() {
            let mut digest = Element::new("manifest-digest");
            for algorithm in self.manifest_digest.algorithms() {
                if let Some(value) = self.manifest_digest.get(algorithm) {
                    digest.set_attr(algorithm.as_str(), value);
                }
            }
            el.children.push(digest);
        }
        el.children
            .extend(self.dependencies.iter().map(Dependency::to_element));
        el.children
            .extend(self.bindings.iter().map(EnvironmentBinding::to_element));
        el.children.extend(self.commands.iter().map(Command::to_element));
        el
    }

    fn from_element(el: &Element) -> Result<Self, ParseError> {
        let mut manifest_digest = ManifestDigest::default();
        if let Some(digest) = el.child("manifest-digest") {
            for (key, value) in &digest.attributes {
                if let Ok(algorithm) = key.parse::<DigestAlgorithm>() {
                    manifest_digest.set(algorithm, value.clone());
                }
            }
        }
        let id = el.required_attr("id")?.to_string();
        if let Ok(from_id) = ManifestDigest::parse_id(&id) {
            manifest_digest.merge(&from_id);
        }

        Ok(Self {
            interface: FeedUri::parse(el.required_attr("interface")?)?,
            from_feed: el.attr("from-feed").map(FeedUri::parse).transpose()?,
            id,
            version: ImplementationVersion::parse(el.required_attr("version")?)?,
            architecture: el.attr("arch").unwrap_or("*-*").parse()?,
            local_path: el.attr("local-path").map(PathBuf::from),
            manifest_digest,
            commands: el
                .children_named("command")
                .map(Command::from_element)
                .collect::<Result<_, _>>()?,
            dependencies: el
                .children_named("requires")
                .map(Dependency::from_element)
                .collect::<Result<_, _>>()?,
            bindings: el
                .children_named("environment")
                .map(EnvironmentBinding::from_element)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// A consistent set of implementation choices for one set of requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selections {
    /// Root interface.
    pub interface: FeedUri,
    /// Command to run on the root interface.
    pub command: Option<String>,
    /// Selections in the order they were made.
    pub implementations: Vec<ImplementationSelection>,
}

impl Selections {
    /// Empty selections for `interface`.
    pub fn new(interface: FeedUri, command: Option<String>) -> Self {
        Self {
            interface,
            command,
            implementations: Vec::new(),
        }
    }

    /// Selection for an interface.
    pub fn get(&self, interface: &FeedUri) -> Option<&ImplementationSelection> {
        self.implementations.iter().find(|s| s.interface == *interface)
    }

    /// Mutable selection for an interface.
    pub fn get_mut(&mut self, interface: &FeedUri) -> Option<&mut ImplementationSelection> {
        self.implementations
            .iter_mut()
            .find(|s| s.interface == *interface)
    }

    /// Whether an interface has been selected.
    pub fn contains(&self, interface: &FeedUri) -> bool {
        self.get(interface).is_some()
    }

    /// Selection of the root interface.
    pub fn main_implementation(&self) -> Option<&ImplementationSelection> {
        self.get(&self.interface)
    }

    /// Parse a `<selections>` document.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the document is malformed.
    pub fn parse(xml: &str) -> Result<Self, ParseError> {
        let root = Element::parse(xml)?;
        if root.name != "selections" {
            return Err(ParseError::invalid("root element", root.name));
        }
        Ok(Self {
            interface: FeedUri::parse(root.required_attr("interface")?)?,
            command: root.attr("command").map(str::to_string),
            implementations: root
                .children_named("selection")
                .map(ImplementationSelection::from_element)
                .collect::<Result<_, _>>()?,
        })
    }

    /// Serialize to a `<selections>` document.
    pub fn to_xml(&self) -> String {
        let mut root = Element::new("selections")
            .with_attr("interface", self.interface.to_string())
            .with_opt_attr("command", self.command.as_ref());
        root.children = self
            .implementations
            .iter()
            .map(ImplementationSelection::to_element)
            .collect();
        root.to_document(Some(FEED_NAMESPACE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Feed;

    const FEED: &str = r#"<interface uri="http://example.com/app.xml"><name>App</name>
  <implementation id="sha1new=abc" version="2.0-rc1" arch="Linux-*">
    <manifest-digest sha256new="XYZ"/>
    <requires interface="http://example.com/lib.xml" version="1.0.."/>
    <environment name="APP_HOME" insert="." mode="replace"/>
    <command name="run" path="bin/app"><arg>--flag</arg>
      <runner interface="http://example.com/python.xml" command="run"/>
    </command>
  </implementation>
</interface>"#;

    #[test]
    fn xml_round_trip() {
        let uri = FeedUri::parse("http://example.com/app.xml").unwrap();
        let feed = Feed::parse(FEED, &uri).unwrap();
        let implementation = &feed.implementations[0];

        let mut selection = ImplementationSelection::new(uri.clone(), implementation);
        selection.commands.push(implementation.command("run").unwrap().clone());
        assert!(selection.from_feed.is_none());

        let mut selections = Selections::new(uri.clone(), Some("run".into()));
        selections.implementations.push(selection);

        let xml = selections.to_xml();
        let parsed = Selections::parse(&xml).unwrap();
        assert_eq!(parsed, selections);

        let main = parsed.main_implementation().unwrap();
        assert_eq!(main.manifest_digest.best().unwrap(), "sha256new_XYZ");
        assert_eq!(main.command("run").unwrap().arguments, vec!["--flag"]);
    }
}
