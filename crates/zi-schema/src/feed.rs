//! Feed documents: interfaces and the implementations available for them.
//!
//! Nested `<group>` elements are flattened at parse time so every
//! [`Implementation`] carries its full set of inherited attributes,
//! dependencies and commands.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::capability::CapabilityList;
use crate::version::Constraint;
use crate::xml::Element;
use crate::{
    Architecture, FeedUri, ImplementationVersion, ManifestDigest, Os, ParseError, VersionRange,
};

/// XML namespace of feed documents.
pub const FEED_NAMESPACE: &str = "http://zero-install.sourceforge.net/2004/injector/interface";

/// How far an implementation has progressed through testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Stability {
    /// Known security problems.
    Insecure,
    /// Known bugs.
    Buggy,
    /// Development snapshot.
    Developer,
    /// Released for testing.
    #[default]
    Testing,
    /// Considered stable.
    Stable,
    /// Provided by a distribution package.
    Packaged,
    /// Explicitly preferred by the user.
    Preferred,
}

impl Stability {
    /// Feed spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insecure => "insecure",
            Self::Buggy => "buggy",
            Self::Developer => "developer",
            Self::Testing => "testing",
            Self::Stable => "stable",
            Self::Packaged => "packaged",
            Self::Preferred => "preferred",
        }
    }
}

impl FromStr for Stability {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insecure" => Ok(Self::Insecure),
            "buggy" => Ok(Self::Buggy),
            "developer" => Ok(Self::Developer),
            "testing" => Ok(Self::Testing),
            "stable" => Ok(Self::Stable),
            "packaged" => Ok(Self::Packaged),
            "preferred" => Ok(Self::Preferred),
            _ => Err(ParseError::invalid("stability", s)),
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a dependency must be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Importance {
    /// The implementation cannot work without it.
    #[default]
    Essential,
    /// Used if available.
    Recommended,
}

/// How an environment binding combines with an existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EnvironmentMode {
    /// Put the new value in front.
    #[default]
    Prepend,
    /// Put the new value at the end.
    Append,
    /// Overwrite.
    Replace,
}

/// Makes a selected implementation visible through an environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EnvironmentBinding {
    /// Variable name.
    pub name: String,
    /// Path inside the implementation to insert.
    pub insert: Option<String>,
    /// Literal value to use instead of `insert`.
    pub value: Option<String>,
    /// Combination mode.
    pub mode: EnvironmentMode,
    /// Separator between list items; the platform path separator if unset.
    pub separator: Option<String>,
    /// Value assumed when the variable is unset.
    pub default: Option<String>,
}

impl EnvironmentBinding {
    pub(crate) fn from_element(el: &Element) -> Result<Self, ParseError> {
        let mode = match el.attr("mode").unwrap_or("prepend") {
            "prepend" => EnvironmentMode::Prepend,
            "append" => EnvironmentMode::Append,
            "replace" => EnvironmentMode::Replace,
            other => return Err(ParseError::invalid("environment mode", other)),
        };
        Ok(Self {
            name: el.required_attr("name")?.to_string(),
            insert: el.attr("insert").map(str::to_string),
            value: el.attr("value").map(str::to_string),
            mode,
            separator: el.attr("separator").map(str::to_string),
            default: el.attr("default").map(str::to_string),
        })
    }

    /// Serialize to an `<environment>` element.
    pub fn to_element(&self) -> Element {
        let mode = match self.mode {
            EnvironmentMode::Prepend => None,
            EnvironmentMode::Append => Some("append"),
            EnvironmentMode::Replace => Some("replace"),
        };
        Element::new("environment")
            .with_attr("name", self.name.clone())
            .with_opt_attr("insert", self.insert.as_ref())
            .with_opt_attr("value", self.value.as_ref())
            .with_opt_attr("mode", mode)
            .with_opt_attr("separator", self.separator.as_ref())
            .with_opt_attr("default", self.default.as_ref())
    }
}

/// A `<requires>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Required interface.
    pub interface: FeedUri,
    /// Acceptable versions.
    pub versions: VersionRange,
    /// Whether the dependency is mandatory.
    pub importance: Importance,
    /// Only applies on this operating system.
    pub os: Os,
    /// How the chosen implementation is made available.
    pub bindings: Vec<EnvironmentBinding>,
}

impl Dependency {
    /// An essential dependency on any version of `interface`.
    pub fn new(interface: FeedUri) -> Self {
        Self {
            interface,
            versions: VersionRange::default(),
            importance: Importance::Essential,
            os: Os::All,
            bindings: Vec::new(),
        }
    }

    /// Whether the dependency applies on the given system.
    pub fn applies_to(&self, os: Os) -> bool {
        self.os.runs_on(os)
    }

    pub(crate) fn from_element(el: &Element) -> Result<Self, ParseError> {
        let importance = match el.attr("importance") {
            Some("recommended") => Importance::Recommended,
            _ => Importance::Essential,
        };
        Ok(Self {
            interface: FeedUri::parse(el.required_attr("interface")?)?,
            versions: parse_versions(el)?,
            importance,
            os: parse_os(el),
            bindings: parse_bindings(el)?,
        })
    }

    /// Serialize to a `<requires>` element.
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("requires")
            .with_attr("interface", self.interface.to_string())
            .with_opt_attr("importance", (self.importance == Importance::Recommended).then_some("recommended"))
            .with_opt_attr("version", (!self.versions.is_empty()).then(|| self.versions.to_string()))
            .with_opt_attr("os", (self.os != Os::All).then(|| self.os.to_string()));
        el.children = self.bindings.iter().map(EnvironmentBinding::to_element).collect();
        el
    }
}

/// A `<restricts>` element: limits versions without requiring the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restriction {
    /// Restricted interface.
    pub interface: FeedUri,
    /// Acceptable versions.
    pub versions: VersionRange,
    /// Only applies on this operating system.
    pub os: Os,
}

impl Restriction {
    fn from_element(el: &Element) -> Result<Self, ParseError> {
        Ok(Self {
            interface: FeedUri::parse(el.required_attr("interface")?)?,
            versions: parse_versions(el)?,
            os: parse_os(el),
        })
    }
}

/// Another interface whose implementation runs a command, e.g. an interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runner {
    /// Interface providing the runner.
    pub interface: FeedUri,
    /// Command of the runner to use; `run` if unset.
    pub command: Option<String>,
    /// Acceptable versions.
    pub versions: VersionRange,
    /// Arguments passed to the runner before the program path.
    pub arguments: Vec<String>,
}

impl Runner {
    /// The runner's command name with the default applied.
    pub fn command_or_default(&self) -> &str {
        self.command.as_deref().unwrap_or(crate::requirements::DEFAULT_COMMAND)
    }
}

/// A named way to run an implementation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    /// Command name, e.g. `run` or `test`.
    pub name: String,
    /// Path of the executable relative to the implementation root.
    pub path: Option<String>,
    /// Fixed arguments.
    pub arguments: Vec<String>,
    /// Optional runner.
    pub runner: Option<Runner>,
    /// Additional dependencies of this command.
    pub dependencies: Vec<Dependency>,
    /// Additional restrictions of this command.
    pub restrictions: Vec<Restriction>,
    /// Environment bindings of this command.
    pub bindings: Vec<EnvironmentBinding>,
}

impl Command {
    /// A command that runs `path`.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parse a `<command>` element.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or a nested element is malformed.
    pub fn from_element(el: &Element) -> Result<Self, ParseError> {
        let runner = el
            .child("runner")
            .map(|r| -> Result<Runner, ParseError> {
                Ok(Runner {
                    interface: FeedUri::parse(r.required_attr("interface")?)?,
                    command: r.attr("command").map(str::to_string),
                    versions: parse_versions(r)?,
                    arguments: parse_args(r),
                })
            })
            .transpose()?;
        Ok(Self {
            name: el.required_attr("name")?.to_string(),
            path: el.attr("path").map(str::to_string),
            arguments: parse_args(el),
            runner,
            dependencies: el
                .children_named("requires")
                .map(Dependency::from_element)
                .collect::<Result<_, _>>()?,
            restrictions: el
                .children_named("restricts")
                .map(Restriction::from_element)
                .collect::<Result<_, _>>()?,
            bindings: parse_bindings(el)?,
        })
    }

    /// Serialize to a `<command>` element.
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("command")
            .with_attr("name", self.name.clone())
            .with_opt_attr("path", self.path.as_ref());
        for arg in &self.arguments {
            el.children.push(Element::new("arg").with_text(arg.clone()));
        }
        if let Some(runner) = &self.runner {
            let mut r = Element::new("runner")
                .with_attr("interface", runner.interface.to_string())
                .with_opt_attr("command", runner.command.as_ref())
                .with_opt_attr(
                    "version",
                    (!runner.versions.is_empty()).then(|| runner.versions.to_string()),
                );
            for arg in &runner.arguments {
                r.children.push(Element::new("arg").with_text(arg.clone()));
            }
            el.children.push(r);
        }
        el.children
            .extend(self.dependencies.iter().map(Dependency::to_element));
        el.children
            .extend(self.bindings.iter().map(EnvironmentBinding::to_element));
        el
    }
}

/// One downloadable archive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Archive {
    /// Download URL.
    pub href: String,
    /// Expected size in bytes.
    pub size: u64,
    /// MIME type; guessed from the URL if unset.
    pub mime_type: Option<String>,
    /// Subdirectory of the archive to extract.
    pub extract: Option<String>,
    /// Subdirectory of the implementation to extract into.
    pub destination: Option<String>,
    /// Bytes to skip at the start of the file.
    pub start_offset: u64,
}

impl Archive {
    fn from_element(el: &Element) -> Result<Self, ParseError> {
        let size = el.required_attr("size")?;
        Ok(Self {
            href: el.required_attr("href")?.to_string(),
            size: size.parse().map_err(|_| ParseError::invalid("size", size))?,
            mime_type: el.attr("type").map(str::to_string),
            extract: el.attr("extract").map(str::to_string),
            destination: el.attr("dest").map(str::to_string),
            start_offset: el
                .attr("start-offset")
                .and_then(|o| o.parse().ok())
                .unwrap_or(0),
        })
    }
}

/// A way to obtain an implementation: one or more archives applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Recipe {
    /// Archives extracted on top of each other.
    pub steps: Vec<Archive>,
}

/// A concrete version of an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Implementation {
    /// Unique ID within the feed.
    pub id: String,
    /// Version.
    pub version: ImplementationVersion,
    /// Target system.
    pub architecture: Architecture,
    /// Testing status.
    pub stability: Stability,
    /// Supported languages; empty for any.
    pub languages: Vec<String>,
    /// Local directory containing the implementation, bypassing the store.
    pub local_path: Option<PathBuf>,
    /// Digest of the extracted directory.
    pub manifest_digest: ManifestDigest,
    /// Named commands.
    pub commands: Vec<Command>,
    /// Dependencies of every command.
    pub dependencies: Vec<Dependency>,
    /// Restrictions on other interfaces.
    pub restrictions: Vec<Restriction>,
    /// Environment bindings for the implementation itself.
    pub bindings: Vec<EnvironmentBinding>,
    /// Ways to download the implementation.
    pub recipes: Vec<Recipe>,
    /// Release date as written in the feed.
    pub released: Option<String>,
    /// Feed this implementation was read from.
    pub from_feed: Option<FeedUri>,
}

impl Implementation {
    /// Command by name.
    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Whether this is source code.
    pub fn is_source(&self) -> bool {
        self.architecture.cpu == crate::Cpu::Source
    }
}

/// Reference to an additional feed for the same interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedReference {
    /// Feed location.
    pub source: FeedUri,
    /// Architecture the feed is restricted to.
    pub architecture: Architecture,
}

/// A named command exposed to the desktop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryPoint {
    /// Command this entry point runs.
    pub command: String,
    /// Name for command-line aliases.
    pub binary_name: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Short description.
    pub summary: Option<String>,
    /// Whether the command must run in a terminal.
    pub needs_terminal: bool,
}

/// An icon for the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    /// Download URL.
    pub href: String,
    /// MIME type.
    pub mime_type: Option<String>,
}

/// A parsed feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    /// Canonical URI of the feed.
    pub uri: FeedUri,
    /// Display name.
    pub name: String,
    /// Short description.
    pub summary: Option<String>,
    /// Home page.
    pub homepage: Option<String>,
    /// Menu categories.
    pub categories: Vec<String>,
    /// Icons.
    pub icons: Vec<Icon>,
    /// Additional feeds.
    pub feeds: Vec<FeedReference>,
    /// Interfaces this feed provides implementations for.
    pub feed_for: Vec<FeedUri>,
    /// Entry points for desktop integration.
    pub entry_points: Vec<EntryPoint>,
    /// Capabilities for desktop integration.
    pub capability_lists: Vec<CapabilityList>,
    /// Flattened implementations in document order.
    pub implementations: Vec<Implementation>,
}

impl Feed {
    /// Parse a feed document read from `location`.
    ///
    /// The `uri` attribute wins over `location`; relative local paths are
    /// resolved against the directory of a local `location`.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the document is malformed or not a feed.
    pub fn parse(xml: &str, location: &FeedUri) -> Result<Self, ParseError> {
        let root = Element::parse(xml)?;
        Self::from_element(&root, location)
    }

    /// Build a feed from an already parsed `<interface>` element.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the element is not a valid feed.
    pub fn from_element(root: &Element, location: &FeedUri) -> Result<Self, ParseError> {
        if root.name != "interface" && root.name != "feed" {
            return Err(ParseError::invalid("root element", root.name.clone()));
        }
        let uri = match root.attr("uri") {
            Some(uri) => FeedUri::parse(uri)?,
            None => location.clone(),
        };
        let base_dir = location
            .local_path()
            .and_then(|p| p.parent().map(Path::to_path_buf));

        let mut feed = Self {
            name: root
                .child_text("name")
                .ok_or_else(|| ParseError::missing("<name>", &root.name))?
                .to_string(),
            summary: root.child_text("summary").map(str::to_string),
            homepage: root.child_text("homepage").map(str::to_string),
            categories: root
                .children_named("category")
                .map(|c| c.text.clone())
                .collect(),
            icons: root
                .children_named("icon")
                .filter_map(|i| {
                    Some(Icon {
                        href: i.attr("href")?.to_string(),
                        mime_type: i.attr("type").map(str::to_string),
                    })
                })
                .collect(),
            feeds: root
                .children_named("feed")
                .map(|f| -> Result<FeedReference, ParseError> {
                    Ok(FeedReference {
                        source: FeedUri::parse(f.required_attr("src")?)?,
                        architecture: f.attr("arch").unwrap_or("*-*").parse()?,
                    })
                })
                .collect::<Result<_, _>>()?,
            feed_for: root
                .children_named("feed-for")
                .map(|f| FeedUri::parse(f.required_attr("interface")?))
                .collect::<Result<_, _>>()?,
            entry_points: root
                .children_named("entry-point")
                .map(|e| -> Result<EntryPoint, ParseError> {
                    Ok(EntryPoint {
                        command: e.required_attr("command")?.to_string(),
                        binary_name: e.attr("binary-name").map(str::to_string),
                        name: e.child_text("name").map(str::to_string),
                        summary: e.child_text("summary").map(str::to_string),
                        needs_terminal: e.child("needs-terminal").is_some(),
                    })
                })
                .collect::<Result<_, _>>()?,
            capability_lists: root
                .children_named("capabilities")
                .map(CapabilityList::from_element)
                .collect::<Result<_, _>>()?,
            implementations: Vec::new(),
            uri,
        };

        let mut context = Inherited::default();
        context.absorb(root, false)?;
        let reader = ImplementationReader {
            feed_uri: &feed.uri,
            base_dir: base_dir.as_deref(),
        };
        reader.read_children(root, &context, &mut feed.implementations)?;
        Ok(feed)
    }

    /// Implementation by ID.
    pub fn implementation(&self, id: &str) -> Option<&Implementation> {
        self.implementations.iter().find(|i| i.id == id)
    }

    /// Entry point for a command.
    pub fn entry_point(&self, command: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|e| e.command == command)
    }
}

/// Attributes and child elements handed down from enclosing groups.
#[derive(Debug, Clone, Default)]
struct Inherited {
    version: Option<String>,
    version_modifier: Option<String>,
    architecture: Option<String>,
    stability: Option<String>,
    languages: Option<String>,
    released: Option<String>,
    main: Option<String>,
    self_test: Option<String>,
    local_path: Option<String>,
    commands: Vec<Command>,
    dependencies: Vec<Dependency>,
    restrictions: Vec<Restriction>,
    bindings: Vec<EnvironmentBinding>,
}

impl Inherited {
    fn absorb(&mut self, el: &Element, attributes: bool) -> Result<(), ParseError> {
        if attributes {
            let set = |slot: &mut Option<String>, key: &str| {
                if let Some(value) = el.attr(key) {
                    *slot = Some(value.to_string());
                }
            };
            set(&mut self.version, "version");
            set(&mut self.version_modifier, "version-modifier");
            set(&mut self.architecture, "arch");
            set(&mut self.stability, "stability");
            set(&mut self.languages, "langs");
            set(&mut self.released, "released");
            set(&mut self.main, "main");
            set(&mut self.self_test, "self-test");
            set(&mut self.local_path, "local-path");
        }
        for child in &el.children {
            match child.name.as_str() {
                "requires" => self.dependencies.push(Dependency::from_element(child)?),
                "restricts" => self.restrictions.push(Restriction::from_element(child)?),
                "environment" => self.bindings.push(EnvironmentBinding::from_element(child)?),
                "command" => {
                    let command = Command::from_element(child)?;
                    self.commands.retain(|c| c.name != command.name);
                    self.commands.push(command);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

struct ImplementationReader<'a> {
    feed_uri: &'a FeedUri,
    base_dir: Option<&'a Path>,
}

impl ImplementationReader<'_> {
    fn read_children(
        &self,
        parent: &Element,
        inherited: &Inherited,
        out: &mut Vec<Implementation>,
    ) -> Result<(), ParseError> {
        for child in &parent.children {
            match child.name.as_str() {
                "group" => {
                    let mut context = inherited.clone();
                    context.absorb(child, true)?;
                    self.read_children(child, &context, out)?;
                }
                "implementation" => {
                    let mut context = inherited.clone();
                    context.absorb(child, true)?;
                    out.push(self.build(child, context)?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn build(&self, el: &Element, mut context: Inherited) -> Result<Implementation, ParseError> {
        let id = el.required_attr("id")?.to_string();
        let mut version_text = context
            .version
            .clone()
            .ok_or_else(|| ParseError::missing("attribute 'version'", "implementation"))?;
        if let Some(modifier) = &context.version_modifier {
            version_text.push_str(modifier);
        }
        let version = ImplementationVersion::parse(&version_text)?;

        let mut manifest_digest = ManifestDigest::default();
        if let Some(digest_el) = el.child("manifest-digest") {
            for (key, value) in &digest_el.attributes {
                if let Ok(algorithm) = key.parse() {
                    manifest_digest.set(algorithm, value.clone());
                }
            }
        }
        if let Ok(from_id) = ManifestDigest::parse_id(&id) {
            manifest_digest.merge(&from_id);
        }

        let local_path = match (&context.local_path, self.base_dir) {
            (Some(path), base) => Some(resolve_local(base, path)),
            (None, Some(base)) if id.starts_with('.') || id.starts_with('/') => {
                Some(resolve_local(Some(base), &id))
            }
            _ => None,
        };

        if let Some(main) = context.main.take() {
            if !context.commands.iter().any(|c| c.name == "run") {
                context.commands.push(Command::new("run", main));
            }
        }
        if let Some(test) = context.self_test.take() {
            if !context.commands.iter().any(|c| c.name == "test") {
                context.commands.push(Command::new("test", test));
            }
        }

        let recipes = el
            .children
            .iter()
            .filter_map(|c| match c.name.as_str() {
                "archive" => Some(Archive::from_element(c).map(|a| Recipe { steps: vec![a] })),
                "recipe" => Some(
                    c.children_named("archive")
                        .map(Archive::from_element)
                        .collect::<Result<Vec<_>, _>>()
                        .map(|steps| Recipe { steps }),
                ),
                _ => None,
            })
            .collect::<Result<_, _>>()?;

        Ok(Implementation {
            id,
            version,
            architecture: context.architecture.as_deref().unwrap_or("*-*").parse()?,
            stability: context
                .stability
                .as_deref()
                .map(str::parse::<Stability>)
                .transpose()?
                .unwrap_or_default(),
            languages: context
                .languages
                .map(|l| l.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            local_path,
            manifest_digest,
            commands: context.commands,
            dependencies: context.dependencies,
            restrictions: context.restrictions,
            bindings: context.bindings,
            recipes,
            released: context.released,
            from_feed: Some(self.feed_uri.clone()),
        })
    }
}

fn resolve_local(base: Option<&Path>, path: &str) -> PathBuf {
    match base {
        Some(base) if !Path::new(path).is_absolute() => base.join(path),
        _ => PathBuf::from(path),
    }
}

fn parse_versions(el: &Element) -> Result<VersionRange, ParseError> {
    let mut range = el
        .attr("version")
        .map(VersionRange::parse)
        .transpose()?
        .unwrap_or_default();
    for constraint in el.children_named("version") {
        let parse = |key: &str| {
            constraint
                .attr(key)
                .map(ImplementationVersion::parse)
                .transpose()
        };
        range = range.intersect(&Constraint {
            not_before: parse("not-before")?,
            before: parse("before")?,
        });
    }
    Ok(range)
}

fn parse_os(el: &Element) -> Os {
    let Ok(os) = el.attr("os").unwrap_or("*").parse::<Os>();
    os
}

fn parse_args(el: &Element) -> Vec<String> {
    el.children_named("arg").map(|a| a.text.clone()).collect()
}

fn parse_bindings(el: &Element) -> Result<Vec<EnvironmentBinding>, ParseError> {
    el.children_named("environment")
        .map(EnvironmentBinding::from_element)
        .collect()
}
