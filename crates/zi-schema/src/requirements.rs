//! What an application instance needs from the solver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Architecture, Cpu, FeedUri, Os, ParseError, VersionRange};

/// Command run when none is requested.
pub const DEFAULT_COMMAND: &str = "run";

/// Command used to build source implementations.
pub const COMPILE_COMMAND: &str = "compile";

/// A declarative request for an interface, passed to the solver unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RequirementsJson", into = "RequirementsJson")]
pub struct Requirements {
    /// Interface to select an implementation of.
    pub interface: FeedUri,
    /// Command to run; `None` means the default for the architecture.
    pub command: Option<String>,
    /// Whether to select source code rather than binaries.
    pub source: bool,
    /// Target system.
    pub architecture: Architecture,
    /// Preferred languages, e.g. `en_GB`.
    pub languages: Vec<String>,
    /// Version constraints per interface, including the root interface.
    pub extra_restrictions: BTreeMap<FeedUri, VersionRange>,
}

impl Requirements {
    /// Requirements for `interface` with all defaults.
    pub fn new(interface: FeedUri) -> Self {
        Self {
            interface,
            command: None,
            source: false,
            architecture: Architecture::default(),
            languages: Vec::new(),
            extra_restrictions: BTreeMap::new(),
        }
    }

    /// Set the command to run.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Restrict the versions of the root interface.
    pub fn with_versions(mut self, range: VersionRange) -> Self {
        self.extra_restrictions.insert(self.interface.clone(), range);
        self
    }

    /// Restrict the versions of some other interface.
    pub fn with_versions_for(mut self, interface: FeedUri, range: VersionRange) -> Self {
        self.extra_restrictions.insert(interface, range);
        self
    }

    /// Set the target system.
    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    /// Version range of the root interface, if restricted.
    pub fn versions(&self) -> Option<&VersionRange> {
        self.extra_restrictions.get(&self.interface)
    }

    /// Command name with the architecture-dependent default applied.
    pub fn command_or_default(&self) -> &str {
        match &self.command {
            Some(command) => command,
            None if self.architecture.cpu == Cpu::Source => COMPILE_COMMAND,
            None => DEFAULT_COMMAND,
        }
    }

    /// Fill in defaults and expand into the concrete variants to try in order.
    ///
    /// Wildcard OS/CPU values become the running system; a 64-bit x86 target
    /// is followed by a 32-bit fallback.
    pub fn effective(&self) -> Vec<Self> {
        let mut base = self.clone();
        base.command = Some(self.command_or_default().to_string());
        let current = Architecture::current();
        if base.architecture.os == Os::All {
            base.architecture.os = current.os;
        }
        if base.architecture.cpu == Cpu::All {
            base.architecture.cpu = current.cpu;
        }

        let mut result = vec![base.clone()];
        if base.architecture.cpu == Cpu::X86_64 {
            let mut fallback = base;
            fallback.architecture.cpu = Cpu::I686;
            result.push(fallback);
        }
        result
    }

    /// Serialize to the JSON form stored in application lists.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the JSON form stored in application lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or contains invalid values.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Serialize, Deserialize)]
struct RequirementsJson {
    interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    source: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    langs: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extra_restrictions: BTreeMap<String, String>,
}

impl TryFrom<RequirementsJson> for Requirements {
    type Error = ParseError;

    fn try_from(json: RequirementsJson) -> Result<Self, Self::Error> {
        let Ok(os) = json.os.as_deref().unwrap_or("*").parse::<Os>();
        let Ok(cpu) = json.cpu.as_deref().unwrap_or("*").parse::<Cpu>();
        let extra_restrictions = json
            .extra_restrictions
            .iter()
            .map(|(uri, range)| Ok((FeedUri::parse(uri)?, VersionRange::parse(range)?)))
            .collect::<Result<_, ParseError>>()?;
        Ok(Self {
            interface: FeedUri::parse(&json.interface)?,
            command: json.command,
            source: json.source,
            architecture: Architecture::new(os, cpu),
            languages: json
                .langs
                .map(|l| l.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            extra_restrictions,
        })
    }
}

impl From<Requirements> for RequirementsJson {
    fn from(req: Requirements) -> Self {
        Self {
            interface: req.interface.to_string(),
            command: req.command,
            source: req.source,
            os: (req.architecture.os != Os::All).then(|| req.architecture.os.to_string()),
            cpu: (req.architecture.cpu != Cpu::All).then(|| req.architecture.cpu.to_string()),
            langs: (!req.languages.is_empty()).then(|| req.languages.join(" ")),
            extra_restrictions: req
                .extra_restrictions
                .iter()
                .map(|(uri, range)| (uri.to_string(), range.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> FeedUri {
        FeedUri::parse(s).unwrap()
    }

    #[test]
    fn json_round_trip_uses_stable_keys() {
        let req = Requirements::new(uri("http://example.com/app.xml"))
            .with_command("gui")
            .with_architecture("Linux-x86_64".parse().unwrap())
            .with_versions_for(uri("http://example.com/lib.xml"), "1.0..".parse().unwrap());

        let json = req.to_json().unwrap();
        assert!(json.contains("\"interface\":\"http://example.com/app.xml\""));
        assert!(json.contains("\"os\":\"Linux\""));
        assert!(json.contains("\"extra_restrictions\""));
        assert_eq!(Requirements::from_json(&json).unwrap(), req);
    }

    #[test]
    fn default_command_depends_on_cpu() {
        let req = Requirements::new(uri("http://example.com/app.xml"));
        assert_eq!(req.command_or_default(), "run");
        let src = req.with_architecture("*-src".parse().unwrap());
        assert_eq!(src.command_or_default(), "compile");
    }

    #[test]
    fn effective_adds_i686_fallback() {
        let req = Requirements::new(uri("http://example.com/app.xml"))
            .with_architecture("Linux-x86_64".parse().unwrap());
        let effective = req.effective();
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[1].architecture.cpu, Cpu::I686);
        assert_eq!(effective[0].command.as_deref(), Some("run"));
    }
}
