//! Shared model types for zi.
//!
//! Everything here is pure data: identifiers, versions, architectures,
//! digests, requirements, feeds, selections and catalogs, plus the XML
//! element tree they are read from and written to.

pub mod arch;
pub mod capability;
pub mod catalog;
pub mod digest;
pub mod error;
pub mod feed;
pub mod requirements;
pub mod selection;
pub mod uri;
pub mod version;
pub mod xml;

// Re-exports
pub use arch::{Architecture, Cpu, Os};
pub use capability::{Capability, CapabilityList};
pub use catalog::Catalog;
pub use digest::{DigestAlgorithm, ManifestDigest, base32_encode};
pub use error::ParseError;
pub use feed::{
    Archive, Command, Dependency, EntryPoint, EnvironmentBinding, EnvironmentMode, Feed,
    Implementation, Importance, Recipe, Restriction, Runner, Stability,
};
pub use requirements::Requirements;
pub use selection::{ImplementationSelection, Selections};
pub use uri::FeedUri;
pub use version::{Constraint, ImplementationVersion, VersionRange};
