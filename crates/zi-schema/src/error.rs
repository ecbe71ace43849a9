//! Parse errors shared by the model types.

use thiserror::Error;

/// Failure to interpret a string or XML document as a model value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The text is not a valid feed URI.
    #[error("Invalid feed URI '{0}'")]
    Uri(String),

    /// The text is not a valid implementation version.
    #[error("Invalid version '{0}'")]
    Version(String),

    /// The text is not a valid version range.
    #[error("Invalid version range '{0}'")]
    VersionRange(String),

    /// The text is not a valid architecture string.
    #[error("Invalid architecture '{0}'")]
    Architecture(String),

    /// The text is not a known manifest digest ID.
    #[error("Unknown digest format '{0}'")]
    Digest(String),

    /// The XML document is malformed.
    #[error("Malformed XML: {0}")]
    Xml(String),

    /// The XML document is well-formed but lacks a required element or attribute.
    #[error("Missing {what} in <{element}>")]
    Missing {
        /// Name of the missing attribute or child element.
        what: String,
        /// Element it was expected on.
        element: String,
    },

    /// An attribute value could not be interpreted.
    #[error("Invalid value '{value}' for {what}")]
    InvalidValue {
        /// Name of the attribute or field.
        what: String,
        /// Offending value.
        value: String,
    },
}

impl ParseError {
    /// Create a [`ParseError::Missing`] for `what` on `element`.
    pub fn missing(what: &str, element: &str) -> Self {
        Self::Missing {
            what: what.to_string(),
            element: element.to_string(),
        }
    }

    /// Create a [`ParseError::InvalidValue`].
    pub fn invalid(what: &str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            what: what.to_string(),
            value: value.into(),
        }
    }
}
