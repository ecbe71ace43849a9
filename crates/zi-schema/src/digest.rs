//! Manifest digests identifying implementation directory trees.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Hash algorithms a manifest digest may be computed with.
///
/// Ordered from weakest to strongest; [`ManifestDigest::best`] picks the
/// strongest one available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigestAlgorithm {
    /// Legacy SHA-1 manifest format.
    Sha1,
    /// SHA-1 with the depth-first manifest layout.
    Sha1New,
    /// SHA-256, hex encoded.
    Sha256,
    /// SHA-256, base32 encoded.
    Sha256New,
}

impl DigestAlgorithm {
    /// All algorithms, strongest first.
    pub const ALL: [Self; 4] = [Self::Sha256New, Self::Sha256, Self::Sha1New, Self::Sha1];

    /// Algorithm name as used in feeds and store directory names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha1New => "sha1new",
            Self::Sha256 => "sha256",
            Self::Sha256New => "sha256new",
        }
    }

    /// Separator between algorithm name and value in an ID.
    pub fn separator(&self) -> char {
        match self {
            Self::Sha256New => '_',
            _ => '=',
        }
    }

    /// Prefix used for IDs and directory names, e.g. `sha256new_`.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.as_str(), self.separator())
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "sha1new" => Ok(Self::Sha1New),
            "sha256" => Ok(Self::Sha256),
            "sha256new" => Ok(Self::Sha256New),
            _ => Err(ParseError::Digest(s.to_string())),
        }
    }
}

/// A set of algorithm-tagged hashes of one implementation's directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestDigest {
    /// Legacy SHA-1 value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    /// `sha1new` value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1new: Option<String>,
    /// `sha256` value (hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// `sha256new` value (base32).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256new: Option<String>,
}

impl ManifestDigest {
    /// Digest with a single algorithm set.
    pub fn single(algorithm: DigestAlgorithm, value: impl Into<String>) -> Self {
        let mut digest = Self::default();
        digest.set(algorithm, value.into());
        digest
    }

    /// Parse an ID such as `sha256new_ABC...` or `sha1new=abc...`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Digest`] if the ID has no known algorithm prefix
    /// or an empty value.
    pub fn parse_id(id: &str) -> Result<Self, ParseError> {
        for algorithm in DigestAlgorithm::ALL {
            if let Some(value) = id.strip_prefix(&algorithm.prefix()) {
                if value.is_empty() {
                    break;
                }
                return Ok(Self::single(algorithm, value));
            }
        }
        Err(ParseError::Digest(id.to_string()))
    }

    /// Value for `algorithm`, if present.
    pub fn get(&self, algorithm: DigestAlgorithm) -> Option<&str> {
        match algorithm {
            DigestAlgorithm::Sha1 => self.sha1.as_deref(),
            DigestAlgorithm::Sha1New => self.sha1new.as_deref(),
            DigestAlgorithm::Sha256 => self.sha256.as_deref(),
            DigestAlgorithm::Sha256New => self.sha256new.as_deref(),
        }
    }

    /// Set the value for `algorithm`.
    pub fn set(&mut self, algorithm: DigestAlgorithm, value: String) {
        let slot = match algorithm {
            DigestAlgorithm::Sha1 => &mut self.sha1,
            DigestAlgorithm::Sha1New => &mut self.sha1new,
            DigestAlgorithm::Sha256 => &mut self.sha256,
            DigestAlgorithm::Sha256New => &mut self.sha256new,
        };
        *slot = Some(value);
    }

    /// Copy in every value from `other` that is not already set.
    pub fn merge(&mut self, other: &Self) {
        for algorithm in DigestAlgorithm::ALL {
            if let (None, Some(value)) = (self.get(algorithm), other.get(algorithm)) {
                self.set(algorithm, value.to_string());
            }
        }
    }

    /// Algorithms with a value, strongest first.
    pub fn algorithms(&self) -> impl Iterator<Item = DigestAlgorithm> + '_ {
        DigestAlgorithm::ALL
            .into_iter()
            .filter(|a| self.get(*a).is_some())
    }

    /// Formatted IDs (`algo=value` / `sha256new_value`), strongest first.
    pub fn available(&self) -> Vec<String> {
        self.algorithms()
            .filter_map(|a| self.get(a).map(|v| format!("{}{v}", a.prefix())))
            .collect()
    }

    /// The strongest formatted ID.
    pub fn best(&self) -> Option<String> {
        self.available().into_iter().next()
    }

    /// The strongest algorithm present.
    pub fn best_algorithm(&self) -> Option<DigestAlgorithm> {
        self.algorithms().next()
    }

    /// Whether no algorithm is set.
    pub fn is_empty(&self) -> bool {
        self.algorithms().next().is_none()
    }

    /// Whether any algorithm present in both digests has the same value.
    pub fn partial_eq(&self, other: &Self) -> bool {
        DigestAlgorithm::ALL.into_iter().any(|a| match (self.get(a), other.get(a)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        })
    }
}

impl fmt::Display for ManifestDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.best() {
            Some(best) => f.write_str(&best),
            None => f.write_str("(no digest)"),
        }
    }
}

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Encode bytes as RFC 4648 base32 (uppercase, no padding).
pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ids() {
        let d = ManifestDigest::parse_id("sha256new_ABCD").unwrap();
        assert_eq!(d.sha256new.as_deref(), Some("ABCD"));
        let d = ManifestDigest::parse_id("sha1new=abc").unwrap();
        assert_eq!(d.sha1new.as_deref(), Some("abc"));
        let d = ManifestDigest::parse_id("sha1=abc").unwrap();
        assert_eq!(d.sha1.as_deref(), Some("abc"));
        assert!(ManifestDigest::parse_id("sha256new=abc").is_err());
        assert!(ManifestDigest::parse_id("md5=abc").is_err());
        assert!(ManifestDigest::parse_id("sha256=").is_err());
    }

    #[test]
    fn best_prefers_strongest() {
        let mut d = ManifestDigest::single(DigestAlgorithm::Sha1New, "aa");
        d.set(DigestAlgorithm::Sha256, "bb".into());
        assert_eq!(d.best().unwrap(), "sha256=bb");
        assert_eq!(d.available(), vec!["sha256=bb", "sha1new=aa"]);
    }

    #[test]
    fn partial_equality() {
        let mut a = ManifestDigest::single(DigestAlgorithm::Sha1New, "aa");
        a.set(DigestAlgorithm::Sha256, "bb".into());
        let b = ManifestDigest::single(DigestAlgorithm::Sha256, "bb");
        let c = ManifestDigest::single(DigestAlgorithm::Sha256New, "bb");
        assert!(a.partial_eq(&b));
        assert!(!a.partial_eq(&c));
    }

    #[test]
    fn base32_rfc4648_vectors() {
        assert_eq!(base32_encode(b""), "");
        assert_eq!(base32_encode(b"f"), "MY");
        assert_eq!(base32_encode(b"fo"), "MZXQ");
        assert_eq!(base32_encode(b"foo"), "MZXW6");
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
    }
}
