//! Implementation versions and version ranges.
//!
//! Versions are dotted lists of decimal numbers optionally followed by
//! `-`-separated parts with a modifier (`pre`, `rc`, `post`):
//!
//! ```text
//! 1.0-pre2 < 1.0-rc1 < 1.0 < 1.0-1 < 1.0-post
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Modifier at the start of an additional version part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum VersionModifier {
    /// Pre-release (`pre`).
    Pre,
    /// Release candidate (`rc`).
    Rc,
    /// No modifier.
    #[default]
    None,
    /// Post-release (`post`).
    Post,
}

impl VersionModifier {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Rc => "rc",
            Self::None => "",
            Self::Post => "post",
        }
    }
}

/// A dotted list of decimal numbers (`1.2.3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
struct DottedList(Vec<u64>);

impl DottedList {
    fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            return Some(Self::default());
        }
        value
            .split('.')
            .map(|n| n.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }
}

impl Ord for DottedList {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.cmp(b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for DottedList {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DottedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, n) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{n}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
struct VersionPart {
    modifier: VersionModifier,
    list: DottedList,
}

impl VersionPart {
    fn parse(value: &str) -> Option<Self> {
        let (modifier, rest) = if let Some(rest) = value.strip_prefix("pre") {
            (VersionModifier::Pre, rest)
        } else if let Some(rest) = value.strip_prefix("rc") {
            (VersionModifier::Rc, rest)
        } else if let Some(rest) = value.strip_prefix("post") {
            (VersionModifier::Post, rest)
        } else {
            (VersionModifier::None, value)
        };
        Some(Self {
            modifier,
            list: DottedList::parse(rest)?,
        })
    }

    fn is_default(&self) -> bool {
        self.modifier == VersionModifier::None && self.list.0.is_empty()
    }
}

/// A totally ordered implementation version.
///
/// Equality follows ordering, so `1.0` and `1.0-` compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImplementationVersion {
    first: DottedList,
    additional: Vec<VersionPart>,
}

impl ImplementationVersion {
    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Version`] if the leading dotted list is empty or
    /// any part contains something other than a modifier and decimal numbers.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let err = || ParseError::Version(value.to_string());
        let mut parts = value.split('-');
        let first = parts.next().ok_or_else(err)?;
        if first.is_empty() {
            return Err(err());
        }
        let first = DottedList::parse(first).ok_or_else(err)?;
        let additional = parts
            .map(VersionPart::parse)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(err)?;
        Ok(Self { first, additional })
    }

    /// The leading numbers, e.g. `[1, 2]` for `1.2-rc3`.
    pub fn leading(&self) -> &[u64] {
        &self.first.0
    }

    fn trimmed_parts(&self) -> &[VersionPart] {
        let keep = self
            .additional
            .iter()
            .rposition(|p| !p.is_default())
            .map_or(0, |i| i + 1);
        &self.additional[..keep]
    }
}

impl Ord for ImplementationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.first.cmp(&other.first) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        let default = VersionPart::default();
        let len = self.additional.len().max(other.additional.len());
        for i in 0..len {
            let a = self.additional.get(i).unwrap_or(&default);
            let b = other.additional.get(i).unwrap_or(&default);
            match a.cmp(b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for ImplementationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ImplementationVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ImplementationVersion {}

impl Hash for ImplementationVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.first.hash(state);
        self.trimmed_parts().hash(state);
    }
}

impl fmt::Display for ImplementationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first)?;
        for part in &self.additional {
            write!(f, "-{}{}", part.modifier.as_str(), part.list)?;
        }
        Ok(())
    }
}

impl FromStr for ImplementationVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImplementationVersion {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImplementationVersion> for String {
    fn from(version: ImplementationVersion) -> Self {
        version.to_string()
    }
}

/// A `<version not-before=".." before="..">` constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraint {
    /// Lowest acceptable version (inclusive).
    pub not_before: Option<ImplementationVersion>,
    /// Upper limit (exclusive).
    pub before: Option<ImplementationVersion>,
}

impl Constraint {
    /// Whether `version` lies within the constraint.
    pub fn matches(&self, version: &ImplementationVersion) -> bool {
        self.not_before.as_ref().is_none_or(|nb| version >= nb)
            && self.before.as_ref().is_none_or(|b| version < b)
    }

    /// Whether neither bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.not_before.is_none() && self.before.is_none()
    }
}

/// One `|`-separated element of a [`VersionRange`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRangePart {
    /// Exactly this version.
    Exact(ImplementationVersion),
    /// Anything except this version.
    Exclude(ImplementationVersion),
    /// `start..!end`, either bound optional.
    Range {
        /// Inclusive lower bound.
        start: Option<ImplementationVersion>,
        /// Exclusive upper bound.
        end: Option<ImplementationVersion>,
    },
    /// `start..!end&!excluded`: a range with one version taken out.
    Except {
        /// Inclusive lower bound.
        start: Option<ImplementationVersion>,
        /// Exclusive upper bound.
        end: Option<ImplementationVersion>,
        /// Version inside the bounds that is not accepted.
        excluded: ImplementationVersion,
    },
}

impl VersionRangePart {
    fn parse(value: &str) -> Option<Self> {
        if let Some((range, excluded)) = value.split_once('&') {
            let Self::Range { start, end } = Self::parse(range.trim())? else {
                return None;
            };
            let excluded = ImplementationVersion::parse(excluded.trim().strip_prefix('!')?).ok()?;
            return Some(Self::Except { start, end, excluded });
        }
        if let Some((start, end)) = value.split_once("..") {
            let start = match start.trim() {
                "" => None,
                s => Some(ImplementationVersion::parse(s).ok()?),
            };
            let end = match end.trim() {
                "" => None,
                e => Some(ImplementationVersion::parse(e.strip_prefix('!')?).ok()?),
            };
            Some(Self::Range { start, end })
        } else if let Some(excluded) = value.strip_prefix('!') {
            Some(Self::Exclude(ImplementationVersion::parse(excluded).ok()?))
        } else {
            Some(Self::Exact(ImplementationVersion::parse(value).ok()?))
        }
    }

    /// Whether `version` is accepted by this part.
    pub fn matches(&self, version: &ImplementationVersion) -> bool {
        match self {
            Self::Exact(v) => version == v,
            Self::Exclude(v) => version != v,
            Self::Range { start, end } => in_bounds(version, start.as_ref(), end.as_ref()),
            Self::Except { start, end, excluded } => {
                version != excluded && in_bounds(version, start.as_ref(), end.as_ref())
            }
        }
    }

    fn intersect(&self, constraint: &Constraint) -> Option<Self> {
        match self {
            Self::Exact(v) => constraint.matches(v).then(|| self.clone()),
            Self::Exclude(v) => Some(Self::narrowed(None, None, Some(v), constraint)),
            Self::Range { start, end } => {
                let (start, end) = clamp(start.as_ref(), end.as_ref(), constraint)?;
                Some(Self::Range { start, end })
            }
            Self::Except { start, end, excluded } => {
                let (start, end) = clamp(start.as_ref(), end.as_ref(), constraint)?;
                Some(Self::narrowed(start.as_ref(), end.as_ref(), Some(excluded), constraint))
            }
        }
    }

    /// `start..!end` within `constraint`, minus `excluded` if that still lies inside.
    fn narrowed(
        start: Option<&ImplementationVersion>,
        end: Option<&ImplementationVersion>,
        excluded: Option<&ImplementationVersion>,
        constraint: &Constraint,
    ) -> Self {
        let start = max_bound(start, constraint.not_before.as_ref());
        let end = min_bound(end, constraint.before.as_ref());
        match excluded {
            Some(v) if in_bounds(v, start.as_ref(), end.as_ref()) => Self::Except {
                start,
                end,
                excluded: v.clone(),
            },
            _ => Self::Range { start, end },
        }
    }
}

fn in_bounds(
    version: &ImplementationVersion,
    start: Option<&ImplementationVersion>,
    end: Option<&ImplementationVersion>,
) -> bool {
    start.is_none_or(|s| version >= s) && end.is_none_or(|e| version < e)
}

/// Bounds narrowed by `constraint`, or `None` if nothing is left.
fn clamp(
    start: Option<&ImplementationVersion>,
    end: Option<&ImplementationVersion>,
    constraint: &Constraint,
) -> Option<(Option<ImplementationVersion>, Option<ImplementationVersion>)> {
    let start = max_bound(start, constraint.not_before.as_ref());
    let end = min_bound(end, constraint.before.as_ref());
    if let (Some(s), Some(e)) = (&start, &end) {
        if s >= e {
            return None;
        }
    }
    Some((start, end))
}

fn max_bound(
    a: Option<&ImplementationVersion>,
    b: Option<&ImplementationVersion>,
) -> Option<ImplementationVersion> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b).clone()),
        (a, b) => a.or(b).cloned(),
    }
}

fn min_bound(
    a: Option<&ImplementationVersion>,
    b: Option<&ImplementationVersion>,
) -> Option<ImplementationVersion> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b).clone()),
        (a, b) => a.or(b).cloned(),
    }
}

impl fmt::Display for VersionRangePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::Exclude(v) => write!(f, "!{v}"),
            Self::Range { start, end } => write_bounds(f, start.as_ref(), end.as_ref()),
            Self::Except { start, end, excluded } => {
                write_bounds(f, start.as_ref(), end.as_ref())?;
                write!(f, "&!{excluded}")
            }
        }
    }
}

fn write_bounds(
    f: &mut fmt::Formatter<'_>,
    start: Option<&ImplementationVersion>,
    end: Option<&ImplementationVersion>,
) -> fmt::Result {
    if let Some(start) = start {
        write!(f, "{start}")?;
    }
    f.write_str("..")?;
    if let Some(end) = end {
        write!(f, "!{end}")?;
    }
    Ok(())
}

/// A union of version constraints.
///
/// An empty range matches every version.
///
/// # Example
///
/// ```
/// use zi_schema::{ImplementationVersion, VersionRange};
///
/// let range: VersionRange = "1.0..!2.0 | 3.0".parse().unwrap();
/// assert!(range.matches(&"1.5".parse::<ImplementationVersion>().unwrap()));
/// assert!(!range.matches(&"2.0".parse::<ImplementationVersion>().unwrap()));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    parts: Vec<VersionRangePart>,
}

impl VersionRange {
    /// Parse a `|`-separated range expression.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::VersionRange`] if any part is malformed.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Self::default());
        }
        let parts = value
            .split('|')
            .map(|p| VersionRangePart::parse(p.trim()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ParseError::VersionRange(value.to_string()))?;
        Ok(Self { parts })
    }

    /// A range that matches nothing.
    pub fn none() -> Self {
        let zero = ImplementationVersion {
            first: DottedList(vec![0]),
            additional: Vec::new(),
        };
        Self {
            parts: vec![VersionRangePart::Range {
                start: Some(zero.clone()),
                end: Some(zero),
            }],
        }
    }

    /// A range matching exactly one version.
    pub fn exact(version: ImplementationVersion) -> Self {
        Self {
            parts: vec![VersionRangePart::Exact(version)],
        }
    }

    /// Whether the range has no parts, i.e. matches everything.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The parts of the range.
    pub fn parts(&self) -> &[VersionRangePart] {
        &self.parts
    }

    /// Whether `version` satisfies any part of the range.
    pub fn matches(&self, version: &ImplementationVersion) -> bool {
        self.parts.is_empty() || self.parts.iter().any(|p| p.matches(version))
    }

    /// Narrow the range by a not-before/before constraint.
    pub fn intersect(&self, constraint: &Constraint) -> Self {
        if constraint.is_unbounded() {
            return self.clone();
        }
        if self.parts.is_empty() {
            return Self::from(constraint.clone());
        }
        let parts: Vec<_> = self
            .parts
            .iter()
            .filter_map(|p| p.intersect(constraint))
            .collect();
        if parts.is_empty() {
            Self::none()
        } else {
            Self { parts }
        }
    }
}

impl From<Constraint> for VersionRange {
    fn from(constraint: Constraint) -> Self {
        if constraint.is_unbounded() {
            return Self::default();
        }
        Self {
            parts: vec![VersionRangePart::Range {
                start: constraint.not_before,
                end: constraint.before,
            }],
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionRange {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionRange> for String {
    fn from(range: VersionRange) -> Self {
        range.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ImplementationVersion {
        s.parse().unwrap()
    }

    #[test]
    fn modifier_ordering() {
        let ordered = [
            "0.9", "1.0-pre", "1.0-pre2", "1.0-rc1", "1.0", "1.0-1", "1.0-post", "1.0.1", "2",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn prefix_is_smaller() {
        assert!(v("1.2") < v("1.2.0"));
        assert!(v("1.10") > v("1.9"));
    }

    #[test]
    fn trailing_default_parts_are_equal() {
        assert_eq!(v("1.0"), v("1.0-"));
        assert_eq!(v("1.0-rc1").to_string(), "1.0-rc1");
    }

    #[test]
    fn rejects_malformed_versions() {
        for bad in ["", "-1", "1.a", "1..2", "1.0-beta"] {
            assert!(ImplementationVersion::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn range_parts() {
        let range = VersionRange::parse("..!1.0 | 2.0 | !2.5 ").unwrap();
        assert_eq!(range.parts().len(), 3);
        assert!(range.matches(&v("0.5")));
        assert!(range.matches(&v("3.0"))); // via !2.5
        assert_eq!(range.to_string(), "..!1.0|2.0|!2.5");

        assert!(VersionRange::parse("1.0..2.0").is_err());
        assert!(VersionRange::default().matches(&v("42")));
        assert!(!VersionRange::none().matches(&v("0")));
        assert!(!VersionRange::none().matches(&v("1.0")));
    }

    #[test]
    fn intersect_with_constraint() {
        let constraint = Constraint {
            not_before: Some(v("1.0")),
            before: Some(v("2.0")),
        };

        let empty = VersionRange::default().intersect(&constraint);
        assert_eq!(empty.to_string(), "1.0..!2.0");

        let exact = VersionRange::parse("1.5|2.5").unwrap().intersect(&constraint);
        assert_eq!(exact.to_string(), "1.5");

        let clamped = VersionRange::parse("0.5..!1.5").unwrap().intersect(&constraint);
        assert_eq!(clamped.to_string(), "1.0..!1.5");

        let disjoint = VersionRange::parse("3.0..").unwrap().intersect(&constraint);
        assert_eq!(disjoint, VersionRange::none());

        let excluded_outside = VersionRange::parse("!3.0").unwrap().intersect(&constraint);
        assert_eq!(excluded_outside.to_string(), "1.0..!2.0");
    }

    #[test]
    fn exclusion_inside_constraint_survives_intersection() {
        let constraint = Constraint {
            not_before: Some(v("1.0")),
            before: Some(v("2.0")),
        };
        let range = VersionRange::parse("!1.5").unwrap().intersect(&constraint);
        assert_eq!(range.to_string(), "1.0..!2.0&!1.5");
        assert!(range.matches(&v("1.2")));
        assert!(range.matches(&v("1.6")));
        assert!(!range.matches(&v("1.5")));
        assert!(!range.matches(&v("2.0")));
        assert_eq!(VersionRange::parse(&range.to_string()).unwrap(), range);

        // A later constraint that cuts the exclusion off leaves a plain range
        let narrower = range.intersect(&Constraint {
            not_before: Some(v("1.6")),
            before: None,
        });
        assert_eq!(narrower.to_string(), "1.6..!2.0");
        let capped = range.intersect(&Constraint {
            not_before: None,
            before: Some(v("1.8")),
        });
        assert_eq!(capped.to_string(), "1.0..!1.8&!1.5");
    }
}
