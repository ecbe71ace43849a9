//! Catalogs: merged lists of feeds used to look up applications by name.

use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

use crate::feed::Feed;
use crate::xml::Element;
use crate::{FeedUri, ParseError};

/// XML namespace of catalog documents.
pub const CATALOG_NAMESPACE: &str = "http://0install.de/schema/injector/catalog";

/// A set of feed summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    /// Feeds in source order.
    pub feeds: Vec<Feed>,
}

impl Catalog {
    /// Parse a `<catalog>` document downloaded from `source`.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the document is malformed or contains a
    /// feed without a URI.
    pub fn parse(xml: &str, source: &FeedUri) -> Result<Self, ParseError> {
        let root = Element::parse(xml)?;
        if root.name != "catalog" {
            return Err(ParseError::invalid("root element", root.name));
        }
        let feeds = root
            .children_named("interface")
            .map(|el| {
                if el.attr("uri").is_none() {
                    return Err(ParseError::missing("attribute 'uri'", "interface"));
                }
                Feed::from_element(el, source)
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { feeds })
    }

    /// Combine several catalogs; the first occurrence of a feed URI wins.
    pub fn merge(catalogs: impl IntoIterator<Item = Catalog>) -> Self {
        let mut merged = Self::default();
        for catalog in catalogs {
            for feed in catalog.feeds {
                if !merged.contains(&feed.uri) {
                    merged.feeds.push(feed);
                }
            }
        }
        merged
    }

    /// Whether a feed with this URI is listed.
    pub fn contains(&self, uri: &FeedUri) -> bool {
        self.feeds.iter().any(|f| f.uri == *uri)
    }

    /// Feed by URI.
    pub fn get(&self, uri: &FeedUri) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.uri == *uri)
    }

    /// Find a feed by a short name such as `firefox`.
    ///
    /// Matches the feed name case-insensitively, the name with spaces replaced
    /// by dashes, and the binary names of entry points.
    pub fn find_by_short_name(&self, short_name: &str) -> Option<&Feed> {
        if short_name.is_empty() {
            return None;
        }
        self.feeds.iter().find(|feed| {
            feed.name.eq_ignore_ascii_case(short_name)
                || feed.name.replace(' ', "-").eq_ignore_ascii_case(short_name)
                || feed
                    .entry_points
                    .iter()
                    .filter_map(|e| e.binary_name.as_deref())
                    .any(|b| b.eq_ignore_ascii_case(short_name))
        })
    }

    /// Feeds matching `query`, best match first.
    ///
    /// An empty query returns every feed.
    pub fn search(&self, query: &str) -> Vec<&Feed> {
        if query.is_empty() {
            return self.feeds.iter().collect();
        }
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, &Feed)> = self
            .feeds
            .iter()
            .filter_map(|feed| {
                let haystack = format!(
                    "{} {} {}",
                    feed.name,
                    feed.summary.as_deref().unwrap_or_default(),
                    feed.uri
                );
                matcher.fuzzy_match(&haystack, query).map(|score| {
                    let bonus = if feed.name.eq_ignore_ascii_case(query) { 1000 } else { 0 };
                    (score + bonus, feed)
                })
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, feed)| feed).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> FeedUri {
        FeedUri::parse("http://example.com/catalog.xml").unwrap()
    }

    const CATALOG: &str = r#"<catalog xmlns="http://0install.de/schema/injector/catalog">
  <interface xmlns="http://zero-install.sourceforge.net/2004/injector/interface" uri="http://example.com/firefox.xml">
    <name>Mozilla Firefox</name><summary>web browser</summary>
    <entry-point command="run" binary-name="firefox"/>
  </interface>
  <interface uri="http://example.com/vlc.xml"><name>VLC</name><summary>media player</summary></interface>
</catalog>"#;

    #[test]
    fn short_names() {
        let catalog = Catalog::parse(CATALOG, &source()).unwrap();
        assert_eq!(catalog.feeds.len(), 2);
        assert_eq!(catalog.find_by_short_name("vlc").unwrap().name, "VLC");
        assert_eq!(catalog.find_by_short_name("mozilla-firefox").unwrap().name, "Mozilla Firefox");
        assert_eq!(catalog.find_by_short_name("FIREFOX").unwrap().name, "Mozilla Firefox");
        assert!(catalog.find_by_short_name("emacs").is_none());
    }

    #[test]
    fn search_ranks_matches() {
        let catalog = Catalog::parse(CATALOG, &source()).unwrap();
        let results = catalog.search("media");
        assert_eq!(results[0].name, "VLC");
        assert_eq!(catalog.search("").len(), 2);
    }

    #[test]
    fn merge_keeps_first_occurrence() {
        let a = Catalog::parse(CATALOG, &source()).unwrap();
        let b = Catalog::parse(CATALOG, &source()).unwrap();
        assert_eq!(Catalog::merge([a, b]).feeds.len(), 2);
    }
}
