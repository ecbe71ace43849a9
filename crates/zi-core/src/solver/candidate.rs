//! Candidate implementations and their ranking.

use std::cmp::Ordering;

use zi_schema::{Implementation, Stability};

use crate::config::NetworkLevel;

/// An implementation the solver may choose for an interface.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The implementation as read from its feed.
    pub implementation: Implementation,
    /// Whether it is available without downloading.
    pub cached: bool,
    /// Position in feed order.
    pub order: usize,
}

/// Ranks candidates; the best candidate sorts first.
pub trait CandidateComparer: Send + Sync {
    /// Compare two candidates for the same interface.
    fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering;
}

/// Default ranking.
///
/// In order: acceptable stability, cached (unless network use is full),
/// higher version, more specific architecture, cached, feed order.
#[derive(Debug, Clone, Copy)]
pub struct DefaultComparer {
    /// Network policy; below `Full` cached candidates win over newer ones.
    pub network_use: NetworkLevel,
    /// Accept `testing` as readily as `stable`.
    pub help_with_testing: bool,
}

impl DefaultComparer {
    fn preferred_stability(&self) -> Stability {
        if self.help_with_testing {
            Stability::Testing
        } else {
            Stability::Stable
        }
    }
}

impl CandidateComparer for DefaultComparer {
    fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        let threshold = self.preferred_stability();
        let (ia, ib) = (&a.implementation, &b.implementation);

        let stability = |c: &Implementation| c.stability >= threshold;
        stability(ib)
            .cmp(&stability(ia))
            .then_with(|| {
                if self.network_use == NetworkLevel::Full {
                    Ordering::Equal
                } else {
                    b.cached.cmp(&a.cached)
                }
            })
            .then_with(|| ib.version.cmp(&ia.version))
            .then_with(|| {
                ib.architecture
                    .specificity()
                    .cmp(&ia.architecture.specificity())
            })
            .then_with(|| b.cached.cmp(&a.cached))
            .then_with(|| a.order.cmp(&b.order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zi_schema::FeedUri;

    fn candidate(version: &str, stability: Stability, cached: bool, order: usize) -> Candidate {
        let xml = format!(
            r#"<interface xmlns="http://zero-install.sourceforge.net/2004/injector/interface">
                 <name>x</name>
                 <implementation id="sha1new=a{order}" version="{version}" stability="{stability}"/>
               </interface>"#
        );
        let uri = FeedUri::parse("http://example.com/x.xml").unwrap();
        let feed = zi_schema::Feed::parse(&xml, &uri).unwrap();
        Candidate {
            implementation: feed.implementations[0].clone(),
            cached,
            order,
        }
    }

    fn sorted(comparer: &DefaultComparer, mut list: Vec<Candidate>) -> Vec<String> {
        list.sort_by(|a, b| comparer.compare(a, b));
        list.iter()
            .map(|c| c.implementation.version.to_string())
            .collect()
    }

    #[test]
    fn prefers_stable_then_newer() {
        let comparer = DefaultComparer {
            network_use: NetworkLevel::Full,
            help_with_testing: false,
        };
        let list = vec![
            candidate("1.0", Stability::Stable, false, 0),
            candidate("2.0", Stability::Testing, false, 1),
            candidate("1.5", Stability::Stable, false, 2),
        ];
        assert_eq!(sorted(&comparer, list.clone()), ["1.5", "1.0", "2.0"]);

        let testing = DefaultComparer {
            help_with_testing: true,
            ..comparer
        };
        assert_eq!(sorted(&testing, list), ["2.0", "1.5", "1.0"]);
    }

    #[test]
    fn minimal_network_prefers_cached() {
        let comparer = DefaultComparer {
            network_use: NetworkLevel::Minimal,
            help_with_testing: false,
        };
        let list = vec![
            candidate("2.0", Stability::Stable, false, 0),
            candidate("1.0", Stability::Stable, true, 1),
        ];
        assert_eq!(sorted(&comparer, list.clone()), ["1.0", "2.0"]);

        let full = DefaultComparer {
            network_use: NetworkLevel::Full,
            ..comparer
        };
        assert_eq!(sorted(&full, list), ["2.0", "1.0"]);
    }
}
