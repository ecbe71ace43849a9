//! Cross-referencing selections with the store.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use zi_schema::{FeedUri, Implementation, ImplementationSelection, ImplementationVersion, Selections};

use crate::feeds::{FeedError, FeedProvider};
use crate::store::ImplementationStore;

/// Finds which selected implementations still need to be fetched.
pub struct SelectionsManager {
    feeds: Arc<dyn FeedProvider>,
    store: Arc<dyn ImplementationStore>,
}

impl fmt::Debug for SelectionsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionsManager")
            .field("store", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl SelectionsManager {
    /// Manager reading feeds from `feeds` and checking `store`.
    pub fn new(feeds: Arc<dyn FeedProvider>, store: Arc<dyn ImplementationStore>) -> Self {
        Self { feeds, store }
    }

    fn is_cached(&self, selection: &ImplementationSelection) -> bool {
        selection.local_path.is_some()
            || selection.id.starts_with("package:")
            || self.store.contains(&selection.manifest_digest)
    }

    /// Selections whose implementation is neither local nor in the store.
    ///
    /// Each digest is reported once.
    pub fn uncached_implementations<'s>(
        &self,
        selections: &'s Selections,
    ) -> Vec<&'s ImplementationSelection> {
        let mut seen = HashSet::new();
        selections
            .implementations
            .iter()
            .filter(|s| !self.is_cached(s))
            .filter(|s| seen.insert(s.manifest_digest.best().unwrap_or_else(|| s.id.clone())))
            .collect()
    }

    /// Uncached implementations across several selections, deduplicated by digest.
    pub fn uncached_of_many(&self, many: &[&Selections]) -> Vec<ImplementationSelection> {
        let mut seen = HashSet::new();
        many.iter()
            .flat_map(|s| self.uncached_implementations(s))
            .filter(|s| seen.insert(s.manifest_digest.best().unwrap_or_else(|| s.id.clone())))
            .cloned()
            .collect()
    }

    /// The feed entries (with retrieval methods) behind `selections`.
    ///
    /// # Errors
    ///
    /// Returns an error if a feed cannot be read or no longer lists the implementation.
    pub fn original_implementations(
        &self,
        selections: &[&ImplementationSelection],
    ) -> Result<Vec<Implementation>, FeedError> {
        selections
            .iter()
            .map(|selection| {
                let feed = self.feeds.get_feed(selection.feed())?;
                let mut implementation = feed
                    .implementation(&selection.id)
                    .cloned()
                    .ok_or_else(|| FeedError::ImplementationNotFound {
                        feed: selection.feed().clone(),
                        id: selection.id.clone(),
                    })?;
                implementation
                    .manifest_digest
                    .merge(&selection.manifest_digest);
                Ok(implementation)
            })
            .collect()
    }
}

/// A difference between two selections of the same interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionChange {
    /// A new interface is now selected.
    Added {
        interface: FeedUri,
        version: ImplementationVersion,
    },
    /// An interface is no longer selected.
    Removed {
        interface: FeedUri,
        version: ImplementationVersion,
    },
    /// An interface is selected at a different version.
    Changed {
        interface: FeedUri,
        old: ImplementationVersion,
        new: ImplementationVersion,
    },
}

impl fmt::Display for SelectionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added { interface, version } => write!(f, "{interface}: new -> {version}"),
            Self::Removed { interface, version } => write!(f, "{interface}: {version} -> none"),
            Self::Changed { interface, old, new } => write!(f, "{interface}: {old} -> {new}"),
        }
    }
}

/// Changes from `old` to `new`, in the order of `new` followed by removals.
pub fn diff(old: &Selections, new: &Selections) -> Vec<SelectionChange> {
    let mut changes = Vec::new();
    for selection in &new.implementations {
        match old.get(&selection.interface) {
            None => changes.push(SelectionChange::Added {
                interface: selection.interface.clone(),
                version: selection.version.clone(),
            }),
            Some(previous) if previous.version != selection.version => {
                changes.push(SelectionChange::Changed {
                    interface: selection.interface.clone(),
                    old: previous.version.clone(),
                    new: selection.version.clone(),
                });
            }
            Some(_) => {}
        }
    }
    for selection in &old.implementations {
        if !new.contains(&selection.interface) {
            changes.push(SelectionChange::Removed {
                interface: selection.interface.clone(),
                version: selection.version.clone(),
            });
        }
    }
    changes
}
