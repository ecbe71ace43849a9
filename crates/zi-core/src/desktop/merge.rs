//! Set-difference merges of keyed collections.

use std::collections::HashSet;
use std::hash::Hash;

/// Elements to add to and remove from "mine" so it matches "theirs".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    /// Present in theirs but not in mine.
    pub added: Vec<T>,
    /// Present in mine but not in theirs.
    pub removed: Vec<T>,
}

impl<T> Default for Diff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<T> Diff<T> {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// An element with a stable identity and a modification time.
pub trait Mergeable {
    /// Identity used to match elements across collections.
    fn merge_id(&self) -> &str;

    /// Last modification, seconds since the epoch.
    fn timestamp(&self) -> i64;
}

/// Two-way merge keyed by `key`. Elements present on both sides are left alone.
pub fn two_way_by<T, K, F>(theirs: &[T], mine: &[T], key: F) -> Diff<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let their_keys: HashSet<K> = theirs.iter().map(&key).collect();
    let my_keys: HashSet<K> = mine.iter().map(&key).collect();
    Diff {
        added: theirs
            .iter()
            .filter(|x| !my_keys.contains(&key(*x)))
            .cloned()
            .collect(),
        removed: mine
            .iter()
            .filter(|x| !their_keys.contains(&key(*x)))
            .cloned()
            .collect(),
    }
}

/// Two-way merge using full equality.
pub fn two_way<T: Clone + PartialEq>(theirs: &[T], mine: &[T]) -> Diff<T> {
    Diff {
        added: theirs.iter().filter(|x| !mine.contains(x)).cloned().collect(),
        removed: mine.iter().filter(|x| !theirs.contains(x)).cloned().collect(),
    }
}

/// Three-way merge of `theirs` into `mine` relative to the common `reference`.
///
/// Elements new in theirs are added, elements theirs dropped since the
/// reference are removed, and elements changed on both sides take the newer
/// version (reported as a removal of mine plus an addition of theirs).
pub fn three_way<T: Mergeable + Clone + PartialEq>(reference: &[T], theirs: &[T], mine: &[T]) -> Diff<T> {
    let find = |list: &[T], id: &str| list.iter().find(|x| x.merge_id() == id).cloned();
    let mut diff = Diff::default();

    for their in theirs {
        let id = their.merge_id();
        match find(mine, id) {
            None if find(reference, id).is_none() => diff.added.push(their.clone()),
            Some(my) if my != *their && their.timestamp() > my.timestamp() => {
                diff.removed.push(my);
                diff.added.push(their.clone());
            }
            _ => {}
        }
    }
    for my in mine {
        let id = my.merge_id();
        if find(theirs, id).is_none() && find(reference, id).is_some() {
            diff.removed.push(my.clone());
        }
    }
    diff
}
