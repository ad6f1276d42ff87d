//! Insertion-ordered, name-indexed collection of entries.
//!
//! Backed by `IndexMap` the same way `ExtraField` is: name lookup is O(1),
//! iteration preserves the order entries were added (or parsed from the
//! central directory), and deletion doesn't reshuffle the rest of the set.

use indexmap::IndexMap;

use crate::entry::Entry;
use crate::error::{Result, ZipError};

/// A named, ordered collection of archive entries.
#[derive(Debug, Clone, Default)]
pub struct EntrySet {
    entries: IndexMap<String, Entry>,
}

impl EntrySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn include(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn find_entry(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn find_entry_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.entries.get_mut(name)
    }

    /// Insert `entry`, replacing any existing entry of the same name.
    /// Returns the replaced entry, if there was one.
    pub fn insert(&mut self, entry: Entry) -> Option<Entry> {
        self.entries.insert(entry.name.clone(), entry)
    }

    /// Insert `entry`, failing with `EntryExists` if the name is already taken.
    pub fn add(&mut self, entry: Entry) -> Result<()> {
        if self.entries.contains_key(&entry.name) {
            return Err(ZipError::EntryExists { name: entry.name });
        }
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Option<Entry> {
        self.entries.shift_remove(name)
    }

    /// Rename an entry in place, preserving its position and failing if
    /// either the source doesn't exist or the destination is already taken.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.entries.contains_key(from) {
            return Err(ZipError::NotFound { name: from.to_string() });
        }
        if from != to && self.entries.contains_key(to) {
            return Err(ZipError::EntryExists { name: to.to_string() });
        }
        let index = self.entries.get_index_of(from).unwrap();
        let (_, mut entry) = self.entries.swap_remove_index(index).unwrap();
        entry.name = to.to_string();
        entry.dirty = true;
        // Re-insert at the end; callers that care about stable ordering
        // across renames should re-sort afterwards.
        self.entries.insert(to.to_string(), entry);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.values_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// Sort entries by name. The central directory is conventionally
    /// written in this order, though nothing in the format requires it.
    pub fn sort_by_name(&mut self) {
        self.entries.sort_unstable_keys();
    }

    /// Entries whose name matches a shell glob pattern.
    pub fn glob(&self, pattern: &str) -> Result<Vec<&Entry>> {
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| ZipError::Argument(format!("invalid glob pattern {pattern:?}: {e}")))?;
        Ok(self
            .entries
            .values()
            .filter(|e| compiled.matches(&e.name))
            .collect())
    }

    /// A deep copy: every entry is cloned independently.
    pub fn dup(&self) -> Self {
        self.clone()
    }
}

impl PartialEq for EntrySet {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((an, ae), (bn, be))| an == bn && ae == be)
    }
}

impl Eq for EntrySet {}

impl<'a> IntoIterator for &'a EntrySet {
    type Item = &'a Entry;
    type IntoIter = indexmap::map::Values<'a, String, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}

impl FromIterator<Entry> for EntrySet {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        let mut set = EntrySet::new();
        for entry in iter {
            set.insert(entry);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> Entry {
        Entry::new(name).unwrap()
    }

    #[test]
    fn add_rejects_duplicate_names() {
        let mut set = EntrySet::new();
        set.add(entry("a.txt")).unwrap();
        let err = set.add(entry("a.txt")).unwrap_err();
        assert!(matches!(err, ZipError::EntryExists { .. }));
    }

    #[test]
    fn insert_replaces_silently() {
        let mut set = EntrySet::new();
        set.insert(entry("a.txt"));
        let mut replacement = entry("a.txt");
        replacement.comment = "v2".to_string();
        let old = set.insert(replacement);
        assert!(old.is_some());
        assert_eq!(set.find_entry("a.txt").unwrap().comment, "v2");
    }

    #[test]
    fn delete_removes_and_preserves_remaining_order() {
        let mut set = EntrySet::new();
        for n in ["a", "b", "c"] {
            set.add(entry(n)).unwrap();
        }
        set.delete("b");
        let names: Vec<&str> = set.names().collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn rename_moves_content_to_new_name() {
        let mut set = EntrySet::new();
        set.add(entry("old.txt")).unwrap();
        set.rename("old.txt", "new.txt").unwrap();
        assert!(!set.include("old.txt"));
        assert!(set.include("new.txt"));
        assert!(set.find_entry("new.txt").unwrap().dirty);
    }

    #[test]
    fn rename_onto_existing_name_fails() {
        let mut set = EntrySet::new();
        set.add(entry("a.txt")).unwrap();
        set.add(entry("b.txt")).unwrap();
        let err = set.rename("a.txt", "b.txt").unwrap_err();
        assert!(matches!(err, ZipError::EntryExists { .. }));
    }

    #[test]
    fn rename_missing_source_fails() {
        let mut set = EntrySet::new();
        let err = set.rename("missing.txt", "x.txt").unwrap_err();
        assert!(matches!(err, ZipError::NotFound { .. }));
    }

    #[test]
    fn glob_matches_shell_style_patterns() {
        let mut set = EntrySet::new();
        for n in ["src/a.rs", "src/b.rs", "docs/readme.md"] {
            set.add(entry(n)).unwrap();
        }
        let matched = set.glob("src/*.rs").unwrap();
        let mut names: Vec<&str> = matched.iter().map(|e| e.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn glob_rejects_invalid_pattern() {
        let set = EntrySet::new();
        let err = set.glob("[").unwrap_err();
        assert!(matches!(err, ZipError::Argument(_)));
    }

    #[test]
    fn dup_is_independent_of_original() {
        let mut set = EntrySet::new();
        set.add(entry("a.txt")).unwrap();
        let mut copy = set.dup();
        copy.delete("a.txt");
        assert!(set.include("a.txt"));
        assert!(!copy.include("a.txt"));
    }

    #[test]
    fn equality_compares_entries_not_identity() {
        let mut a = EntrySet::new();
        let mut b = EntrySet::new();
        a.add(entry("a.txt")).unwrap();
        b.add(entry("a.txt")).unwrap();
        assert_eq!(a, b);
        b.add(entry("b.txt")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn sort_by_name_orders_entries() {
        let mut set = EntrySet::new();
        for n in ["z", "a", "m"] {
            set.add(entry(n)).unwrap();
        }
        set.sort_by_name();
        let names: Vec<&str> = set.names().collect();
        assert_eq!(names, vec!["a", "m", "z"]);
    }
}
