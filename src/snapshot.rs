//! Immutable configuration snapshots and the lock-free store that publishes them.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::flatten::FlatEntry;
use crate::utils::{normalize_key, ConsulConfigError, Result};

/// A complete flat configuration as of one successful fetch.
///
/// Paths compare case-insensitively. A snapshot is never modified after it is built;
/// refreshes publish a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    entries: BTreeMap<String, FlatEntry>,
    index: Option<u64>,
}

impl ConfigSnapshot {
    /// Build a snapshot, failing on the first case-insensitive path collision.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = FlatEntry>,
    {
        let mut builder = SnapshotBuilder::default();
        for entry in entries {
            builder.insert(entry)?;
        }
        Ok(builder.build(None))
    }

    /// Value at `path`. Keys holding `null` read as absent.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.get_entry(path).and_then(|e| e.value.as_deref())
    }

    /// Entry at `path`, distinguishing a `null` value from a missing key.
    pub fn get_entry(&self, path: &str) -> Option<&FlatEntry> {
        self.entries.get(&normalize_key(path))
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.entries.contains_key(&normalize_key(path))
    }

    /// The `X-Consul-Index` this snapshot was built from.
    pub fn index(&self) -> Option<u64> {
        self.index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by their case-folded path.
    pub fn iter(&self) -> impl Iterator<Item = &FlatEntry> {
        self.entries.values()
    }
}

/// Accumulates entries from several flattened records into one snapshot.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    entries: BTreeMap<String, FlatEntry>,
}

impl SnapshotBuilder {
    pub fn insert(&mut self, entry: FlatEntry) -> Result<()> {
        let key = normalize_key(&entry.path);
        if let Some(existing) = self.entries.get(&key) {
            return Err(ConsulConfigError::DuplicateKeyConflict {
                path: entry.path,
                existing: existing.path.clone(),
            });
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn build(self, index: Option<u64>) -> ConfigSnapshot {
        ConfigSnapshot {
            entries: self.entries,
            index,
        }
    }
}

/// Holds the currently published snapshot.
///
/// Readers never block and always see a whole snapshot; the watch task is the only writer.
#[derive(Debug)]
pub struct SnapshotStore {
    current: ArcSwap<ConfigSnapshot>,
}

impl SnapshotStore {
    pub fn new(initial: ConfigSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn load(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Replace the published snapshot and return the new reference.
    pub fn publish(&self, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.current.store(Arc::clone(&snapshot));
        snapshot
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(ConfigSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, value: &str) -> FlatEntry {
        FlatEntry::new(path, Some(value.to_string()))
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let snapshot = ConfigSnapshot::from_entries(vec![entry("Database:Host", "db1")]).unwrap();
        assert_eq!(snapshot.get("database:host"), Some("db1"));
        assert_eq!(snapshot.get("DATABASE:HOST"), Some("db1"));
        assert_eq!(snapshot.get_entry("database:host").unwrap().path, "Database:Host");
    }

    #[test]
    fn test_null_entry_reads_as_absent_but_is_present() {
        let snapshot = ConfigSnapshot::from_entries(vec![
            FlatEntry::new("feature", None),
            entry("empty", ""),
        ])
        .unwrap();
        assert_eq!(snapshot.get("feature"), None);
        assert!(snapshot.contains_path("feature"));
        assert_eq!(snapshot.get_entry("feature").unwrap().value, None);
        assert_eq!(snapshot.get("empty"), Some(""));
        assert!(!snapshot.contains_path("other"));
    }

    #[test]
    fn test_case_collision_is_rejected() {
        let err = ConfigSnapshot::from_entries(vec![entry("A", "1"), entry("a", "2")]).unwrap_err();
        match err {
            ConsulConfigError::DuplicateKeyConflict { path, existing } => {
                assert_eq!(path, "a");
                assert_eq!(existing, "A");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_builder_carries_index() {
        let mut builder = SnapshotBuilder::default();
        builder.insert(entry("k", "v")).unwrap();
        let snapshot = builder.build(Some(42));
        assert_eq!(snapshot.index(), Some(42));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = ConfigSnapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.index(), None);
        assert_eq!(snapshot.iter().count(), 0);
    }

    #[test]
    fn test_publish_replaces_whole_snapshot() {
        let store = SnapshotStore::new(ConfigSnapshot::from_entries(vec![entry("old", "1")]).unwrap());
        let before = store.load();
        store.publish(ConfigSnapshot::from_entries(vec![entry("new", "2")]).unwrap());
        let after = store.load();

        // Previously loaded references are unaffected.
        assert_eq!(before.get("old"), Some("1"));
        assert_eq!(after.get("old"), None);
        assert_eq!(after.get("new"), Some("2"));
    }

    #[test]
    fn test_concurrent_readers_see_complete_snapshots() {
        const KEYS: usize = 16;

        fn generation(n: usize) -> ConfigSnapshot {
            let entries = (0..KEYS).map(|i| entry(&format!("key:{}", i), &n.to_string()));
            ConfigSnapshot::from_entries(entries).unwrap()
        }

        let store = Arc::new(SnapshotStore::new(generation(0)));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = store.load();
                        assert_eq!(snapshot.len(), KEYS);
                        let first = snapshot.get("key:0").unwrap().to_string();
                        assert!(snapshot.iter().all(|e| e.value.as_deref() == Some(first.as_str())));
                    }
                });
            }

            let writer = Arc::clone(&store);
            scope.spawn(move || {
                for n in 1..=500 {
                    writer.publish(generation(n));
                }
            });
        });

        assert_eq!(store.load().get("key:3"), Some("500"));
    }
}
