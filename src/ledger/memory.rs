// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory [`KvStore`] for tests and ephemeral ledgers.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{page_from_map, Entry, KeyRange, KvStore, LedgerError, LedgerResult, WriteSet};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn page(
        &self,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> LedgerResult<Vec<Entry>> {
        let entries = self.entries.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(page_from_map(&entries, range, after, limit, |v| Some(v.clone())))
    }

    fn commit(&self, writes: &WriteSet) -> LedgerResult<()> {
        let mut entries = self.entries.write().map_err(|_| LedgerError::Poisoned)?;
        for (key, value) in writes {
            match value {
                Some(bytes) => {
                    entries.insert(key.clone(), bytes.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_applies_puts_and_deletes() {
        let store = MemoryStore::new();
        let mut writes = WriteSet::new();
        writes.insert("a".into(), Some(b"1".to_vec()));
        writes.insert("b".into(), Some(b"2".to_vec()));
        store.commit(&writes).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));

        let mut writes = WriteSet::new();
        writes.insert("a".into(), None);
        store.commit(&writes).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn page_walks_descending() {
        let store = MemoryStore::new();
        let mut writes = WriteSet::new();
        for i in 0..5 {
            writes.insert(format!("log/{i}"), Some(vec![i]));
        }
        store.commit(&writes).unwrap();

        let range = KeyRange::prefix("log/", false);
        let first = store.page(&range, None, 2).unwrap();
        assert_eq!(first[0].0, "log/4");
        let second = store.page(&range, Some(&first[1].0), 2).unwrap();
        assert_eq!(second[0].0, "log/2");
    }
}
