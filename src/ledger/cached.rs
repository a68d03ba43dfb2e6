// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-transaction cached stub.
//!
//! Wraps the host stub for the duration of one invocation.
//!
//! - Point reads are memoised in an LRU cache, so repeated edge and asset
//!   lookups cost one host read.
//! - In [`CacheMode::PutCache`] staged writes are visible to later reads and
//!   range scans of the same transaction. Call sites that create a key or
//!   edge and read it back in the same invocation need this mode.
//! - In [`CacheMode::PassThrough`] reads observe the committed snapshot,
//!   exactly like the host stub.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use super::{Entry, KeyRange, LedgerResult, LedgerStub};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    PassThrough,
    PutCache,
}

pub struct CachedStub<'a> {
    inner: &'a dyn LedgerStub,
    mode: CacheMode,
    reads: RefCell<LruCache<String, Option<Vec<u8>>>>,
    staged: RefCell<BTreeMap<String, Option<Vec<u8>>>>,
}

impl<'a> CachedStub<'a> {
    pub fn new(inner: &'a dyn LedgerStub, mode: CacheMode, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            mode,
            reads: RefCell::new(LruCache::new(capacity)),
            staged: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Staged entries of `range` strictly after `cursor`, and not past
    /// `boundary` when one is given.
    fn staged_in(
        &self,
        range: &KeyRange,
        cursor: Option<&str>,
        boundary: Option<&str>,
    ) -> Vec<(String, Option<Vec<u8>>)> {
        self.staged
            .borrow()
            .iter()
            .filter(|(k, _)| range.contains(k))
            .filter(|(k, _)| cursor.map_or(true, |c| range.is_after(k, c)))
            .filter(|(k, _)| boundary.map_or(true, |b| !range.is_after(k, b)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl LedgerStub for CachedStub<'_> {
    fn tx_id(&self) -> &str {
        self.inner.tx_id()
    }

    fn tx_timestamp(&self) -> i64 {
        self.inner.tx_timestamp()
    }

    fn function_and_parameters(&self) -> (String, Vec<String>) {
        self.inner.function_and_parameters()
    }

    fn get_state(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        if self.mode == CacheMode::PutCache {
            if let Some(value) = self.staged.borrow().get(key) {
                return Ok(value.clone());
            }
        }
        if let Some(hit) = self.reads.borrow_mut().get(key) {
            return Ok(hit.clone());
        }
        let value = self.inner.get_state(key)?;
        self.reads.borrow_mut().put(key.to_string(), value.clone());
        Ok(value)
    }

    fn put_state(&self, key: &str, value: Vec<u8>) -> LedgerResult<()> {
        if self.mode == CacheMode::PutCache {
            self.staged
                .borrow_mut()
                .insert(key.to_string(), Some(value.clone()));
        }
        self.inner.put_state(key, value)
    }

    fn delete_state(&self, key: &str) -> LedgerResult<()> {
        if self.mode == CacheMode::PutCache {
            self.staged.borrow_mut().insert(key.to_string(), None);
        }
        self.inner.delete_state(key)
    }

    fn state_page(
        &self,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> LedgerResult<Vec<Entry>> {
        if self.mode == CacheMode::PassThrough || self.staged.borrow().is_empty() {
            return self.inner.state_page(range, after, limit);
        }

        let mut cursor = after.map(str::to_owned);
        loop {
            let base = self.inner.state_page(range, cursor.as_deref(), limit)?;
            let full = base.len() >= limit;
            let boundary = if full {
                base.last().map(|(k, _)| k.clone())
            } else {
                None
            };

            let mut merged: BTreeMap<String, Vec<u8>> = base.into_iter().collect();
            // Staged keys past a full page's last key belong to a later page.
            for (key, value) in self.staged_in(range, cursor.as_deref(), boundary.as_deref()) {
                match value {
                    Some(bytes) => {
                        merged.insert(key, bytes);
                    }
                    None => {
                        merged.remove(&key);
                    }
                }
            }

            let mut page: Vec<Entry> = if range.ascending {
                merged.into_iter().collect()
            } else {
                merged.into_iter().rev().collect()
            };
            page.truncate(limit);

            // Every entry of a full page was deleted in this transaction.
            if page.is_empty() && boundary.is_some() {
                cursor = boundary;
                continue;
            }
            return Ok(page);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{KvStore, MemoryStore, StateRangeIter, TxStub, WriteSet};

    fn seeded_store(keys: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        let mut writes = WriteSet::new();
        for k in keys {
            writes.insert(k.to_string(), Some(k.as_bytes().to_vec()));
        }
        store.commit(&writes).unwrap();
        store
    }

    #[test]
    fn put_cache_makes_staged_writes_visible() {
        let store = seeded_store(&[]);
        let tx = TxStub::new(&store, "tx1", 0, "f", vec![]);
        let cached = CachedStub::new(&tx, CacheMode::PutCache, 16);

        cached.put_state("k", b"v".to_vec()).unwrap();
        assert_eq!(cached.get_state("k").unwrap(), Some(b"v".to_vec()));
        cached.delete_state("k").unwrap();
        assert_eq!(cached.get_state("k").unwrap(), None);
        assert_eq!(tx.staged_len(), 1);
    }

    #[test]
    fn pass_through_reads_committed_snapshot() {
        let store = seeded_store(&["k"]);
        let tx = TxStub::new(&store, "tx1", 0, "f", vec![]);
        let cached = CachedStub::new(&tx, CacheMode::PassThrough, 16);

        cached.put_state("k", b"new".to_vec()).unwrap();
        assert_eq!(cached.get_state("k").unwrap(), Some(b"k".to_vec()));
    }

    #[test]
    fn put_cache_merges_range_scans() {
        let store = seeded_store(&["p/1", "p/3", "p/5"]);
        let tx = TxStub::new(&store, "tx1", 0, "f", vec![]);
        let cached = CachedStub::new(&tx, CacheMode::PutCache, 16);

        cached.put_state("p/2", b"p/2".to_vec()).unwrap();
        cached.delete_state("p/3").unwrap();
        cached.put_state("p/6", b"p/6".to_vec()).unwrap();

        let keys: Vec<String> =
            StateRangeIter::with_page_size(&cached, KeyRange::prefix("p/", true), 2)
                .map(|e| e.unwrap().0)
                .collect();
        assert_eq!(keys, vec!["p/1", "p/2", "p/5", "p/6"]);

        let keys: Vec<String> =
            StateRangeIter::with_page_size(&cached, KeyRange::prefix("p/", false), 2)
                .map(|e| e.unwrap().0)
                .collect();
        assert_eq!(keys, vec!["p/6", "p/5", "p/2", "p/1"]);
    }

    #[test]
    fn fully_deleted_page_is_skipped() {
        let store = seeded_store(&["p/1", "p/2", "p/3"]);
        let tx = TxStub::new(&store, "tx1", 0, "f", vec![]);
        let cached = CachedStub::new(&tx, CacheMode::PutCache, 16);
        cached.delete_state("p/1").unwrap();
        cached.delete_state("p/2").unwrap();

        let keys: Vec<String> =
            StateRangeIter::with_page_size(&cached, KeyRange::prefix("p/", true), 2)
                .map(|e| e.unwrap().0)
                .collect();
        assert_eq!(keys, vec!["p/3"]);
    }
}
