// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger abstraction
//!
//! The core never talks to a database directly. Every read and write goes
//! through a [`LedgerStub`] bound to one transaction. The host decides how
//! the staged write set is committed.
//!
//! - `paths` - ledger key layout
//! - `memory` / `redb_store` - [`KvStore`] implementations
//! - `host` - [`LocalLedger`], a local transaction runtime over a `KvStore`
//! - `cached` - [`CachedStub`], the per-transaction read cache
//! - `offchain` - optional document store for private payloads

pub mod cached;
pub mod host;
pub mod memory;
pub mod offchain;
pub mod paths;
pub mod redb_store;

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

pub use cached::{CacheMode, CachedStub};
pub use host::{LocalLedger, TxStub};
pub use memory::MemoryStore;
pub use offchain::{DatastoreRegistry, MemoryOffchainStore, OffchainSession, OffchainStore};
pub use redb_store::RedbStore;

/// Upper sentinel appended to a prefix to form an exclusive range end.
pub const PREFIX_END: char = '\u{10FFFF}';

/// Entries fetched per page by [`StateRangeIter`].
pub const DEFAULT_PAGE_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("invalid range: {0}")]
    InvalidRange(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Key/value pair returned by range reads.
pub type Entry = (String, Vec<u8>);

/// Staged write set: `None` marks a delete.
pub type WriteSet = BTreeMap<String, Option<Vec<u8>>>;

/// Half-open key range `[start, end)` with a scan direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: String,
    pub end: String,
    pub ascending: bool,
}

impl KeyRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>, ascending: bool) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            ascending,
        }
    }

    /// Every key beginning with `prefix`.
    pub fn prefix(prefix: &str, ascending: bool) -> Self {
        Self::new(prefix, format!("{prefix}{PREFIX_END}"), ascending)
    }

    pub fn contains(&self, key: &str) -> bool {
        key >= self.start.as_str() && key < self.end.as_str()
    }

    /// True when `key` comes after `cursor` in scan order.
    pub fn is_after(&self, key: &str, cursor: &str) -> bool {
        if self.ascending {
            key > cursor
        } else {
            key < cursor
        }
    }

    /// Bounds of the remaining scan after `cursor`, or `None` when empty.
    pub fn bounds<'a>(
        &'a self,
        after: Option<&'a str>,
    ) -> Option<(Bound<&'a str>, Bound<&'a str>)> {
        let (lower, upper) = match (after, self.ascending) {
            (Some(cursor), true) => (
                Bound::Excluded(cursor),
                Bound::Excluded(self.end.as_str()),
            ),
            (Some(cursor), false) => (
                Bound::Included(self.start.as_str()),
                Bound::Excluded(cursor),
            ),
            (None, _) => (
                Bound::Included(self.start.as_str()),
                Bound::Excluded(self.end.as_str()),
            ),
        };

        let lo = match lower {
            Bound::Included(k) | Bound::Excluded(k) => k,
            Bound::Unbounded => "",
        };
        let hi = match upper {
            Bound::Included(k) | Bound::Excluded(k) => k,
            Bound::Unbounded => return Some((lower, upper)),
        };
        // Ordered maps panic on inverted bounds.
        if lo >= hi {
            return None;
        }
        Some((lower, upper))
    }
}

/// Transaction-scoped view of the ledger.
///
/// Writes are staged by the host and committed only when the invocation
/// succeeds. Range reads are paged; use [`StateRangeIter`] to walk them.
pub trait LedgerStub {
    fn tx_id(&self) -> &str;

    /// Host transaction time, seconds since the epoch.
    fn tx_timestamp(&self) -> i64;

    fn function_and_parameters(&self) -> (String, Vec<String>);

    fn get_state(&self, key: &str) -> LedgerResult<Option<Vec<u8>>>;

    fn put_state(&self, key: &str, value: Vec<u8>) -> LedgerResult<()>;

    fn delete_state(&self, key: &str) -> LedgerResult<()>;

    /// At most `limit` entries of `range`, in scan order, strictly after `after`.
    fn state_page(
        &self,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> LedgerResult<Vec<Entry>>;
}

/// Committed key/value storage underneath a host.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> LedgerResult<Option<Vec<u8>>>;

    fn page(&self, range: &KeyRange, after: Option<&str>, limit: usize) -> LedgerResult<Vec<Entry>>;

    /// Apply a write set atomically.
    fn commit(&self, writes: &WriteSet) -> LedgerResult<()>;
}

/// Lazy range iterator over a stub. Pages are fetched on demand and the
/// scan is closed when the iterator is dropped, on every exit path.
pub struct StateRangeIter<'a> {
    stub: &'a dyn LedgerStub,
    range: KeyRange,
    cursor: Option<String>,
    buffer: VecDeque<Entry>,
    page_size: usize,
    exhausted: bool,
    yielded: usize,
}

impl<'a> StateRangeIter<'a> {
    pub fn new(stub: &'a dyn LedgerStub, range: KeyRange) -> Self {
        Self::with_page_size(stub, range, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(stub: &'a dyn LedgerStub, range: KeyRange, page_size: usize) -> Self {
        Self {
            stub,
            range,
            cursor: None,
            buffer: VecDeque::new(),
            page_size: page_size.max(1),
            exhausted: false,
            yielded: 0,
        }
    }

    /// Resume a scan strictly after `cursor`.
    pub fn starting_after(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    fn fill(&mut self) -> LedgerResult<()> {
        let page = self
            .stub
            .state_page(&self.range, self.cursor.as_deref(), self.page_size)?;
        // A merged page may be short without the scan being over.
        if page.is_empty() {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            self.cursor = Some(last.clone());
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for StateRangeIter<'_> {
    type Item = LedgerResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let entry = self.buffer.pop_front()?;
        self.yielded += 1;
        Some(Ok(entry))
    }
}

impl Drop for StateRangeIter<'_> {
    fn drop(&mut self) {
        tracing::trace!(
            start = %self.range.start.escape_debug(),
            yielded = self.yielded,
            "range scan closed"
        );
    }
}

/// Collect one page from an ordered map. Shared by the in-memory store and
/// the staged write sets.
pub(crate) fn page_from_map<V, F>(
    map: &BTreeMap<String, V>,
    range: &KeyRange,
    after: Option<&str>,
    limit: usize,
    mut project: F,
) -> Vec<(String, Vec<u8>)>
where
    F: FnMut(&V) -> Option<Vec<u8>>,
{
    let Some(bounds) = range.bounds(after) else {
        return Vec::new();
    };
    let iter = map.range::<str, _>(bounds);
    let pick = |(k, v): (&String, &V)| project(v).map(|bytes| (k.clone(), bytes));
    if range.ascending {
        iter.filter_map(pick).take(limit).collect()
    } else {
        iter.rev().filter_map(pick).take(limit).collect()
    }
}
