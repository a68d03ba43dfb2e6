// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ledger store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `ledger`: ledger key → value bytes (see [`super::paths`])
//!
//! A write set is applied in a single redb write transaction, so a commit is
//! all-or-nothing.

use std::ops::Bound;
use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{Entry, KeyRange, KvStore, LedgerResult, WriteSet};

/// Single table holding every ledger key.
const LEDGER: TableDefinition<&str, &[u8]> = TableDefinition::new("ledger");

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create the table so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LEDGER)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "ledger database opened");
        Ok(Self { db })
    }
}

impl KvStore for RedbStore {
    fn get(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEDGER)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    fn page(
        &self,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> LedgerResult<Vec<Entry>> {
        let Some(bounds): Option<(Bound<&str>, Bound<&str>)> = range.bounds(after) else {
            return Ok(Vec::new());
        };

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEDGER)?;
        let scan = table.range::<&str>(bounds)?;

        let mut out = Vec::with_capacity(limit.min(256));
        if range.ascending {
            for entry in scan.take(limit) {
                let (k, v) = entry?;
                out.push((k.value().to_string(), v.value().to_vec()));
            }
        } else {
            for entry in scan.rev().take(limit) {
                let (k, v) = entry?;
                out.push((k.value().to_string(), v.value().to_vec()));
            }
        }
        Ok(out)
    }

    fn commit(&self, writes: &WriteSet) -> LedgerResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LEDGER)?;
            for (key, value) in writes {
                match value {
                    Some(bytes) => {
                        table.insert(key.as_str(), bytes.as_slice())?;
                    }
                    None => {
                        table.remove(key.as_str())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        tracing::debug!(keys = writes.len(), "write set committed");
        Ok(())
    }
}
