// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local transaction runtime.
//!
//! [`LocalLedger`] runs one invocation at a time. Each invocation gets a
//! [`TxStub`]: reads observe the committed snapshot only, writes are staged
//! and applied to the [`KvStore`] in one atomic commit when the invocation
//! returns `Ok`. An `Err` discards the write set.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use super::memory::MemoryStore;
use super::offchain::DatastoreRegistry;
use super::{Entry, KeyRange, KvStore, LedgerError, LedgerResult, LedgerStub, WriteSet};

/// Stub for a single transaction.
pub struct TxStub<'a> {
    store: &'a dyn KvStore,
    tx_id: String,
    timestamp: i64,
    function: String,
    params: Vec<String>,
    writes: RefCell<WriteSet>,
}

impl<'a> TxStub<'a> {
    pub fn new(
        store: &'a dyn KvStore,
        tx_id: impl Into<String>,
        timestamp: i64,
        function: impl Into<String>,
        params: Vec<String>,
    ) -> Self {
        Self {
            store,
            tx_id: tx_id.into(),
            timestamp,
            function: function.into(),
            params,
            writes: RefCell::new(WriteSet::new()),
        }
    }

    /// Number of staged keys.
    pub fn staged_len(&self) -> usize {
        self.writes.borrow().len()
    }

    pub fn into_write_set(self) -> WriteSet {
        self.writes.into_inner()
    }
}

impl LedgerStub for TxStub<'_> {
    fn tx_id(&self) -> &str {
        &self.tx_id
    }

    fn tx_timestamp(&self) -> i64 {
        self.timestamp
    }

    fn function_and_parameters(&self) -> (String, Vec<String>) {
        (self.function.clone(), self.params.clone())
    }

    fn get_state(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        self.store.get(key)
    }

    fn put_state(&self, key: &str, value: Vec<u8>) -> LedgerResult<()> {
        self.writes.borrow_mut().insert(key.to_string(), Some(value));
        Ok(())
    }

    fn delete_state(&self, key: &str) -> LedgerResult<()> {
        self.writes.borrow_mut().insert(key.to_string(), None);
        Ok(())
    }

    fn state_page(
        &self,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> LedgerResult<Vec<Entry>> {
        self.store.page(range, after, limit)
    }
}

/// Serialised local host over a key/value store.
pub struct LocalLedger {
    store: Arc<dyn KvStore>,
    datastores: DatastoreRegistry,
    lock: Mutex<()>,
}

impl LocalLedger {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            datastores: DatastoreRegistry::new(),
            lock: Mutex::new(()),
        }
    }

    /// Ledger over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    pub fn datastores(&self) -> &DatastoreRegistry {
        &self.datastores
    }

    /// Run `body` as one transaction and commit its writes on success.
    pub fn execute<T, E, F>(
        &self,
        function: &str,
        params: &[String],
        timestamp: i64,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&TxStub<'_>) -> Result<T, E>,
        E: From<LedgerError>,
    {
        // The mutex guards no data, so a poisoned lock is still usable.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let tx_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("tx", tx_id = %tx_id, function);
        let _enter = span.enter();

        let stub = TxStub::new(
            self.store.as_ref(),
            tx_id.clone(),
            timestamp,
            function,
            params.to_vec(),
        );

        match body(&stub) {
            Ok(out) => {
                let writes = stub.into_write_set();
                self.store.commit(&writes)?;
                tracing::debug!(keys = writes.len(), "transaction committed");
                Ok(out)
            }
            Err(e) => {
                tracing::debug!(discarded = stub.staged_len(), "transaction aborted");
                Err(e)
            }
        }
    }
}
