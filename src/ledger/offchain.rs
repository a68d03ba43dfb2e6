// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Off-chain document stores.
//!
//! When a connection is active, asset ciphertext is written to the document
//! store registered under that connection id instead of inline in the
//! ledger. Documents only ever hold ciphertext.
//!
//! The document store is not part of the ledger transaction. The host
//! flushes staged documents after the ledger commit succeeds, so an aborted
//! invocation leaves no document behind.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum OffchainError {
    #[error("unknown datastore connection: {0}")]
    UnknownConnection(String),

    #[error("document store lock poisoned")]
    Poisoned,

    #[error("document store failure: {0}")]
    Backend(String),
}

pub type OffchainResult<T> = Result<T, OffchainError>;

/// A document store addressed by string ids.
pub trait OffchainStore: Send + Sync {
    fn put(&self, doc_id: &str, ciphertext: &[u8]) -> OffchainResult<()>;

    fn get(&self, doc_id: &str) -> OffchainResult<Option<Vec<u8>>>;

    fn delete(&self, doc_id: &str) -> OffchainResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryOffchainStore {
    docs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryOffchainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OffchainStore for MemoryOffchainStore {
    fn put(&self, doc_id: &str, ciphertext: &[u8]) -> OffchainResult<()> {
        let mut docs = self.docs.lock().map_err(|_| OffchainError::Poisoned)?;
        docs.insert(doc_id.to_string(), ciphertext.to_vec());
        Ok(())
    }

    fn get(&self, doc_id: &str) -> OffchainResult<Option<Vec<u8>>> {
        let docs = self.docs.lock().map_err(|_| OffchainError::Poisoned)?;
        Ok(docs.get(doc_id).cloned())
    }

    fn delete(&self, doc_id: &str) -> OffchainResult<()> {
        let mut docs = self.docs.lock().map_err(|_| OffchainError::Poisoned)?;
        docs.remove(doc_id);
        Ok(())
    }
}

/// Document stores known to the host, by connection id.
#[derive(Default, Clone)]
pub struct DatastoreRegistry {
    stores: Arc<RwLock<HashMap<String, Arc<dyn OffchainStore>>>>,
}

impl DatastoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: impl Into<String>, store: Arc<dyn OffchainStore>) {
        if let Ok(mut stores) = self.stores.write() {
            stores.insert(connection_id.into(), store);
        }
    }

    pub fn get(&self, connection_id: &str) -> OffchainResult<Arc<dyn OffchainStore>> {
        let stores = self.stores.read().map_err(|_| OffchainError::Poisoned)?;
        stores
            .get(connection_id)
            .cloned()
            .ok_or_else(|| OffchainError::UnknownConnection(connection_id.to_string()))
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.stores
            .read()
            .map(|s| s.contains_key(connection_id))
            .unwrap_or(false)
    }
}

/// A document write waiting for the ledger commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingDoc {
    Put {
        connection_id: String,
        doc_id: String,
        ciphertext: Vec<u8>,
    },
    Delete {
        connection_id: String,
        doc_id: String,
    },
}

impl DatastoreRegistry {
    /// Apply staged document writes after a successful commit.
    ///
    /// Failures are logged; the ledger state is already committed.
    pub fn flush(&self, pending: Vec<PendingDoc>) {
        for doc in pending {
            let result = match &doc {
                PendingDoc::Put {
                    connection_id,
                    doc_id,
                    ciphertext,
                } => self
                    .get(connection_id)
                    .and_then(|store| store.put(doc_id, ciphertext)),
                PendingDoc::Delete {
                    connection_id,
                    doc_id,
                } => self
                    .get(connection_id)
                    .and_then(|store| store.delete(doc_id)),
            };
            if let Err(e) = result {
                tracing::error!(error = %e, ?doc, "off-chain flush failed");
            }
        }
    }
}

/// Document access for one invocation. Writes are staged until commit and
/// are visible to reads of the same invocation.
pub struct OffchainSession<'a> {
    registry: &'a DatastoreRegistry,
    pending: RefCell<Vec<PendingDoc>>,
}

impl<'a> OffchainSession<'a> {
    pub fn new(registry: &'a DatastoreRegistry) -> Self {
        Self {
            registry,
            pending: RefCell::new(Vec::new()),
        }
    }

    pub fn is_registered(&self, connection_id: &str) -> bool {
        self.registry.contains(connection_id)
    }

    pub fn stage_put(
        &self,
        connection_id: &str,
        doc_id: &str,
        ciphertext: Vec<u8>,
    ) -> OffchainResult<()> {
        if !self.registry.contains(connection_id) {
            return Err(OffchainError::UnknownConnection(connection_id.to_string()));
        }
        self.pending.borrow_mut().push(PendingDoc::Put {
            connection_id: connection_id.to_string(),
            doc_id: doc_id.to_string(),
            ciphertext,
        });
        Ok(())
    }

    pub fn stage_delete(&self, connection_id: &str, doc_id: &str) {
        self.pending.borrow_mut().push(PendingDoc::Delete {
            connection_id: connection_id.to_string(),
            doc_id: doc_id.to_string(),
        });
    }

    pub fn read(&self, connection_id: &str, doc_id: &str) -> OffchainResult<Option<Vec<u8>>> {
        // Latest staged write for this document wins.
        for doc in self.pending.borrow().iter().rev() {
            match doc {
                PendingDoc::Put {
                    connection_id: c,
                    doc_id: d,
                    ciphertext,
                } if c == connection_id && d == doc_id => return Ok(Some(ciphertext.clone())),
                PendingDoc::Delete {
                    connection_id: c,
                    doc_id: d,
                } if c == connection_id && d == doc_id => return Ok(None),
                _ => {}
            }
        }
        self.registry.get(connection_id)?.get(doc_id)
    }

    pub fn into_pending(self) -> Vec<PendingDoc> {
        self.pending.into_inner()
    }
}
