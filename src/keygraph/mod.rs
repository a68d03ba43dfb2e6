// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key graph
//!
//! Directed edges `src → dst` stored at `keygraph/{src}/{dst}`. Each edge
//! carries the material of `dst` encrypted under `src`, so the holder of
//! `src` can derive `dst`. Access to anything is decided by whether a path
//! of edges leads from the caller's key pair to the target key.
//!
//! A step `k → log(k)` is a local derivation and needs no edge.

pub mod access;
pub mod ids;

use serde::{Deserialize, Serialize};

use crate::crypto::{decode_b64, encode_b64, Key, KeyType};
use crate::error::{OmrError, OmrResult};
use crate::ledger::paths::LedgerPaths;
use crate::ledger::{KeyRange, LedgerStub, StateRangeIter};

pub use access::{KeyPath, PrincipalRef};

/// Persisted edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeRecord {
    pub src_id: String,
    pub dst_id: String,
    pub dst_type: KeyType,
    /// Base64 of `Enc_src(material(dst))`.
    pub ciphertext: String,
}

/// Key graph operations over one transaction's stub.
pub struct KeyGraph<'a> {
    stub: &'a dyn LedgerStub,
}

impl<'a> KeyGraph<'a> {
    pub fn new(stub: &'a dyn LedgerStub) -> Self {
        Self { stub }
    }

    fn load_edge(&self, src_id: &str, dst_id: &str) -> OmrResult<Option<EdgeRecord>> {
        match self.stub.get_state(&LedgerPaths::edge(src_id, dst_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn edge_exists(&self, src_id: &str, dst_id: &str) -> OmrResult<bool> {
        Ok(self
            .stub
            .get_state(&LedgerPaths::edge(src_id, dst_id))?
            .is_some())
    }

    /// `AddEdge`. `src` may be a public key; `dst` must carry private material.
    /// Re-adding an existing edge writes nothing.
    pub fn add_edge(&self, src: &Key, dst: &Key) -> OmrResult<()> {
        if !dst.is_private() {
            return Err(OmrError::validation(format!(
                "edge destination {} has no private material",
                dst.id
            )));
        }
        if self.edge_exists(&src.id, &dst.id)? {
            return Ok(());
        }

        let record = EdgeRecord {
            src_id: src.id.clone(),
            dst_id: dst.id.clone(),
            dst_type: dst.key_type,
            ciphertext: encode_b64(&src.encrypt(&dst.material)?),
        };
        self.stub.put_state(
            &LedgerPaths::edge(&src.id, &dst.id),
            serde_json::to_vec(&record)?,
        )?;
        tracing::debug!(src = %src.id, dst = %dst.id, "edge added");
        Ok(())
    }

    /// `RemoveEdge`. Returns whether an edge was removed; a missing edge is a no-op.
    pub fn remove_edge(&self, src_id: &str, dst_id: &str) -> OmrResult<bool> {
        if !self.edge_exists(src_id, dst_id)? {
            return Ok(false);
        }
        self.stub.delete_state(&LedgerPaths::edge(src_id, dst_id))?;
        tracing::debug!(src = %src_id, dst = %dst_id, "edge removed");
        Ok(true)
    }

    /// Ids of every key reachable from `src_id` in one step.
    pub fn successors(&self, src_id: &str) -> OmrResult<Vec<String>> {
        let prefix = LedgerPaths::edge_prefix(src_id);
        let mut out = Vec::new();
        for entry in StateRangeIter::new(self.stub, KeyRange::prefix(&prefix, true)) {
            let (key, _) = entry?;
            if let Some(dst) = key.strip_prefix(&prefix) {
                out.push(dst.to_string());
            }
        }
        Ok(out)
    }

    /// `VerifyPath`: every consecutive pair is an edge (or a log derivation).
    /// Nothing is decrypted. A missing edge yields `false`.
    pub fn verify_path(&self, path: &[String]) -> OmrResult<bool> {
        if path.is_empty() {
            return Ok(false);
        }
        for pair in path.windows(2) {
            let (src, dst) = (&pair[0], &pair[1]);
            if ids::is_log_of(src, dst) {
                continue;
            }
            if !self.edge_exists(src, dst)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `Traverse`: decrypt each successor starting from `start`.
    ///
    /// Returns `Ok(None)` when an edge is missing or the path does not begin
    /// at `start`. A record that fails to decrypt is a crypto error.
    pub fn traverse(&self, start: &Key, path: &[String]) -> OmrResult<Option<Key>> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(None);
        };
        if *first != start.id {
            return Ok(None);
        }

        let mut current = start.clone();
        for dst_id in rest {
            if ids::is_log_of(&current.id, dst_id) {
                current = current.log_key();
                continue;
            }
            let Some(edge) = self.load_edge(&current.id, dst_id)? else {
                return Ok(None);
            };
            let material = current.decrypt(&decode_b64(&edge.ciphertext)?)?;
            current = Key {
                id: edge.dst_id,
                key_type: edge.dst_type,
                material,
            };
        }
        Ok(Some(current))
    }

    /// Try candidate paths in order and return the key at the end of the
    /// first one that verifies and traverses.
    pub fn resolve(&self, start: &Key, candidates: &[KeyPath]) -> OmrResult<Option<Key>> {
        for path in candidates {
            if !self.verify_path(path)? {
                continue;
            }
            if let Some(key) = self.traverse(start, path)? {
                tracing::trace!(target_key = %key.id, hops = path.len(), "key path resolved");
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// First candidate path that verifies, without decrypting anything.
    pub fn check_access(&self, candidates: &[KeyPath]) -> OmrResult<Option<KeyPath>> {
        for path in candidates {
            if self.verify_path(path)? {
                return Ok(Some(path.clone()));
            }
        }
        Ok(None)
    }
}
