// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger key layout.
//!
//! ```text
//! asset/{namespace}/{asset_id}          -> StoredAsset (JSON)
//! keygraph/{src_id}/{dst_id}            -> EdgeRecord (JSON)
//! index/{table}/{index}/{sort_key}      -> asset id
//! OMR.DatastoreConnectionID             -> active off-chain connection id
//! OMR.SystemAdminID                     -> system administrator id
//! ```

/// Key holding the active off-chain connection id (empty when disabled).
pub const DATASTORE_CONNECTION_KEY: &str = "OMR.DatastoreConnectionID";

/// Key holding the registered system administrator id.
pub const SYSTEM_ADMIN_KEY: &str = "OMR.SystemAdminID";

const ASSET_ROOT: &str = "asset";
const KEYGRAPH_ROOT: &str = "keygraph";
const INDEX_ROOT: &str = "index";

/// Key builders for the ledger layout.
pub struct LedgerPaths;

impl LedgerPaths {
    // ========== Assets ==========

    pub fn asset_prefix(namespace: &str) -> String {
        format!("{ASSET_ROOT}/{namespace}/")
    }

    pub fn asset(namespace: &str, asset_id: &str) -> String {
        format!("{ASSET_ROOT}/{namespace}/{asset_id}")
    }

    // ========== Key graph ==========

    /// Prefix of every edge leaving `src_id`.
    pub fn edge_prefix(src_id: &str) -> String {
        format!("{KEYGRAPH_ROOT}/{src_id}/")
    }

    pub fn edge(src_id: &str, dst_id: &str) -> String {
        format!("{KEYGRAPH_ROOT}/{src_id}/{dst_id}")
    }

    // ========== Indexes ==========

    pub fn index_prefix(table: &str, index: &str) -> String {
        format!("{INDEX_ROOT}/{table}/{index}/")
    }

    pub fn index_row(table: &str, index: &str, sort_key: &str) -> String {
        format!("{INDEX_ROOT}/{table}/{index}/{sort_key}")
    }
}
