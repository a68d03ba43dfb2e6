// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Asset store
//!
//! Assets hold public metadata in the clear and private data encrypted under
//! the key named by `asset_key_id`. Index rows are maintained alongside
//! every write, in the same transaction.
//!
//! When an off-chain connection is active the ciphertext is stored in the
//! document store instead of inline.

pub mod index;
pub mod record;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{decode_b64, encode_b64, Key};
use crate::error::{OmrError, OmrResult};
use crate::ledger::paths::{LedgerPaths, DATASTORE_CONNECTION_KEY};
use crate::ledger::{LedgerStub, OffchainSession, StateRangeIter};

pub use index::TableDef;
pub use record::AssetRecord;

/// Private payload of an asset as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum PrivateData {
    Plain(Value),
    /// The caller holds no key that decrypts this asset. Treat as no access.
    Encrypted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub asset_id: String,
    pub namespace: String,
    pub owner_ids: Vec<String>,
    pub datatypes: Vec<String>,
    pub public_data: Value,
    pub private_data: PrivateData,
    pub asset_key_id: String,
    pub index_table: Option<String>,
    pub connection_id: Option<String>,
}

impl Asset {
    pub fn is_decrypted(&self) -> bool {
        matches!(self.private_data, PrivateData::Plain(_))
    }

    pub fn private_value(&self) -> Option<&Value> {
        match &self.private_data {
            PrivateData::Plain(v) => Some(v),
            PrivateData::Encrypted => None,
        }
    }
}

/// Ledger representation of an asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredAsset {
    pub asset_id: String,
    pub namespace: String,
    pub owner_ids: Vec<String>,
    #[serde(default)]
    pub datatypes: Vec<String>,
    pub public_data: Value,
    /// Base64 ciphertext; empty when the payload lives off-chain.
    #[serde(default)]
    pub private_data: String,
    pub asset_key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

/// Ordered range scan over an index.
pub struct AssetQuery<'q> {
    pub table: &'static TableDef,
    pub index: &'q str,
    pub start: Vec<Value>,
    pub end: Vec<Value>,
    pub ascending: bool,
    pub include_private: bool,
    /// Resume strictly after this index row.
    pub bookmark: Option<String>,
    /// Maximum assets returned; 0 means no limit.
    pub limit: usize,
}

impl<'q> AssetQuery<'q> {
    /// Rows whose leading fields equal `prefix`.
    pub fn prefix(table: &'static TableDef, index: &'q str, prefix: Vec<Value>) -> Self {
        Self {
            table,
            index,
            start: prefix.clone(),
            end: prefix,
            ascending: true,
            include_private: true,
            bookmark: None,
            limit: 0,
        }
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    pub fn public_only(mut self) -> Self {
        self.include_private = false;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One page of an asset scan.
#[derive(Debug, Default)]
pub struct AssetPage {
    pub assets: Vec<Asset>,
    /// Index row to resume after, when the limit cut the scan short.
    pub bookmark: Option<String>,
}

/// Resolves the key of an asset for the current caller.
pub type KeyResolver<'r> = dyn Fn(&Asset) -> OmrResult<Option<Key>> + 'r;

/// Predicate applied to each yielded asset.
pub type AssetFilter<'f> = dyn Fn(&Asset) -> bool + 'f;

/// Asset CRUD for one transaction.
pub struct AssetStore<'a> {
    stub: &'a dyn LedgerStub,
    offchain: &'a OffchainSession<'a>,
}

impl<'a> AssetStore<'a> {
    pub fn new(stub: &'a dyn LedgerStub, offchain: &'a OffchainSession<'a>) -> Self {
        Self { stub, offchain }
    }

    pub fn exists(&self, namespace: &str, asset_id: &str) -> OmrResult<bool> {
        Ok(self
            .stub
            .get_state(&LedgerPaths::asset(namespace, asset_id))?
            .is_some())
    }

    pub fn load(&self, namespace: &str, asset_id: &str) -> OmrResult<Option<StoredAsset>> {
        match self.stub.get_state(&LedgerPaths::asset(namespace, asset_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn active_connection(&self) -> OmrResult<Option<String>> {
        let raw = self.stub.get_state(DATASTORE_CONNECTION_KEY)?;
        Ok(raw
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .filter(|id| !id.is_empty()))
    }

    /// Redirect private payloads of later writes to the document store
    /// registered under `connection_id`. An empty id switches back to
    /// inline storage.
    pub fn set_active_connection(&self, connection_id: &str) -> OmrResult<()> {
        if !connection_id.is_empty() && !self.offchain.is_registered(connection_id) {
            return Err(OmrError::validation(format!(
                "unknown datastore connection {connection_id}"
            )));
        }
        self.stub
            .put_state(DATASTORE_CONNECTION_KEY, connection_id.as_bytes().to_vec())?;
        tracing::info!(connection_id, "datastore connection set");
        Ok(())
    }

    fn doc_id(namespace: &str, asset_id: &str) -> String {
        format!("{namespace}/{asset_id}")
    }

    fn seal(&self, asset: &Asset, key: &Key) -> OmrResult<StoredAsset> {
        if key.id != asset.asset_key_id {
            return Err(OmrError::validation(format!(
                "key {} does not match asset key {}",
                key.id, asset.asset_key_id
            )));
        }
        let PrivateData::Plain(private) = &asset.private_data else {
            return Err(OmrError::validation(format!(
                "asset {} has no plaintext private data",
                asset.asset_id
            )));
        };
        let ciphertext = key.encrypt(&serde_json::to_vec(private)?)?;

        let (private_data, connection_id) = match self.active_connection()? {
            Some(connection) => {
                self.offchain
                    .stage_put(
                        &connection,
                        &Self::doc_id(&asset.namespace, &asset.asset_id),
                        ciphertext,
                    )
                    .map_err(|e| OmrError::Offchain(e.to_string()))?;
                (String::new(), Some(connection))
            }
            None => (encode_b64(&ciphertext), None),
        };

        Ok(StoredAsset {
            asset_id: asset.asset_id.clone(),
            namespace: asset.namespace.clone(),
            owner_ids: asset.owner_ids.clone(),
            datatypes: asset.datatypes.clone(),
            public_data: asset.public_data.clone(),
            private_data,
            asset_key_id: asset.asset_key_id.clone(),
            index_table: asset.index_table.clone(),
            connection_id,
        })
    }

    fn write_rows(&self, stored: &StoredAsset) -> OmrResult<()> {
        if let Some(table) = stored.index_table.as_deref().and_then(index::table) {
            for row in table.rows(&stored.asset_id, &stored.public_data) {
                self.stub.put_state(&row, stored.asset_id.as_bytes().to_vec())?;
            }
        }
        Ok(())
    }

    fn remove_rows(&self, stored: &StoredAsset) -> OmrResult<()> {
        if let Some(table) = stored.index_table.as_deref().and_then(index::table) {
            for row in table.rows(&stored.asset_id, &stored.public_data) {
                self.stub.delete_state(&row)?;
            }
        }
        Ok(())
    }

    fn put(&self, stored: &StoredAsset) -> OmrResult<()> {
        self.stub.put_state(
            &LedgerPaths::asset(&stored.namespace, &stored.asset_id),
            serde_json::to_vec(stored)?,
        )?;
        Ok(())
    }

    /// `AddAsset`: the asset must not exist yet.
    pub fn add(&self, asset: &Asset, key: &Key) -> OmrResult<()> {
        if self.exists(&asset.namespace, &asset.asset_id)? {
            return Err(OmrError::state(format!(
                "asset {} already exists",
                asset.asset_id
            )));
        }
        let stored = self.seal(asset, key)?;
        self.put(&stored)?;
        self.write_rows(&stored)?;
        tracing::debug!(namespace = %asset.namespace, asset_id = %asset.asset_id, "asset added");
        Ok(())
    }

    /// `UpdateAsset`: re-encrypts and re-indexes. Owners are preserved.
    pub fn update(&self, asset: &Asset, key: &Key) -> OmrResult<()> {
        let Some(previous) = self.load(&asset.namespace, &asset.asset_id)? else {
            return Err(OmrError::not_found(format!("asset {}", asset.asset_id)));
        };

        let mut asset = asset.clone();
        asset.owner_ids = previous.owner_ids.clone();

        let stored = self.seal(&asset, key)?;
        if let Some(old) = previous.connection_id.as_deref() {
            if stored.connection_id.as_deref() != Some(old) {
                self.offchain
                    .stage_delete(old, &Self::doc_id(&asset.namespace, &asset.asset_id));
            }
        }
        self.remove_rows(&previous)?;
        self.put(&stored)?;
        self.write_rows(&stored)?;
        tracing::debug!(namespace = %asset.namespace, asset_id = %asset.asset_id, "asset updated");
        Ok(())
    }

    /// Remove an asset and its index rows. Returns whether it existed.
    pub fn delete(&self, namespace: &str, asset_id: &str) -> OmrResult<bool> {
        let Some(previous) = self.load(namespace, asset_id)? else {
            return Ok(false);
        };
        self.remove_rows(&previous)?;
        if let Some(connection) = previous.connection_id.as_deref() {
            self.offchain
                .stage_delete(connection, &Self::doc_id(namespace, asset_id));
        }
        self.stub
            .delete_state(&LedgerPaths::asset(namespace, asset_id))?;
        Ok(true)
    }

    fn ciphertext(&self, stored: &StoredAsset) -> OmrResult<Option<Vec<u8>>> {
        match stored.connection_id.as_deref() {
            Some(connection) => self
                .offchain
                .read(connection, &Self::doc_id(&stored.namespace, &stored.asset_id))
                .map_err(|e| OmrError::Offchain(e.to_string())),
            None => Ok(Some(decode_b64(&stored.private_data)?)),
        }
    }

    /// Build the caller's view of a stored asset. A missing, mismatched or
    /// failing key yields the encrypted sentinel.
    pub fn open(&self, stored: StoredAsset, key: Option<&Key>) -> OmrResult<Asset> {
        let private_data = match key.filter(|k| k.id == stored.asset_key_id) {
            Some(key) => match self.ciphertext(&stored)? {
                Some(ciphertext) => match key.decrypt(&ciphertext) {
                    Ok(plain) => PrivateData::Plain(serde_json::from_slice(&plain)?),
                    Err(_) => {
                        tracing::debug!(asset_id = %stored.asset_id, "asset key did not decrypt");
                        PrivateData::Encrypted
                    }
                },
                None => {
                    tracing::warn!(asset_id = %stored.asset_id, "off-chain payload missing");
                    PrivateData::Encrypted
                }
            },
            None => PrivateData::Encrypted,
        };

        Ok(Asset {
            asset_id: stored.asset_id,
            namespace: stored.namespace,
            owner_ids: stored.owner_ids,
            datatypes: stored.datatypes,
            public_data: stored.public_data,
            private_data,
            asset_key_id: stored.asset_key_id,
            index_table: stored.index_table,
            connection_id: stored.connection_id,
        })
    }

    /// `GetAsset`.
    pub fn get(
        &self,
        namespace: &str,
        asset_id: &str,
        key: Option<&Key>,
    ) -> OmrResult<Option<Asset>> {
        match self.load(namespace, asset_id)? {
            Some(stored) => Ok(Some(self.open(stored, key)?)),
            None => Ok(None),
        }
    }

    /// `GetEncryptedAssetData`: public metadata only.
    pub fn get_encrypted(&self, namespace: &str, asset_id: &str) -> OmrResult<Option<Asset>> {
        self.get(namespace, asset_id, None)
    }

    /// `AssetIter`.
    ///
    /// Walks the index range in order. With `include_private`, each asset's
    /// key comes from `resolver` and only assets that decrypt are yielded.
    /// A row that fails to load or resolve is logged and skipped.
    pub fn iter(
        &self,
        query: &AssetQuery<'_>,
        resolver: &KeyResolver<'_>,
        filter: Option<&AssetFilter<'_>>,
    ) -> OmrResult<AssetPage> {
        let index = query.table.index(query.index).ok_or_else(|| {
            OmrError::validation(format!(
                "unknown index {} on {}",
                query.index, query.table.name
            ))
        })?;
        let range = query
            .table
            .range(index, &query.start, &query.end, query.ascending);

        let mut keys: HashMap<String, Option<Key>> = HashMap::new();
        let mut page = AssetPage::default();

        let rows = StateRangeIter::new(self.stub, range).starting_after(query.bookmark.clone());
        for row in rows {
            let (row_key, asset_id) = row?;
            let asset_id = String::from_utf8_lossy(&asset_id).into_owned();

            let stored = match self.load(query.table.namespace, &asset_id) {
                Ok(Some(stored)) => stored,
                Ok(None) => {
                    tracing::warn!(%asset_id, "index row points at a missing asset");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(%asset_id, error = %e, "skipping unreadable asset");
                    continue;
                }
            };

            let asset = if query.include_private {
                let public_view = self.open(stored.clone(), None)?;
                let key = match keys.get(&stored.asset_key_id) {
                    Some(cached) => cached.clone(),
                    None => {
                        let resolved = resolver(&public_view).unwrap_or_else(|e| {
                            tracing::warn!(%asset_id, error = %e, "key resolution failed");
                            None
                        });
                        keys.insert(stored.asset_key_id.clone(), resolved.clone());
                        resolved
                    }
                };
                let Some(key) = key else {
                    continue;
                };
                match self.open(stored, Some(&key)) {
                    Ok(asset) if asset.is_decrypted() => asset,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(%asset_id, error = %e, "skipping undecodable asset");
                        continue;
                    }
                }
            } else {
                self.open(stored, None)?
            };

            if filter.is_some_and(|f| !f(&asset)) {
                continue;
            }

            page.assets.push(asset);
            if query.limit > 0 && page.assets.len() >= query.limit {
                page.bookmark = Some(row_key);
                break;
            }
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{
        CacheMode, CachedStub, DatastoreRegistry, MemoryOffchainStore, MemoryStore, TxStub,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn consent_asset(owner: &str, target: &str, key: &Key) -> Asset {
        Asset {
            asset_id: format!("Consent-{owner}-{target}-heart"),
            namespace: "consent".into(),
            owner_ids: vec![owner.into()],
            datatypes: vec!["heart".into()],
            public_data: json!({"owner_id": owner, "target_id": target, "datatype_id": "heart"}),
            private_data: PrivateData::Plain(json!({"option": ["read"]})),
            asset_key_id: key.id.clone(),
            index_table: Some("consents".into()),
            connection_id: None,
        }
    }

    fn with_store<F: FnOnce(&AssetStore<'_>, &dyn LedgerStub)>(registry: &DatastoreRegistry, f: F) {
        let store = MemoryStore::new();
        let tx = TxStub::new(&store, "tx", 0, "test", vec![]);
        let cached = CachedStub::new(&tx, CacheMode::PutCache, 64);
        let session = OffchainSession::new(registry);
        let assets = AssetStore::new(&cached, &session);
        f(&assets, &cached);
    }

    #[test]
    fn add_then_get_with_and_without_key() {
        with_store(&DatastoreRegistry::new(), |assets, _| {
            let key = Key::generate_sym("consent(heart,svc1,pat1)").unwrap();
            let asset = consent_asset("pat1", "svc1", &key);
            assets.add(&asset, &key).unwrap();

            let opened = assets.get("consent", &asset.asset_id, Some(&key)).unwrap().unwrap();
            assert_eq!(opened.private_value(), Some(&json!({"option": ["read"]})));

            let sealed = assets.get_encrypted("consent", &asset.asset_id).unwrap().unwrap();
            assert_eq!(sealed.private_data, PrivateData::Encrypted);

            let wrong = Key::generate_sym("consent(heart,svc1,pat1)").unwrap();
            let opened = assets.get("consent", &asset.asset_id, Some(&wrong)).unwrap().unwrap();
            assert!(!opened.is_decrypted());
        });
    }

    #[test]
    fn duplicate_add_is_rejected() {
        with_store(&DatastoreRegistry::new(), |assets, _| {
            let key = Key::generate_sym("k").unwrap();
            let asset = consent_asset("pat1", "svc1", &key);
            assets.add(&asset, &key).unwrap();
            assert!(matches!(assets.add(&asset, &key), Err(OmrError::State(_))));
        });
    }

    #[test]
    fn update_preserves_owners_and_reindexes() {
        with_store(&DatastoreRegistry::new(), |assets, _| {
            let key = Key::generate_sym("k").unwrap();
            let asset = consent_asset("pat1", "svc1", &key);
            assets.add(&asset, &key).unwrap();

            let mut changed = asset.clone();
            changed.owner_ids = vec!["mallory".into()];
            changed.public_data =
                json!({"owner_id": "pat1", "target_id": "svc2", "datatype_id": "heart"});
            assets.update(&changed, &key).unwrap();

            let stored = assets.load("consent", &asset.asset_id).unwrap().unwrap();
            assert_eq!(stored.owner_ids, vec!["pat1".to_string()]);

            let resolver = |_: &Asset| -> OmrResult<Option<Key>> { Ok(None) };
            let by_target = |target: &str| {
                AssetQuery::prefix(&index::CONSENTS, "by_target", vec![json!(target)]).public_only()
            };
            let old = by_target("svc1");
            assert!(assets.iter(&old, &resolver, None).unwrap().assets.is_empty());
            let new = by_target("svc2");
            assert_eq!(assets.iter(&new, &resolver, None).unwrap().assets.len(), 1);
        });
    }

    #[test]
    fn iter_yields_only_decryptable_assets() {
        with_store(&DatastoreRegistry::new(), |assets, _| {
            let k1 = Key::generate_sym("k1").unwrap();
            let k2 = Key::generate_sym("k2").unwrap();
            assets.add(&consent_asset("pat1", "svc1", &k1), &k1).unwrap();
            assets.add(&consent_asset("pat1", "svc2", &k2), &k2).unwrap();

            let held = k1.clone();
            let resolver = move |a: &Asset| -> OmrResult<Option<Key>> {
                Ok((a.asset_key_id == held.id).then(|| held.clone()))
            };
            let query = AssetQuery::prefix(&index::CONSENTS, "by_owner", vec![json!("pat1")]);
            let page = assets.iter(&query, &resolver, None).unwrap();
            assert_eq!(page.assets.len(), 1);
            assert_eq!(page.assets[0].asset_id, "Consent-pat1-svc1-heart");
        });
    }

    #[test]
    fn iter_limit_sets_bookmark() {
        with_store(&DatastoreRegistry::new(), |assets, _| {
            let key = Key::generate_sym("k").unwrap();
            for target in ["a", "b", "c"] {
                assets.add(&consent_asset("pat1", target, &key), &key).unwrap();
            }
            let resolver = |_: &Asset| -> OmrResult<Option<Key>> { Ok(None) };
            let mut query = AssetQuery::prefix(&index::CONSENTS, "by_owner", vec![json!("pat1")])
                .public_only()
                .limit(2);
            let first = assets.iter(&query, &resolver, None).unwrap();
            assert_eq!(first.assets.len(), 2);
            query.bookmark = first.bookmark;
            let second = assets.iter(&query, &resolver, None).unwrap();
            assert_eq!(second.assets.len(), 1);
            assert_eq!(second.assets[0].asset_id, "Consent-pat1-c-heart");
        });
    }

    #[test]
    fn offchain_connection_moves_ciphertext() {
        let registry = DatastoreRegistry::new();
        registry.register("docs", Arc::new(MemoryOffchainStore::new()));
        with_store(&registry, |assets, stub| {
            stub.put_state(DATASTORE_CONNECTION_KEY, b"docs".to_vec()).unwrap();
            let key = Key::generate_sym("k").unwrap();
            let asset = consent_asset("pat1", "svc1", &key);
            assets.add(&asset, &key).unwrap();

            let stored = assets.load("consent", &asset.asset_id).unwrap().unwrap();
            assert!(stored.private_data.is_empty());
            assert_eq!(stored.connection_id.as_deref(), Some("docs"));

            let opened = assets.get("consent", &asset.asset_id, Some(&key)).unwrap().unwrap();
            assert!(opened.is_decrypted());
        });
    }
}
