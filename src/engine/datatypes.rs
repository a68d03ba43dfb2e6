// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Datatype registry and per-owner datatype keys.
//!
//! Each owner holds one `datatype(d,o)` key per datatype it keeps data of.
//! Creating a child's key also creates the ancestors' keys and links
//! `datatype(parent,o) → datatype(child,o)`, so a grant on a parent reaches
//! every descendant.

use serde_json::json;

use super::logs::LogEngine;
use super::TxContext;
use crate::assets::index::DATATYPES;
use crate::assets::{Asset, AssetQuery, AssetRecord};
use crate::crypto::Key;
use crate::error::{OmrError, OmrResult};
use crate::keygraph::ids;
use crate::models::{Datatype, LogContext};

/// Bound on hierarchy depth; deeper chains are treated as cycles.
const MAX_LINEAGE_DEPTH: usize = 32;

pub struct DatatypeEngine<'a> {
    ctx: &'a TxContext<'a>,
}

impl<'a> DatatypeEngine<'a> {
    pub fn new(ctx: &'a TxContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn get(&self, datatype_id: &str) -> OmrResult<Option<Datatype>> {
        self.ctx.public_record::<Datatype>(datatype_id)
    }

    pub fn require(&self, datatype_id: &str) -> OmrResult<Datatype> {
        self.get(datatype_id)?
            .ok_or_else(|| OmrError::not_found(format!("datatype {datatype_id}")))
    }

    /// `registerDatatype`. The caller becomes the datatype's owner.
    pub fn register(&self, mut datatype: Datatype) -> OmrResult<Datatype> {
        self.ctx.caller_principal()?;
        ids::validate_id("datatype", &datatype.datatype_id)?;
        if self.get(&datatype.datatype_id)?.is_some() {
            return Err(OmrError::state(format!(
                "datatype {} already exists",
                datatype.datatype_id
            )));
        }
        if let Some(parent) = datatype.parent_datatype_id.as_deref() {
            if parent == datatype.datatype_id {
                return Err(OmrError::validation("datatype cannot be its own parent"));
            }
            self.require(parent)?;
        }

        datatype.owner_id = self.ctx.caller.id.clone();
        let acting = self.ctx.act_as(&self.ctx.caller.id)?;
        self.ctx.add_record(&datatype, &self.ctx.sym_key_of(&acting)?)?;

        tracing::info!(
            datatype_id = %datatype.datatype_id,
            owner = %datatype.owner_id,
            "datatype registered"
        );
        LogEngine::new(self.ctx).emit_principal(
            &acting.id,
            &acting.keypair,
            "datatype",
            LogContext {
                datatype: Some(datatype.datatype_id.clone()),
                ..Default::default()
            },
        )?;
        Ok(datatype)
    }

    /// `updateDatatype`: only the description may change, and only by the owner.
    pub fn update(&self, update: Datatype) -> OmrResult<Datatype> {
        let mut current = self.require(&update.datatype_id)?;
        if current.owner_id != self.ctx.caller.id {
            return Err(OmrError::denied(format!("datatype {}", current.datatype_id)));
        }
        if update.parent_datatype_id.is_some()
            && update.parent_datatype_id != current.parent_datatype_id
        {
            return Err(OmrError::validation("datatype parent cannot change"));
        }
        current.description = update.description;

        let acting = self.ctx.act_as(&self.ctx.caller.id)?;
        self.ctx.update_record(&current, &self.ctx.sym_key_of(&acting)?)?;
        LogEngine::new(self.ctx).emit_principal(
            &acting.id,
            &acting.keypair,
            "datatype",
            LogContext {
                datatype: Some(current.datatype_id.clone()),
                details: json!({"description": current.description}),
                ..Default::default()
            },
        )?;
        Ok(current)
    }

    /// `getAllDatatypes`.
    pub fn all(&self) -> OmrResult<Vec<Datatype>> {
        let query = AssetQuery::prefix(&DATATYPES, "by_id", Vec::new()).public_only();
        let none = |_: &Asset| -> OmrResult<Option<Key>> { Ok(None) };
        let page = self.ctx.assets.iter(&query, &none, None)?;
        page.assets.iter().map(Datatype::convert_from_asset).collect()
    }

    /// The datatype followed by its ancestors, nearest first.
    pub fn lineage(&self, datatype_id: &str) -> OmrResult<Vec<String>> {
        let mut lineage = vec![datatype_id.to_string()];
        let mut current = self.require(datatype_id)?;
        while let Some(parent) = current.parent_datatype_id.clone() {
            if lineage.contains(&parent) || lineage.len() >= MAX_LINEAGE_DEPTH {
                return Err(OmrError::state(format!(
                    "datatype hierarchy of {datatype_id} is cyclic"
                )));
            }
            lineage.push(parent.clone());
            current = self.require(&parent)?;
        }
        Ok(lineage)
    }

    /// `datatype(d,o)` for an owner whose key pair the caller holds,
    /// creating it (and its ancestors) on first use.
    pub fn ensure_key(
        &self,
        datatype_id: &str,
        owner_id: &str,
        owner_keypair: &Key,
    ) -> OmrResult<Key> {
        let lineage = self.lineage(datatype_id)?;
        let mut child: Option<Key> = None;
        // Walk from the root down so each parent exists before its child links to it.
        for level in (0..lineage.len()).rev() {
            let key = self.owner_key(&lineage[level], owner_id, owner_keypair)?;
            if let Some(parent) = child.take() {
                self.ctx.graph.add_edge(&parent, &key)?;
            }
            child = Some(key);
        }
        child.ok_or_else(|| OmrError::not_found(format!("datatype {datatype_id}")))
    }

    fn owner_key(&self, datatype_id: &str, owner_id: &str, owner_keypair: &Key) -> OmrResult<Key> {
        let key_id = ids::datatype(datatype_id, owner_id);
        let path = vec![owner_keypair.id.clone(), key_id.clone()];
        if let Some(existing) = self.ctx.graph.traverse(owner_keypair, &path)? {
            return Ok(existing);
        }
        let key = Key::generate_sym(key_id)?;
        self.ctx.graph.add_edge(&owner_keypair.to_public()?, &key)?;
        tracing::debug!(datatype_id, owner_id, "datatype key created");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::Fixture;
    use crate::engine::{Caller, PrincipalEngine};
    use crate::models::{Principal, PrincipalRole};

    fn datatype(id: &str, parent: Option<&str>) -> Datatype {
        Datatype {
            datatype_id: id.into(),
            description: format!("{id} data"),
            parent_datatype_id: parent.map(str::to_string),
            owner_id: String::new(),
        }
    }

    fn registered(fx: &Fixture, id: &str) -> Caller {
        let caller = Caller::generate(id).unwrap();
        fx.run(&caller, |ctx| {
            let principal = Principal::new(id, PrincipalRole::Patient);
            PrincipalEngine::new(ctx).register_user(principal, None, None, None)
        })
        .unwrap();
        caller
    }

    #[test]
    fn register_requires_parent_and_rejects_duplicates() {
        let fx = Fixture::new();
        let alice = registered(&fx, "alice");
        fx.run(&alice, |ctx| {
            let types = DatatypeEngine::new(ctx);
            assert!(matches!(
                types.register(datatype("ecg", Some("heart"))),
                Err(OmrError::NotFound(_))
            ));
            types.register(datatype("heart", None))?;
            types.register(datatype("ecg", Some("heart")))?;
            assert!(matches!(types.register(datatype("heart", None)), Err(OmrError::State(_))));
            assert_eq!(types.lineage("ecg")?, vec!["ecg".to_string(), "heart".to_string()]);
            assert_eq!(types.all()?.len(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn only_owner_updates() {
        let fx = Fixture::new();
        let alice = registered(&fx, "alice");
        let bob = registered(&fx, "bob");
        fx.run(&alice, |ctx| DatatypeEngine::new(ctx).register(datatype("heart", None)))
            .unwrap();

        let mut changed = datatype("heart", None);
        changed.description = "cardiac".into();
        let err = fx
            .run(&bob, |ctx| DatatypeEngine::new(ctx).update(changed.clone()))
            .unwrap_err();
        assert!(matches!(err, OmrError::PermissionDenied(_)));
        let updated = fx
            .run(&alice, |ctx| DatatypeEngine::new(ctx).update(changed.clone()))
            .unwrap();
        assert_eq!(updated.description, "cardiac");
    }

    #[test]
    fn child_key_links_from_parent_key() {
        let fx = Fixture::new();
        let alice = registered(&fx, "alice");
        fx.run(&alice, |ctx| {
            let types = DatatypeEngine::new(ctx);
            types.register(datatype("heart", None))?;
            types.register(datatype("ecg", Some("heart")))?;
            let child = types.ensure_key("ecg", "alice", &ctx.caller.keypair)?;
            assert_eq!(child.id, "datatype(ecg,alice)");
            assert!(ctx.graph.edge_exists("datatype(heart,alice)", "datatype(ecg,alice)")?);

            // Second call reuses the same material.
            let again = types.ensure_key("ecg", "alice", &ctx.caller.keypair)?;
            assert_eq!(again.material, child.material);
            Ok(())
        })
        .unwrap();
    }
}
