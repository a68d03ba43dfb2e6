// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Engines
//!
//! One engine per concern, each borrowing the transaction context. The
//! context bundles the stub, key graph and asset store of one invocation
//! together with the caller's identity.
//!
//! A caller acts on behalf of another principal only when a key path leads
//! from the caller's key pair to that principal's key pair; see
//! [`TxContext::act_as`].

pub mod audit;
pub mod consent;
pub mod contract;
pub mod data;
pub mod datatypes;
pub mod enrollment;
pub mod logs;
pub mod principals;

use std::cell::Cell;

use crate::assets::{AssetRecord, AssetStore};
use crate::config::Config;
use crate::crypto::{encode_b64, parse_keypair_b64, Key};
use crate::error::{OmrError, OmrResult};
use crate::keygraph::access::{phash_chains, principal_chains};
use crate::keygraph::{ids, KeyGraph, KeyPath, PrincipalRef};
use crate::ledger::paths::SYSTEM_ADMIN_KEY;
use crate::ledger::{LedgerStub, OffchainSession};
use crate::models::Principal;

pub use audit::AuditEngine;
pub use consent::ConsentEngine;
pub use contract::ContractEngine;
pub use data::DataEngine;
pub use datatypes::DatatypeEngine;
pub use enrollment::EnrollmentEngine;
pub use logs::LogEngine;
pub use principals::PrincipalEngine;

/// Identity presented with an invocation.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: String,
    /// Key pair with id `pubprv(id)`.
    pub keypair: Key,
}

impl Caller {
    pub fn new(id: impl Into<String>, keypair: Key) -> Self {
        let id = id.into();
        let keypair = keypair.with_id(ids::pubprv(&id));
        Self { id, keypair }
    }

    pub fn from_b64(id: impl Into<String>, keypair_b64: &str) -> OmrResult<Self> {
        let id = id.into();
        let keypair = parse_keypair_b64(ids::pubprv(&id), keypair_b64)?;
        Ok(Self { id, keypair })
    }

    /// Caller with a fresh key pair.
    pub fn generate(id: impl Into<String>) -> OmrResult<Self> {
        let id = id.into();
        let keypair = Key::generate_asym(ids::pubprv(&id))?;
        Ok(Self { id, keypair })
    }

    pub fn public_key_b64(&self) -> OmrResult<String> {
        Ok(encode_b64(&self.keypair.public_key_bytes()?))
    }
}

/// How the caller reached the principal it acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActingVia {
    Itself,
    Admin,
    OrgAdmin,
}

/// Principal the caller is acting as, with its private key pair.
#[derive(Debug, Clone)]
pub struct EffectivePrincipal {
    pub id: String,
    pub keypair: Key,
    pub via: ActingVia,
}

impl EffectivePrincipal {
    pub fn public_key(&self) -> OmrResult<Key> {
        Ok(self.keypair.to_public()?)
    }
}

/// State shared by the engines for one invocation.
pub struct TxContext<'a> {
    pub stub: &'a dyn LedgerStub,
    pub config: &'a Config,
    pub caller: &'a Caller,
    pub graph: KeyGraph<'a>,
    pub assets: AssetStore<'a>,
    log_seq: Cell<u32>,
}

impl<'a> TxContext<'a> {
    pub fn new(
        stub: &'a dyn LedgerStub,
        config: &'a Config,
        caller: &'a Caller,
        offchain: &'a OffchainSession<'a>,
    ) -> Self {
        Self {
            stub,
            config,
            caller,
            graph: KeyGraph::new(stub),
            assets: AssetStore::new(stub, offchain),
            log_seq: Cell::new(0),
        }
    }

    /// Transaction time in unix seconds.
    pub fn now(&self) -> i64 {
        self.stub.tx_timestamp()
    }

    pub fn tx_id(&self) -> &str {
        self.stub.tx_id()
    }

    pub(crate) fn next_log_seq(&self) -> u32 {
        let seq = self.log_seq.get();
        self.log_seq.set(seq + 1);
        seq
    }

    /// Caller-supplied timestamps must lie within the configured window of
    /// the transaction time.
    pub fn validate_timestamp(&self, timestamp: i64, what: &str) -> OmrResult<()> {
        let now = self.now();
        let window = self.config.time_window_secs;
        if timestamp < now - window || timestamp > now + window {
            return Err(OmrError::validation(format!(
                "Invalid {what}, not within possible time range"
            )));
        }
        Ok(())
    }

    // ========== Records ==========

    /// Load a record, decrypting it with `key` when possible.
    /// The flag tells whether private fields are present.
    pub fn load_record<T: AssetRecord>(
        &self,
        asset_id: &str,
        key: Option<&Key>,
    ) -> OmrResult<Option<(T, bool)>> {
        match self.assets.get(T::TABLE.namespace, asset_id, key)? {
            Some(asset) => Ok(Some((T::convert_from_asset(&asset)?, asset.is_decrypted()))),
            None => Ok(None),
        }
    }

    /// Public view of a record.
    pub fn public_record<T: AssetRecord>(&self, asset_id: &str) -> OmrResult<Option<T>> {
        Ok(self.load_record::<T>(asset_id, None)?.map(|(record, _)| record))
    }

    /// Load a record that must decrypt under `key`.
    pub fn private_record<T: AssetRecord>(&self, asset_id: &str, key: &Key) -> OmrResult<T> {
        match self.load_record::<T>(asset_id, Some(key))? {
            Some((record, true)) => Ok(record),
            Some((_, false)) => Err(OmrError::denied(format!("asset {asset_id}"))),
            None => Err(OmrError::not_found(format!("asset {asset_id}"))),
        }
    }

    pub fn add_record<T: AssetRecord>(&self, record: &T, key: &Key) -> OmrResult<()> {
        self.assets.add(&record.convert_to_asset()?, key)
    }

    pub fn update_record<T: AssetRecord>(&self, record: &T, key: &Key) -> OmrResult<()> {
        self.assets.update(&record.convert_to_asset()?, key)
    }

    // ========== Principals ==========

    pub fn principal(&self, id: &str) -> OmrResult<Option<Principal>> {
        self.public_record::<Principal>(id)
    }

    pub fn require_principal(&self, id: &str) -> OmrResult<Principal> {
        self.principal(id)?
            .ok_or_else(|| OmrError::not_found(format!("principal {id}")))
    }

    pub fn principal_ref(&self, id: &str) -> OmrResult<PrincipalRef> {
        Ok(self.require_principal(id)?.as_ref())
    }

    /// Registered public key of a principal, with id `pubprv(id)`.
    pub fn public_key_of(&self, principal: &Principal) -> OmrResult<Key> {
        let bytes = crate::crypto::decode_b64(&principal.public_key)?;
        Ok(Key::public(ids::pubprv(&principal.id), bytes)?)
    }

    pub fn system_admin_id(&self) -> OmrResult<Option<String>> {
        Ok(self
            .stub
            .get_state(SYSTEM_ADMIN_KEY)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .filter(|id| !id.is_empty()))
    }

    pub fn is_system_admin(&self) -> OmrResult<bool> {
        Ok(self.system_admin_id()?.as_deref() == Some(self.caller.id.as_str()))
    }

    /// A registered caller must present the key pair recorded for it.
    pub fn authenticate(&self) -> OmrResult<()> {
        let Some(principal) = self.principal(&self.caller.id)? else {
            return Ok(());
        };
        if principal.public_key != self.caller.public_key_b64()? {
            tracing::warn!(caller = %self.caller.id, "caller key pair does not match registration");
            return Err(OmrError::denied(format!(
                "principal {}: key pair does not match",
                self.caller.id
            )));
        }
        Ok(())
    }

    /// Registered principal record of the caller.
    pub fn caller_principal(&self) -> OmrResult<Principal> {
        self.principal(&self.caller.id)?.ok_or_else(|| {
            OmrError::denied(format!("unregistered caller {}", self.caller.id))
        })
    }

    // ========== Key resolution ==========

    /// First candidate path that resolves from the caller's key pair.
    pub fn resolve(&self, candidates: &[KeyPath]) -> OmrResult<Option<Key>> {
        self.graph.resolve(&self.caller.keypair, candidates)
    }

    /// Act as `target` if a path leads from the caller to its key pair.
    pub fn try_act_as(&self, target: &str) -> OmrResult<Option<EffectivePrincipal>> {
        if target == self.caller.id {
            return Ok(Some(EffectivePrincipal {
                id: target.to_string(),
                keypair: self.caller.keypair.clone(),
                via: ActingVia::Itself,
            }));
        }
        let Some(principal) = self.principal(target)? else {
            return Ok(None);
        };
        let chains = principal_chains(&self.caller.id, &principal.as_ref());
        for (i, chain) in chains.iter().enumerate() {
            let resolved = self
                .graph
                .resolve(&self.caller.keypair, std::slice::from_ref(chain))?;
            if let Some(keypair) = resolved {
                let via = if i == 0 { ActingVia::Admin } else { ActingVia::OrgAdmin };
                tracing::debug!(caller = %self.caller.id, %target, ?via, "acting as principal");
                return Ok(Some(EffectivePrincipal {
                    id: target.to_string(),
                    keypair,
                    via,
                }));
            }
        }
        Ok(None)
    }

    pub fn act_as(&self, target: &str) -> OmrResult<EffectivePrincipal> {
        self.try_act_as(target)?
            .ok_or_else(|| OmrError::denied(format!("principal {target}")))
    }

    /// `phash(target)`, held by the target itself and its admins.
    pub fn phash_key(&self, target: &Principal) -> OmrResult<Key> {
        self.resolve(&phash_chains(&self.caller.id, &target.as_ref()))?
            .ok_or_else(|| OmrError::denied(format!("principal {}", target.id)))
    }

    /// `sym(p)` of a principal the caller acts as.
    pub fn sym_key_of(&self, acting: &EffectivePrincipal) -> OmrResult<Key> {
        let path = vec![acting.keypair.id.clone(), ids::sym(&acting.id)];
        self.graph
            .traverse(&acting.keypair, &path)?
            .ok_or_else(|| OmrError::not_found(format!("key {}", ids::sym(&acting.id))))
    }

    /// Key `key_id` reached in one step from a principal the caller acts as.
    pub fn key_from(&self, acting: &EffectivePrincipal, key_id: &str) -> OmrResult<Option<Key>> {
        let path = vec![acting.keypair.id.clone(), key_id.to_string()];
        self.graph.traverse(&acting.keypair, &path)
    }
}
