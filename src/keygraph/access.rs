// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Canonical candidate paths.
//!
//! Every builder starts from the caller's key pair `pubprv(c)`. Candidates
//! are returned in the order they should be tried.

use super::ids;

/// Ordered list of key ids.
pub type KeyPath = Vec<String>;

/// A principal together with the org it belongs to, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalRef {
    pub id: String,
    pub org: Option<String>,
}

impl PrincipalRef {
    pub fn new(id: impl Into<String>, org: Option<String>) -> Self {
        Self {
            id: id.into(),
            org,
        }
    }

    pub fn standalone(id: impl Into<String>) -> Self {
        Self::new(id, None)
    }
}

fn path<S: AsRef<str>>(ids: &[S]) -> KeyPath {
    ids.iter().map(|s| s.as_ref().to_string()).collect()
}

/// Append `tail` to every chain.
pub fn extend(chains: Vec<KeyPath>, tail: &[String]) -> Vec<KeyPath> {
    chains
        .into_iter()
        .map(|mut chain| {
            chain.extend_from_slice(tail);
            chain
        })
        .collect()
}

/// Paths from the caller's key pair to `target`'s key pair:
/// self, direct admin, org admin.
pub fn principal_chains(caller: &str, target: &PrincipalRef) -> Vec<KeyPath> {
    let c = ids::pubprv(caller);
    if caller == target.id {
        return vec![vec![c]];
    }

    let t_phash = ids::phash(&target.id);
    let t_pub = ids::pubprv(&target.id);
    let mut chains = vec![path(&[&c, &t_phash, &t_pub])];

    if let Some(org) = target.org.as_deref().filter(|org| *org != caller) {
        chains.push(path(&[
            &c,
            &ids::phash(org),
            &ids::pubprv(org),
            &t_phash,
            &t_pub,
        ]));
    }
    chains
}

/// Paths from the caller's key pair to `phash(target)`.
pub fn phash_chains(caller: &str, target: &PrincipalRef) -> Vec<KeyPath> {
    let c = ids::pubprv(caller);
    let t_phash = ids::phash(&target.id);
    if caller == target.id {
        return vec![path(&[&c, &t_phash])];
    }

    let mut chains = vec![path(&[&c, &t_phash])];
    if let Some(org) = target.org.as_deref().filter(|org| *org != caller) {
        chains.push(path(&[&c, &ids::phash(org), &ids::pubprv(org), &t_phash]));
    }
    chains
}

/// Generic asset owned by `owner`: owner, direct admin, org admin.
pub fn asset_paths(caller: &str, owner: &PrincipalRef, asset_key_id: &str) -> Vec<KeyPath> {
    extend(principal_chains(caller, owner), &[asset_key_id.to_string()])
}

/// Asset reachable through any of several principals.
pub fn shared_asset_paths(
    caller: &str,
    holders: &[PrincipalRef],
    asset_key_id: &str,
) -> Vec<KeyPath> {
    let mut out = Vec::new();
    for holder in holders {
        for candidate in asset_paths(caller, holder, asset_key_id) {
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
    }
    out
}

/// Datatype key of `owner` reached on behalf of `target`.
///
/// `lineage` starts with the datatype itself followed by its ancestors.
/// For each chain to `target`, the datatype key is reached either directly
/// (owner, contract grant) or through a consent key; a grant or consent on
/// an ancestor reaches the child through `datatype(parent)→datatype(child)`.
pub fn datatype_paths(
    caller: &str,
    target: &PrincipalRef,
    owner: &str,
    lineage: &[String],
) -> Vec<KeyPath> {
    let mut out = Vec::new();
    for chain in principal_chains(caller, target) {
        for level in 0..lineage.len() {
            let mut via_datatype = chain.clone();
            via_datatype.extend(descent(owner, lineage, level));
            out.push(via_datatype);
        }
        for level in 0..lineage.len() {
            let mut via_consent = chain.clone();
            via_consent.push(ids::consent(&lineage[level], &target.id, owner));
            via_consent.extend(descent(owner, lineage, level));
            out.push(via_consent);
        }
    }
    out
}

/// Data key of `owner` for a datatype, read on behalf of `target`.
pub fn owner_data_paths(
    caller: &str,
    target: &PrincipalRef,
    owner: &str,
    lineage: &[String],
    data_key_id: &str,
) -> Vec<KeyPath> {
    extend(
        datatype_paths(caller, target, owner, lineage),
        &[data_key_id.to_string()],
    )
}

/// `datatype(lineage[level],o) → … → datatype(lineage[0],o)`.
fn descent(owner: &str, lineage: &[String], level: usize) -> Vec<String> {
    lineage[..=level]
        .iter()
        .rev()
        .map(|d| ids::datatype(d, owner))
        .collect()
}

/// Log key of a principal: through the principal chains, or as an auditor
/// holding an audit permission on it.
pub fn principal_log_paths(caller: &str, principal: &PrincipalRef) -> Vec<KeyPath> {
    let parent = ids::pubprv(&principal.id);
    let log = ids::log(&parent);
    let mut out = extend(principal_chains(caller, principal), &[log.clone()]);
    out.push(path(&[
        &ids::pubprv(caller),
        &ids::sym(&ids::audit_permission_asset(caller, &principal.id)),
        &log,
    ]));
    out
}

/// Log key of an enrollment: through the service's log chain, an auditor
/// of the service, or the patient's own enrollment edge.
pub fn enrollment_log_paths(
    caller: &str,
    user: &PrincipalRef,
    service: &PrincipalRef,
) -> Vec<KeyPath> {
    let enrollment_key = ids::sym(&ids::enrollment_asset(&user.id, &service.id));
    let log = ids::log(&enrollment_key);
    let service_log = ids::log(&ids::pubprv(&service.id));

    let mut out = extend(
        principal_chains(caller, service),
        &[service_log.clone(), log.clone()],
    );
    out.push(path(&[
        &ids::pubprv(caller),
        &ids::sym(&ids::audit_permission_asset(caller, &service.id)),
        &service_log,
        &log,
    ]));
    out.extend(extend(principal_chains(caller, user), &[enrollment_key, log]));
    out
}

/// Log key of a contract: through either party's contract key or its
/// service log chain, including auditors of either service.
pub fn contract_log_paths(
    caller: &str,
    contract_id: &str,
    parties: &[PrincipalRef],
) -> Vec<KeyPath> {
    let contract_key = ids::sym(contract_id);
    let log = ids::log(&contract_key);

    let mut out = Vec::new();
    for party in parties {
        let service_log = ids::log(&ids::pubprv(&party.id));
        out.extend(extend(
            principal_chains(caller, party),
            &[contract_key.clone(), log.clone()],
        ));
        out.push(path(&[
            &ids::pubprv(caller),
            &ids::sym(&ids::audit_permission_asset(caller, &party.id)),
            &service_log,
            &log,
        ]));
    }
    out
}
