// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Data-sharing contracts between an owner service and a requester service.
//!
//! Both services reach the contract key `sym(C)`. Each side links its own
//! log key to `log(sym(C))`; the requester when it creates the contract,
//! the owner on its first transition.

use serde_json::{json, Value};

use super::datatypes::DatatypeEngine;
use super::logs::LogEngine;
use super::{EffectivePrincipal, TxContext};
use crate::assets::index::CONTRACTS;
use crate::assets::{Asset, AssetQuery, AssetRecord};
use crate::crypto::{decode_b64, parse_sym_b64, Key};
use crate::error::{OmrError, OmrResult};
use crate::keygraph::access::shared_asset_paths;
use crate::keygraph::ids;
use crate::models::{
    Contract, ContractState, DetailType, LogContext, LogScope, Party, PrincipalRole,
};

pub struct ContractEngine<'a> {
    ctx: &'a TxContext<'a>,
}

impl<'a> ContractEngine<'a> {
    pub fn new(ctx: &'a TxContext<'a>) -> Self {
        Self { ctx }
    }

    fn key(&self, contract: &Contract) -> OmrResult<Option<Key>> {
        let holders = [
            self.ctx.principal_ref(&contract.owner_service)?,
            self.ctx.principal_ref(&contract.requester_service)?,
        ];
        self.ctx.resolve(&shared_asset_paths(
            &self.ctx.caller.id,
            &holders,
            &contract.key_id(),
        ))
    }

    /// Full contract and its key; the caller must reach the key through
    /// either party.
    pub fn open(&self, contract_id: &str) -> OmrResult<(Contract, Key)> {
        let public = self
            .ctx
            .public_record::<Contract>(contract_id)?
            .ok_or_else(|| OmrError::not_found(format!("contract {contract_id}")))?;
        let key = self
            .key(&public)?
            .ok_or_else(|| OmrError::denied(format!("contract {contract_id}")))?;
        let contract = self.ctx.private_record::<Contract>(contract_id, &key)?;
        Ok((contract, key))
    }

    /// `getContract`: the full record when readable, else the public view.
    pub fn get(&self, contract_id: &str) -> OmrResult<Option<Contract>> {
        let Some(public) = self.ctx.public_record::<Contract>(contract_id)? else {
            return Ok(None);
        };
        let key = self.key(&public)?;
        Ok(self
            .ctx
            .load_record::<Contract>(contract_id, key.as_ref())?
            .map(|(record, _)| record))
    }

    fn require_service(&self, service_id: &str, org_id: &str) -> OmrResult<()> {
        let service = self.ctx.require_principal(service_id)?;
        if service.role != PrincipalRole::Service {
            return Err(OmrError::validation(format!("{service_id} is not a service")));
        }
        if service.org_id.as_deref() != Some(org_id) {
            return Err(OmrError::validation(format!(
                "service {service_id} does not belong to org {org_id}"
            )));
        }
        Ok(())
    }

    fn log(&self, contract: &Contract, key: &Key, detail: DetailType) -> OmrResult<()> {
        LogEngine::new(self.ctx).emit(
            LogScope::Contract {
                contract_id: contract.contract_id.clone(),
                owner_service: contract.owner_service.clone(),
                requester_service: contract.requester_service.clone(),
            },
            key,
            "contract",
            LogContext {
                contract: Some(contract.contract_id.clone()),
                owner: Some(contract.owner_service.clone()),
                target: Some(contract.requester_service.clone()),
                contract_owner_org: Some(contract.owner_org.clone()),
                contract_requester_org: Some(contract.requester_org.clone()),
                details: json!({"detail": detail.as_str(), "state": contract.state}),
                ..Default::default()
            },
        )?;
        Ok(())
    }

    /// Link a party's log key to the contract log key.
    fn link_log(&self, acting: &EffectivePrincipal, key: &Key) -> OmrResult<()> {
        self.ctx
            .graph
            .add_edge(&acting.keypair.log_key(), &key.log_key())
    }

    /// Other contracts between the same two services that still hold a
    /// download grant on `datatype_id`.
    fn live_grants(&self, contract: &Contract, datatype_id: &str) -> OmrResult<Vec<String>> {
        let query = AssetQuery::prefix(&CONTRACTS, "by_owner", vec![json!(contract.owner_service)])
            .public_only();
        let no_key = |_: &Asset| -> OmrResult<Option<Key>> { Ok(None) };
        let page = self.ctx.assets.iter(&query, &no_key, None)?;
        let mut live = Vec::new();
        for asset in &page.assets {
            let other = Contract::convert_from_asset(asset)?;
            if other.contract_id != contract.contract_id
                && other.requester_service == contract.requester_service
                && other.state == ContractState::DownloadReady
                && other.permitted_datatypes.iter().any(|d| d == datatype_id)
            {
                live.push(other.contract_id);
            }
        }
        Ok(live)
    }

    /// Drop the requester's grants on the owner's datatype keys, keeping
    /// any edge another live contract still downloads through.
    fn revoke_grants(&self, contract: &mut Contract) -> OmrResult<()> {
        let permitted = std::mem::take(&mut contract.permitted_datatypes);
        for datatype_id in permitted {
            let live = self.live_grants(contract, &datatype_id)?;
            if !live.is_empty() {
                tracing::debug!(
                    contract_id = %contract.contract_id,
                    %datatype_id,
                    ?live,
                    "grant kept for other contracts"
                );
                continue;
            }
            self.ctx.graph.remove_edge(
                &ids::pubprv(&contract.requester_service),
                &ids::datatype(&datatype_id, &contract.owner_service),
            )?;
        }
        Ok(())
    }

    /// `createContract`, by an admin of the requester service.
    pub fn create(&self, mut contract: Contract, sym_b64: &str) -> OmrResult<Contract> {
        self.ctx.validate_timestamp(contract.create_date, "create date")?;
        ids::validate_id("contract", &contract.contract_id)?;
        if self.ctx.public_record::<Contract>(&contract.contract_id)?.is_some() {
            return Err(OmrError::state(format!(
                "contract {} already exists",
                contract.contract_id
            )));
        }
        if contract.owner_service == contract.requester_service {
            return Err(OmrError::validation("contract owner and requester must differ"));
        }
        self.require_service(&contract.owner_service, &contract.owner_org)?;
        self.require_service(&contract.requester_service, &contract.requester_org)?;
        let acting = self.ctx.act_as(&contract.requester_service)?;
        let owner = self.ctx.require_principal(&contract.owner_service)?;

        let terms = contract.terms.clone();
        contract.state = ContractState::New;
        contract.details.clear();
        contract.num_download = 0;
        contract.max_num_download = 0;
        contract.payment_verified = false;
        contract.permitted_datatypes.clear();
        contract.apply(
            Party::Requester,
            DetailType::Request,
            terms,
            contract.create_date,
            &self.ctx.caller.id,
        )?;

        let key = parse_sym_b64(contract.key_id(), sym_b64)?;
        self.ctx.add_record(&contract, &key)?;
        self.ctx.graph.add_edge(&acting.public_key()?, &key)?;
        self.ctx.graph.add_edge(&self.ctx.public_key_of(&owner)?, &key)?;
        self.link_log(&acting, &key)?;

        tracing::info!(
            contract_id = %contract.contract_id,
            requester = %contract.requester_service,
            owner = %contract.owner_service,
            "contract created"
        );
        self.log(&contract, &key, DetailType::Request)?;
        Ok(contract)
    }

    /// `addContractDetail`: negotiation steps and termination. Downloads
    /// and grants go through their own operations.
    pub fn add_detail(
        &self,
        contract_id: &str,
        detail: DetailType,
        terms: Value,
        timestamp: i64,
    ) -> OmrResult<Contract> {
        self.ctx.validate_timestamp(timestamp, "timestamp")?;
        match detail {
            DetailType::Download => {
                return Err(OmrError::validation(
                    "downloads are recorded with addContractDetailDownload",
                ))
            }
            DetailType::Permission => {
                return Err(OmrError::validation(
                    "permissions are granted with givePermissionByContract",
                ))
            }
            _ => {}
        }
        let (mut contract, key) = self.open(contract_id)?;

        // The first party the caller acts as whose move is legal.
        let mut chosen = None;
        let mut rejection = None;
        for party in [Party::Owner, Party::Requester] {
            let Some(acting) = self.ctx.try_act_as(contract.party_service(party))? else {
                continue;
            };
            match contract.next_state(party, detail) {
                Ok(_) => {
                    chosen = Some((party, acting));
                    break;
                }
                Err(e) => rejection = Some(e),
            }
        }
        let (party, acting) = match (chosen, rejection) {
            (Some(found), _) => found,
            (None, Some(e)) => return Err(e),
            (None, None) => return Err(OmrError::denied(format!("contract {contract_id}"))),
        };

        contract.apply(party, detail, terms, timestamp, &self.ctx.caller.id)?;
        if detail == DetailType::Terminate {
            self.revoke_grants(&mut contract)?;
        }
        self.ctx.update_record(&contract, &key)?;
        if party == Party::Owner {
            self.link_log(&acting, &key)?;
        }

        tracing::info!(
            %contract_id,
            detail = detail.as_str(),
            state = %contract.state,
            "contract detail added"
        );
        self.log(&contract, &key, detail)?;
        Ok(contract)
    }

    /// `givePermissionByContract`: the owner lets the requester reach its
    /// datatype key for up to `max_num_download` downloads.
    pub fn give_permission(
        &self,
        contract_id: &str,
        max_num_download: u32,
        timestamp: i64,
        datatype_id: &str,
    ) -> OmrResult<Contract> {
        self.ctx.validate_timestamp(timestamp, "timestamp")?;
        let (mut contract, key) = self.open(contract_id)?;
        let acting = self.ctx.act_as(&contract.owner_service)?;
        let owner = self.ctx.require_principal(&contract.owner_service)?;
        if !owner.has_datatype(datatype_id) {
            return Err(OmrError::validation(format!(
                "service {} does not use datatype {datatype_id}",
                owner.id
            )));
        }

        contract.grant_downloads(max_num_download, datatype_id, timestamp, &self.ctx.caller.id)?;
        let datatype_key =
            DatatypeEngine::new(self.ctx).ensure_key(datatype_id, &owner.id, &acting.keypair)?;
        let requester = self.ctx.require_principal(&contract.requester_service)?;
        self.ctx
            .graph
            .add_edge(&self.ctx.public_key_of(&requester)?, &datatype_key)?;
        self.ctx.update_record(&contract, &key)?;
        self.link_log(&acting, &key)?;

        tracing::info!(%contract_id, datatype_id, max_num_download, "contract permission granted");
        self.log(&contract, &key, DetailType::Permission)?;
        Ok(contract)
    }

    /// `addContractDetailDownload`: the requester posts back the snapshot it
    /// received with the data. A snapshot taken before another download is
    /// stale and rejected.
    pub fn record_download(
        &self,
        contract_id: &str,
        snapshot_b64: &str,
        timestamp: i64,
    ) -> OmrResult<Contract> {
        self.ctx.validate_timestamp(timestamp, "timestamp")?;
        let (mut contract, key) = self.open(contract_id)?;
        self.ctx.act_as(&contract.requester_service)?;

        let invalid = || OmrError::validation("invalid contract snapshot");
        let sealed = decode_b64(snapshot_b64).map_err(|_| invalid())?;
        let plain = key.decrypt(&sealed).map_err(|_| invalid())?;
        let snapshot: Contract = serde_json::from_slice(&plain).map_err(|_| invalid())?;
        if snapshot.contract_id != contract.contract_id
            || snapshot.num_download != contract.num_download
        {
            return Err(OmrError::state("stale contract snapshot"));
        }

        let state = contract.apply(
            Party::Requester,
            DetailType::Download,
            Value::Null,
            timestamp,
            &self.ctx.caller.id,
        )?;
        if state == ContractState::DownloadDone {
            self.revoke_grants(&mut contract)?;
        }
        self.ctx.update_record(&contract, &key)?;

        tracing::info!(
            %contract_id,
            num_download = contract.num_download,
            state = %state,
            "contract download recorded"
        );
        self.log(&contract, &key, DetailType::Download)?;
        Ok(contract)
    }

    /// `getOwnerContracts`.
    pub fn by_owner(
        &self,
        service_id: &str,
        state: Option<ContractState>,
    ) -> OmrResult<Vec<Contract>> {
        self.list("by_owner", service_id, state)
    }

    /// `getRequesterContracts`.
    pub fn by_requester(
        &self,
        service_id: &str,
        state: Option<ContractState>,
    ) -> OmrResult<Vec<Contract>> {
        self.list("by_requester", service_id, state)
    }

    fn list(
        &self,
        index: &str,
        service_id: &str,
        state: Option<ContractState>,
    ) -> OmrResult<Vec<Contract>> {
        let resolver = |asset: &Asset| -> OmrResult<Option<Key>> {
            self.key(&Contract::convert_from_asset(asset)?)
        };
        let filter = |asset: &Asset| -> bool {
            state.is_none_or(|wanted| {
                Contract::convert_from_asset(asset).is_ok_and(|c| c.state == wanted)
            })
        };
        let query = AssetQuery::prefix(&CONTRACTS, index, vec![json!(service_id)]);
        let page = self.ctx.assets.iter(&query, &resolver, Some(&filter))?;
        page.assets.iter().map(Contract::convert_from_asset).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::encode_b64;
    use crate::engine::principals::tests::{org_with_service, register_self};
    use crate::engine::testing::{Fixture, NOW};
    use crate::engine::Caller;

    /// alice administers org1/svc1 (owner, genome); bob administers
    /// org2/svc2 (requester).
    pub(crate) fn parties(fx: &Fixture) -> (Caller, Caller) {
        let alice = register_self(fx, "alice", PrincipalRole::Patient);
        let bob = register_self(fx, "bob", PrincipalRole::Patient);
        org_with_service(fx, &alice, "org1", "svc1", &["genome"]);
        org_with_service(fx, &bob, "org2", "svc2", &[]);
        (alice, bob)
    }

    pub(crate) fn draft(payment_required: bool) -> Contract {
        Contract {
            contract_id: "C1".into(),
            owner_org: "org1".into(),
            owner_service: "svc1".into(),
            requester_org: "org2".into(),
            requester_service: "svc2".into(),
            state: ContractState::New,
            terms: Value::Null,
            details: Vec::new(),
            max_num_download: 0,
            num_download: 0,
            payment_required,
            payment_verified: false,
            create_date: NOW,
            update_date: 0,
            permitted_datatypes: Vec::new(),
        }
    }

    /// Contract C1 negotiated up to `contractSigned`.
    pub(crate) fn signed(fx: &Fixture, alice: &Caller, bob: &Caller) {
        signed_as(fx, alice, bob, "C1", 3);
    }

    pub(crate) fn signed_as(fx: &Fixture, alice: &Caller, bob: &Caller, id: &str, key_byte: u8) {
        let key = encode_b64(&[key_byte; 32]);
        let mut contract = draft(false);
        contract.contract_id = id.to_string();
        fx.run(bob, |ctx| ContractEngine::new(ctx).create(contract, &key))
            .unwrap();
        fx.run(alice, |ctx| {
            ContractEngine::new(ctx).add_detail(id, DetailType::Request, json!({}), NOW)
        })
        .unwrap();
        fx.run(bob, |ctx| {
            ContractEngine::new(ctx).add_detail(id, DetailType::Sign, Value::Null, NOW)
        })
        .unwrap();
    }

    /// The requester's sealed copy of the current contract.
    fn snapshot(fx: &Fixture, bob: &Caller, id: &str) -> String {
        fx.run(bob, |ctx| {
            let (contract, key) = ContractEngine::new(ctx).open(id)?;
            Ok(encode_b64(&key.encrypt(&serde_json::to_vec(&contract)?)?))
        })
        .unwrap()
    }

    #[test]
    fn negotiation_reaches_signed() {
        let fx = Fixture::new();
        let (alice, bob) = parties(&fx);
        signed(&fx, &alice, &bob);

        let contract = fx
            .run(&alice, |ctx| ContractEngine::new(ctx).get("C1"))
            .unwrap()
            .unwrap();
        assert_eq!(contract.state, ContractState::ContractSigned);
        assert_eq!(contract.details.len(), 3);
        assert_eq!(contract.details[1].created_by, "alice");
    }

    #[test]
    fn only_parties_move_the_contract() {
        let fx = Fixture::new();
        let (alice, bob) = parties(&fx);
        let carol = register_self(&fx, "carol", PrincipalRole::Patient);
        let key = encode_b64(&[3u8; 32]);
        fx.run(&bob, |ctx| ContractEngine::new(ctx).create(draft(false), &key))
            .unwrap();

        let step = |who: &Caller, detail: DetailType| {
            fx.run(who, |ctx| {
                ContractEngine::new(ctx).add_detail("C1", detail, Value::Null, NOW)
            })
        };
        let err = step(&carol, DetailType::Terminate).unwrap_err();
        assert!(matches!(err, OmrError::PermissionDenied(_)));

        // The requester cannot accept its own request.
        let err = step(&bob, DetailType::Sign).unwrap_err();
        assert!(matches!(err, OmrError::State(_)));

        let err = step(&alice, DetailType::Download).unwrap_err();
        assert!(matches!(err, OmrError::Validation(_)));
    }

    #[test]
    fn create_checks_orgs_and_dates() {
        let fx = Fixture::new();
        let (_, bob) = parties(&fx);
        let key = encode_b64(&[3u8; 32]);

        let mut wrong_org = draft(false);
        wrong_org.owner_org = "org2".into();
        let err = fx
            .run(&bob, |ctx| ContractEngine::new(ctx).create(wrong_org, &key))
            .unwrap_err();
        assert!(matches!(err, OmrError::Validation(_)));

        let mut late = draft(false);
        late.create_date = NOW + 3600;
        let err = fx
            .run(&bob, |ctx| ContractEngine::new(ctx).create(late, &key))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid create date, not within possible time range");
    }

    #[test]
    fn permission_grants_and_final_download_revokes() {
        let fx = Fixture::new();
        let (alice, bob) = parties(&fx);
        signed(&fx, &alice, &bob);

        fx.run(&alice, |ctx| ContractEngine::new(ctx).give_permission("C1", 1, NOW, "genome"))
            .unwrap();
        let edge = |fx: &Fixture| {
            fx.run(&bob, |ctx| ctx.graph.edge_exists("pubprv(svc2)", "datatype(genome,svc1)"))
                .unwrap()
        };
        assert!(edge(&fx));

        let snapshot = snapshot(&fx, &bob, "C1");
        let done = fx
            .run(&bob, |ctx| ContractEngine::new(ctx).record_download("C1", &snapshot, NOW))
            .unwrap();
        assert_eq!(done.state, ContractState::DownloadDone);
        assert!(done.permitted_datatypes.is_empty());
        assert!(!edge(&fx));

        // Replaying the old snapshot is rejected.
        let err = fx
            .run(&bob, |ctx| ContractEngine::new(ctx).record_download("C1", &snapshot, NOW))
            .unwrap_err();
        assert!(matches!(err, OmrError::State(_)));

        let owned = fx
            .run(&alice, |ctx| {
                ContractEngine::new(ctx).by_owner("svc1", Some(ContractState::DownloadDone))
            })
            .unwrap();
        assert_eq!(owned.len(), 1);
        let requested = fx
            .run(&bob, |ctx| {
                ContractEngine::new(ctx).by_requester("svc2", Some(ContractState::Requested))
            })
            .unwrap();
        assert!(requested.is_empty());
    }

    #[test]
    fn finished_contract_keeps_grant_of_sibling_contract() {
        let fx = Fixture::new();
        let (alice, bob) = parties(&fx);
        signed_as(&fx, &alice, &bob, "C1", 3);
        signed_as(&fx, &alice, &bob, "C2", 6);
        for (id, max) in [("C1", 1), ("C2", 5)] {
            fx.run(&alice, |ctx| {
                ContractEngine::new(ctx).give_permission(id, max, NOW, "genome")
            })
            .unwrap();
        }
        let edge = |fx: &Fixture| {
            fx.run(&bob, |ctx| {
                ctx.graph
                    .edge_exists("pubprv(svc2)", "datatype(genome,svc1)")
            })
            .unwrap()
        };

        let c1 = snapshot(&fx, &bob, "C1");
        let done = fx
            .run(&bob, |ctx| ContractEngine::new(ctx).record_download("C1", &c1, NOW))
            .unwrap();
        assert_eq!(done.state, ContractState::DownloadDone);

        let c2 = fx
            .run(&bob, |ctx| ContractEngine::new(ctx).get("C2"))
            .unwrap()
            .unwrap();
        assert_eq!(c2.state, ContractState::DownloadReady);
        assert_eq!(c2.permitted_datatypes, vec!["genome".to_string()]);
        assert!(edge(&fx));

        // Terminating the last live contract drops the grant.
        fx.run(&alice, |ctx| {
            ContractEngine::new(ctx).add_detail("C2", DetailType::Terminate, Value::Null, NOW)
        })
        .unwrap();
        assert!(!edge(&fx));
    }

    #[test]
    fn contract_logs_reach_both_parties() {
        let fx = Fixture::new();
        let (alice, bob) = parties(&fx);
        signed(&fx, &alice, &bob);

        let query = crate::models::LogQuery {
            contract_id: Some("C1".into()),
            ..Default::default()
        };
        for who in [&alice, &bob] {
            let logs = fx
                .run(who, |ctx| LogEngine::new(ctx).get_logs(&query))
                .unwrap();
            assert_eq!(logs.len(), 3);
            assert_eq!(logs[0].data.contract_owner_org.as_deref(), Some("org1"));
            assert_eq!(logs[0].data.contract_requester_org.as_deref(), Some("org2"));
        }
    }
}
