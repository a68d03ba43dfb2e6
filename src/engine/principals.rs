// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity: users, orgs, services and their admins.
//!
//! Registering a principal `p` creates three keys and three edges:
//!
//! | Edge | Purpose |
//! |------|---------|
//! | `pubprv(p) → sym(p)` | `p` reads its own record |
//! | `phash(p) → pubprv(p)` | holders of `phash(p)` act as `p` |
//! | `pubprv(p) → phash(p)` | `p` can hand `phash(p)` to new admins |
//!
//! Making `u` an admin of a group `g` adds `pubprv(u) → phash(g)`. An org
//! admin reaches every service of the org through
//! `phash(org) → pubprv(org) → phash(svc) → pubprv(svc)`.

use serde::Serialize;
use serde_json::json;

use super::datatypes::DatatypeEngine;
use super::logs::LogEngine;
use super::{EffectivePrincipal, TxContext};
use crate::assets::index::PRINCIPALS;
use crate::assets::{Asset, AssetQuery, AssetRecord};
use crate::crypto::{encode_b64, parse_keypair_b64, parse_sym_b64, Key};
use crate::error::{OmrError, OmrResult};
use crate::keygraph::access::asset_paths;
use crate::keygraph::ids;
use crate::ledger::paths::SYSTEM_ADMIN_KEY;
use crate::models::principal::push_unique;
use crate::models::{LogContext, Principal, PrincipalRole};

/// Result of a registration. `private_key` is set only when the key pair
/// was generated here and must be handed back to the new principal.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub id: String,
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

pub struct PrincipalEngine<'a> {
    ctx: &'a TxContext<'a>,
}

impl<'a> PrincipalEngine<'a> {
    pub fn new(ctx: &'a TxContext<'a>) -> Self {
        Self { ctx }
    }

    fn logs(&self) -> LogEngine<'a> {
        LogEngine::new(self.ctx)
    }

    /// Key pair of a new principal: the caller's own when registering itself,
    /// otherwise the supplied one or a fresh one.
    fn keypair_for(&self, id: &str, keypair_b64: Option<&str>) -> OmrResult<(Key, bool)> {
        if id == self.ctx.caller.id {
            if let Some(b64) = keypair_b64 {
                let supplied = parse_keypair_b64(ids::pubprv(id), b64)?;
                if supplied.public_key_bytes()? != self.ctx.caller.keypair.public_key_bytes()? {
                    return Err(OmrError::validation("key pair does not match caller"));
                }
            }
            return Ok((self.ctx.caller.keypair.clone(), false));
        }
        match keypair_b64 {
            Some(b64) => Ok((parse_keypair_b64(ids::pubprv(id), b64)?, false)),
            None => Ok((Key::generate_asym(ids::pubprv(id))?, true)),
        }
    }

    /// Persist the principal and its identity edges. Returns `(sym, phash)`.
    fn create(
        &self,
        principal: &mut Principal,
        keypair: &Key,
        sym_b64: Option<&str>,
    ) -> OmrResult<(Key, Key)> {
        ids::validate_id("principal", &principal.id)?;
        if self.ctx.principal(&principal.id)?.is_some() {
            return Err(OmrError::state(format!(
                "principal {} already registered",
                principal.id
            )));
        }

        let sym = match sym_b64 {
            Some(b64) => parse_sym_b64(ids::sym(&principal.id), b64)?,
            None => Key::generate_sym(ids::sym(&principal.id))?,
        };
        let phash = Key::generate_sym(ids::phash(&principal.id))?;
        let public = keypair.to_public()?;
        principal.public_key = encode_b64(&keypair.public_key_bytes()?);
        principal.is_group = principal.role.is_group();

        self.ctx.graph.add_edge(&public, &sym)?;
        self.ctx.graph.add_edge(&phash, keypair)?;
        self.ctx.graph.add_edge(&public, &phash)?;
        self.ctx.add_record(principal, &sym)?;

        tracing::info!(
            principal_id = %principal.id,
            role = %principal.role,
            "principal registered"
        );
        Ok((sym, phash))
    }

    fn registration(principal: &Principal, keypair: &Key, generated: bool) -> Registration {
        Registration {
            id: principal.id.clone(),
            public_key: principal.public_key.clone(),
            private_key: generated.then(|| keypair.material_b64()),
        }
    }

    fn log_for(&self, principal_id: &str, keypair: &Key, data: LogContext) -> OmrResult<()> {
        self.logs()
            .emit_principal(principal_id, keypair, "principal", data)?;
        Ok(())
    }

    fn require_role(&self, id: &str, role: PrincipalRole) -> OmrResult<Principal> {
        let principal = self.ctx.require_principal(id)?;
        if principal.role != role {
            return Err(OmrError::validation(format!("{id} is not a {role}")));
        }
        Ok(principal)
    }

    /// Full record of a principal the caller acts as, with its `sym` key.
    fn private_of(&self, acting: &EffectivePrincipal) -> OmrResult<(Principal, Key)> {
        let sym = self.ctx.sym_key_of(acting)?;
        let record = self.ctx.private_record::<Principal>(&acting.id, &sym)?;
        Ok((record, sym))
    }

    // ========== Users ==========

    /// `registerSystemAdmin`: only while no system admin exists, and only
    /// for the caller itself.
    pub fn register_system_admin(
        &self,
        mut user: Principal,
        sym_b64: Option<&str>,
    ) -> OmrResult<Registration> {
        if self.ctx.system_admin_id()?.is_some() {
            return Err(OmrError::state("system admin is already registered"));
        }
        if user.id != self.ctx.caller.id {
            return Err(OmrError::validation("system admin must register itself"));
        }
        user.role = PrincipalRole::System;
        user.org_id = None;

        let keypair = self.ctx.caller.keypair.clone();
        self.create(&mut user, &keypair, sym_b64)?;
        self.ctx
            .stub
            .put_state(SYSTEM_ADMIN_KEY, user.id.as_bytes().to_vec())?;
        self.log_for(
            &user.id,
            &keypair,
            LogContext {
                user: Some(user.id.clone()),
                details: json!({"role": "system"}),
                ..Default::default()
            },
        )?;
        Ok(Self::registration(&user, &keypair, false))
    }

    /// `registerUser` / `registerAuditor`.
    ///
    /// A user registers itself, or is registered by the system admin, or by
    /// an admin of the org named in `org_id` (who then lists it as member).
    pub fn register_user(
        &self,
        mut user: Principal,
        keypair_b64: Option<&str>,
        sym_b64: Option<&str>,
        role: Option<PrincipalRole>,
    ) -> OmrResult<Registration> {
        if let Some(role) = role {
            user.role = role;
        }
        if !matches!(user.role, PrincipalRole::Patient | PrincipalRole::Audit) {
            return Err(OmrError::validation(format!(
                "role {} cannot be registered as a user",
                user.role
            )));
        }
        ids::validate_id("principal", &user.id)?;

        let org = match user.org_id.clone() {
            Some(org_id) => {
                self.require_role(&org_id, PrincipalRole::Org)?;
                Some(self.ctx.act_as(&org_id)?)
            }
            None => None,
        };
        if user.id != self.ctx.caller.id && org.is_none() && !self.ctx.is_system_admin()? {
            return Err(OmrError::denied(format!("registration of {}", user.id)));
        }

        let (keypair, generated) = self.keypair_for(&user.id, keypair_b64)?;
        self.create(&mut user, &keypair, sym_b64)?;

        if let Some(acting) = org {
            let (mut record, sym) = self.private_of(&acting)?;
            push_unique(&mut record.members, &user.id);
            self.ctx.update_record(&record, &sym)?;
        }

        self.log_for(
            &user.id,
            &keypair,
            LogContext {
                user: Some(user.id.clone()),
                org: user.org_id.clone(),
                details: json!({"role": user.role.to_string()}),
                ..Default::default()
            },
        )?;
        Ok(Self::registration(&user, &keypair, generated))
    }

    /// `getUser` / `getOrg` / `getService`: the full record when the caller
    /// can reach `sym(id)`, the public view otherwise. `None` when no
    /// principal of that role exists.
    pub fn get(&self, id: &str, role: Option<PrincipalRole>) -> OmrResult<Option<Principal>> {
        let Some(public) = self.ctx.principal(id)? else {
            return Ok(None);
        };
        if let Some(role) = role {
            let matches = match role {
                PrincipalRole::Patient => !public.role.is_group(),
                other => public.role == other,
            };
            if !matches {
                return Ok(None);
            }
        }
        let key = self
            .ctx
            .resolve(&asset_paths(&self.ctx.caller.id, &public.as_ref(), &ids::sym(id)))?;
        Ok(self
            .ctx
            .load_record::<Principal>(id, key.as_ref())?
            .map(|(record, _)| record))
    }

    /// `getUsers` / `getOrgs`: public records, optionally of one role.
    pub fn list(&self, role: Option<PrincipalRole>) -> OmrResult<Vec<Principal>> {
        let prefix = role.map(|r| vec![json!(r.to_string())]).unwrap_or_default();
        let query = AssetQuery::prefix(&PRINCIPALS, "by_role", prefix).public_only();
        let none = |_: &Asset| -> OmrResult<Option<Key>> { Ok(None) };
        let page = self.ctx.assets.iter(&query, &none, None)?;
        page.assets
            .iter()
            .map(Principal::convert_from_asset)
            .collect()
    }

    /// Users of every non-group role.
    pub fn list_users(&self, role: Option<PrincipalRole>) -> OmrResult<Vec<Principal>> {
        if let Some(role) = role {
            if role.is_group() {
                return Err(OmrError::validation(format!("{role} is not a user role")));
            }
            return self.list(Some(role));
        }
        Ok(self
            .list(None)?
            .into_iter()
            .filter(|p| !p.role.is_group())
            .collect())
    }

    // ========== Orgs ==========

    /// `registerOrg`: the caller becomes the org's first admin.
    pub fn register_org(
        &self,
        mut org: Principal,
        keypair_b64: Option<&str>,
        sym_b64: Option<&str>,
    ) -> OmrResult<Registration> {
        let caller = self.ctx.caller_principal()?;
        if org.id == caller.id {
            return Err(OmrError::validation("org id must differ from the registering user"));
        }
        org.role = PrincipalRole::Org;
        org.org_id = None;
        org.services.clear();
        org.datatypes.clear();
        org.admins = vec![caller.id.clone()];
        org.members = vec![caller.id.clone()];

        let (keypair, generated) = self.keypair_for(&org.id, keypair_b64)?;
        let (_, phash) = self.create(&mut org, &keypair, sym_b64)?;
        self.ctx
            .graph
            .add_edge(&self.ctx.caller.keypair.to_public()?, &phash)?;

        self.log_for(
            &org.id,
            &keypair,
            LogContext {
                org: Some(org.id.clone()),
                user: Some(caller.id.clone()),
                ..Default::default()
            },
        )?;
        Ok(Self::registration(&org, &keypair, generated))
    }

    fn apply_profile(current: &mut Principal, update: &Principal) {
        if !update.name.is_empty() {
            current.name = update.name.clone();
        }
        if !update.email.is_empty() {
            current.email = update.email.clone();
        }
        if !update.solution_info.is_empty() {
            current.solution_info = update.solution_info.clone();
        }
        current.status = update.status;
    }

    fn update_group(&self, update: Principal, role: PrincipalRole) -> OmrResult<Principal> {
        self.require_role(&update.id, role)?;
        let acting = self.ctx.act_as(&update.id)?;
        let (mut current, sym) = self.private_of(&acting)?;
        Self::apply_profile(&mut current, &update);
        self.ctx.update_record(&current, &sym)?;
        let (org, service) = match role {
            PrincipalRole::Org => (Some(current.id.clone()), None),
            _ => (current.org_id.clone(), Some(current.id.clone())),
        };
        self.log_for(
            &acting.id,
            &acting.keypair,
            LogContext {
                org,
                service,
                details: json!({"update": role.to_string()}),
                ..Default::default()
            },
        )?;
        Ok(current)
    }

    /// `updateOrg`.
    pub fn update_org(&self, update: Principal) -> OmrResult<Principal> {
        self.update_group(update, PrincipalRole::Org)
    }

    /// `PutUserInOrg`.
    pub fn put_user_in_org(
        &self,
        user_id: &str,
        org_id: &str,
        is_admin: bool,
    ) -> OmrResult<Principal> {
        let user = self.ctx.require_principal(user_id)?;
        if user.role.is_group() {
            return Err(OmrError::validation(format!("{user_id} is not a user")));
        }
        self.require_role(org_id, PrincipalRole::Org)?;
        let acting = self.ctx.act_as(org_id)?;
        let (mut org, sym) = self.private_of(&acting)?;

        push_unique(&mut org.members, user_id);
        if is_admin {
            let phash = self
                .ctx
                .key_from(&acting, &ids::phash(org_id))?
                .ok_or_else(|| OmrError::not_found(format!("key {}", ids::phash(org_id))))?;
            self.ctx.graph.add_edge(&self.ctx.public_key_of(&user)?, &phash)?;
            push_unique(&mut org.admins, user_id);
        }
        self.ctx.update_record(&org, &sym)?;

        self.log_for(
            org_id,
            &acting.keypair,
            LogContext {
                org: Some(org_id.to_string()),
                user: Some(user_id.to_string()),
                details: json!({"is_admin": is_admin}),
                ..Default::default()
            },
        )?;
        Ok(org)
    }

    /// `RemoveUserFromOrg`. The last admin cannot be removed.
    pub fn remove_user_from_org(&self, user_id: &str, org_id: &str) -> OmrResult<Principal> {
        self.require_role(org_id, PrincipalRole::Org)?;
        let acting = self.ctx.act_as(org_id)?;
        let (mut org, sym) = self.private_of(&acting)?;

        if !org.members.iter().any(|m| m == user_id) && !org.is_admin(user_id) {
            return Err(OmrError::not_found(format!("member {user_id} of org {org_id}")));
        }
        if org.is_admin(user_id) {
            if org.admins.len() == 1 {
                return Err(OmrError::state(format!(
                    "cannot remove the last admin of org {org_id}"
                )));
            }
            self.ctx
                .graph
                .remove_edge(&ids::pubprv(user_id), &ids::phash(org_id))?;
        }
        org.members.retain(|m| m != user_id);
        org.admins.retain(|a| a != user_id);
        self.ctx.update_record(&org, &sym)?;

        self.log_for(
            org_id,
            &acting.keypair,
            LogContext {
                org: Some(org_id.to_string()),
                user: Some(user_id.to_string()),
                details: json!({"removed": true}),
                ..Default::default()
            },
        )?;
        Ok(org)
    }

    // ========== Service admins ==========

    /// `addPermissionServiceAdmin`.
    pub fn add_service_admin(&self, user_id: &str, service_id: &str) -> OmrResult<Principal> {
        let user = self.ctx.require_principal(user_id)?;
        if user.role.is_group() {
            return Err(OmrError::validation(format!("{user_id} is not a user")));
        }
        self.require_role(service_id, PrincipalRole::Service)?;
        let acting = self.ctx.act_as(service_id)?;
        let phash = self
            .ctx
            .key_from(&acting, &ids::phash(service_id))?
            .ok_or_else(|| OmrError::not_found(format!("key {}", ids::phash(service_id))))?;
        self.ctx.graph.add_edge(&self.ctx.public_key_of(&user)?, &phash)?;

        let (mut service, sym) = self.private_of(&acting)?;
        push_unique(&mut service.admins, user_id);
        self.ctx.update_record(&service, &sym)?;

        self.log_for(
            service_id,
            &acting.keypair,
            LogContext {
                service: Some(service_id.to_string()),
                user: Some(user_id.to_string()),
                details: json!({"service_admin": true}),
                ..Default::default()
            },
        )?;
        Ok(service)
    }

    /// `deletePermissionServiceAdmin`.
    pub fn remove_service_admin(&self, user_id: &str, service_id: &str) -> OmrResult<Principal> {
        self.require_role(service_id, PrincipalRole::Service)?;
        let acting = self.ctx.act_as(service_id)?;
        let (mut service, sym) = self.private_of(&acting)?;
        if !service.is_admin(user_id) {
            return Err(OmrError::not_found(format!("admin {user_id} of service {service_id}")));
        }
        self.ctx
            .graph
            .remove_edge(&ids::pubprv(user_id), &ids::phash(service_id))?;
        service.admins.retain(|a| a != user_id);
        self.ctx.update_record(&service, &sym)?;

        self.log_for(
            service_id,
            &acting.keypair,
            LogContext {
                service: Some(service_id.to_string()),
                user: Some(user_id.to_string()),
                details: json!({"service_admin": false}),
                ..Default::default()
            },
        )?;
        Ok(service)
    }

    // ========== Services ==========

    /// `registerService`: the caller must act as the parent org.
    pub fn register_service(
        &self,
        mut service: Principal,
        keypair_b64: Option<&str>,
        sym_b64: Option<&str>,
    ) -> OmrResult<Registration> {
        let org_id = service
            .org_id
            .clone()
            .ok_or_else(|| OmrError::validation("service must belong to an org"))?;
        self.require_role(&org_id, PrincipalRole::Org)?;
        let org_acting = self.ctx.act_as(&org_id)?;

        let datatypes = DatatypeEngine::new(self.ctx);
        for datatype_id in &service.datatypes {
            datatypes.require(datatype_id)?;
        }

        service.role = PrincipalRole::Service;
        service.admins.clear();
        service.members.clear();
        service.services.clear();
        service.datatypes.dedup();

        let (keypair, generated) = self.keypair_for(&service.id, keypair_b64)?;
        let (_, phash) = self.create(&mut service, &keypair, sym_b64)?;
        self.ctx.graph.add_edge(&org_acting.public_key()?, &phash)?;
        for datatype_id in &service.datatypes {
            datatypes.ensure_key(datatype_id, &service.id, &keypair)?;
        }

        let (mut org, org_sym) = self.private_of(&org_acting)?;
        push_unique(&mut org.services, &service.id);
        self.ctx.update_record(&org, &org_sym)?;

        self.log_for(
            &service.id,
            &keypair,
            LogContext {
                org: Some(org_id.clone()),
                service: Some(service.id.clone()),
                details: json!({"datatypes": service.datatypes}),
                ..Default::default()
            },
        )?;
        Ok(Self::registration(&service, &keypair, generated))
    }

    /// `updateService`: profile fields only.
    pub fn update_service(&self, update: Principal) -> OmrResult<Principal> {
        self.update_group(update, PrincipalRole::Service)
    }

    /// `addDatatypeToService`.
    pub fn add_datatype(&self, service_id: &str, datatype_id: &str) -> OmrResult<Principal> {
        self.require_role(service_id, PrincipalRole::Service)?;
        let datatypes = DatatypeEngine::new(self.ctx);
        datatypes.require(datatype_id)?;
        let acting = self.ctx.act_as(service_id)?;
        datatypes.ensure_key(datatype_id, service_id, &acting.keypair)?;

        let (mut service, sym) = self.private_of(&acting)?;
        push_unique(&mut service.datatypes, datatype_id);
        self.ctx.update_record(&service, &sym)?;
        self.log_for(
            service_id,
            &acting.keypair,
            LogContext {
                service: Some(service_id.to_string()),
                datatype: Some(datatype_id.to_string()),
                details: json!({"added": true}),
                ..Default::default()
            },
        )?;
        Ok(service)
    }

    /// `removeDatatypeFromService`. The service keeps its datatype key.
    pub fn remove_datatype(&self, service_id: &str, datatype_id: &str) -> OmrResult<Principal> {
        self.require_role(service_id, PrincipalRole::Service)?;
        let acting = self.ctx.act_as(service_id)?;
        let (mut service, sym) = self.private_of(&acting)?;
        if !service.has_datatype(datatype_id) {
            return Err(OmrError::not_found(format!(
                "datatype {datatype_id} of service {service_id}"
            )));
        }
        service.datatypes.retain(|d| d != datatype_id);
        self.ctx.update_record(&service, &sym)?;
        self.log_for(
            service_id,
            &acting.keypair,
            LogContext {
                service: Some(service_id.to_string()),
                datatype: Some(datatype_id.to_string()),
                details: json!({"added": false}),
                ..Default::default()
            },
        )?;
        Ok(service)
    }

    /// `getServicesOfOrg`.
    pub fn services_of_org(&self, org_id: &str) -> OmrResult<Vec<Principal>> {
        self.require_role(org_id, PrincipalRole::Org)?;
        let query = AssetQuery::prefix(&PRINCIPALS, "by_org", vec![json!(org_id)]).public_only();
        let none = |_: &Asset| -> OmrResult<Option<Key>> { Ok(None) };
        let page = self.ctx.assets.iter(&query, &none, None)?;

        let mut services = Vec::new();
        for asset in &page.assets {
            let public = Principal::convert_from_asset(asset)?;
            if public.role != PrincipalRole::Service {
                continue;
            }
            if let Some(full) = self.get(&public.id, Some(PrincipalRole::Service))? {
                services.push(full);
            }
        }
        Ok(services)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::testing::Fixture;
    use crate::engine::Caller;
    use crate::models::Datatype;

    pub(crate) fn register_self(fx: &Fixture, id: &str, role: PrincipalRole) -> Caller {
        let caller = Caller::generate(id).unwrap();
        fx.run(&caller, |ctx| {
            PrincipalEngine::new(ctx).register_user(Principal::new(id, role), None, None, None)
        })
        .unwrap();
        caller
    }

    /// Org `org` administered by `admin`, with service `svc` offering `datatypes`.
    pub(crate) fn org_with_service(
        fx: &Fixture,
        admin: &Caller,
        org: &str,
        svc: &str,
        datatypes: &[&str],
    ) -> Caller {
        let svc_caller = Caller::generate(svc).unwrap();
        let keypair_b64 = svc_caller.keypair.material_b64();
        fx.run(admin, |ctx| {
            let engine = PrincipalEngine::new(ctx);
            if ctx.principal(org)?.is_none() {
                engine.register_org(Principal::new(org, PrincipalRole::Org), None, None)?;
            }
            let types = DatatypeEngine::new(ctx);
            for d in datatypes {
                if types.get(d)?.is_none() {
                    types.register(Datatype {
                        datatype_id: d.to_string(),
                        description: String::new(),
                        parent_datatype_id: None,
                        owner_id: String::new(),
                    })?;
                }
            }
            Ok(())
        })
        .unwrap();
        fx.run(admin, |ctx| {
            let mut service = Principal::new(svc, PrincipalRole::Service);
            service.org_id = Some(org.to_string());
            service.datatypes = datatypes.iter().map(|d| d.to_string()).collect();
            PrincipalEngine::new(ctx).register_service(service, Some(&keypair_b64), None)
        })
        .unwrap();
        svc_caller
    }

    fn patient(id: &str) -> Principal {
        Principal::new(id, PrincipalRole::Patient)
    }

    #[test]
    fn self_registration_uses_caller_key() {
        let fx = Fixture::new();
        let alice = Caller::generate("alice").unwrap();
        let reg = fx
            .run(&alice, |ctx| {
                PrincipalEngine::new(ctx).register_user(patient("alice"), None, None, None)
            })
            .unwrap();
        assert_eq!(reg.public_key, alice.public_key_b64().unwrap());
        assert!(reg.private_key.is_none());

        let dup = fx.run(&alice, |ctx| {
            PrincipalEngine::new(ctx).register_user(patient("alice"), None, None, None)
        });
        assert!(matches!(dup, Err(OmrError::State(_))));
    }

    #[test]
    fn strangers_cannot_register_others() {
        let fx = Fixture::new();
        let alice = register_self(&fx, "alice", PrincipalRole::Patient);
        let err = fx
            .run(&alice, |ctx| {
                PrincipalEngine::new(ctx).register_user(patient("bob"), None, None, None)
            })
            .unwrap_err();
        assert!(matches!(err, OmrError::PermissionDenied(_)));
    }

    #[test]
    fn system_admin_registers_once_and_can_register_users() {
        let fx = Fixture::new();
        let root = Caller::generate("root").unwrap();
        fx.run(&root, |ctx| {
            PrincipalEngine::new(ctx).register_system_admin(patient("root"), None)
        })
        .unwrap();
        let reg = fx
            .run(&root, |ctx| {
                PrincipalEngine::new(ctx).register_user(patient("bob"), None, None, None)
            })
            .unwrap();
        assert!(reg.private_key.is_some());

        let other = Caller::generate("eve").unwrap();
        let err = fx
            .run(&other, |ctx| {
                let eve = Principal::new("eve", PrincipalRole::System);
                PrincipalEngine::new(ctx).register_system_admin(eve, None)
            })
            .unwrap_err();
        assert!(matches!(err, OmrError::State(_)));
    }

    #[test]
    fn org_admin_acts_as_service() {
        let fx = Fixture::new();
        let admin = register_self(&fx, "alice", PrincipalRole::Patient);
        org_with_service(&fx, &admin, "org1", "svc1", &["heart"]);

        fx.run(&admin, |ctx| {
            let acting = ctx.act_as("svc1")?;
            assert_eq!(acting.via, super::super::ActingVia::OrgAdmin);
            assert_eq!(acting.keypair.id, "pubprv(svc1)");
            let org = ctx.act_as("org1")?;
            assert_eq!(org.via, super::super::ActingVia::Admin);
            Ok(())
        })
        .unwrap();

        let services = fx
            .run(&admin, |ctx| PrincipalEngine::new(ctx).services_of_org("org1"))
            .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].datatypes, vec!["heart".to_string()]);

        let org = fx
            .run(&admin, |ctx| PrincipalEngine::new(ctx).get("org1", Some(PrincipalRole::Org)))
            .unwrap()
            .unwrap();
        assert_eq!(org.services, vec!["svc1".to_string()]);
    }

    #[test]
    fn org_membership_and_admin_edges() {
        let fx = Fixture::new();
        let admin = register_self(&fx, "alice", PrincipalRole::Patient);
        let bob = register_self(&fx, "bob", PrincipalRole::Patient);
        org_with_service(&fx, &admin, "org1", "svc1", &[]);

        assert!(fx.run(&bob, |ctx| ctx.act_as("svc1").map(|_| ())).is_err());
        fx.run(&admin, |ctx| PrincipalEngine::new(ctx).put_user_in_org("bob", "org1", true))
            .unwrap();
        fx.run(&bob, |ctx| ctx.act_as("svc1").map(|_| ())).unwrap();

        fx.run(&bob, |ctx| PrincipalEngine::new(ctx).remove_user_from_org("bob", "org1"))
            .unwrap();
        assert!(fx.run(&bob, |ctx| ctx.act_as("svc1").map(|_| ())).is_err());

        let err = fx
            .run(&admin, |ctx| PrincipalEngine::new(ctx).remove_user_from_org("alice", "org1"))
            .unwrap_err();
        assert!(matches!(err, OmrError::State(_)));
    }

    #[test]
    fn service_admin_reaches_only_its_service() {
        let fx = Fixture::new();
        let admin = register_self(&fx, "alice", PrincipalRole::Patient);
        let carol = register_self(&fx, "carol", PrincipalRole::Patient);
        org_with_service(&fx, &admin, "org1", "svc1", &[]);

        fx.run(&admin, |ctx| PrincipalEngine::new(ctx).add_service_admin("carol", "svc1"))
            .unwrap();
        fx.run(&carol, |ctx| {
            assert_eq!(ctx.act_as("svc1")?.via, super::super::ActingVia::Admin);
            assert!(ctx.act_as("org1").is_err());
            Ok(())
        })
        .unwrap();

        fx.run(&admin, |ctx| PrincipalEngine::new(ctx).remove_service_admin("carol", "svc1"))
            .unwrap();
        assert!(fx.run(&carol, |ctx| ctx.act_as("svc1").map(|_| ())).is_err());
    }

    #[test]
    fn private_fields_visible_only_with_key() {
        let fx = Fixture::new();
        let alice = Caller::generate("alice").unwrap();
        let bob = register_self(&fx, "bob", PrincipalRole::Patient);
        fx.run(&alice, |ctx| {
            let mut user = Principal::new("alice", PrincipalRole::Patient);
            user.email = "alice@example.org".into();
            PrincipalEngine::new(ctx).register_user(user, None, None, None)
        })
        .unwrap();

        let own = fx
            .run(&alice, |ctx| PrincipalEngine::new(ctx).get("alice", None))
            .unwrap()
            .unwrap();
        assert_eq!(own.email, "alice@example.org");
        let seen = fx
            .run(&bob, |ctx| PrincipalEngine::new(ctx).get("alice", None))
            .unwrap()
            .unwrap();
        assert_eq!(seen.email, "");
        assert!(fx
            .run(&bob, |ctx| PrincipalEngine::new(ctx).get("nobody", None))
            .unwrap()
            .is_none());
    }

    #[test]
    fn list_users_filters_groups() {
        let fx = Fixture::new();
        let admin = register_self(&fx, "alice", PrincipalRole::Patient);
        register_self(&fx, "aud1", PrincipalRole::Audit);
        org_with_service(&fx, &admin, "org1", "svc1", &[]);

        let users = fx
            .run(&admin, |ctx| PrincipalEngine::new(ctx).list_users(None))
            .unwrap();
        let ids: Vec<_> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["aud1", "alice"]);
        let orgs = fx
            .run(&admin, |ctx| PrincipalEngine::new(ctx).list(Some(PrincipalRole::Org)))
            .unwrap();
        assert_eq!(orgs.len(), 1);
    }
}
