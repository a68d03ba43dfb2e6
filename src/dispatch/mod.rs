// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Invocation dispatch
//!
//! `Invoke(function, args[])` over a [`LocalLedger`]. Each function name maps
//! to one [`Route`]: a handler over the transaction context plus the cache
//! mode its stub runs in. Mutating routes run in put-cache mode so keys and
//! edges created early in the invocation are visible to later reads.
//!
//! Success yields the handler's bytes (JSON, or empty for a getter that found
//! nothing). Any error aborts the transaction; a panic inside a handler is
//! caught here and reported as [`OmrError::Internal`].

pub mod args;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use args::Args;

use crate::config::Config;
use crate::engine::data::DataRange;
use crate::engine::{
    AuditEngine, Caller, ConsentEngine, ContractEngine, DataEngine, DatatypeEngine,
    EnrollmentEngine, LogEngine, PrincipalEngine, TxContext,
};
use crate::engine::consent::ConsentKind;
use crate::error::{OmrError, OmrResult};
use crate::ledger::{CacheMode, CachedStub, KvStore, LocalLedger, OffchainSession};
use crate::models::{
    Access, Consent, Contract, ContractState, DataKind, DataRecord, Datatype, DetailType,
    Enrollment, EnrollmentStatus, LogQuery, Principal, PrincipalRole, SolutionLog,
};

pub type Handler = fn(&TxContext<'_>, Args<'_>) -> OmrResult<Vec<u8>>;

/// One entry of the invocation table.
pub struct Route {
    pub name: &'static str,
    pub handler: Handler,
    pub mode: CacheMode,
}

const fn write(name: &'static str, handler: Handler) -> Route {
    Route {
        name,
        handler,
        mode: CacheMode::PutCache,
    }
}

const fn read(name: &'static str, handler: Handler) -> Route {
    Route {
        name,
        handler,
        mode: CacheMode::PassThrough,
    }
}

pub static ROUTES: &[Route] = &[
    // Setup and identity
    write("setupDatastore", setup_datastore),
    write("registerSystemAdmin", register_system_admin),
    write("registerAuditor", register_auditor),
    write("registerUser", register_user),
    read("getUser", get_user),
    read("getUsers", get_users),
    write("registerOrg", register_org),
    write("updateOrg", update_org),
    read("getOrg", get_org),
    read("getOrgs", get_orgs),
    write("PutUserInOrg", put_user_in_org),
    write("RemoveUserFromOrg", remove_user_from_org),
    write("addPermissionServiceAdmin", add_service_admin),
    write("deletePermissionServiceAdmin", delete_service_admin),
    write("addPermissionAuditor", add_auditor_permission),
    write("deletePermissionAuditor", delete_auditor_permission),
    // Datatypes and services
    write("registerDatatype", register_datatype),
    write("updateDatatype", update_datatype),
    read("getDatatype", get_datatype),
    read("getAllDatatypes", get_all_datatypes),
    write("registerService", register_service),
    write("updateService", update_service),
    read("getService", get_service),
    write("addDatatypeToService", add_datatype_to_service),
    write("removeDatatypeFromService", remove_datatype_from_service),
    read("getServicesOfOrg", get_services_of_org),
    // Enrollment
    write("enrollPatient", enroll_patient),
    write("unenrollPatient", unenroll_patient),
    read("getPatientEnrollments", get_patient_enrollments),
    read("getServiceEnrollments", get_service_enrollments),
    // Consent
    write("putConsentPatientData", put_consent_patient_data),
    write("putConsentOwnerData", put_consent_owner_data),
    read("getConsent", get_consent),
    read("getConsents", get_consents),
    read("getConsentsWithOwnerID", get_consents_with_owner),
    read("getConsentsWithTargetID", get_consents_with_target),
    // Expired consents lose their datatype edge while validating.
    write("validateConsent", validate_consent),
    read("getConsentRequests", get_consent_requests),
    // Data
    write("uploadUserData", upload_user_data),
    read("downloadUserData", download_user_data),
    read("downloadUserDataConsentToken", download_user_data_with_token),
    write("deleteUserData", delete_user_data),
    write("uploadOwnerData", upload_owner_data),
    read("downloadOwnerDataAsOwner", download_owner_data_as_owner),
    read("downloadOwnerDataAsRequester", download_owner_data_as_requester),
    read("downloadOwnerDataWithConsent", download_owner_data_with_consent),
    read("downloadOwnerDataConsentToken", download_owner_data_with_token),
    // Contracts
    write("createContract", create_contract),
    write("addContractDetail", add_contract_detail),
    write("addContractDetailDownload", add_contract_detail_download),
    write("givePermissionByContract", give_permission_by_contract),
    read("getContract", get_contract),
    read("getOwnerContracts", get_owner_contracts),
    read("getRequesterContracts", get_requester_contracts),
    // Logs
    read("getLogs", get_logs),
    write("addQueryTransactionLog", add_query_log),
    write("addValidateConsentQueryLog", add_validate_consent_query_log),
];

pub fn route(function: &str) -> Option<&'static Route> {
    ROUTES.iter().find(|r| r.name == function)
}

/// An invocation as read by the `omr-ledger` harness.
#[derive(Debug, Clone, Deserialize)]
pub struct Invocation {
    pub caller: String,
    /// Base64 key pair of the caller.
    pub keypair: String,
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Transaction time override, unix seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Result envelope written back by the harness.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Ok { ok: serde_json::Value },
    Err(crate::error::ErrorBody),
}

/// A ledger host with the invocation table mounted.
pub struct Node {
    ledger: LocalLedger,
    config: Config,
}

impl Node {
    pub fn new(store: Arc<dyn KvStore>, config: Config) -> Self {
        Self {
            ledger: LocalLedger::new(store),
            config,
        }
    }

    pub fn in_memory(config: Config) -> Self {
        Self {
            ledger: LocalLedger::in_memory(),
            config,
        }
    }

    pub fn ledger(&self) -> &LocalLedger {
        &self.ledger
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Invoke at the current wall-clock time.
    pub fn invoke(&self, caller: &Caller, function: &str, args: &[String]) -> OmrResult<Vec<u8>> {
        self.invoke_at(caller, function, args, chrono::Utc::now().timestamp())
    }

    /// Invoke as one transaction with host time `timestamp`.
    pub fn invoke_at(
        &self,
        caller: &Caller,
        function: &str,
        args: &[String],
        timestamp: i64,
    ) -> OmrResult<Vec<u8>> {
        let route = route(function)
            .ok_or_else(|| OmrError::validation(format!("unknown function {function}")))?;

        let result = self.ledger.execute(function, args, timestamp, |tx| {
            let cached = CachedStub::new(tx, route.mode, self.config.stub_cache_capacity);
            let session = OffchainSession::new(self.ledger.datastores());
            let out = {
                let ctx = TxContext::new(&cached, &self.config, caller, &session);
                run_guarded(&ctx, route, Args::new(args))?
            };
            Ok::<_, OmrError>((out, session.into_pending()))
        });

        match result {
            Ok((out, pending)) => {
                self.ledger.datastores().flush(pending);
                Ok(out)
            }
            Err(e) => {
                tracing::warn!(
                    function,
                    caller = %caller.id,
                    error = %e,
                    code = e.error_code(),
                    "invocation failed"
                );
                Err(e)
            }
        }
    }

    /// Run a harness invocation and wrap the result in an envelope.
    pub fn handle(&self, invocation: &Invocation) -> Outcome {
        let result =
            Caller::from_b64(invocation.caller.clone(), &invocation.keypair).and_then(|caller| {
                let timestamp = invocation
                    .timestamp
                    .unwrap_or_else(|| chrono::Utc::now().timestamp());
                self.invoke_at(&caller, &invocation.function, &invocation.args, timestamp)
            });
        match result {
            Ok(bytes) if bytes.is_empty() => Outcome::Ok {
                ok: serde_json::Value::Null,
            },
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Outcome::Ok { ok: value },
                Err(e) => Outcome::Err(OmrError::from(e).to_body()),
            },
            Err(e) => Outcome::Err(e.to_body()),
        }
    }
}

fn run_guarded(ctx: &TxContext<'_>, route: &Route, args: Args<'_>) -> OmrResult<Vec<u8>> {
    tracing::debug!(function = route.name, caller = %ctx.caller.id, args = args.len(), "invoking");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        ctx.authenticate()?;
        (route.handler)(ctx, args)
    }));
    match outcome {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            tracing::error!(function = route.name, panic = %msg, "handler panicked");
            Err(OmrError::Internal(msg))
        }
    }
}

// ========== Encoding helpers ==========

fn to_json<T: Serialize>(value: &T) -> OmrResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Getters answer with empty bytes when nothing was found.
fn found<T: Serialize>(value: Option<T>) -> OmrResult<Vec<u8>> {
    match value {
        Some(v) => to_json(&v),
        None => Ok(Vec::new()),
    }
}

fn role_arg(args: Args<'_>, i: usize) -> OmrResult<Option<PrincipalRole>> {
    args.optional(i)
        .map(|raw| {
            PrincipalRole::parse(raw)
                .ok_or_else(|| OmrError::validation(format!("invalid role {raw:?}")))
        })
        .transpose()
}

fn state_arg(args: Args<'_>, i: usize) -> OmrResult<Option<ContractState>> {
    args.optional(i).map(ContractState::parse).transpose()
}

/// `latest_only, start, end, max_num` starting at argument `i`.
fn range_arg(args: Args<'_>, i: usize) -> OmrResult<DataRange> {
    Ok(DataRange {
        latest_only: args.bool(i, "latest_only")?,
        start: args.i64(i + 1, "start")?,
        end: args.i64(i + 2, "end")?,
        max_num: args.usize(i + 3, "max_num")?,
    })
}

// ========== Setup and identity ==========

fn setup_datastore(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    args.expect_at_least(1)?;
    let connection_id = args.optional(0).unwrap_or_default();
    if let Some(admin) = ctx.system_admin_id()? {
        if admin != ctx.caller.id {
            return Err(OmrError::denied("datastore setup"));
        }
    }
    ctx.assets.set_active_connection(connection_id)?;
    Ok(Vec::new())
}

fn register_system_admin(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let user: Principal = args.json(0, "user")?;
    to_json(&PrincipalEngine::new(ctx).register_system_admin(user, args.optional(1))?)
}

fn register_auditor(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let user: Principal = args.json(0, "user")?;
    let registration = PrincipalEngine::new(ctx).register_user(
        user,
        args.optional(1),
        args.optional(2),
        Some(PrincipalRole::Audit),
    )?;
    to_json(&registration)
}

fn register_user(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let user: Principal = args.json(0, "user")?;
    let registration =
        PrincipalEngine::new(ctx).register_user(user, args.optional(1), args.optional(2), None)?;
    to_json(&registration)
}

fn get_user(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let id = args.required(0, "user_id")?;
    found(PrincipalEngine::new(ctx).get(id, Some(PrincipalRole::Patient))?)
}

fn get_users(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    to_json(&PrincipalEngine::new(ctx).list_users(role_arg(args, 0)?)?)
}

fn register_org(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let org: Principal = args.json(0, "org")?;
    to_json(&PrincipalEngine::new(ctx).register_org(org, args.optional(1), args.optional(2))?)
}

fn update_org(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let org: Principal = args.json(0, "org")?;
    to_json(&PrincipalEngine::new(ctx).update_org(org)?)
}

fn get_org(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let id = args.required(0, "org_id")?;
    found(PrincipalEngine::new(ctx).get(id, Some(PrincipalRole::Org))?)
}

fn get_orgs(ctx: &TxContext<'_>, _args: Args<'_>) -> OmrResult<Vec<u8>> {
    to_json(&PrincipalEngine::new(ctx).list(Some(PrincipalRole::Org))?)
}

fn put_user_in_org(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let org = PrincipalEngine::new(ctx).put_user_in_org(
        args.required(0, "user_id")?,
        args.required(1, "org_id")?,
        args.bool(2, "is_admin")?,
    )?;
    to_json(&org)
}

fn remove_user_from_org(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let org = PrincipalEngine::new(ctx)
        .remove_user_from_org(args.required(0, "user_id")?, args.required(1, "org_id")?)?;
    to_json(&org)
}

fn add_service_admin(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let service = PrincipalEngine::new(ctx)
        .add_service_admin(args.required(0, "user_id")?, args.required(1, "service_id")?)?;
    to_json(&service)
}

fn delete_service_admin(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let service = PrincipalEngine::new(ctx)
        .remove_service_admin(args.required(0, "user_id")?, args.required(1, "service_id")?)?;
    to_json(&service)
}

fn add_auditor_permission(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let timestamp = match args.optional(3) {
        Some(_) => Some(args.i64(3, "timestamp")?),
        None => None,
    };
    let permission = AuditEngine::new(ctx).add(
        args.required(0, "auditor_id")?,
        args.required(1, "service_id")?,
        args.required(2, "sym_key")?,
        timestamp,
    )?;
    to_json(&permission)
}

fn delete_auditor_permission(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let permission = AuditEngine::new(ctx)
        .remove(args.required(0, "auditor_id")?, args.required(1, "service_id")?)?;
    to_json(&permission)
}

// ========== Datatypes and services ==========

fn register_datatype(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let datatype: Datatype = args.json(0, "datatype")?;
    to_json(&DatatypeEngine::new(ctx).register(datatype)?)
}

fn update_datatype(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let datatype: Datatype = args.json(0, "datatype")?;
    to_json(&DatatypeEngine::new(ctx).update(datatype)?)
}

fn get_datatype(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    found(DatatypeEngine::new(ctx).get(args.required(0, "datatype_id")?)?)
}

fn get_all_datatypes(ctx: &TxContext<'_>, _args: Args<'_>) -> OmrResult<Vec<u8>> {
    to_json(&DatatypeEngine::new(ctx).all()?)
}

fn register_service(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let service: Principal = args.json(0, "service")?;
    let keypair = args.required(1, "keypair")?;
    to_json(&PrincipalEngine::new(ctx).register_service(service, Some(keypair), args.optional(2))?)
}

fn update_service(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let service: Principal = args.json(0, "service")?;
    to_json(&PrincipalEngine::new(ctx).update_service(service)?)
}

fn get_service(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let id = args.required(0, "service_id")?;
    found(PrincipalEngine::new(ctx).get(id, Some(PrincipalRole::Service))?)
}

fn add_datatype_to_service(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let service = PrincipalEngine::new(ctx)
        .add_datatype(args.required(0, "service_id")?, args.required(1, "datatype_id")?)?;
    to_json(&service)
}

fn remove_datatype_from_service(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let service = PrincipalEngine::new(ctx)
        .remove_datatype(args.required(0, "service_id")?, args.required(1, "datatype_id")?)?;
    to_json(&service)
}

fn get_services_of_org(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    to_json(&PrincipalEngine::new(ctx).services_of_org(args.required(0, "org_id")?)?)
}

// ========== Enrollment ==========

fn enroll_patient(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let enrollment: Enrollment = args.json(0, "enrollment")?;
    to_json(&EnrollmentEngine::new(ctx).enroll(enrollment, args.required(1, "sym_key")?)?)
}

fn unenroll_patient(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let enrollment = EnrollmentEngine::new(ctx)
        .unenroll(args.required(0, "service_id")?, args.required(1, "user_id")?)?;
    to_json(&enrollment)
}

fn get_patient_enrollments(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let status = args.optional_enum::<EnrollmentStatus>(1, "status")?;
    to_json(&EnrollmentEngine::new(ctx).by_user(args.required(0, "user_id")?, status)?)
}

fn get_service_enrollments(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let status = args.optional_enum::<EnrollmentStatus>(1, "status")?;
    to_json(&EnrollmentEngine::new(ctx).by_service(args.required(0, "service_id")?, status)?)
}

// ========== Consent ==========

fn put_consent(ctx: &TxContext<'_>, args: Args<'_>, kind: ConsentKind) -> OmrResult<Vec<u8>> {
    let consent: Consent = args.json(0, "consent")?;
    to_json(&ConsentEngine::new(ctx).put(consent, args.optional(1), kind)?)
}

fn put_consent_patient_data(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    put_consent(ctx, args, ConsentKind::Patient)
}

fn put_consent_owner_data(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    put_consent(ctx, args, ConsentKind::Owner)
}

fn get_consent(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    found(ConsentEngine::new(ctx).get(
        args.required(0, "datatype_id")?,
        args.required(1, "target_id")?,
        args.required(2, "owner_id")?,
    )?)
}

fn get_consents(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let consents = ConsentEngine::new(ctx)
        .between(args.required(0, "service_id")?, args.required(1, "owner_id")?)?;
    to_json(&consents)
}

fn get_consents_with_owner(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    to_json(&ConsentEngine::new(ctx).by_owner(args.required(0, "owner_id")?)?)
}

fn get_consents_with_target(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    to_json(&ConsentEngine::new(ctx).by_target(args.required(0, "target_id")?)?)
}

fn validate_consent(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let validation = ConsentEngine::new(ctx).validate(
        args.required(0, "owner_id")?,
        args.required(1, "target_id")?,
        args.required(2, "datatype_id")?,
        Access::parse(args.required(3, "access")?)?,
        args.i64(4, "timestamp")?,
    )?;
    to_json(&validation)
}

fn get_consent_requests(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let requests =
        ConsentEngine::new(ctx).requests(args.required(0, "service_id")?, args.optional(1))?;
    to_json(&requests)
}

// ========== Data ==========

fn upload(ctx: &TxContext<'_>, args: Args<'_>, kind: DataKind) -> OmrResult<Vec<u8>> {
    let record: DataRecord = args.json(0, "data")?;
    to_json(&DataEngine::new(ctx).upload(record, args.optional(1), kind)?)
}

fn upload_user_data(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    upload(ctx, args, DataKind::User)
}

fn upload_owner_data(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    upload(ctx, args, DataKind::Owner)
}

fn download_user_data(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let records = DataEngine::new(ctx).download_user(
        args.required(0, "service_id")?,
        args.required(1, "user_id")?,
        args.required(2, "datatype_id")?,
        range_arg(args, 3)?,
        args.i64(7, "timestamp")?,
    )?;
    to_json(&records)
}

fn download_with_token(ctx: &TxContext<'_>, args: Args<'_>, kind: DataKind) -> OmrResult<Vec<u8>> {
    let records = DataEngine::new(ctx).download_with_token(
        args.required(0, "token")?,
        kind,
        range_arg(args, 1)?,
        args.i64(5, "timestamp")?,
    )?;
    to_json(&records)
}

fn download_user_data_with_token(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    download_with_token(ctx, args, DataKind::User)
}

fn download_owner_data_with_token(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    download_with_token(ctx, args, DataKind::Owner)
}

fn delete_user_data(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let deleted = DataEngine::new(ctx).delete_user(
        args.required(0, "user_id")?,
        args.required(1, "datatype_id")?,
        args.i64(2, "record_timestamp")?,
        args.i64(3, "timestamp")?,
    )?;
    to_json(&deleted)
}

fn download_owner_data_as_owner(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let records = DataEngine::new(ctx).download_owner(
        args.required(0, "service_id")?,
        args.required(1, "datatype_id")?,
        range_arg(args, 2)?,
        args.i64(6, "timestamp")?,
    )?;
    to_json(&records)
}

fn download_owner_data_as_requester(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let download = DataEngine::new(ctx).download_owner_as_requester(
        args.required(0, "contract_id")?,
        args.required(1, "datatype_id")?,
        range_arg(args, 2)?,
        args.i64(6, "timestamp")?,
    )?;
    to_json(&download)
}

fn download_owner_data_with_consent(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let records = DataEngine::new(ctx).download_owner_with_consent(
        args.required(0, "target_service_id")?,
        args.required(1, "owner_service_id")?,
        args.required(2, "datatype_id")?,
        range_arg(args, 3)?,
        args.i64(7, "timestamp")?,
    )?;
    to_json(&records)
}

// ========== Contracts ==========

fn create_contract(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let contract: Contract = args.json(0, "contract")?;
    to_json(&ContractEngine::new(ctx).create(contract, args.required(1, "sym_key")?)?)
}

fn add_contract_detail(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let contract = ContractEngine::new(ctx).add_detail(
        args.required(0, "contract_id")?,
        DetailType::parse(args.required(1, "detail_type")?)?,
        args.json_or_null(2, "terms")?,
        args.i64(3, "timestamp")?,
    )?;
    to_json(&contract)
}

fn add_contract_detail_download(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let contract = ContractEngine::new(ctx).record_download(
        args.required(0, "contract_id")?,
        args.required(1, "snapshot")?,
        args.i64(2, "timestamp")?,
    )?;
    to_json(&contract)
}

fn give_permission_by_contract(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let contract = ContractEngine::new(ctx).give_permission(
        args.required(0, "contract_id")?,
        args.u32(1, "max_num_download")?,
        args.i64(2, "timestamp")?,
        args.required(3, "datatype_id")?,
    )?;
    to_json(&contract)
}

fn get_contract(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    found(ContractEngine::new(ctx).get(args.required(0, "contract_id")?)?)
}

fn get_owner_contracts(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let contracts =
        ContractEngine::new(ctx).by_owner(args.required(0, "service_id")?, state_arg(args, 1)?)?;
    to_json(&contracts)
}

fn get_requester_contracts(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let contracts = ContractEngine::new(ctx)
        .by_requester(args.required(0, "service_id")?, state_arg(args, 1)?)?;
    to_json(&contracts)
}

// ========== Logs ==========

fn get_logs(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let query: LogQuery = args.json(0, "query")?;
    to_json(&LogEngine::new(ctx).get_logs(&query)?)
}

fn add_query_log(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let log: SolutionLog = args.json(0, "log")?;
    to_json(&LogEngine::new(ctx).add_solution_log(log, "query")?)
}

fn add_validate_consent_query_log(ctx: &TxContext<'_>, args: Args<'_>) -> OmrResult<Vec<u8>> {
    let log: SolutionLog = args.json(0, "log")?;
    to_json(&LogEngine::new(ctx).add_solution_log(log, "validate_consent_query")?)
}

#[cfg(test)]
mod tests;
