// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction logs and the query predicate evaluated over them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assets::index::{TableDef, LOGS};
use crate::assets::AssetRecord;
use crate::keygraph::ids;

/// Context whose derived log key encrypts a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LogScope {
    Principal {
        principal_id: String,
    },
    Enrollment {
        user_id: String,
        service_id: String,
    },
    Contract {
        contract_id: String,
        owner_service: String,
        requester_service: String,
    },
}

impl LogScope {
    /// Id of the parent key the log key is derived from.
    pub fn parent_key_id(&self) -> String {
        match self {
            LogScope::Principal { principal_id } => ids::pubprv(principal_id),
            LogScope::Enrollment {
                user_id,
                service_id,
            } => ids::sym(&ids::enrollment_asset(user_id, service_id)),
            LogScope::Contract { contract_id, .. } => ids::sym(contract_id),
        }
    }

    pub fn log_key_id(&self) -> String {
        ids::log(&self.parent_key_id())
    }
}

/// Searchable fields of a log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_owner_org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_requester_org: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLog {
    pub log_id: String,
    pub tx_id: String,
    pub namespace: String,
    pub function: String,
    #[serde(default)]
    pub caller: String,
    pub timestamp: i64,
    pub scope: LogScope,
    #[serde(default)]
    pub data: LogContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl AssetRecord for TransactionLog {
    const TABLE: &'static TableDef = &LOGS;
    const PRIVATE_FIELDS: &'static [&'static str] = &["caller", "data"];

    fn asset_id(&self) -> String {
        self.log_id.clone()
    }

    fn asset_key_id(&self) -> String {
        self.scope.log_key_id()
    }

    fn owner_ids(&self) -> Vec<String> {
        match &self.scope {
            LogScope::Principal { principal_id } => vec![principal_id.clone()],
            LogScope::Enrollment {
                user_id,
                service_id,
            } => vec![user_id.clone(), service_id.clone()],
            LogScope::Contract {
                owner_service,
                requester_service,
                ..
            } => vec![owner_service.clone(), requester_service.clone()],
        }
    }
}

/// Log posted by a client through `addQueryTransactionLog`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionLog {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<LogScope>,
    #[serde(default)]
    pub data: LogContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogField {
    Owner,
    Target,
    User,
    Service,
    Datatype,
    Contract,
    Org,
    ContractOwnerOrg,
    ContractRequesterOrg,
}

impl LogField {
    fn value<'l>(&self, log: &'l TransactionLog) -> Option<&'l str> {
        let d = &log.data;
        match self {
            LogField::Owner => d.owner.as_deref(),
            LogField::Target => d.target.as_deref(),
            LogField::User => d.user.as_deref(),
            LogField::Service => d.service.as_deref(),
            LogField::Datatype => d.datatype.as_deref(),
            LogField::Contract => d.contract.as_deref(),
            LogField::Org => d.org.as_deref(),
            LogField::ContractOwnerOrg => d.contract_owner_org.as_deref(),
            LogField::ContractRequesterOrg => d.contract_requester_org.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    FieldEq(LogField, String),
    TimeRange { start: Option<i64>, end: Option<i64> },
}

impl Predicate {
    pub fn eval(&self, log: &TransactionLog) -> bool {
        match self {
            Predicate::True => true,
            Predicate::And(all) => all.iter().all(|p| p.eval(log)),
            Predicate::Or(any) => any.iter().any(|p| p.eval(log)),
            Predicate::FieldEq(field, value) => field.value(log) == Some(value.as_str()),
            Predicate::TimeRange { start, end } => {
                start.is_none_or(|s| log.timestamp >= s) && end.is_none_or(|e| log.timestamp <= e)
            }
        }
    }

    fn any_of(fields: &[LogField], value: &str) -> Predicate {
        Predicate::Or(
            fields
                .iter()
                .map(|f| Predicate::FieldEq(*f, value.to_string()))
                .collect(),
        )
    }
}

/// Filters accepted by `getLogs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default, alias = "contract")]
    pub contract_id: Option<String>,
    #[serde(default, alias = "patient")]
    pub patient_id: Option<String>,
    #[serde(default, alias = "service")]
    pub service_id: Option<String>,
    #[serde(default, alias = "datatype")]
    pub datatype_id: Option<String>,
    #[serde(default, alias = "org")]
    pub org_id: Option<String>,
    #[serde(default, alias = "owner")]
    pub owner_id: Option<String>,
    #[serde(default, alias = "target")]
    pub target_id: Option<String>,
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    #[serde(default)]
    pub end_timestamp: Option<i64>,
    #[serde(default)]
    pub latest_only: bool,
    #[serde(default)]
    pub max_num: usize,
}

impl LogQuery {
    /// Conjunction across filters; a filter matches any field it can appear in.
    pub fn predicate(&self) -> Predicate {
        use LogField as F;

        let mut all = Vec::new();
        if let Some(contract) = &self.contract_id {
            all.push(Predicate::FieldEq(F::Contract, contract.clone()));
        }
        if let Some(patient) = &self.patient_id {
            all.push(Predicate::any_of(&[F::Owner, F::Target, F::User], patient));
        }
        if let Some(service) = &self.service_id {
            all.push(Predicate::any_of(&[F::Service, F::Owner, F::Target], service));
        }
        if let Some(datatype) = &self.datatype_id {
            all.push(Predicate::FieldEq(F::Datatype, datatype.clone()));
        }
        if let Some(org) = &self.org_id {
            all.push(Predicate::any_of(
                &[F::Org, F::ContractOwnerOrg, F::ContractRequesterOrg],
                org,
            ));
        }
        if let Some(owner) = &self.owner_id {
            all.push(Predicate::FieldEq(F::Owner, owner.clone()));
        }
        if let Some(target) = &self.target_id {
            all.push(Predicate::FieldEq(F::Target, target.clone()));
        }
        if self.start_timestamp.is_some() || self.end_timestamp.is_some() {
            all.push(Predicate::TimeRange {
                start: self.start_timestamp,
                end: self.end_timestamp,
            });
        }

        match all.len() {
            0 => Predicate::True,
            1 => all.remove(0),
            _ => Predicate::And(all),
        }
    }
}
