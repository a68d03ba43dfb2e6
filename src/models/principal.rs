// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Principals: system administrator, patients, services, orgs, auditors.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assets::index::{TableDef, PRINCIPALS};
use crate::assets::AssetRecord;
use crate::keygraph::{ids, PrincipalRef};

/// Principal roles.
///
/// - `System` - the single system administrator
/// - `Patient` - an end user owning personal data (also accepted as `user`)
/// - `Service` - a subgroup of an org that consumes and produces data
/// - `Org` - a group owning services
/// - `Audit` - an auditor, read-only access to logs it was granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalRole {
    System,
    #[default]
    #[serde(alias = "user")]
    Patient,
    Service,
    Org,
    Audit,
}

impl PrincipalRole {
    /// Parse a role (case-insensitive).
    pub fn parse(s: &str) -> Option<PrincipalRole> {
        match s.to_lowercase().as_str() {
            "system" => Some(PrincipalRole::System),
            "patient" | "user" => Some(PrincipalRole::Patient),
            "service" => Some(PrincipalRole::Service),
            "org" => Some(PrincipalRole::Org),
            "audit" | "auditor" => Some(PrincipalRole::Audit),
            _ => None,
        }
    }

    /// Groups carry members and admins and are administered through `phash`.
    pub fn is_group(&self) -> bool {
        matches!(self, PrincipalRole::Service | PrincipalRole::Org)
    }
}

impl fmt::Display for PrincipalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrincipalRole::System => write!(f, "system"),
            PrincipalRole::Patient => write!(f, "patient"),
            PrincipalRole::Service => write!(f, "service"),
            PrincipalRole::Org => write!(f, "org"),
            PrincipalRole::Audit => write!(f, "audit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: PrincipalRole,
    /// Base64 compressed secp256k1 public key.
    #[serde(default)]
    pub public_key: String,
    /// Parent org of a service, or the org a user was registered into.
    #[serde(default, alias = "org", skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub datatypes: Vec<String>,
    #[serde(default)]
    pub status: PrincipalStatus,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub email: String,
    /// Free-form solution settings, role changes included.
    #[serde(default)]
    pub solution_info: BTreeMap<String, Value>,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: PrincipalRole) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            role,
            public_key: String::new(),
            org_id: None,
            services: Vec::new(),
            members: Vec::new(),
            admins: Vec::new(),
            datatypes: Vec::new(),
            status: PrincipalStatus::Active,
            is_group: role.is_group(),
            email: String::new(),
            solution_info: BTreeMap::new(),
        }
    }

    pub fn as_ref(&self) -> PrincipalRef {
        PrincipalRef::new(self.id.clone(), self.org_id.clone())
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|a| a == user_id)
    }

    pub fn has_datatype(&self, datatype_id: &str) -> bool {
        self.datatypes.iter().any(|d| d == datatype_id)
    }
}

/// Add `item` to `list` unless present.
pub(crate) fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|x| x == item) {
        list.push(item.to_string());
    }
}

impl AssetRecord for Principal {
    const TABLE: &'static TableDef = &PRINCIPALS;
    const PRIVATE_FIELDS: &'static [&'static str] = &["email", "solution_info"];

    fn asset_id(&self) -> String {
        self.id.clone()
    }

    fn asset_key_id(&self) -> String {
        ids::sym(&self.id)
    }

    fn owner_ids(&self) -> Vec<String> {
        vec![self.id.clone()]
    }
}
