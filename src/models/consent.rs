// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Consents: an owner's grant to a target for one datatype.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::assets::index::{TableDef, CONSENTS};
use crate::assets::AssetRecord;
use crate::error::{OmrError, OmrResult};
use crate::keygraph::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentOption {
    Read,
    Write,
    Deny,
}

impl fmt::Display for ConsentOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentOption::Read => write!(f, "read"),
            ConsentOption::Write => write!(f, "write"),
            ConsentOption::Deny => write!(f, "deny"),
        }
    }
}

/// Access requested when validating a consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn parse(s: &str) -> OmrResult<Access> {
        match s.to_lowercase().as_str() {
            "read" => Ok(Access::Read),
            "write" => Ok(Access::Write),
            other => Err(OmrError::validation(format!("invalid access type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    #[serde(alias = "owner")]
    pub owner_id: String,
    #[serde(alias = "target")]
    pub target_id: String,
    #[serde(alias = "datatype")]
    pub datatype_id: String,
    #[serde(default)]
    pub option: Vec<ConsentOption>,
    /// Unix seconds after which the consent no longer grants access; 0 never expires.
    #[serde(default)]
    pub expiration: i64,
    /// Unix seconds of the grant; 0 means the transaction time.
    #[serde(default)]
    pub timestamp: i64,
}

impl Consent {
    pub fn id(&self) -> String {
        ids::consent_asset(&self.owner_id, &self.target_id, &self.datatype_id)
    }

    pub fn key_id(&self) -> String {
        ids::consent(&self.datatype_id, &self.target_id, &self.owner_id)
    }

    /// Sort options and drop duplicates.
    pub fn normalize_options(&mut self) {
        self.option.sort();
        self.option.dedup();
    }

    /// Options must be non-empty and `deny` stands alone.
    pub fn validate_options(&self) -> OmrResult<()> {
        if self.option.is_empty() {
            return Err(OmrError::validation("invalid consent option"));
        }
        if self.option.contains(&ConsentOption::Deny) && self.option.len() > 1 {
            return Err(OmrError::validation(
                "invalid consent option: deny cannot be combined with read or write",
            ));
        }
        Ok(())
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration != 0 && self.expiration < now
    }

    /// Read or write was granted, regardless of expiry.
    pub fn grants_any(&self) -> bool {
        self.option
            .iter()
            .any(|o| matches!(o, ConsentOption::Read | ConsentOption::Write))
    }

    pub fn allows(&self, access: Access, now: i64) -> bool {
        if self.is_expired(now) {
            return false;
        }
        let wanted = match access {
            Access::Read => ConsentOption::Read,
            Access::Write => ConsentOption::Write,
        };
        self.option.contains(&wanted)
    }

    /// Same grant, ignoring the grant timestamp.
    pub fn same_grant(&self, other: &Consent) -> bool {
        let mut a = self.option.clone();
        let mut b = other.option.clone();
        a.sort();
        a.dedup();
        b.sort();
        b.dedup();
        a == b && self.expiration == other.expiration
    }
}

impl AssetRecord for Consent {
    const TABLE: &'static TableDef = &CONSENTS;
    const PRIVATE_FIELDS: &'static [&'static str] = &["option", "expiration", "timestamp"];

    fn asset_id(&self) -> String {
        self.id()
    }

    fn asset_key_id(&self) -> String {
        self.key_id()
    }

    fn owner_ids(&self) -> Vec<String> {
        vec![self.owner_id.clone()]
    }

    fn datatypes(&self) -> Vec<String> {
        vec![self.datatype_id.clone()]
    }
}

/// Bearer token issued by `validateConsent`, sealed under the token secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentToken {
    pub owner_id: String,
    pub target_id: String,
    pub datatype_id: String,
    /// Base64 consent key material.
    pub consent_key: String,
    pub expiry: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentValidation {
    pub permission_granted: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// A service's view of what an enrolled user has granted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub user_id: String,
    pub service_id: String,
    pub datatype_id: String,
    pub option: Vec<ConsentOption>,
    pub expiration: i64,
}
