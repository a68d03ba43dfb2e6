// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Download contracts between an owner service and a requester service.
//!
//! ```text
//! new ─[requester: request]─► requested ─[owner: request]─► contractReady
//!                            ◄──────────[owner: terms]──────
//! contractReady ─[requester: sign]─► contractSigned
//! contractSigned ─[requester: payment]─► paymentDone ─[owner: verify]─► paymentVerified
//! contractSigned | paymentVerified | downloadReady | downloadDone
//!     ─[owner: permission]─► downloadReady
//! downloadReady ─[requester: download]─► downloadReady (n < max) | downloadDone (n == max)
//! any non-terminal ─[either: terminate]─► terminated
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::assets::index::{TableDef, CONTRACTS};
use crate::assets::AssetRecord;
use crate::error::{OmrError, OmrResult};
use crate::keygraph::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ContractState {
    #[default]
    New,
    Requested,
    ContractReady,
    ContractSigned,
    PaymentDone,
    PaymentVerified,
    DownloadReady,
    DownloadDone,
    Terminated,
}

impl ContractState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractState::New => "new",
            ContractState::Requested => "requested",
            ContractState::ContractReady => "contractReady",
            ContractState::ContractSigned => "contractSigned",
            ContractState::PaymentDone => "paymentDone",
            ContractState::PaymentVerified => "paymentVerified",
            ContractState::DownloadReady => "downloadReady",
            ContractState::DownloadDone => "downloadDone",
            ContractState::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> OmrResult<ContractState> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| OmrError::validation(format!("invalid contract state {s:?}")))
    }

    pub fn is_terminal(&self) -> bool {
        *self == ContractState::Terminated
    }
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailType {
    Request,
    Terms,
    Sign,
    Payment,
    Verify,
    Permission,
    Download,
    Terminate,
}

impl DetailType {
    pub fn parse(s: &str) -> OmrResult<DetailType> {
        serde_json::from_value(Value::String(s.to_lowercase()))
            .map_err(|_| OmrError::validation(format!("invalid contract detail type {s:?}")))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetailType::Request => "request",
            DetailType::Terms => "terms",
            DetailType::Sign => "sign",
            DetailType::Payment => "payment",
            DetailType::Verify => "verify",
            DetailType::Permission => "permission",
            DetailType::Download => "download",
            DetailType::Terminate => "terminate",
        }
    }
}

/// Side of the contract acting in a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Owner,
    Requester,
}

/// Immutable record appended by every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDetail {
    #[serde(rename = "type")]
    pub detail_type: DetailType,
    #[serde(default)]
    pub terms: Value,
    pub timestamp: i64,
    pub created_by: String,
}

/// Accepts `true`/`false` as well as `"yes"`/`"no"`.
fn yes_no<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.to_lowercase().as_str() {
            "yes" | "true" => Ok(true),
            "no" | "false" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected yes or no, got {other:?}"
            ))),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(alias = "id")]
    pub contract_id: String,
    pub owner_org: String,
    pub owner_service: String,
    pub requester_org: String,
    pub requester_service: String,
    #[serde(default)]
    pub state: ContractState,
    #[serde(default)]
    pub terms: Value,
    #[serde(default)]
    pub details: Vec<ContractDetail>,
    #[serde(default)]
    pub max_num_download: u32,
    #[serde(default)]
    pub num_download: u32,
    #[serde(default, deserialize_with = "yes_no")]
    pub payment_required: bool,
    #[serde(default)]
    pub payment_verified: bool,
    #[serde(default)]
    pub create_date: i64,
    #[serde(default)]
    pub update_date: i64,
    /// Owner datatypes currently granted to the requester.
    #[serde(default)]
    pub permitted_datatypes: Vec<String>,
}

impl Contract {
    pub fn key_id(&self) -> String {
        ids::sym(&self.contract_id)
    }

    pub fn party_service(&self, party: Party) -> &str {
        match party {
            Party::Owner => &self.owner_service,
            Party::Requester => &self.requester_service,
        }
    }

    fn reject(&self, detail: DetailType) -> OmrError {
        OmrError::state(format!(
            "cannot apply {} to contract {} in state {}",
            detail.as_str(),
            self.contract_id,
            self.state
        ))
    }

    /// Next state for a transition, without mutating the contract.
    pub fn next_state(&self, party: Party, detail: DetailType) -> OmrResult<ContractState> {
        use ContractState as S;
        use DetailType as D;

        if self.state.is_terminal() {
            return Err(self.reject(detail));
        }
        let next = match (party, detail, self.state) {
            (_, D::Terminate, _) => S::Terminated,
            (Party::Requester, D::Request, S::New) => S::Requested,
            (Party::Owner, D::Request, S::Requested) => S::ContractReady,
            (Party::Owner, D::Terms, S::ContractReady) => S::Requested,
            (Party::Requester, D::Sign, S::ContractReady) => S::ContractSigned,
            (Party::Requester, D::Payment, S::ContractSigned) if self.payment_required => {
                S::PaymentDone
            }
            (Party::Owner, D::Verify, S::PaymentDone) => S::PaymentVerified,
            (Party::Owner, D::Permission, S::ContractSigned) if !self.payment_required => {
                S::DownloadReady
            }
            (
                Party::Owner,
                D::Permission,
                S::PaymentVerified | S::DownloadReady | S::DownloadDone,
            ) => S::DownloadReady,
            (Party::Requester, D::Download, S::DownloadReady)
                if self.num_download < self.max_num_download =>
            {
                if self.num_download + 1 == self.max_num_download {
                    S::DownloadDone
                } else {
                    S::DownloadReady
                }
            }
            _ => return Err(self.reject(detail)),
        };
        Ok(next)
    }

    /// Apply a transition and append its detail. Returns the new state.
    pub fn apply(
        &mut self,
        party: Party,
        detail: DetailType,
        terms: Value,
        timestamp: i64,
        created_by: &str,
    ) -> OmrResult<ContractState> {
        let next = self.next_state(party, detail)?;
        match detail {
            DetailType::Verify => self.payment_verified = true,
            DetailType::Download => self.num_download += 1,
            DetailType::Terms if !terms.is_null() => self.terms = terms.clone(),
            _ => {}
        }
        self.state = next;
        self.update_date = timestamp;
        self.details.push(ContractDetail {
            detail_type: detail,
            terms,
            timestamp,
            created_by: created_by.to_string(),
        });
        Ok(next)
    }

    /// Owner grant of `max` downloads. The cap may only grow and must leave
    /// room for at least one more download.
    pub fn grant_downloads(
        &mut self,
        max: u32,
        datatype_id: &str,
        timestamp: i64,
        created_by: &str,
    ) -> OmrResult<ContractState> {
        if max < self.max_num_download {
            return Err(OmrError::validation(format!(
                "max_num_download cannot decrease from {}",
                self.max_num_download
            )));
        }
        if max <= self.num_download {
            return Err(OmrError::validation(format!(
                "max_num_download must exceed {} completed downloads",
                self.num_download
            )));
        }
        let terms = serde_json::json!({"max_num_download": max, "datatype_id": datatype_id});
        let next = self.apply(Party::Owner, DetailType::Permission, terms, timestamp, created_by)?;
        self.max_num_download = max;
        if !self.permitted_datatypes.iter().any(|d| d == datatype_id) {
            self.permitted_datatypes.push(datatype_id.to_string());
        }
        Ok(next)
    }
}

impl AssetRecord for Contract {
    const TABLE: &'static TableDef = &CONTRACTS;
    const PRIVATE_FIELDS: &'static [&'static str] = &["terms", "details"];

    fn asset_id(&self) -> String {
        self.contract_id.clone()
    }

    fn asset_key_id(&self) -> String {
        self.key_id()
    }

    fn owner_ids(&self) -> Vec<String> {
        vec![self.owner_service.clone(), self.requester_service.clone()]
    }

    fn datatypes(&self) -> Vec<String> {
        self.permitted_datatypes.clone()
    }
}
