// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deterministic key ids.
//!
//! | Id | Key |
//! |----|-----|
//! | `pubprv(u)` | principal key pair |
//! | `sym(x)` | symmetric key of principal or asset `x` |
//! | `phash(u)` | symmetric key wrapping `u`'s private key, held by admins |
//! | `log(k)` | log key derived from `k` |
//! | `datatype(d,o)` | datatype key of `d` under owner `o` |
//! | `consent(d,t,o)` | consent key of `d` from owner `o` to target `t` |
//! | `datakey(d,o)` | data key of `o`'s uploads of `d` |

use crate::crypto::derive::log_key_id;
use crate::error::{OmrError, OmrResult};

pub fn pubprv(principal: &str) -> String {
    format!("pubprv({principal})")
}

pub fn sym(id: &str) -> String {
    format!("sym({id})")
}

pub fn phash(principal: &str) -> String {
    format!("phash({principal})")
}

pub fn log(parent_id: &str) -> String {
    log_key_id(parent_id)
}

pub fn datatype(datatype: &str, owner: &str) -> String {
    format!("datatype({datatype},{owner})")
}

pub fn consent(datatype: &str, target: &str, owner: &str) -> String {
    format!("consent({datatype},{target},{owner})")
}

pub fn datakey(datatype: &str, owner: &str) -> String {
    format!("datakey({datatype},{owner})")
}

// ========== Asset ids ==========

pub fn enrollment_asset(user: &str, service: &str) -> String {
    format!("Enrollment-{user}-{service}")
}

pub fn consent_asset(owner: &str, target: &str, datatype: &str) -> String {
    format!("Consent-{owner}-{target}-{datatype}")
}

pub fn audit_permission_asset(auditor: &str, service: &str) -> String {
    format!("AuditPermission-{auditor}-{service}")
}

/// True when `dst` is the log key of `src`, a step that needs no edge.
pub fn is_log_of(src: &str, dst: &str) -> bool {
    dst.strip_prefix("log(")
        .and_then(|rest| rest.strip_suffix(')'))
        .is_some_and(|inner| inner == src)
}

/// Reject ids that would break key id or ledger key syntax.
pub fn validate_id(kind: &str, id: &str) -> OmrResult<()> {
    if id.is_empty() {
        return Err(OmrError::validation(format!("{kind} id must not be empty")));
    }
    if id.chars().any(|c| matches!(c, '(' | ')' | ',' | '/' | '\0')) {
        return Err(OmrError::validation(format!(
            "{kind} id {id:?} contains a reserved character"
        )));
    }
    Ok(())
}
