// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Crate-wide error type.
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | `Validation` | bad shape, length or range; surfaced verbatim |
//! | `NotFound` | a path-dependent lookup found nothing |
//! | `PermissionDenied` | no reachable key path |
//! | `State` | illegal transition, duplicate id, stale record |
//! | `Ledger` | underlying store failure |
//! | `Crypto` | decryption failure or malformed key, shown as `invalid key` |
//! | `Serialization` | payload (de)serialization failure |
//! | `Offchain` | off-chain document store failure |
//! | `Internal` | panic caught at the dispatcher boundary |

use serde::Serialize;

use crate::crypto::CryptoError;
use crate::ledger::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum OmrError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("caller does not have access to {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    State(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid key")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("off-chain store error: {0}")]
    Offchain(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type OmrResult<T> = Result<T, OmrError>;

/// Failure envelope returned by the dispatcher.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_code: &'static str,
}

impl OmrError {
    pub fn validation(msg: impl Into<String>) -> Self {
        OmrError::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        OmrError::State(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        OmrError::NotFound(what.into())
    }

    pub fn denied(what: impl Into<String>) -> Self {
        OmrError::PermissionDenied(what.into())
    }

    /// Stable snake_case code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            OmrError::Validation(_) => "validation_error",
            OmrError::NotFound(_) => "not_found",
            OmrError::PermissionDenied(_) => "permission_denied",
            OmrError::State(_) => "invalid_state",
            OmrError::Ledger(_) => "ledger_error",
            OmrError::Crypto(_) => "invalid_key",
            OmrError::Serialization(_) => "serialization_error",
            OmrError::Offchain(_) => "offchain_error",
            OmrError::Internal(_) => "internal_error",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            error_code: self.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_errors_do_not_leak_details() {
        let err: OmrError = CryptoError::Encoding("bad scalar 0xdeadbeef".into()).into();
        assert_eq!(err.to_string(), "invalid key");
        assert_eq!(err.error_code(), "invalid_key");
    }

    #[test]
    fn permission_message_names_the_target() {
        let err = OmrError::denied("asset Consent-pat1-svc1-heart");
        assert_eq!(
            err.to_string(),
            "caller does not have access to asset Consent-pat1-svc1-heart"
        );
        assert_eq!(err.error_code(), "permission_denied");
    }

    #[test]
    fn body_carries_code() {
        let body = OmrError::validation("invalid consent option").to_body();
        assert_eq!(body.error, "invalid consent option");
        assert_eq!(body.error_code, "validation_error");
    }
}
