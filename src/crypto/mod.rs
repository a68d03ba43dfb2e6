// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cryptography
//!
//! Symmetric and asymmetric primitives used by the key graph, plus the
//! deterministic derivation of log keys.
//!
//! - `keys` - the [`Key`] value (id, type, material) and its encrypt/decrypt
//! - `symmetric` - AES-256-GCM (`ring::aead`)
//! - `asymmetric` - ECIES over secp256k1 (`k256` ECDH + AES-256-GCM)
//! - `derive` - `DeriveLogKey` and other pure derivations
//! - `encoding` - base64 and PEM parsing of caller-supplied key material
//!
//! Nothing in this module touches the ledger.

pub mod asymmetric;
pub mod derive;
pub mod encoding;
pub mod keys;
pub mod symmetric;

pub use derive::{derive_log_key, LOG_KEY_TAG};
pub use encoding::{decode_b64, encode_b64, parse_keypair_b64, parse_sym_b64};
pub use keys::{Key, KeyType};

/// Errors raised by cryptographic operations.
///
/// Display strings never include key material or inner library errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key")]
    InvalidKey,

    #[error("invalid key: decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("invalid key: {0}")]
    Encoding(String),

    #[error("random number generator failure")]
    Rng,
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Fill a fresh buffer with `len` random bytes from the system RNG.
pub fn random_bytes(len: usize) -> CryptoResult<Vec<u8>> {
    use ring::rand::{SecureRandom, SystemRandom};

    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| CryptoError::Rng)?;
    Ok(buf)
}
