// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Base64 and PEM parsing of caller-supplied key material.
//!
//! Key pairs arrive either as base64 of a raw 32-byte secp256k1 scalar or as
//! (base64 of) a PEM document holding a SEC1 or PKCS#8 private key.

use base64ct::{Base64, Encoding};
use k256::SecretKey;

use super::keys::{Key, KeyType};
use super::symmetric::SYM_KEY_LEN;
use super::{asymmetric, CryptoError, CryptoResult};

pub fn encode_b64(bytes: &[u8]) -> String {
    Base64::encode_string(bytes)
}

pub fn decode_b64(value: &str) -> CryptoResult<Vec<u8>> {
    Base64::decode_vec(value.trim()).map_err(|_| CryptoError::Encoding("malformed base64".into()))
}

/// `ParseSymB64`: base64 of exactly 32 bytes.
pub fn parse_sym_b64(id: impl Into<String>, value: &str) -> CryptoResult<Key> {
    let material = decode_b64(value)?;
    if material.len() != SYM_KEY_LEN {
        return Err(CryptoError::Encoding(format!(
            "symmetric key must be {SYM_KEY_LEN} bytes"
        )));
    }
    Ok(Key::sym(id, material))
}

/// `ParseKeypairB64`: raw scalar or PEM, optionally base64-wrapped.
pub fn parse_keypair_b64(id: impl Into<String>, value: &str) -> CryptoResult<Key> {
    let value = value.trim();
    let secret = if value.starts_with("-----BEGIN") {
        secret_from_pem(value)?
    } else {
        let bytes = decode_b64(value)?;
        if bytes.len() == asymmetric::SECRET_KEY_LEN {
            asymmetric::secret_from_bytes(&bytes)?
        } else {
            let text = std::str::from_utf8(&bytes)
                .map_err(|_| CryptoError::Encoding("key pair is neither a scalar nor PEM".into()))?;
            secret_from_pem(text)?
        }
    };

    Ok(Key {
        id: id.into(),
        key_type: KeyType::Asym,
        material: secret.to_bytes().to_vec(),
    })
}

fn secret_from_pem(text: &str) -> CryptoResult<SecretKey> {
    use k256::pkcs8::DecodePrivateKey;

    let pem = pem::parse(text).map_err(|_| CryptoError::Encoding("malformed PEM".into()))?;
    SecretKey::from_sec1_der(pem.contents())
        .or_else(|_| SecretKey::from_pkcs8_der(pem.contents()))
        .map_err(|_| CryptoError::Encoding("unsupported private key format".into()))
}
