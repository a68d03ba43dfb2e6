// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ECIES over secp256k1.
//!
//! An ephemeral key pair is generated per message. The ECDH shared secret is
//! bound to the ephemeral point with HMAC-SHA256 to form an AES-256-GCM key.
//!
//! Layout: `ephemeral_point(33, compressed) ‖ nonce ‖ ciphertext ‖ tag`.

use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use sha2::Sha256;

use super::{random_bytes, symmetric, CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// Length of a compressed SEC1 point.
pub const PUBLIC_KEY_LEN: usize = 33;

/// Length of a raw secret scalar.
pub const SECRET_KEY_LEN: usize = 32;

const ECIES_INFO: &[u8] = b"omr-ecies-v1";

/// Generate a fresh secp256k1 secret key.
pub fn generate_secret() -> CryptoResult<SecretKey> {
    // A random 32-byte string is a valid scalar with overwhelming probability.
    for _ in 0..4 {
        let bytes = random_bytes(SECRET_KEY_LEN)?;
        if let Ok(secret) = SecretKey::from_slice(&bytes) {
            return Ok(secret);
        }
    }
    Err(CryptoError::Rng)
}

/// Parse a raw 32-byte scalar.
pub fn secret_from_bytes(bytes: &[u8]) -> CryptoResult<SecretKey> {
    SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidKey)
}

/// Parse a SEC1-encoded public key (compressed or uncompressed).
pub fn public_from_bytes(bytes: &[u8]) -> CryptoResult<PublicKey> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidKey)
}

/// Compressed SEC1 encoding of a public key.
pub fn public_to_bytes(public: &PublicKey) -> Vec<u8> {
    public.to_encoded_point(true).as_bytes().to_vec()
}

fn content_key(shared_x: &[u8], ephemeral_point: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(ECIES_INFO).map_err(|_| CryptoError::InvalidKey)?;
    mac.update(shared_x);
    mac.update(ephemeral_point);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Encrypt `plaintext` to the holder of `public`'s secret key.
pub fn encrypt(public: &PublicKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let ephemeral = generate_secret()?;
    let ephemeral_point = public_to_bytes(&ephemeral.public_key());

    let shared = k256::ecdh::diffie_hellman(ephemeral.to_nonzero_scalar(), public.as_affine());
    let key = content_key(shared.raw_secret_bytes().as_slice(), &ephemeral_point)?;

    let sealed = symmetric::encrypt(&key, plaintext)?;
    let mut out = Vec::with_capacity(PUBLIC_KEY_LEN + sealed.len());
    out.extend_from_slice(&ephemeral_point);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt data produced by [`encrypt`].
pub fn decrypt(secret: &SecretKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    if data.len() <= PUBLIC_KEY_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let (ephemeral_point, sealed) = data.split_at(PUBLIC_KEY_LEN);
    let ephemeral =
        PublicKey::from_sec1_bytes(ephemeral_point).map_err(|_| CryptoError::DecryptionFailed)?;

    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());
    let key = content_key(shared.raw_secret_bytes().as_slice(), ephemeral_point)?;
    symmetric::decrypt(&key, sealed)
}
