// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AES-256-GCM with a random 96-bit nonce prepended to the ciphertext.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};

use super::{random_bytes, CryptoError, CryptoResult};

/// Length of a symmetric key in bytes.
pub const SYM_KEY_LEN: usize = 32;

fn cipher(key: &[u8]) -> CryptoResult<LessSafeKey> {
    if key.len() != SYM_KEY_LEN {
        return Err(CryptoError::InvalidKey);
    }
    let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| CryptoError::InvalidKey)?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` under `key`. Output layout: `nonce ‖ ciphertext ‖ tag`.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = cipher(key)?;

    let nonce_bytes: [u8; NONCE_LEN] = random_bytes(NONCE_LEN)?
        .try_into()
        .map_err(|_| CryptoError::Rng)?;

    let mut in_out = plaintext.to_vec();
    cipher
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Decrypt data produced by [`encrypt`]. Fails on a wrong key or tampering.
pub fn decrypt(key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = cipher(key)?;
    if data.len() < NONCE_LEN + AES_256_GCM.tag_len() {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let nonce =
        Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::DecryptionFailed)?;

    let mut buf = ciphertext.to_vec();
    let plaintext = cipher
        .open_in_place(nonce, Aad::empty(), &mut buf)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt() {
        let key = random_bytes(SYM_KEY_LEN).unwrap();
        let ct = encrypt(&key, b"heart rate 72").unwrap();
        assert_eq!(decrypt(&key, &ct).unwrap(), b"heart rate 72");
    }

    #[test]
    fn encryption_is_randomized() {
        let key = random_bytes(SYM_KEY_LEN).unwrap();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let key = random_bytes(SYM_KEY_LEN).unwrap();
        let other = random_bytes(SYM_KEY_LEN).unwrap();
        let ct = encrypt(&key, b"secret").unwrap();
        assert_eq!(decrypt(&other, &ct), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = random_bytes(SYM_KEY_LEN).unwrap();
        let mut ct = encrypt(&key, b"secret").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(decrypt(&key, &ct).is_err());
    }

    #[test]
    fn short_key_is_rejected() {
        assert_eq!(encrypt(&[0u8; 16], b"x"), Err(CryptoError::InvalidKey));
    }
}
