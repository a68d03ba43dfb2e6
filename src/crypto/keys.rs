// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key values handled by the key graph.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::symmetric::SYM_KEY_LEN;
use super::{asymmetric, derive, encoding, random_bytes, symmetric, CryptoError, CryptoResult};

/// Kind of key material.
///
/// - `Sym` - 32-byte AES-256-GCM key
/// - `Asym` - secp256k1 secret scalar (32 bytes); encrypts to its public half
/// - `Public` - compressed secp256k1 point (33 bytes); encrypt only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Sym,
    Asym,
    Public,
}

/// A key with its stable id.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    pub id: String,
    pub key_type: KeyType,
    pub material: Vec<u8>,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("key_type", &self.key_type)
            .field("material", &"<redacted>")
            .finish()
    }
}

impl Key {
    pub fn sym(id: impl Into<String>, material: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            key_type: KeyType::Sym,
            material,
        }
    }

    /// Fresh random symmetric key.
    pub fn generate_sym(id: impl Into<String>) -> CryptoResult<Self> {
        Ok(Self::sym(id, random_bytes(SYM_KEY_LEN)?))
    }

    /// Fresh random secp256k1 key pair.
    pub fn generate_asym(id: impl Into<String>) -> CryptoResult<Self> {
        let secret = asymmetric::generate_secret()?;
        Ok(Self {
            id: id.into(),
            key_type: KeyType::Asym,
            material: secret.to_bytes().to_vec(),
        })
    }

    pub fn public(id: impl Into<String>, material: Vec<u8>) -> CryptoResult<Self> {
        asymmetric::public_from_bytes(&material)?;
        Ok(Self {
            id: id.into(),
            key_type: KeyType::Public,
            material,
        })
    }

    /// Same key under a different id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_private(&self) -> bool {
        self.key_type != KeyType::Public
    }

    /// Compressed public key bytes of an asymmetric key.
    pub fn public_key_bytes(&self) -> CryptoResult<Vec<u8>> {
        match self.key_type {
            KeyType::Asym => {
                let secret = asymmetric::secret_from_bytes(&self.material)?;
                Ok(asymmetric::public_to_bytes(&secret.public_key()))
            }
            KeyType::Public => Ok(self.material.clone()),
            KeyType::Sym => Err(CryptoError::InvalidKey),
        }
    }

    /// The public half of an asymmetric key, keeping the id.
    pub fn to_public(&self) -> CryptoResult<Key> {
        Key::public(self.id.clone(), self.public_key_bytes()?)
    }

    /// `EncSym` for symmetric keys, `EncAsym` (to the public half) otherwise.
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        match self.key_type {
            KeyType::Sym => symmetric::encrypt(&self.material, plaintext),
            KeyType::Asym | KeyType::Public => {
                let public = asymmetric::public_from_bytes(&self.public_key_bytes()?)?;
                asymmetric::encrypt(&public, plaintext)
            }
        }
    }

    /// `DecSym` or `DecAsym`. A public key cannot decrypt.
    pub fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        match self.key_type {
            KeyType::Sym => symmetric::decrypt(&self.material, ciphertext),
            KeyType::Asym => {
                let secret = asymmetric::secret_from_bytes(&self.material)?;
                asymmetric::decrypt(&secret, ciphertext)
            }
            KeyType::Public => Err(CryptoError::InvalidKey),
        }
    }

    /// Log key derived from this key.
    pub fn log_key(&self) -> Key {
        derive::derive_log_key(self)
    }

    /// Base64 of the raw material.
    pub fn material_b64(&self) -> String {
        encoding::encode_b64(&self.material)
    }
}
