// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pure key derivations. No ledger access happens here.

use sha2::{Digest, Sha256};

use super::keys::{Key, KeyType};

/// Tag appended to a parent key's material before hashing.
pub const LOG_KEY_TAG: &[u8] = b"logSymKey";

/// Id of the log key derived from the key with id `parent_id`.
pub fn log_key_id(parent_id: &str) -> String {
    format!("log({parent_id})")
}

/// `DeriveLogKey(k) = SHA-256(material(k) ‖ "logSymKey")`.
///
/// Anyone holding `k` recomputes the same log key without a ledger read.
pub fn derive_log_key(parent: &Key) -> Key {
    Key {
        id: log_key_id(&parent.id),
        key_type: KeyType::Sym,
        material: sha256(&[&parent.material, LOG_KEY_TAG]),
    }
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_key_is_deterministic() {
        let parent = Key::sym("sym(Enrollment-pat1-svc1)", vec![7u8; 32]);
        let a = derive_log_key(&parent);
        let b = derive_log_key(&parent.clone());
        assert_eq!(a, b);
        assert_eq!(a.id, "log(sym(Enrollment-pat1-svc1))");
        assert_eq!(a.material.len(), 32);
    }

    #[test]
    fn log_key_matches_tagged_hash() {
        let parent = Key::sym("sym(x)", b"abc".to_vec());
        let expected = Sha256::digest(b"abclogSymKey").to_vec();
        assert_eq!(derive_log_key(&parent).material, expected);
    }

    #[test]
    fn different_parents_give_different_log_keys() {
        let a = derive_log_key(&Key::sym("sym(a)", vec![1u8; 32]));
        let b = derive_log_key(&Key::sym("sym(b)", vec![2u8; 32]));
        assert_ne!(a.material, b.material);
    }
}
