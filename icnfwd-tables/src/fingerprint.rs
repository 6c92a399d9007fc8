//! Fingerprint keys for the PIT and Content Store indices.
//!
//! Both tables index messages three ways: by name, by name plus keyid
//! restriction, and by name plus object-hash restriction. The key carries
//! its hash so the tables never rehash segments.

use crate::hashtable::TableKey;
use bytes::Bytes;
use icnfwd_common::Name;

const KEYID_SALT: u64 = 0x9e37_79b9_7f4a_7c15;
const HASH_SALT: u64 = 0xc2b2_ae3d_27d4_eb4f;

fn mix(mut state: u64, bytes: &[u8]) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    for &b in bytes {
        state ^= b as u64;
        state = state.wrapping_mul(FNV_PRIME);
    }
    state
}

/// Which of the three parallel indices a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Name,
    NameAndKeyId,
    NameAndHash,
}

/// A lookup key: the name, optionally bound to a restriction value.
#[derive(Debug, Clone)]
pub struct FingerprintKey {
    hash: u64,
    flavor: Flavor,
    name: Name,
    restriction: Option<Bytes>,
}

impl FingerprintKey {
    pub fn name_key(name: &Name) -> Self {
        Self {
            hash: name.full_hash(),
            flavor: Flavor::Name,
            name: name.clone(),
            restriction: None,
        }
    }

    pub fn keyid_key(name: &Name, key_id: &Bytes) -> Self {
        Self {
            hash: mix(name.full_hash() ^ KEYID_SALT, key_id),
            flavor: Flavor::NameAndKeyId,
            name: name.clone(),
            restriction: Some(key_id.clone()),
        }
    }

    pub fn hash_key(name: &Name, object_hash: &Bytes) -> Self {
        Self {
            hash: mix(name.full_hash() ^ HASH_SALT, object_hash),
            flavor: Flavor::NameAndHash,
            name: name.clone(),
            restriction: Some(object_hash.clone()),
        }
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn name(&self) -> &Name {
        &self.name
    }
}

impl PartialEq for FingerprintKey {
    fn eq(&self, other: &Self) -> bool {
        self.flavor == other.flavor
            && self.restriction == other.restriction
            && self.name == other.name
    }
}

impl Eq for FingerprintKey {}

impl TableKey for FingerprintKey {
    fn table_hash(&self) -> u64 {
        self.hash
    }
}
