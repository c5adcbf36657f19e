//! # Hashing Utilities
//!
//! Keccak-256 is the only hash function this chain uses. Addresses,
//! transaction ids, block hashes, and Merkle roots all come from it. This
//! keeps things interoperable with the Ethereum-shaped signature scheme in
//! [`super::keys`] — recovering an address from a signature and hashing
//! data both land on the same primitive.

use sha3::{Digest, Keccak256};

/// Compute the Keccak-256 hash of the input data.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Hash multiple byte slices together without concatenation overhead.
///
/// Feeds each part sequentially into the hasher instead of allocating a
/// scratch buffer to concatenate them first.
pub fn keccak256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Compute a Merkle root from a list of leaf hashes using Keccak-256.
///
/// A simple binary Merkle tree: pairwise hash, duplicating the last leaf
/// when a level has an odd number of nodes. Empty input yields the all-zero
/// 32-byte hash. Used for both the transaction root (leaves = tx ids, in
/// block order) and the state root (leaves = `keccak(key) || keccak(value)`,
/// sorted by key — see [`state_root`]).
///
/// This is deterministic and part of consensus: every node must compute
/// the identical root for the identical leaf sequence.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut current_level: Vec<[u8; 32]> = leaves.to_vec();

    // A single leaf is paired with itself so the root is always the output
    // of a hash operation, never a raw leaf.
    if current_level.len() == 1 {
        return keccak256_multi(&[current_level[0].as_slice(), current_level[0].as_slice()]);
    }

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity((current_level.len() + 1) / 2);

        for chunk in current_level.chunks(2) {
            let left = &chunk[0];
            let right = if chunk.len() == 2 { &chunk[1] } else { &chunk[0] };
            next_level.push(keccak256_multi(&[left.as_slice(), right.as_slice()]));
        }

        current_level = next_level;
    }

    current_level[0]
}

/// Compute the state root over a sorted sequence of `(key, value)` pairs.
///
/// Entries must already be sorted lexicographically by key (the caller,
/// typically `ChainEngine`, owns a `BTreeMap` so this is free). Each leaf
/// is `keccak(key) || keccak(value)`, matching the transaction-root
/// Merkle construction in [`merkle_root`].
pub fn state_root<'a, I>(entries: I) -> [u8; 32]
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let leaves: Vec<[u8; 32]> = entries
        .into_iter()
        .map(|(key, value)| keccak256_multi(&[&keccak256(key.as_bytes()), &keccak256(value)]))
        .collect();
    merkle_root(&leaves)
}
