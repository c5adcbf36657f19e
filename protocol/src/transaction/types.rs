//! Core type definitions for podoru transactions.
//!
//! These types form the vocabulary of every state change on the chain.
//! They are intentionally kept small and serialization-stable since they
//! feed directly into the Keccak-256 transaction id.

use serde::{Deserialize, Serialize};

/// The single state-mutating primitive a transaction can carry.
///
/// There is no smart-contract execution here: every transaction is just an
/// ordered sequence of `Set`/`Delete` operations against a flat key-value
/// state map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Write `value` under `key`, overwriting any existing value.
    Set { key: String, value: Vec<u8> },
    /// Remove `key` from state. A delete of an absent key is a no-op.
    Delete { key: String },
}

impl Operation {
    /// The key this operation touches, regardless of variant.
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } => key,
            Self::Delete { key } => key,
        }
    }

    /// `true` if `key` is non-empty and within the per-key size limit, and
    /// (for `Set`) `value` is within the per-value size limit.
    pub fn is_well_formed(&self) -> bool {
        const MAX_KEY_BYTES: usize = 256;
        const MAX_VALUE_BYTES: usize = 1024 * 1024;

        if self.key().is_empty() || self.key().len() > MAX_KEY_BYTES {
            return false;
        }
        match self {
            Self::Set { value, .. } => value.len() <= MAX_VALUE_BYTES,
            Self::Delete { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_key_accessor() {
        let op = Operation::Set {
            key: "user:alice:profile".to_string(),
            value: b"hi".to_vec(),
        };
        assert_eq!(op.key(), "user:alice:profile");
    }

    #[test]
    fn delete_key_accessor() {
        let op = Operation::Delete { key: "x".to_string() };
        assert_eq!(op.key(), "x");
    }

    #[test]
    fn empty_key_is_malformed() {
        let op = Operation::Set { key: String::new(), value: vec![] };
        assert!(!op.is_well_formed());
    }

    #[test]
    fn oversized_key_is_malformed() {
        let op = Operation::Delete { key: "x".repeat(257) };
        assert!(!op.is_well_formed());
    }

    #[test]
    fn oversized_value_is_malformed() {
        let op = Operation::Set {
            key: "k".to_string(),
            value: vec![0u8; 1024 * 1024 + 1],
        };
        assert!(!op.is_well_formed());
    }

    #[test]
    fn well_formed_operation_passes() {
        let op = Operation::Set {
            key: "k".to_string(),
            value: vec![0u8; 10],
        };
        assert!(op.is_well_formed());
    }

    #[test]
    fn operation_serde_roundtrip() {
        let ops = vec![
            Operation::Set { key: "a".to_string(), value: b"1".to_vec() },
            Operation::Delete { key: "b".to_string() },
        ];
        for op in ops {
            let json = serde_json::to_string(&op).unwrap();
            let recovered: Operation = serde_json::from_str(&json).unwrap();
            assert_eq!(op, recovered);
        }
    }
}
