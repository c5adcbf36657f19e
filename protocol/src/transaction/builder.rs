//! Transaction construction via the builder pattern.
//!
//! The [`TransactionBuilder`] enforces a disciplined construction flow:
//! set the required fields, call `.build()`, and get back an unsigned
//! [`Transaction`] with a deterministic id derived from its contents.
//!
//! The builder does not sign -- that happens in [`super::signing`]. This
//! separation keeps construction testable without key material.

use serde::{Deserialize, Serialize};

use super::types::Operation;
use crate::crypto::keccak256;
use crate::crypto::keys::Address;

/// Maximum serialized size of a transaction, per the data model.
pub const MAX_TRANSACTION_SIZE: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A podoru transaction: an ordered sequence of [`Operation`]s against the
/// flat key-value chain state, authenticated by a single signature.
///
/// `id` is the Keccak-256 hash of the canonical serialization of
/// `(from, timestamp, operations, nonce)` — deliberately excluding
/// `signature`, so the id is stable across signing and can be computed
/// before a signature exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Keccak-256 hash of the canonical signable bytes.
    pub id: [u8; 32],

    /// Sender address. The recovered signer of `signature` must match this.
    pub from: Address,

    /// Unix timestamp in seconds when the transaction was created.
    pub timestamp: i64,

    /// The state mutations this transaction applies, in order.
    pub operations: Vec<Operation>,

    /// Monotonically increasing per-sender sequence number.
    pub nonce: u64,

    /// 65-byte secp256k1 recoverable ECDSA signature over `id`. All-zero
    /// for a freshly built, not-yet-signed transaction.
    pub signature: [u8; 65],
}

impl Transaction {
    /// Canonical byte representation used for id computation and signing.
    ///
    /// `bincode` over `(from, timestamp, operations, nonce)` — fixed field
    /// order, no signature included.
    pub fn signable_bytes(&self) -> Vec<u8> {
        bincode::serialize(&(&self.from, self.timestamp, &self.operations, self.nonce))
            .expect("in-memory transaction fields are always serializable")
    }

    /// Computes the transaction id from the current field values.
    pub fn compute_id(&self) -> [u8; 32] {
        keccak256(&self.signable_bytes())
    }

    /// Total serialized size in bytes, used for the ≤1 MiB size check.
    pub fn size_bytes(&self) -> usize {
        bincode::serialized_size(self)
            .map(|n| n as usize)
            .unwrap_or(usize::MAX)
    }

    /// `true` once a non-zero signature has been attached.
    pub fn is_signed(&self) -> bool {
        self.signature != [0u8; 65]
    }

    /// Hex string of the transaction id, for logs and the state key
    /// namespace.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for constructing unsigned [`Transaction`] instances.
///
/// ```rust,no_run
/// use podoru_chain::transaction::{TransactionBuilder, Operation};
///
/// let tx = TransactionBuilder::new([0u8; 20])
///     .operation(Operation::Set { key: "k".into(), value: b"v".to_vec() })
///     .nonce(0)
///     .timestamp(1_700_000_000)
///     .build();
/// ```
pub struct TransactionBuilder {
    from: Address,
    timestamp: Option<i64>,
    operations: Vec<Operation>,
    nonce: u64,
}

impl TransactionBuilder {
    /// Creates a new builder for a transaction sent by `from`.
    pub fn new(from: Address) -> Self {
        Self {
            from,
            timestamp: None,
            operations: Vec::new(),
            nonce: 0,
        }
    }

    /// Appends a single operation.
    pub fn operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    /// Sets the full operations list, replacing any already added.
    pub fn operations(mut self, ops: Vec<Operation>) -> Self {
        self.operations = ops;
        self
    }

    /// Sets the sender's nonce (sequence number).
    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Sets the timestamp explicitly (Unix seconds). If not called,
    /// `build()` uses the current wall-clock time.
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Consumes the builder and produces an unsigned [`Transaction`] with
    /// its id computed and `signature` all-zero.
    pub fn build(self) -> Transaction {
        let timestamp = self.timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());

        let mut tx = Transaction {
            id: [0u8; 32],
            from: self.from,
            timestamp,
            operations: self.operations,
            nonce: self.nonce,
            signature: [0u8; 65],
        };

        tx.id = tx.compute_id();
        tx
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        TransactionBuilder::new([1u8; 20])
            .operation(Operation::Set { key: "a".to_string(), value: b"1".to_vec() })
            .nonce(1)
            .timestamp(1_700_000_000)
            .build()
    }

    #[test]
    fn builder_produces_deterministic_id() {
        let tx1 = sample_tx();
        let tx2 = sample_tx();
        assert_eq!(tx1.id, tx2.id, "same inputs must produce the same id");
        assert_ne!(tx1.id, [0u8; 32]);
    }

    #[test]
    fn compute_id_matches_stored_id() {
        let tx = sample_tx();
        assert_eq!(tx.id, tx.compute_id());
    }

    #[test]
    fn different_nonce_different_id() {
        let tx1 = TransactionBuilder::new([1u8; 20])
            .operation(Operation::Set { key: "a".to_string(), value: b"1".to_vec() })
            .nonce(1)
            .timestamp(1_700_000_000)
            .build();

        let tx2 = TransactionBuilder::new([1u8; 20])
            .operation(Operation::Set { key: "a".to_string(), value: b"1".to_vec() })
            .nonce(2)
            .timestamp(1_700_000_000)
            .build();

        assert_ne!(tx1.id, tx2.id);
    }

    #[test]
    fn different_sender_different_id() {
        let tx1 = TransactionBuilder::new([1u8; 20]).nonce(1).timestamp(1).build();
        let tx2 = TransactionBuilder::new([2u8; 20]).nonce(1).timestamp(1).build();
        assert_ne!(tx1.id, tx2.id);
    }

    #[test]
    fn unsigned_transaction_has_zero_signature() {
        let tx = sample_tx();
        assert!(!tx.is_signed());
    }

    #[test]
    fn size_bytes_is_positive() {
        let tx = sample_tx();
        assert!(tx.size_bytes() > 0);
    }

    #[test]
    fn builder_uses_current_time_if_not_set() {
        let before = chrono::Utc::now().timestamp();
        let tx = TransactionBuilder::new([1u8; 20]).nonce(1).build();
        let after = chrono::Utc::now().timestamp();
        assert!(tx.timestamp >= before && tx.timestamp <= after);
    }

    #[test]
    fn transaction_bincode_roundtrip() {
        let tx = sample_tx();
        let bytes = bincode::serialize(&tx).unwrap();
        let recovered: Transaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(tx, recovered);
    }

    #[test]
    fn signable_bytes_exclude_signature() {
        let mut tx = sample_tx();
        let before = tx.signable_bytes();
        tx.signature = [0xAAu8; 65];
        let after = tx.signable_bytes();
        assert_eq!(before, after, "signature must not affect signable bytes");
    }

    #[test]
    fn operations_included_in_signable_bytes() {
        let tx_empty = TransactionBuilder::new([1u8; 20]).nonce(1).timestamp(1).build();
        let tx_with_op = TransactionBuilder::new([1u8; 20])
            .operation(Operation::Set { key: "k".to_string(), value: b"v".to_vec() })
            .nonce(1)
            .timestamp(1)
            .build();
        assert_ne!(tx_empty.signable_bytes(), tx_with_op.signable_bytes());
    }
}
