//! Transaction verification: structural checks and cryptographic validation.
//!
//! Every transaction entering the mempool or carried inside a proposed
//! block must pass [`verify_transaction`]. Checks are ordered from
//! cheapest to most expensive (comparisons before signature recovery) to
//! fail fast on clearly invalid transactions.
//!
//! Nonce admission and the client-submission timestamp window depend on
//! chain/mempool state that this module doesn't have access to — those
//! checks live in [`crate::network::mempool`] and the chain engine, which
//! call [`verify_transaction`] first and layer their own checks on top.

use thiserror::Error;

use super::builder::{Transaction, MAX_TRANSACTION_SIZE};
use crate::crypto::signatures::{recover_address, SignatureError};

/// Errors that can occur during transaction verification.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The transaction id does not match `Keccak256(signable_bytes)`.
    #[error("transaction id mismatch: recomputed id does not match the stored id")]
    IdMismatch,

    /// Serialized size exceeds the 1 MiB limit.
    #[error("transaction too large: {size} bytes exceeds the {limit} byte limit")]
    OversizedTransaction { size: usize, limit: usize },

    /// `operations` is empty.
    #[error("transaction has no operations")]
    EmptyOperations,

    /// An operation has an empty/oversized key or an oversized value.
    #[error("invalid operation: key empty, key > 256 bytes, or value > 1 MiB")]
    InvalidOperation,

    /// The signature does not recover to `from`, or is malformed.
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
}

/// Verifies a transaction's structural correctness and signature.
///
/// Checks, in order:
/// 1. **Id** — recomputed id must equal `tx.id`.
/// 2. **Size** — serialized size ≤ 1 MiB.
/// 3. **Operations** — non-empty; every key non-empty and ≤ 256 bytes,
///    every value ≤ 1 MiB.
/// 4. **Signature** — recovering the signer from `tx.signature` over
///    `tx.id` must yield `tx.from`.
///
/// Nonce and timestamp admission rules are the caller's responsibility.
pub fn verify_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    // 1. Id integrity.
    if tx.id != tx.compute_id() {
        return Err(TransactionError::IdMismatch);
    }

    // 2. Size limit.
    let size = tx.size_bytes();
    if size > MAX_TRANSACTION_SIZE {
        return Err(TransactionError::OversizedTransaction { size, limit: MAX_TRANSACTION_SIZE });
    }

    // 3. Operations well-formedness.
    if tx.operations.is_empty() {
        return Err(TransactionError::EmptyOperations);
    }
    if !tx.operations.iter().all(|op| op.is_well_formed()) {
        return Err(TransactionError::InvalidOperation);
    }

    // 4. Signature recovery.
    let recovered = recover_address(&sig_from_bytes(&tx.signature), &tx.id)?;
    if recovered != tx.from {
        return Err(TransactionError::InvalidSignature(SignatureError::VerificationFailed));
    }

    Ok(())
}

fn sig_from_bytes(bytes: &[u8; 65]) -> crate::crypto::keys::Signature {
    crate::crypto::keys::Signature::from_bytes(*bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PodoruKeypair;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::signing::sign_transaction;
    use crate::transaction::types::Operation;

    fn valid_signed_tx() -> (Transaction, PodoruKeypair) {
        let kp = PodoruKeypair::generate();
        let mut tx = TransactionBuilder::new(kp.address())
            .operation(Operation::Set { key: "k".to_string(), value: b"v".to_vec() })
            .nonce(1)
            .timestamp(1_700_000_000)
            .build();
        sign_transaction(&mut tx, &kp);
        (tx, kp)
    }

    #[test]
    fn valid_transaction_passes() {
        let (tx, _) = valid_signed_tx();
        assert!(verify_transaction(&tx).is_ok());
    }

    #[test]
    fn rejects_empty_operations() {
        let kp = PodoruKeypair::generate();
        let mut tx = TransactionBuilder::new(kp.address()).nonce(1).timestamp(1).build();
        sign_transaction(&mut tx, &kp);

        match verify_transaction(&tx) {
            Err(TransactionError::EmptyOperations) => {}
            other => panic!("expected EmptyOperations, got {:?}", other),
        }
    }

    #[test]
    fn rejects_invalid_operation() {
        let kp = PodoruKeypair::generate();
        let mut tx = TransactionBuilder::new(kp.address())
            .operation(Operation::Delete { key: String::new() })
            .nonce(1)
            .timestamp(1)
            .build();
        sign_transaction(&mut tx, &kp);

        match verify_transaction(&tx) {
            Err(TransactionError::InvalidOperation) => {}
            other => panic!("expected InvalidOperation, got {:?}", other),
        }
    }

    #[test]
    fn rejects_tampered_id() {
        let (mut tx, kp) = valid_signed_tx();
        tx.id = [0xAAu8; 32];
        sign_transaction(&mut tx, &kp);

        match verify_transaction(&tx) {
            Err(TransactionError::IdMismatch) => {}
            other => panic!("expected IdMismatch, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unsigned_transaction() {
        let kp = PodoruKeypair::generate();
        let tx = TransactionBuilder::new(kp.address())
            .operation(Operation::Set { key: "k".to_string(), value: b"v".to_vec() })
            .nonce(1)
            .timestamp(1)
            .build();

        match verify_transaction(&tx) {
            Err(TransactionError::InvalidSignature(_)) => {}
            other => panic!("expected InvalidSignature, got {:?}", other),
        }
    }

    #[test]
    fn rejects_wrong_keypair_signature() {
        let kp_sender = PodoruKeypair::generate();
        let kp_wrong = PodoruKeypair::generate();
        let mut tx = TransactionBuilder::new(kp_sender.address())
            .operation(Operation::Set { key: "k".to_string(), value: b"v".to_vec() })
            .nonce(1)
            .timestamp(1)
            .build();

        // Signed by a different keypair than `from` claims.
        sign_transaction(&mut tx, &kp_wrong);

        match verify_transaction(&tx) {
            Err(TransactionError::InvalidSignature(_)) => {}
            other => panic!("expected InvalidSignature, got {:?}", other),
        }
    }

    #[test]
    fn rejects_oversized_value() {
        let kp = PodoruKeypair::generate();
        let mut tx = TransactionBuilder::new(kp.address())
            .operation(Operation::Set { key: "k".to_string(), value: vec![0u8; 2 * 1024 * 1024] })
            .nonce(1)
            .timestamp(1)
            .build();
        sign_transaction(&mut tx, &kp);

        match verify_transaction(&tx) {
            Err(TransactionError::InvalidOperation) => {}
            other => panic!("expected InvalidOperation, got {:?}", other),
        }
    }
}
