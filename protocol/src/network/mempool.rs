//! Nonce-aware transaction pool.
//!
//! Thread-safe mempool for pending transactions awaiting block inclusion.
//! Admission requires the transaction's nonce to exactly equal the
//! sender's current on-chain counter — no out-of-order pipelining. A
//! sender with a queued transaction cannot queue a second one until the
//! first is included or explicitly removed.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use thiserror::Error;

use crate::crypto::keys::Address;
use crate::transaction::Transaction;

/// Configuration for a [`Mempool`].
#[derive(Debug, Clone, Copy)]
pub struct MempoolConfig {
    /// Maximum number of pending transactions held at once.
    pub max_size: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self { max_size: 10_000 }
    }
}

/// A pending transaction plus bookkeeping for FIFO draining.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub received_at: Instant,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("mempool is full ({0} entries)")]
    Full(usize),

    #[error("sender already has a pending transaction")]
    SenderAlreadyPending,

    #[error("transaction nonce {got} does not match expected counter {expected}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("transaction is already in the mempool")]
    Duplicate,
}

/// A thread-safe, nonce-gated transaction mempool.
///
/// Callers are expected to run [`crate::storage::ChainEngine::submit_transaction`]
/// (or equivalent structural/signature verification) before calling
/// [`Mempool::insert`] — the mempool itself only enforces capacity and
/// strict nonce-equals-counter ordering, since it has no access to chain
/// state on its own.
#[derive(Debug)]
pub struct Mempool {
    entries: RwLock<HashMap<[u8; 32], MempoolEntry>>,
    /// One slot per sender, since a second queued transaction from the same
    /// sender would require speculative nonce pipelining we don't support.
    by_sender: RwLock<HashMap<Address, [u8; 32]>>,
    config: MempoolConfig,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self { entries: RwLock::new(HashMap::new()), by_sender: RwLock::new(HashMap::new()), config }
    }

    /// Admits `tx` if the mempool has room, the sender has no other
    /// pending transaction, and `tx.nonce == expected_nonce`.
    ///
    /// `expected_nonce` is supplied by the caller (the current chain-state
    /// nonce counter for `tx.from`) rather than tracked internally, so the
    /// mempool never drifts from chain state.
    pub fn insert(&self, tx: Transaction, expected_nonce: u64) -> Result<(), MempoolError> {
        if self.entries.read().contains_key(&tx.id) {
            return Err(MempoolError::Duplicate);
        }
        if tx.nonce != expected_nonce {
            return Err(MempoolError::NonceMismatch { expected: expected_nonce, got: tx.nonce });
        }

        let mut by_sender = self.by_sender.write();
        if by_sender.contains_key(&tx.from) {
            return Err(MempoolError::SenderAlreadyPending);
        }

        let mut entries = self.entries.write();
        if entries.len() >= self.config.max_size {
            return Err(MempoolError::Full(self.config.max_size));
        }

        by_sender.insert(tx.from, tx.id);
        entries.insert(tx.id, MempoolEntry { tx, received_at: Instant::now() });
        Ok(())
    }

    /// Removes a transaction by id, e.g. after it has been included in a
    /// committed block.
    pub fn remove(&self, id: &[u8; 32]) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.remove(id) {
            self.by_sender.write().remove(&entry.tx.from);
        }
    }

    /// Drops a sender's pending transaction without regard to id, e.g.
    /// when a block lands with a higher nonce than what's queued and the
    /// queued entry is now permanently stale.
    pub fn evict_sender(&self, address: &Address) {
        if let Some(id) = self.by_sender.write().remove(address) {
            self.entries.write().remove(&id);
        }
    }

    /// Drains up to `limit` transactions in FIFO (received-order) order,
    /// without removing them — the caller removes entries explicitly once
    /// a block including them commits.
    pub fn drain_candidates(&self, limit: usize) -> Vec<Transaction> {
        let entries = self.entries.read();
        let mut sorted: Vec<&MempoolEntry> = entries.values().collect();
        sorted.sort_by_key(|e| e.received_at);
        sorted.into_iter().take(limit).map(|e| e.tx.clone()).collect()
    }

    pub fn contains(&self, id: &[u8; 32]) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn sender_pending(&self, address: &Address) -> bool {
        self.by_sender.read().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MempoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PodoruKeypair;
    use crate::transaction::{sign_transaction, Operation, TransactionBuilder};

    fn make_tx(kp: &PodoruKeypair, nonce: u64) -> Transaction {
        let mut tx = TransactionBuilder::new(kp.address())
            .operation(Operation::Set { key: "k".to_string(), value: b"v".to_vec() })
            .nonce(nonce)
            .timestamp(1)
            .build();
        sign_transaction(&mut tx, kp);
        tx
    }

    #[test]
    fn insert_accepts_matching_nonce() {
        let mempool = Mempool::default();
        let kp = PodoruKeypair::generate();
        assert!(mempool.insert(make_tx(&kp, 0), 0).is_ok());
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn insert_rejects_wrong_nonce() {
        let mempool = Mempool::default();
        let kp = PodoruKeypair::generate();
        let err = mempool.insert(make_tx(&kp, 3), 0).unwrap_err();
        assert_eq!(err, MempoolError::NonceMismatch { expected: 0, got: 3 });
    }

    #[test]
    fn insert_rejects_duplicate_transaction_id() {
        let mempool = Mempool::default();
        let kp = PodoruKeypair::generate();
        let tx = make_tx(&kp, 0);
        mempool.insert(tx.clone(), 0).unwrap();

        // Same tx (e.g. re-gossiped by a peer) takes precedence over the
        // sender-already-pending check: it's a duplicate, not a conflict.
        let err = mempool.insert(tx, 0).unwrap_err();
        assert_eq!(err, MempoolError::Duplicate);
    }

    #[test]
    fn insert_rejects_second_pending_from_same_sender() {
        let mempool = Mempool::default();
        let kp = PodoruKeypair::generate();
        mempool.insert(make_tx(&kp, 0), 0).unwrap();
        let err = mempool.insert(make_tx(&kp, 1), 0).unwrap_err();
        assert_eq!(err, MempoolError::SenderAlreadyPending);
    }

    #[test]
    fn insert_rejects_when_full() {
        let mempool = Mempool::new(MempoolConfig { max_size: 1 });
        let kp1 = PodoruKeypair::generate();
        let kp2 = PodoruKeypair::generate();
        mempool.insert(make_tx(&kp1, 0), 0).unwrap();
        let err = mempool.insert(make_tx(&kp2, 0), 0).unwrap_err();
        assert_eq!(err, MempoolError::Full(1));
    }

    #[test]
    fn remove_frees_sender_slot() {
        let mempool = Mempool::default();
        let kp = PodoruKeypair::generate();
        let tx = make_tx(&kp, 0);
        let id = tx.id;
        mempool.insert(tx, 0).unwrap();
        mempool.remove(&id);
        assert!(mempool.is_empty());
        assert!(!mempool.sender_pending(&kp.address()));
    }

    #[test]
    fn evict_sender_removes_without_knowing_id() {
        let mempool = Mempool::default();
        let kp = PodoruKeypair::generate();
        mempool.insert(make_tx(&kp, 0), 0).unwrap();
        mempool.evict_sender(&kp.address());
        assert!(mempool.is_empty());
    }

    #[test]
    fn drain_candidates_respects_fifo_order() {
        let mempool = Mempool::default();
        let kp1 = PodoruKeypair::generate();
        let kp2 = PodoruKeypair::generate();
        let tx1 = make_tx(&kp1, 0);
        let id1 = tx1.id;
        mempool.insert(tx1, 0).unwrap();
        let tx2 = make_tx(&kp2, 0);
        mempool.insert(tx2, 0).unwrap();

        let drained = mempool.drain_candidates(1);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, id1);
    }

    #[test]
    fn drain_candidates_does_not_remove() {
        let mempool = Mempool::default();
        let kp = PodoruKeypair::generate();
        mempool.insert(make_tx(&kp, 0), 0).unwrap();
        mempool.drain_candidates(10);
        assert_eq!(mempool.len(), 1);
    }
}
