//! # Block Structure
//!
//! A block is the atomic unit of consensus: an ordered list of
//! transactions, a link to the previous block, and the producer's
//! signature over the block hash.
//!
//! ## Hash Computation
//!
//! The block hash is `Keccak256` of the canonical (bincode) serialization
//! of [`BlockHeader`]. The signature is not part of the header — it signs
//! the hash, not the other way around.

use serde::{Deserialize, Serialize};

use crate::crypto::keccak256;
use crate::crypto::keys::Address;
use crate::crypto::merkle_root;
use crate::transaction::Transaction;

/// Current block/header format version.
pub const BLOCK_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// Everything about a block except its transaction list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Header/block format version.
    pub version: u32,
    /// Block height. Genesis is 0.
    pub height: u64,
    /// Hash of the parent block's header. All zeros for genesis.
    pub previous_hash: [u8; 32],
    /// Unix timestamp in seconds when this block was produced.
    pub timestamp: i64,
    /// Merkle root of the block's transaction ids, in block order.
    pub merkle_root: [u8; 32],
    /// Merkle root of chain state after applying this block's transactions.
    pub state_root: [u8; 32],
    /// Address of the authority that produced this block.
    pub producer_addr: Address,
    /// Producer-assigned nonce. Not currently load-bearing for consensus;
    /// reserved for future anti-equivocation tagging.
    pub nonce: u64,
}

impl BlockHeader {
    /// Keccak-256 hash of the canonical (bincode) header serialization.
    pub fn hash(&self) -> [u8; 32] {
        let bytes =
            bincode::serialize(self).expect("in-memory block header is always serializable");
        keccak256(&bytes)
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    pub fn previous_hash_hex(&self) -> String {
        hex::encode(self.previous_hash)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A full block: header + ordered transaction list + producer signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// 65-byte secp256k1 recoverable signature over `header.hash()` by
    /// `header.producer_addr`. All-zero for the genesis block.
    pub signature: [u8; 65],
}

impl Block {
    /// Construct the genesis block for a set of authorities and an initial
    /// state root.
    ///
    /// Height 0, `previous_hash` all zeros, `producer_addr` the first
    /// authority, `signature` all zeros (genesis signature checks are
    /// skipped entirely).
    pub fn genesis(timestamp: i64, authorities: &[Address], state_root: [u8; 32]) -> Self {
        let producer_addr = *authorities.first().unwrap_or(&[0u8; 20]);
        let header = BlockHeader {
            version: BLOCK_VERSION,
            height: 0,
            previous_hash: [0u8; 32],
            timestamp,
            merkle_root: [0u8; 32],
            state_root,
            producer_addr,
            nonce: 0,
        };

        Block { header, transactions: Vec::new(), signature: [0u8; 65] }
    }

    /// Construct an unsigned candidate block extending `parent`.
    ///
    /// The merkle root is derived from `transactions`; `state_root` must be
    /// supplied by the caller (the chain engine, which knows the post-apply
    /// state). The signature is left all-zero — the consensus engine signs
    /// the resulting header hash separately.
    pub fn new_candidate(
        parent: &BlockHeader,
        transactions: Vec<Transaction>,
        producer_addr: Address,
        timestamp: i64,
        state_root: [u8; 32],
    ) -> Self {
        let merkle_root = transaction_merkle_root(&transactions);
        let header = BlockHeader {
            version: BLOCK_VERSION,
            height: parent.height + 1,
            previous_hash: parent.hash(),
            timestamp,
            merkle_root,
            state_root,
            producer_addr,
            nonce: 0,
        };

        Block { header, transactions, signature: [0u8; 65] }
    }

    /// Recompute the transaction Merkle root and compare against the stored
    /// header value.
    pub fn merkle_root_matches(&self) -> bool {
        transaction_merkle_root(&self.transactions) == self.header.merkle_root
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> [u8; 32] {
        self.header.hash()
    }

    pub fn hash_hex(&self) -> String {
        self.header.hash_hex()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0
    }
}

/// Merkle root over a block's transaction ids, in block order.
pub fn transaction_merkle_root(transactions: &[Transaction]) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = transactions.iter().map(|tx| tx.id).collect();
    merkle_root(&leaves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PodoruKeypair;
    use crate::transaction::{sign_transaction, Operation, TransactionBuilder};

    fn make_test_tx(kp: &PodoruKeypair, nonce: u64) -> Transaction {
        let mut tx = TransactionBuilder::new(kp.address())
            .operation(Operation::Set { key: "a".to_string(), value: b"1".to_vec() })
            .nonce(nonce)
            .timestamp(1_000_000)
            .build();
        sign_transaction(&mut tx, kp);
        tx
    }

    #[test]
    fn genesis_block_properties() {
        let authorities = vec![[1u8; 20], [2u8; 20]];
        let genesis = Block::genesis(0, &authorities, [0u8; 32]);
        assert_eq!(genesis.height(), 0);
        assert_eq!(genesis.header.previous_hash, [0u8; 32]);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.signature, [0u8; 65]);
        assert_eq!(genesis.header.producer_addr, authorities[0]);
        assert!(genesis.is_genesis());
    }

    #[test]
    fn genesis_hash_is_deterministic() {
        let authorities = vec![[1u8; 20]];
        let g1 = Block::genesis(0, &authorities, [0u8; 32]);
        let g2 = Block::genesis(0, &authorities, [0u8; 32]);
        assert_eq!(g1.hash(), g2.hash());
    }

    #[test]
    fn new_candidate_links_to_parent() {
        let authorities = vec![[1u8; 20]];
        let genesis = Block::genesis(0, &authorities, [0u8; 32]);
        let block1 = Block::new_candidate(&genesis.header, vec![], [1u8; 20], 5, [9u8; 32]);

        assert_eq!(block1.height(), 1);
        assert_eq!(block1.header.previous_hash, genesis.hash());
        assert_eq!(block1.header.state_root, [9u8; 32]);
    }

    #[test]
    fn merkle_root_matches_for_fresh_candidate() {
        let kp = PodoruKeypair::generate();
        let authorities = vec![kp.address()];
        let genesis = Block::genesis(0, &authorities, [0u8; 32]);
        let txs = vec![make_test_tx(&kp, 0), make_test_tx(&kp, 1)];
        let block = Block::new_candidate(&genesis.header, txs, kp.address(), 5, [0u8; 32]);
        assert!(block.merkle_root_matches());
    }

    #[test]
    fn tampered_merkle_root_detected() {
        let kp = PodoruKeypair::generate();
        let authorities = vec![kp.address()];
        let genesis = Block::genesis(0, &authorities, [0u8; 32]);
        let txs = vec![make_test_tx(&kp, 0)];
        let mut block = Block::new_candidate(&genesis.header, txs, kp.address(), 5, [0u8; 32]);
        block.header.merkle_root[0] ^= 0xFF;
        assert!(!block.merkle_root_matches());
    }

    #[test]
    fn empty_block_merkle_root_is_zero() {
        let authorities = vec![[1u8; 20]];
        let genesis = Block::genesis(0, &authorities, [0u8; 32]);
        let block = Block::new_candidate(&genesis.header, vec![], [1u8; 20], 5, [0u8; 32]);
        assert_eq!(block.header.merkle_root, [0u8; 32]);
    }

    #[test]
    fn block_chain_of_three() {
        let authorities = vec![[1u8; 20], [2u8; 20], [3u8; 20]];
        let b0 = Block::genesis(0, &authorities, [0u8; 32]);
        let b1 = Block::new_candidate(&b0.header, vec![], [2u8; 20], 5, [1u8; 32]);
        let b2 = Block::new_candidate(&b1.header, vec![], [3u8; 20], 10, [2u8; 32]);

        assert_eq!(b2.height(), 2);
        assert_eq!(b2.header.previous_hash, b1.hash());
        assert_eq!(b1.header.previous_hash, b0.hash());
    }

    #[test]
    fn block_bincode_roundtrip() {
        let authorities = vec![[1u8; 20]];
        let genesis = Block::genesis(0, &authorities, [0u8; 32]);
        let bytes = bincode::serialize(&genesis).unwrap();
        let recovered: Block = bincode::deserialize(&bytes).unwrap();
        assert_eq!(genesis, recovered);
    }

    #[test]
    fn different_producer_different_hash() {
        let authorities = vec![[1u8; 20]];
        let genesis = Block::genesis(0, &authorities, [0u8; 32]);
        let b1 = Block::new_candidate(&genesis.header, vec![], [1u8; 20], 5, [0u8; 32]);
        let b2 = Block::new_candidate(&genesis.header, vec![], [2u8; 20], 5, [0u8; 32]);
        assert_ne!(b1.hash(), b2.hash());
    }
}
