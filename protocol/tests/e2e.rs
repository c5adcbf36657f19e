//! End-to-end integration tests for the podoru engine.
//!
//! These tests exercise the full block lifecycle without any networking:
//! keypair generation, transaction construction/signing/verification,
//! mempool admission, block production against `ChainEngine`, ingestion,
//! and cross-chain sync via `SyncEngine`. Each test gets its own
//! in-memory store, so there's no shared state between them.

use std::sync::Arc;

use podoru_chain::crypto::keys::PodoruKeypair;
use podoru_chain::network::consensus::{validate_producer, AuthoritySet};
use podoru_chain::network::mempool::{Mempool, MempoolConfig};
use podoru_chain::network::producer::{BlockSink, ProducerLoop};
use podoru_chain::network::sync::{SyncConfig, SyncEngine};
use podoru_chain::storage::db::MemoryStore;
use podoru_chain::storage::{Block, ChainEngine};
use podoru_chain::transaction::{sign_transaction, verify_transaction, Operation, Transaction, TransactionBuilder};

struct NullSink;
impl BlockSink for NullSink {
    fn emit(&self, _block: &Block) {}
}

fn signed_set(keypair: &PodoruKeypair, key: &str, value: &[u8], nonce: u64) -> Transaction {
    let mut tx = TransactionBuilder::new(keypair.address())
        .operation(Operation::Set { key: key.to_string(), value: value.to_vec() })
        .nonce(nonce)
        .timestamp(1_700_000_000)
        .build();
    sign_transaction(&mut tx, keypair);
    tx
}

#[test]
fn single_authority_builds_and_ingests_a_block() {
    let producer_kp = PodoruKeypair::generate();
    let authorities = AuthoritySet::new(vec![producer_kp.address()]);
    let chain = ChainEngine::open(Arc::new(MemoryStore::new()), authorities.as_slice().to_vec(), 1_700_000_000).unwrap();

    let sender_kp = PodoruKeypair::generate();
    let tx = signed_set(&sender_kp, "account:alice:balance", b"1000", 0);
    verify_transaction(&tx).unwrap();

    let mut candidate = chain.build_block(producer_kp.address(), vec![tx], 1_700_000_005).unwrap();
    candidate.signature = *producer_kp.sign_hash(&candidate.hash()).as_bytes();

    validate_producer(&authorities, &candidate).unwrap();
    chain.ingest_block(candidate).unwrap();

    assert_eq!(chain.height(), 1);
    assert_eq!(chain.get("account:alice:balance"), Some(b"1000".to_vec()));
    assert_eq!(chain.nonce_of(&sender_kp.address()), 1);
}

#[test]
fn mempool_admission_then_producer_loop_commits_a_block() {
    let producer_kp = PodoruKeypair::generate();
    let authorities = AuthoritySet::new(vec![producer_kp.address()]);
    let chain = Arc::new(ChainEngine::open(Arc::new(MemoryStore::new()), authorities.as_slice().to_vec(), 1_700_000_000).unwrap());
    let mempool = Arc::new(Mempool::new(MempoolConfig::default()));

    let sender_kp = PodoruKeypair::generate();
    let tx = signed_set(&sender_kp, "k", b"v", 0);
    mempool.insert(tx, 0).unwrap();

    let histogram =
        prometheus::Histogram::with_opts(prometheus::HistogramOpts::new("test_block_production_seconds", "test")).unwrap();
    let producer = ProducerLoop::new(
        Arc::clone(&chain),
        Arc::clone(&mempool),
        authorities.clone(),
        producer_kp.clone(),
        5,
        Arc::new(NullSink),
        histogram,
    );

    let block = producer.try_produce().unwrap().expect("producer was eligible for height 1");
    assert_eq!(block.height(), 1);
    assert_eq!(chain.height(), 1);
    assert_eq!(chain.get("k"), Some(b"v".to_vec()));
    assert!(mempool.is_empty());
}

#[test]
fn second_chain_catches_up_via_sync_engine() {
    let producer_kp = PodoruKeypair::generate();
    let authorities = AuthoritySet::new(vec![producer_kp.address()]);

    let source_chain = ChainEngine::open(Arc::new(MemoryStore::new()), authorities.as_slice().to_vec(), 1_700_000_000).unwrap();
    let mut blocks = Vec::new();
    for height in 1..=3u64 {
        let sender_kp = PodoruKeypair::generate();
        let tx = signed_set(&sender_kp, &format!("k{height}"), b"v", 0);
        let mut candidate = source_chain
            .build_block(producer_kp.address(), vec![tx], 1_700_000_000 + height as i64 * 5)
            .unwrap();
        candidate.signature = *producer_kp.sign_hash(&candidate.hash()).as_bytes();
        source_chain.ingest_block(candidate.clone()).unwrap();
        blocks.push(candidate);
    }

    let catching_up = Arc::new(ChainEngine::open(Arc::new(MemoryStore::new()), authorities.as_slice().to_vec(), 1_700_000_000).unwrap());
    assert_eq!(catching_up.genesis_hash(), source_chain.genesis_hash());

    let sync = SyncEngine::new(Arc::clone(&catching_up), SyncConfig::default());
    assert!(sync.needs_sync(3));
    sync.validate_block_chain(&blocks, 1).unwrap();
    let result = sync.apply_blocks(blocks).unwrap();

    assert_eq!(result.blocks_applied, 3);
    assert_eq!(catching_up.height(), 3);
    assert_eq!(catching_up.head_hash(), source_chain.head_hash());
    assert!(!sync.needs_sync(3));
}

#[test]
fn tampered_transaction_fails_verification_before_reaching_the_chain() {
    let kp = PodoruKeypair::generate();
    let mut tx = signed_set(&kp, "k", b"v", 0);
    tx.operations = vec![Operation::Set { key: "k".into(), value: b"tampered".to_vec() }];

    assert!(verify_transaction(&tx).is_err());
}

#[test]
fn wrong_producer_signature_is_rejected_by_validate_producer() {
    let authority_kp = PodoruKeypair::generate();
    let impostor_kp = PodoruKeypair::generate();
    let authorities = AuthoritySet::new(vec![authority_kp.address()]);
    let chain = ChainEngine::open(Arc::new(MemoryStore::new()), authorities.as_slice().to_vec(), 1_700_000_000).unwrap();

    let mut candidate = chain.build_block(authority_kp.address(), vec![], 1_700_000_005).unwrap();
    candidate.header.producer_addr = authority_kp.address();
    candidate.signature = *impostor_kp.sign_hash(&candidate.hash()).as_bytes();

    assert!(validate_producer(&authorities, &candidate).is_err());
}

#[test]
fn nonce_reuse_is_rejected_by_the_mempool() {
    let kp = PodoruKeypair::generate();
    let mempool = Mempool::new(MempoolConfig::default());

    let tx1 = signed_set(&kp, "k", b"v1", 0);
    mempool.insert(tx1, 0).unwrap();

    let tx2 = signed_set(&kp, "k", b"v2", 0);
    assert!(mempool.insert(tx2, 0).is_err());
}
