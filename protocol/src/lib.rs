// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # podoru-chain — Core Engine
//!
//! The engine behind a small permissioned Proof-of-Authority chain: a
//! fixed set of authorities take turns producing blocks over a flat
//! key-value state, gossip them to each other over raw TCP, and a node
//! joining late catches up by asking a peer for the blocks it's missing.
//!
//! There is no mining, no staking, and no BFT voting round — the authority
//! schedule is deterministic from genesis, and a block is final the moment
//! it's ingested.
//!
//! ## Architecture
//!
//! - **crypto** — secp256k1 signing and address derivation, Keccak-256
//!   hashing for ids, Merkle roots, and the state root.
//! - **transaction** — transaction construction, signing, and verification.
//! - **storage** — the block format, the `ChainEngine` state machine, and
//!   the `StorageAdapter` trait over sled (production) or memory (tests).
//! - **network** — the authority schedule, mempool, gossip transport,
//!   block producer loop, sync engine, and the node orchestrator tying
//!   them together.
//! - **config** — protocol-wide constants.
//!
//! ## Design Philosophy
//!
//! 1. Correctness over performance (but we're still fast).
//! 2. No unsafe code in crypto paths.
//! 3. Every public API is documented.
//! 4. If it touches chain state, it has tests.

pub mod config;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod transaction;
