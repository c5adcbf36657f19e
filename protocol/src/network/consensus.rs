//! # Proof-of-Authority Consensus
//!
//! A fixed authority list `A = [a_0 .. a_{n-1}]`, set at genesis and never
//! renegotiated. The producer for height `h` is `A[h mod n]` — a total,
//! deterministic function of height and the authority list alone. No
//! communication, no stake, no voting round.
//!
//! ## Liveness
//!
//! A producer is late once wall-clock time exceeds `head.timestamp + Δ`.
//! If the scheduled producer stays offline past `head.timestamp + 2Δ`, the
//! next authority in round-robin order is permitted to take the slot —
//! height still only advances by one regardless of how many authorities
//! were skipped. [`AuthoritySet::eligible_producer`] implements this by
//! scanning `k = 1, 2, ...` for the smallest `k` such that
//! `now >= head_timestamp + (k + 1) * delta_secs` and `schedule(height + k)
//! == self`, falling back to the strict on-time check for `k = 0`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::keys::Address;
use crate::crypto::signatures::{recover_address, SignatureError};
use crate::storage::Block;

/// Target time between blocks, in seconds.
pub const DEFAULT_BLOCK_TIME_SECS: i64 = 5;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Target time between blocks, in seconds (Δ).
    pub block_time_secs: i64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self { block_time_secs: DEFAULT_BLOCK_TIME_SECS }
    }
}

// ---------------------------------------------------------------------------
// Authority Set
// ---------------------------------------------------------------------------

/// The fixed, genesis-defined list of authorities permitted to produce
/// blocks. Order is load-bearing: it defines the round-robin schedule.
#[derive(Debug, Clone)]
pub struct AuthoritySet {
    authorities: Vec<Address>,
}

impl AuthoritySet {
    pub fn new(authorities: Vec<Address>) -> Self {
        Self { authorities }
    }

    pub fn len(&self) -> usize {
        self.authorities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorities.is_empty()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.authorities
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.authorities.contains(address)
    }

    /// The strict round-robin schedule: `A[h mod n]`.
    pub fn schedule(&self, height: u64) -> Option<Address> {
        if self.authorities.is_empty() {
            return None;
        }
        let index = (height as usize) % self.authorities.len();
        Some(self.authorities[index])
    }

    /// Returns `Some(k)` with the smallest `k >= 0` such that `self_address`
    /// is eligible to produce `head_height + k + 1` at `now`:
    ///
    /// - `k = 0` (on schedule, on time): `schedule(head_height + 1) ==
    ///   self_address` and `now >= head_timestamp + delta_secs`.
    /// - `k >= 1` (liveness skip): `schedule(head_height + 1 + k) ==
    ///   self_address` and `now >= head_timestamp + (k + 1) * delta_secs`.
    ///
    /// Returns `None` if `self_address` is not eligible for any slot yet.
    pub fn eligible_producer(
        &self,
        self_address: &Address,
        head_height: u64,
        head_timestamp: i64,
        now: i64,
        delta_secs: i64,
    ) -> Option<u64> {
        if self.authorities.is_empty() {
            return None;
        }
        let max_skip = self.authorities.len() as u64;
        for k in 0..max_skip {
            let candidate_height = head_height + 1 + k;
            if self.schedule(candidate_height) != Some(*self_address) {
                continue;
            }
            let threshold = head_timestamp + (k as i64 + 1) * delta_secs;
            if now >= threshold {
                return Some(k);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("block producer {got:?} does not match scheduled producer {expected:?} for height {height}")]
    WrongProducer { height: u64, expected: Option<Address>, got: Address },

    #[error("block signature does not recover to its claimed producer: {0}")]
    InvalidSignature(#[from] SignatureError),
}

/// Checks `recover(signature, block_hash) == header.producer_addr` and
/// `header.producer_addr == schedule(header.height)`. Both checks are
/// skipped for the genesis block, which carries an all-zero signature by
/// convention.
pub fn validate_producer(authorities: &AuthoritySet, block: &Block) -> Result<(), ConsensusError> {
    if block.is_genesis() {
        return Ok(());
    }

    let expected = authorities.schedule(block.header.height);
    if expected != Some(block.header.producer_addr) {
        return Err(ConsensusError::WrongProducer {
            height: block.header.height,
            expected,
            got: block.header.producer_addr,
        });
    }

    let signature = crate::crypto::keys::Signature::from_bytes(block.signature);
    let recovered = recover_address(&signature, &block.hash())?;
    if recovered != block.header.producer_addr {
        return Err(ConsensusError::WrongProducer {
            height: block.header.height,
            expected: Some(block.header.producer_addr),
            got: recovered,
        });
    }

    Ok(())
}
