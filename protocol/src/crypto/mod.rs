//! # Cryptographic Primitives for podoru
//!
//! This module is the foundation of everything security-related in the
//! engine. Every signature, every hash, every address flows through here.
//!
//! We deliberately chose boring, well-audited cryptography:
//!
//! - **secp256k1** for signatures — recoverable ECDSA, so a verifier can
//!   recover the signer's address from a signature without a separate
//!   public-key field.
//! - **Keccak-256** for hashing — addresses, transaction ids, block hashes,
//!   and Merkle roots all derive from it.
//!
//! ## A note on "rolling your own crypto"
//!
//! We don't. Everything here is a thin, type-safe wrapper around audited
//! implementations (`secp256k1`, `sha3`). If you're tempted to optimize
//! these functions, please reconsider. Then reconsider again.

pub mod hash;
pub mod keys;
pub mod signatures;

// Re-export the things people actually need so they don't have to memorize
// our module hierarchy.
pub use hash::{keccak256, merkle_root, state_root};
pub use keys::{Address, PodoruKeypair, PublicKey, Signature};
pub use signatures::{recover_address, sign_hash, verify_signature};
