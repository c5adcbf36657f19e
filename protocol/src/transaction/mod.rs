//! # Transaction Module
//!
//! Construction, signing, and verification of podoru transactions. Every
//! state mutation on the chain — a `Set` or `Delete` against the flat
//! key-value store — is carried inside a [`Transaction`].
//!
//! ## Architecture
//!
//! ```text
//! types.rs        — Operation: the Set/Delete primitive
//! builder.rs       — Transaction struct + fluent TransactionBuilder
//! signing.rs       — Transaction signing with secp256k1 keypairs
//! verification.rs  — Structural and cryptographic verification
//! ```
//!
//! ## Transaction Lifecycle
//!
//! 1. **Build** — [`TransactionBuilder`] assembles the transaction fields
//!    and computes `id`.
//! 2. **Sign** — [`sign_transaction`] attaches the sender's signature.
//! 3. **Submit** — the signed transaction enters the mempool via
//!    `ChainEngine::submit_transaction`.
//! 4. **Verify** — [`verify_transaction`] runs before mempool admission
//!    and again implicitly whenever a block containing it is validated.
//! 5. **Apply** — once included in a committed block, its operations are
//!    applied to chain state and it is immutable from then on.

pub mod builder;
pub mod signing;
pub mod types;
pub mod verification;

pub use builder::{Transaction, TransactionBuilder, MAX_TRANSACTION_SIZE};
pub use signing::sign_transaction;
pub use types::Operation;
pub use verification::{verify_transaction, TransactionError};
