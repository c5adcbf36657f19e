//! # Digital Signatures
//!
//! secp256k1 recoverable-ECDSA signing, verification, and address recovery —
//! the backbone of authentication in podoru.
//!
//! Every transaction and every block header is authenticated by a signature
//! over its Keccak-256 id/hash. This module provides the signing,
//! verification, and recovery functions that make that possible.
//!
//! ## Why wrap `secp256k1` instead of calling it directly?
//!
//! 1. A single place to audit all signing operations.
//! 2. Consistent error types across the codebase.
//! 3. Type safety — you can't accidentally pass a message where a digest
//!    goes; everything here operates on pre-hashed 32-byte digests.

use thiserror::Error;

use super::keys::{Address, KeyError, PodoruKeypair, PublicKey, Signature};

/// Errors during signature operations.
///
/// Intentionally vague — we don't tell callers why verification failed.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("malformed signature or key bytes")]
    Malformed(#[from] KeyError),
}

/// Sign a 32-byte digest using a podoru keypair.
///
/// The digest is typically a transaction id or a block header hash — this
/// function never hashes on the caller's behalf.
pub fn sign_hash(keypair: &PodoruKeypair, digest: &[u8; 32]) -> Signature {
    keypair.sign_hash(digest)
}

/// Recover the signer's address from a recoverable signature and the digest
/// it was computed over.
///
/// This is the core primitive that lets the chain authenticate a
/// transaction's `from` field without shipping a separate public key: the
/// signature alone proves which address produced it.
pub fn recover_address(signature: &Signature, digest: &[u8; 32]) -> Result<Address, SignatureError> {
    let recoverable = signature.to_recoverable()?;
    let message = secp256k1::Message::from_digest(*digest);
    let secp_public = secp256k1::SECP256K1
        .recover_ecdsa(&message, &recoverable)
        .map_err(|_| SignatureError::VerificationFailed)?;
    let public_key = PublicKey::from_bytes(&secp_public.serialize_uncompressed())
        .map_err(SignatureError::Malformed)?;
    Ok(public_key.address())
}

/// Verify that `signature` over `digest` was produced by `expected_address`.
///
/// Recovers the address from the signature and checks it matches. Returns
/// `Ok(())` on success; any mismatch or malformed input is folded into
/// [`SignatureError::VerificationFailed`] so callers get one failure mode.
pub fn verify_signature(
    signature: &Signature,
    digest: &[u8; 32],
    expected_address: &Address,
) -> Result<(), SignatureError> {
    let recovered = recover_address(signature, digest)?;
    if &recovered != expected_address {
        return Err(SignatureError::VerificationFailed);
    }
    Ok(())
}
