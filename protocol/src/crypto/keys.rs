//! # Key Management
//!
//! secp256k1 keypair generation and address derivation for podoru
//! authorities and clients.
//!
//! Every signer in the network has exactly one secp256k1 keypair. An
//! [`Address`] is derived from the public key, never chosen freely — this
//! is what ties a signature back to a scheduled authority or a mempool
//! sender.
//!
//! ## Why secp256k1?
//!
//! - Recoverable signatures: a 65-byte signature lets a verifier recover
//!   the signer's public key (and hence address) without carrying a
//!   separate public-key field alongside every transaction.
//! - It's the curve the wire format and consensus schedule already assume
//!   (signature over `id` by the private key of `from`).
//!
//! ## Security considerations
//!
//! - Private keys are held in `secp256k1::SecretKey`, never logged.
//! - We use OS-level RNG (`OsRng`) for key generation.
//! - Key bytes are never printed in `Debug` output.

use rand::rngs::OsRng;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey as SecpPublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::hash::keccak256;

/// A 20-byte chain address: the trailing 20 bytes of `keccak256` of the
/// uncompressed public key.
pub type Address = [u8; 20];

/// Render an [`Address`] as a `0x`-prefixed lowercase hex string.
pub fn address_to_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

/// Parse a `0x`-prefixed (or bare) hex string into an [`Address`].
pub fn address_from_hex(s: &str) -> Result<Address, KeyError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).map_err(|_| KeyError::InvalidAddress)?;
    if bytes.len() != 20 {
        return Err(KeyError::InvalidAddress);
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("invalid address: wrong length or malformed hex")]
    InvalidAddress,

    #[error("invalid signature bytes: expected 65 bytes (r || s || v)")]
    InvalidSignature,
}

/// A podoru identity keypair wrapping a secp256k1 signing key.
///
/// This is the atomic unit of identity for authorities and clients alike.
/// Every address and every signature traces back to one of these.
pub struct PodoruKeypair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

/// The public half of a podoru identity.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: SecpPublicKey,
}

/// A 65-byte recoverable secp256k1 ECDSA signature (`r || s || v`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    bytes: [u8; 65],
}

impl PodoruKeypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, secp_public) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key: PublicKey { inner: secp_public },
        }
    }

    /// Constructs a keypair deterministically from 32 bytes of secret key
    /// material.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        let secp_public = SecpPublicKey::from_secret_key(secp256k1::SECP256K1, &secret_key);
        Ok(Self {
            secret_key,
            public_key: PublicKey { inner: secp_public },
        })
    }

    /// Reconstruct a keypair from a hex-encoded secret key. Convenience
    /// for loading the `private_key` config field.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        if bytes.len() != 32 {
            return Err(KeyError::InvalidSecretKey);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_bytes(&arr)
    }

    /// The public key associated with this keypair.
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// The 20-byte address derived from this keypair's public key.
    pub fn address(&self) -> Address {
        self.public_key.address()
    }

    /// Sign a 32-byte digest, producing a 65-byte recoverable signature.
    ///
    /// Callers pass the digest directly (e.g. a transaction or block hash)
    /// — this type never hashes on the caller's behalf, so the caller's
    /// hashing choice (always Keccak-256 in this chain) stays explicit.
    pub fn sign_hash(&self, digest: &[u8; 32]) -> Signature {
        let message = Message::from_digest(*digest);
        let recoverable = secp256k1::SECP256K1.sign_ecdsa_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = recoverable.serialize_compact();
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&compact);
        bytes[64] = recovery_id.to_i32() as u8;
        Signature { bytes }
    }

    /// Export the raw 32-byte secret key material.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.secret_key.secret_bytes()
    }

    /// Export the raw secret key as a hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.secret_key_bytes())
    }
}

impl Clone for PodoruKeypair {
    fn clone(&self) -> Self {
        Self {
            secret_key: self.secret_key,
            public_key: self.public_key,
        }
    }
}

impl fmt::Debug for PodoruKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret key material, not even partially.
        write!(f, "PodoruKeypair(address={})", address_to_hex(&self.address()))
    }
}

impl PartialEq for PodoruKeypair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for PodoruKeypair {}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

impl PublicKey {
    /// Parse an uncompressed (65-byte) or compressed (33-byte) secp256k1
    /// public key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let inner = SecpPublicKey::from_slice(bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    /// The uncompressed SEC1 encoding (65 bytes, leading `0x04` tag byte).
    pub fn to_uncompressed_bytes(&self) -> [u8; 65] {
        self.inner.serialize_uncompressed()
    }

    /// Derive the 20-byte address: the trailing 20 bytes of
    /// `keccak256(uncompressed_pubkey_without_tag_byte)`.
    pub fn address(&self) -> Address {
        let uncompressed = self.to_uncompressed_bytes();
        // Skip the leading 0x04 tag byte, matching the Ethereum convention
        // this chain's addressing is deliberately shaped after.
        let hash = keccak256(&uncompressed[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        address
    }

    /// Hex-encoded uncompressed representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_uncompressed_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(address={})", address_to_hex(&self.address()))
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

impl Signature {
    /// Construct a signature from its raw 65-byte representation.
    pub fn from_bytes(bytes: [u8; 65]) -> Self {
        Self { bytes }
    }

    /// Parse a signature from a byte slice, validating the length.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        if slice.len() != 65 {
            return Err(KeyError::InvalidSignature);
        }
        let mut bytes = [0u8; 65];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    /// The raw 65-byte (`r || s || v`) representation.
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.bytes
    }

    /// Convert to the `secp256k1` recoverable-signature type for internal
    /// use (recovery / verification).
    pub fn to_recoverable(&self) -> Result<RecoverableSignature, KeyError> {
        let recovery_id = RecoveryId::from_i32(self.bytes[64] as i32)
            .map_err(|_| KeyError::InvalidSignature)?;
        RecoverableSignature::from_compact(&self.bytes[..64], recovery_id)
            .map_err(|_| KeyError::InvalidSignature)
    }

    /// All-zero signature, used for the genesis block (signature check is
    /// skipped for height 0).
    pub fn zero() -> Self {
        Self { bytes: [0u8; 65] }
    }

    /// True if this is the all-zero sentinel signature.
    pub fn is_zero(&self) -> bool {
        self.bytes == [0u8; 65]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        write!(f, "Signature({}...{})", &hex_str[..8], &hex_str[hex_str.len() - 8..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_valid_keypair() {
        let kp = PodoruKeypair::generate();
        assert_eq!(kp.address().len(), 20);
    }

    #[test]
    fn two_generated_keypairs_are_different() {
        let kp1 = PodoruKeypair::generate();
        let kp2 = PodoruKeypair::generate();
        assert_ne!(kp1.address(), kp2.address());
    }

    #[test]
    fn roundtrip_bytes() {
        let kp = PodoruKeypair::generate();
        let bytes = kp.secret_key_bytes();
        let restored = PodoruKeypair::from_bytes(&bytes).unwrap();
        assert_eq!(kp.address(), restored.address());
    }

    #[test]
    fn roundtrip_hex() {
        let kp = PodoruKeypair::generate();
        let hex_str = kp.to_hex();
        let restored = PodoruKeypair::from_hex(&hex_str).unwrap();
        assert_eq!(kp.address(), restored.address());
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(PodoruKeypair::from_hex("deadbeef").is_err());
        assert!(PodoruKeypair::from_hex("not-hex-at-all").is_err());
    }

    #[test]
    fn deterministic_from_seed() {
        let seed = [7u8; 32];
        let kp1 = PodoruKeypair::from_bytes(&seed).unwrap();
        let kp2 = PodoruKeypair::from_bytes(&seed).unwrap();
        assert_eq!(kp1.address(), kp2.address());
    }

    #[test]
    fn address_hex_roundtrip() {
        let kp = PodoruKeypair::generate();
        let hex_str = address_to_hex(&kp.address());
        assert!(hex_str.starts_with("0x"));
        let recovered = address_from_hex(&hex_str).unwrap();
        assert_eq!(kp.address(), recovered);
    }

    #[test]
    fn address_from_hex_rejects_wrong_length() {
        assert!(address_from_hex("0xdead").is_err());
    }

    #[test]
    fn sign_and_recover_yields_address() {
        let kp = PodoruKeypair::generate();
        let digest = keccak256(b"some transaction payload");
        let sig = kp.sign_hash(&digest);
        let recovered_address =
            super::super::signatures::recover_address(&sig, &digest).unwrap();
        assert_eq!(recovered_address, kp.address());
    }

    #[test]
    fn signature_roundtrip_bytes() {
        let kp = PodoruKeypair::generate();
        let digest = keccak256(b"payload");
        let sig = kp.sign_hash(&digest);
        let restored = Signature::try_from_slice(sig.as_bytes()).unwrap();
        assert_eq!(sig, restored);
    }

    #[test]
    fn signature_wrong_length_rejected() {
        assert!(Signature::try_from_slice(&[0u8; 64]).is_err());
    }

    #[test]
    fn zero_signature_is_zero() {
        let sig = Signature::zero();
        assert!(sig.is_zero());
        let kp = PodoruKeypair::generate();
        let real = kp.sign_hash(&keccak256(b"x"));
        assert!(!real.is_zero());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = PodoruKeypair::generate();
        let debug_str = format!("{:?}", kp);
        assert!(debug_str.starts_with("PodoruKeypair(address="));
        assert!(!debug_str.contains(&kp.to_hex()));
    }

    #[test]
    fn public_key_bytes_roundtrip() {
        let kp = PodoruKeypair::generate();
        let pk = kp.public_key();
        let bytes = pk.to_uncompressed_bytes();
        let recovered = PublicKey::from_bytes(&bytes).unwrap();
        assert_eq!(pk, recovered);
        assert_eq!(pk.address(), recovered.address());
    }
}
