//! Transaction signing with secp256k1 keypairs.
//!
//! Signing is a separate step from building because the keypair may not
//! be available at construction time (e.g., a remote signer). The signed
//! data is the canonical [`Transaction::signable_bytes`] output via its
//! Keccak-256 digest (`tx.id`).

use super::builder::Transaction;
use crate::crypto::keys::PodoruKeypair;

/// Signs a transaction in place using the provided keypair.
///
/// Overwrites `tx.signature` with a 65-byte secp256k1 recoverable ECDSA
/// signature over `tx.id`. Does not touch `tx.id` itself — the id is
/// derived from the signable bytes, which never include the signature.
///
/// The caller is responsible for ensuring `keypair.address() == tx.from`;
/// this function does not check it; [`super::verification::verify_transaction`]
/// is what enforces that invariant on the receiving end.
pub fn sign_transaction<'a>(tx: &'a mut Transaction, keypair: &PodoruKeypair) -> &'a Transaction {
    let signature = keypair.sign_hash(&tx.id);
    tx.signature = *signature.as_bytes();
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::types::Operation;

    fn unsigned_tx(from: [u8; 20]) -> Transaction {
        TransactionBuilder::new(from)
            .operation(Operation::Set { key: "a".to_string(), value: b"1".to_vec() })
            .nonce(1)
            .timestamp(1_700_000_000)
            .build()
    }

    #[test]
    fn sign_sets_signature_field() {
        let kp = PodoruKeypair::generate();
        let mut tx = unsigned_tx(kp.address());
        assert!(!tx.is_signed());
        sign_transaction(&mut tx, &kp);
        assert!(tx.is_signed());
    }

    #[test]
    fn signature_is_65_bytes() {
        let kp = PodoruKeypair::generate();
        let mut tx = unsigned_tx(kp.address());
        sign_transaction(&mut tx, &kp);
        assert_eq!(tx.signature.len(), 65);
    }

    #[test]
    fn signing_does_not_change_id() {
        let kp = PodoruKeypair::generate();
        let mut tx = unsigned_tx(kp.address());
        let id_before = tx.id;
        sign_transaction(&mut tx, &kp);
        assert_eq!(tx.id, id_before, "signing must not change the transaction id");
    }

    #[test]
    fn signing_is_deterministic() {
        let kp = PodoruKeypair::generate();
        let mut tx1 = unsigned_tx(kp.address());
        let mut tx2 = unsigned_tx(kp.address());

        sign_transaction(&mut tx1, &kp);
        sign_transaction(&mut tx2, &kp);

        assert_eq!(
            tx1.signature, tx2.signature,
            "RFC6979 nonce derivation makes signing deterministic for the same key and message"
        );
    }

    #[test]
    fn different_keypairs_produce_different_signatures() {
        let kp1 = PodoruKeypair::generate();
        let kp2 = PodoruKeypair::generate();

        let mut tx1 = unsigned_tx(kp1.address());
        let mut tx2 = unsigned_tx(kp2.address());

        sign_transaction(&mut tx1, &kp1);
        sign_transaction(&mut tx2, &kp2);

        assert_ne!(tx1.signature, tx2.signature);
    }

    #[test]
    fn re_signing_overwrites_previous_signature() {
        let kp1 = PodoruKeypair::generate();
        let kp2 = PodoruKeypair::generate();

        let mut tx = unsigned_tx(kp1.address());

        sign_transaction(&mut tx, &kp1);
        let sig1 = tx.signature;

        sign_transaction(&mut tx, &kp2);
        let sig2 = tx.signature;

        assert_ne!(sig1, sig2, "re-signing with a different key must change the signature");
    }
}
