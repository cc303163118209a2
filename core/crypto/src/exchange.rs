//! Transfer key agreement and key exchange proofs.
//!
//! ```text
//! sender                                   recipient
//! ──────                                   ─────────
//! eph = KeyPair::generate()
//! dh  = X25519(eph.secret, recipient_pk)   dh = X25519(recipient_sk, eph.public)
//! key = Blake2b-256(dh || eph.public || recipient_pk || KEY_LABEL)
//! proof = Blake2bMac-256(key, PROOF_LABEL)
//! ```
//!
//! The sender publishes `eph.public`, a random nonce and the proof. The
//! recipient recomputes the proof and compares before decrypting anything.

use blake2::digest::{consts::U32, Mac};
use blake2::{Blake2b, Blake2bMac, Digest};
use zeroize::Zeroizing;

use crate::keys::{
    KeyExchangeNonce, KeyExchangeProof, KeyPair, PublicKey, SecretKey, TransferKey, KEY_LENGTH,
    PROOF_LENGTH,
};
use sealdrop_common::{Error, Result};

/// Domain separation label for the transfer key.
const KEY_LABEL: &[u8] = b"sealdrop/transfer-key/v1";

/// Context label authenticated by the key exchange proof.
const PROOF_LABEL: &[u8] = b"sealdrop/key-exchange-proof/v1";

/// Everything the sender side of a key exchange produces.
///
/// The ephemeral secret is already gone by the time this exists.
#[derive(Debug)]
pub struct SenderKeyExchange {
    /// Sender's ephemeral public key, sent with the upload.
    pub sender_public: PublicKey,
    /// Fresh nonce seeding the chunk counter.
    pub nonce: KeyExchangeNonce,
    /// Proof of the derived key.
    pub proof: KeyExchangeProof,
    /// The derived transfer key.
    pub key: TransferKey,
}

/// Run the sender side of the key exchange.
///
/// # Preconditions
/// - `recipient` is the registered or server-issued recipient key
///
/// # Postconditions
/// - The ephemeral secret is dropped (and zeroized) before returning
/// - The nonce is freshly generated
///
/// # Errors
/// - `InvalidKeyMaterial` if the recipient key is low-order
pub fn derive_sender_key(sender: KeyPair, recipient: &PublicKey) -> Result<SenderKeyExchange> {
    let (sender_public, sender_secret) = sender.into_parts();
    let dh = agree(&sender_secret, recipient)?;
    drop(sender_secret);

    let key = derive_transfer_key(&dh, &sender_public, recipient);
    let proof = compute_proof(&key)?;

    Ok(SenderKeyExchange {
        sender_public,
        nonce: KeyExchangeNonce::generate(),
        proof,
        key,
    })
}

/// Run the recipient side of the key exchange.
///
/// # Errors
/// - `InvalidKeyMaterial` if the sender key is low-order
pub fn derive_recipient_key(
    recipient: &SecretKey,
    sender_public: &PublicKey,
) -> Result<TransferKey> {
    let dh = agree(recipient, sender_public)?;
    Ok(derive_transfer_key(&dh, sender_public, &recipient.public_key()))
}

/// Compute the key exchange proof for a transfer key.
pub fn compute_proof(key: &TransferKey) -> Result<KeyExchangeProof> {
    let mut mac = <Blake2bMac<U32> as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Crypto(format!("Proof MAC setup failed: {}", e)))?;
    Mac::update(&mut mac, PROOF_LABEL);
    let tag = mac.finalize().into_bytes();

    let mut proof = [0u8; PROOF_LENGTH];
    proof.copy_from_slice(&tag);
    Ok(KeyExchangeProof::from_bytes(proof))
}

/// Check a received proof against a locally derived key, in constant time.
///
/// # Errors
/// - `ProofMismatch` if the proofs differ
pub fn verify_proof(key: &TransferKey, received: &KeyExchangeProof) -> Result<()> {
    if compute_proof(key)? == *received {
        Ok(())
    } else {
        Err(Error::ProofMismatch)
    }
}

/// X25519 agreement that refuses non-contributory results.
fn agree(secret: &SecretKey, peer: &PublicKey) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    let peer = x25519_dalek::PublicKey::from(*peer.as_bytes());
    let shared = secret.inner().diffie_hellman(&peer);
    if !shared.was_contributory() {
        return Err(Error::InvalidKeyMaterial(
            "public key is low-order; shared secret would be trivial".to_string(),
        ));
    }
    Ok(Zeroizing::new(*shared.as_bytes()))
}

fn derive_transfer_key(
    dh: &[u8; KEY_LENGTH],
    sender: &PublicKey,
    recipient: &PublicKey,
) -> TransferKey {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(dh);
    hasher.update(sender.as_bytes());
    hasher.update(recipient.as_bytes());
    hasher.update(KEY_LABEL);

    let result = hasher.finalize();
    let mut derived = [0u8; KEY_LENGTH];
    derived.copy_from_slice(&result);
    TransferKey::from_bytes(derived)
}
