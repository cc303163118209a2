//! Authenticated encryption of single chunks using XChaCha20-Poly1305.
//!
//! Nonces are never random here: every chunk nonce is the key exchange
//! nonce followed by the chunk counter, see [`chunk_nonce`].

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    XChaCha20Poly1305,
};

use crate::keys::{KeyExchangeNonce, TransferKey, EXCHANGE_NONCE_LENGTH};
use sealdrop_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Build the effective nonce of chunk `counter`: nonce prefix || u64 BE counter.
pub fn chunk_nonce(prefix: &KeyExchangeNonce, counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..EXCHANGE_NONCE_LENGTH].copy_from_slice(prefix.as_bytes());
    nonce[EXCHANGE_NONCE_LENGTH..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Encrypt one chunk with an explicit nonce and associated data.
///
/// # Preconditions
/// - `nonce` must never have been used with `key` before
///
/// # Postconditions
/// - Returns ciphertext || tag, `plaintext.len() + TAG_SIZE` bytes
pub fn seal(
    key: &TransferKey,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .encrypt(
            GenericArray::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

/// Decrypt and authenticate one chunk.
///
/// # Errors
/// - `Corrupted` if the chunk is shorter than a tag or fails authentication
pub fn open(
    key: &TransferKey,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Corrupted("Chunk shorter than authentication tag".to_string()));
    }

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(
            GenericArray::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Error::Corrupted("Chunk failed authentication".to_string()))
}
