//! Key types with secure memory handling.
//!
//! Secret key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use std::fmt;
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use sealdrop_common::{Error, Result};

/// Length of symmetric keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of X25519 public and secret keys in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of the key exchange nonce in bytes.
pub const EXCHANGE_NONCE_LENGTH: usize = 16;

/// Length of the key exchange proof in bytes.
pub const PROOF_LENGTH: usize = 32;

/// An X25519 public key, either a sender's ephemeral key or a recipient's
/// key material. Immutable once constructed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    /// Create a public key from raw bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create a public key from a slice.
    ///
    /// # Errors
    /// - Returns `InvalidKeyMaterial` if the slice is not 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            Error::InvalidKeyMaterial(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Decode a standard base64 public key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidKeyMaterial(format!("public key is not base64: {}", e)))?;
        Self::from_slice(&bytes)
    }

    /// Encode as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

/// An X25519 secret key.
///
/// The inner scalar zeroizes on drop.
#[derive(Clone)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Create a secret key from raw bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Decode a standard base64 secret key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidKeyMaterial(format!("secret key is not base64: {}", e)))?;
        let result = <[u8; PUBLIC_KEY_LENGTH]>::try_from(bytes.as_slice())
            .map(Self::from_bytes)
            .map_err(|_| Error::InvalidKeyMaterial("secret key must be 32 bytes".to_string()));
        bytes.zeroize();
        result
    }

    /// Encode as standard base64 for export.
    ///
    /// # Security
    /// The returned string holds the raw secret; the caller owns its lifetime.
    pub fn to_base64(&self) -> String {
        let mut bytes = self.0.to_bytes();
        let encoded = STANDARD.encode(bytes);
        bytes.zeroize();
        encoded
    }

    /// Compute the matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*x25519_dalek::PublicKey::from(&self.0).as_bytes())
    }

    pub(crate) fn inner(&self) -> &StaticSecret {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// An ephemeral key pair generated per transfer.
///
/// Consumed by the key exchange so the secret half is dropped, and
/// zeroized, as soon as the transfer key has been derived.
#[derive(Debug)]
pub struct KeyPair {
    public: PublicKey,
    secret: SecretKey,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        Self::from_secret(SecretKey(StaticSecret::random_from_rng(OsRng)))
    }

    /// Build a key pair from an existing secret key.
    pub fn from_secret(secret: SecretKey) -> Self {
        Self {
            public: secret.public_key(),
            secret,
        }
    }

    /// Get the public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Get the secret half.
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    /// Split into the public and secret halves.
    pub fn into_parts(self) -> (PublicKey, SecretKey) {
        (self.public, self.secret)
    }
}

/// Symmetric key for one transfer, derived by key agreement.
///
/// Never serialized or logged; zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TransferKey {
    key: [u8; KEY_LENGTH],
}

impl TransferKey {
    /// Create a transfer key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferKey([REDACTED])")
    }
}

/// Random nonce accompanying a key exchange; prefixes every chunk nonce.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyExchangeNonce([u8; EXCHANGE_NONCE_LENGTH]);

impl KeyExchangeNonce {
    /// Generate a random nonce.
    pub fn generate() -> Self {
        let mut nonce = [0u8; EXCHANGE_NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        Self(nonce)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; EXCHANGE_NONCE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; EXCHANGE_NONCE_LENGTH] = bytes.try_into().map_err(|_| {
            Error::InvalidKeyMaterial(format!(
                "key exchange nonce must be {} bytes, got {}",
                EXCHANGE_NONCE_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Get the nonce bytes.
    pub fn as_bytes(&self) -> &[u8; EXCHANGE_NONCE_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for KeyExchangeNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyExchangeNonce({})", STANDARD.encode(self.0))
    }
}

/// Tag proving knowledge of the transfer key without revealing it.
#[derive(Clone, Copy)]
pub struct KeyExchangeProof([u8; PROOF_LENGTH]);

impl KeyExchangeProof {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; PROOF_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; PROOF_LENGTH] = bytes.try_into().map_err(|_| {
            Error::InvalidKeyMaterial(format!(
                "key exchange proof must be {} bytes, got {}",
                PROOF_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Get the proof bytes.
    pub fn as_bytes(&self) -> &[u8; PROOF_LENGTH] {
        &self.0
    }
}

impl PartialEq for KeyExchangeProof {
    /// Constant-time comparison.
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for KeyExchangeProof {}

impl fmt::Debug for KeyExchangeProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyExchangeProof({})", STANDARD.encode(self.0))
    }
}
