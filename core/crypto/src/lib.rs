//! Cryptographic primitives for Sealdrop transfers.
//!
//! This module provides:
//! - Ephemeral X25519 key pairs and transfer key agreement
//! - Key exchange proofs that let the recipient confirm the derived key
//! - Chunked, individually authenticated XChaCha20-Poly1305 streams
//! - Argon2id hardening of login passwords
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod exchange;
pub mod kdf;
pub mod keys;
pub mod stream;

pub use exchange::{derive_recipient_key, derive_sender_key, verify_proof, SenderKeyExchange};
pub use kdf::{derive_login_key, KdfParams, LoginKey};
pub use keys::{KeyExchangeNonce, KeyExchangeProof, KeyPair, PublicKey, SecretKey, TransferKey};
pub use stream::{DecryptionStream, EncryptionStream, CHUNK_SIZE};
