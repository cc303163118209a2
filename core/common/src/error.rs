//! Common error types for Sealdrop.
//!
//! Only fatal outcomes live here. Expected domain failures (recipient not
//! found, validation rejected) travel as `Either::Left` / `Maybe::None`.

use thiserror::Error;

/// Top-level error type for Sealdrop operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Public key was malformed or produced a non-contributory shared secret.
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// The key exchange proof did not match the locally derived key.
    #[error("Key exchange proof mismatch")]
    ProofMismatch,

    /// A ciphertext chunk failed authentication or the stream was truncated.
    #[error("Ciphertext corrupted: {0}")]
    Corrupted(String),

    /// The server could not be reached or the connection dropped.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a body that does not match the client schema.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An authenticated operation was attempted with no stored token.
    #[error("Not authenticated: no session token is stored")]
    NotAuthenticated,

    /// The server rejected the stored token; local tokens have been cleared.
    #[error("Session expired: the server rejected the session token")]
    SessionExpired,

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether this error belongs to the cryptographic integrity class.
    ///
    /// Integrity failures are never recoverable for the current transfer.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Error::Crypto(_)
                | Error::InvalidKeyMaterial(_)
                | Error::ProofMismatch
                | Error::Corrupted(_)
        )
    }

    /// Whether this error is a local contract violation raised before any
    /// network call.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::NotAuthenticated | Error::InvalidInput(_))
    }

    /// Whether this error is a transport fault.
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Protocol(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
