//! Wire contracts shared with the server.
//!
//! Every field is camelCase on the wire, in both directions.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tokens::TokenType;
use crate::transport::ByteStream;
use sealdrop_common::{EmailAddress, Error, Result, TransferId, Username};
use sealdrop_crypto::{KeyExchangeNonce, KeyExchangeProof, PublicKey};

/// Error codes the client knows how to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KnownErrorCode {
    UnknownError,
    RecipientNotFound,
    UserNotFound,
    UsernameTaken,
    EmailAddressTaken,
    InvalidUsername,
    InvalidPassword,
    InvalidEmailAddress,
    InvalidCredentials,
    InvalidLifetime,
    InvalidRequest,
    TransferNotFound,
    KeyPairAlreadyExists,
    Unauthorized,
}

/// `errorCode` as sent by the server: a known name, a bare number, or a
/// name this client version does not know yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Known(KnownErrorCode),
    Numeric(i64),
    Other(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Known(code) => write!(f, "{:?}", code),
            ErrorCode::Numeric(code) => write!(f, "{}", code),
            ErrorCode::Other(code) => write!(f, "{}", code),
        }
    }
}

/// Structured failure returned with any non-success status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    /// Any additional fields the server included.
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ErrorResponse {
    /// Response carrying only a known code.
    pub fn new(code: KnownErrorCode) -> Self {
        Self {
            error_code: ErrorCode::Known(code),
            details: serde_json::Map::new(),
        }
    }

    /// Stand-in for a failure that came without a body.
    pub fn from_status(status: u16) -> Self {
        Self {
            error_code: ErrorCode::Numeric(i64::from(status)),
            details: serde_json::Map::new(),
        }
    }

    /// Whether the code matches `code`.
    pub fn is(&self, code: KnownErrorCode) -> bool {
        self.error_code == ErrorCode::Known(code)
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server error {}", self.error_code)
    }
}

/// Binary fields travel as standard base64 strings.
mod base64_field {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub trait Encoded: Sized {
        fn encode(&self) -> String;
        fn decode(encoded: &str) -> sealdrop_common::Result<Self>;
    }

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Encoded,
        S: Serializer,
    {
        serializer.serialize_str(&value.encode())
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: Encoded,
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        T::decode(&encoded).map_err(de::Error::custom)
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidKeyMaterial(format!("Invalid base64: {}", e)))
}

impl base64_field::Encoded for PublicKey {
    fn encode(&self) -> String {
        self.to_base64()
    }

    fn decode(encoded: &str) -> Result<Self> {
        PublicKey::from_base64(encoded)
    }
}

impl base64_field::Encoded for KeyExchangeNonce {
    fn encode(&self) -> String {
        STANDARD.encode(self.as_bytes())
    }

    fn decode(encoded: &str) -> Result<Self> {
        KeyExchangeNonce::from_slice(&decode_base64(encoded)?)
    }
}

impl base64_field::Encoded for KeyExchangeProof {
    fn encode(&self) -> String {
        STANDARD.encode(self.as_bytes())
    }

    fn decode(encoded: &str) -> Result<Self> {
        KeyExchangeProof::from_slice(&decode_base64(encoded)?)
    }
}

/// Metadata envelope sent ahead of the ciphertext of an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub file_name: String,
    pub content_type: String,
    /// Sender's ephemeral public key.
    #[serde(rename = "publicKey", with = "base64_field")]
    pub sender_public_key: PublicKey,
    #[serde(with = "base64_field")]
    pub key_exchange_nonce: KeyExchangeNonce,
    #[serde(rename = "proof", with = "base64_field")]
    pub key_exchange_proof: KeyExchangeProof,
    /// Opaque to the client; bounds are enforced server-side.
    pub lifetime_hours: u32,
}

/// Everything a recipient needs before fetching the ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPreview {
    pub id: TransferId,
    pub file_name: String,
    pub content_type: String,
    #[serde(default)]
    pub sender: Option<Username>,
    #[serde(default)]
    pub recipient: Option<Username>,
    #[serde(rename = "publicKey", with = "base64_field")]
    pub sender_public_key: PublicKey,
    #[serde(with = "base64_field")]
    pub key_exchange_nonce: KeyExchangeNonce,
    #[serde(rename = "proof", with = "base64_field")]
    pub key_exchange_proof: KeyExchangeProof,
    /// Exact size of the ciphertext body.
    pub ciphertext_length: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One entry of the authenticated inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub id: TransferId,
    pub file_name: String,
    #[serde(default)]
    pub sender: Option<Username>,
    pub ciphertext_length: u64,
    pub expires_at: DateTime<Utc>,
}

/// A user's registered key, or the server's anonymous key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    #[serde(with = "base64_field")]
    pub public_key: PublicKey,
}

/// Account registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub username: Username,
    /// Hardened password, base64.
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<EmailAddress>,
}

/// Login with a hardened password.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: Username,
    /// Hardened password, base64.
    pub password: String,
    pub refresh_token_type: TokenType,
}

/// Tokens issued by login and refresh.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub authentication_token: String,
    pub refresh_token: String,
    pub refresh_token_type: TokenType,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("authentication_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("refresh_token_type", &self.refresh_token_type)
            .finish()
    }
}

/// Exchange a refresh token for a new session.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub refresh_token_type: TokenType,
}

/// Register the user's long-term public key.
///
/// The private half is wrapped client-side; the server stores it opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertKeyPairRequest {
    #[serde(with = "base64_field")]
    pub public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Ask the server to mail an account recovery link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRecoveryEmailRequest {
    pub email_address: EmailAddress,
}

/// Why a recovery email was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRecoveryEmailError {
    UnknownError,
    InvalidEmailAddress,
}

impl From<ErrorResponse> for SendRecoveryEmailError {
    fn from(error: ErrorResponse) -> Self {
        if error.is(KnownErrorCode::InvalidEmailAddress) {
            SendRecoveryEmailError::InvalidEmailAddress
        } else {
            SendRecoveryEmailError::UnknownError
        }
    }
}

impl fmt::Display for SendRecoveryEmailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendRecoveryEmailError::UnknownError => write!(f, "unknownError"),
            SendRecoveryEmailError::InvalidEmailAddress => write!(f, "invalidEmailAddress"),
        }
    }
}

/// A successful streaming response: a live body plus its exact length.
pub struct StreamDownloadResponse {
    pub content_length: u64,
    pub stream: ByteStream,
}

impl fmt::Debug for StreamDownloadResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDownloadResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdrop_crypto::KeyPair;
    use serde_json::json;

    #[test]
    fn test_error_response_known_code() {
        let parsed: ErrorResponse =
            serde_json::from_value(json!({"errorCode": "recipientNotFound"})).unwrap();
        assert!(parsed.is(KnownErrorCode::RecipientNotFound));
        assert!(parsed.details.is_empty());
    }

    #[test]
    fn test_error_response_numeric_and_unknown_codes() {
        let numeric: ErrorResponse =
            serde_json::from_value(json!({"errorCode": 3, "message": "nope"})).unwrap();
        assert_eq!(numeric.error_code, ErrorCode::Numeric(3));
        assert_eq!(numeric.details["message"], "nope");

        let unknown: ErrorResponse =
            serde_json::from_value(json!({"errorCode": "quotaExceeded"})).unwrap();
        assert_eq!(unknown.error_code, ErrorCode::Other("quotaExceeded".to_string()));
    }

    #[test]
    fn test_error_response_requires_code() {
        assert!(serde_json::from_value::<ErrorResponse>(json!({"message": "x"})).is_err());
    }

    #[test]
    fn test_transfer_request_wire_shape() {
        let request = TransferRequest {
            file_name: "notes.txt".to_string(),
            content_type: "text/plain".to_string(),
            sender_public_key: *KeyPair::generate().public_key(),
            key_exchange_nonce: KeyExchangeNonce::from_bytes([1u8; 16]),
            key_exchange_proof: KeyExchangeProof::from_bytes([2u8; 32]),
            lifetime_hours: 24,
        };

        let value = serde_json::to_value(&request).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["contentType", "fileName", "keyExchangeNonce", "lifetimeHours", "proof", "publicKey"]
        );
        assert_eq!(value["keyExchangeNonce"], STANDARD.encode([1u8; 16]));

        let back: TransferRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_bad_key_material_is_a_schema_error() {
        let result = serde_json::from_value::<PublicKeyResponse>(json!({"publicKey": "AAAA"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_recovery_error_mapping() {
        assert_eq!(
            SendRecoveryEmailError::from(ErrorResponse::new(KnownErrorCode::InvalidEmailAddress)),
            SendRecoveryEmailError::InvalidEmailAddress
        );
        assert_eq!(
            SendRecoveryEmailError::from(ErrorResponse::from_status(500)),
            SendRecoveryEmailError::UnknownError
        );
    }

    #[test]
    fn test_token_response_debug_redacted() {
        let response = TokenResponse {
            authentication_token: "secret-a".to_string(),
            refresh_token: "secret-r".to_string(),
            refresh_token_type: TokenType::Device,
        };
        let debug = format!("{:?}", response);
        assert!(!debug.contains("secret"));
    }
}
