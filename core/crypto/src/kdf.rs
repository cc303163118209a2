//! Login password hardening using Argon2id.
//!
//! The server never sees the raw password. The client stretches it with
//! Argon2id under a salt derived from the username, so the same account
//! always produces the same login key on every device.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::KEY_LENGTH;
use sealdrop_common::{Error, Result};

/// Domain separation label for the username salt.
const SALT_LABEL: &[u8] = b"sealdrop/login-salt/v1";

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Parameters for interactive logins on desktop machines.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Higher cost parameters; may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Lighter parameters for constrained devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    fn to_argon2(&self) -> Result<Params> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::Config(format!("Invalid KDF parameters: {}", e)))
    }

    /// Check that Argon2 accepts these parameters.
    pub fn validate(&self) -> Result<()> {
        self.to_argon2().map(|_| ())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Hardened password sent to the server in place of the raw password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LoginKey {
    key: [u8; KEY_LENGTH],
}

impl LoginKey {
    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Encode as standard base64 for the login request body.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.key)
    }
}

impl fmt::Debug for LoginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoginKey([REDACTED])")
    }
}

/// Derive the login key for `username` from `password`.
///
/// # Preconditions
/// - `password` must not be empty
///
/// # Postconditions
/// - Deterministic for the same username (case-insensitive), password and params
///
/// # Errors
/// - `InvalidInput` if the password is empty
/// - `Config` if the Argon2id parameters are invalid
///
/// # Security
/// - Password is not stored or logged
pub fn derive_login_key(username: &str, password: &[u8], params: &KdfParams) -> Result<LoginKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut key = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, &username_salt(username), &mut key)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(LoginKey { key })
}

fn username_salt(username: &str) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(SALT_LABEL);
    hasher.update(username.trim().to_lowercase().as_bytes());

    let mut salt = [0u8; 32];
    salt.copy_from_slice(&hasher.finalize());
    salt
}
