//! Common types used throughout Sealdrop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum username length accepted by the server.
pub const MAX_USERNAME_LENGTH: usize = 32;

/// Name of a registered account.
///
/// Only structural checks happen here; whether the account exists is the
/// server's call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Create a new Username.
    ///
    /// # Errors
    /// - Returns error if the name is empty or longer than
    ///   `MAX_USERNAME_LENGTH` characters
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "Username cannot be empty".to_string(),
            ));
        }
        if name.chars().count() > MAX_USERNAME_LENGTH {
            return Err(crate::Error::InvalidInput(format!(
                "Username exceeds {}-character limit",
                MAX_USERNAME_LENGTH
            )));
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier of an uploaded transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(String);

impl TransferId {
    /// Create a new TransferId.
    ///
    /// # Errors
    /// - Returns error if the id is empty or contains a path separator
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "TransferId cannot be empty".to_string(),
            ));
        }
        if id.contains('/') || id.contains('?') {
            return Err(crate::Error::InvalidInput(
                "TransferId cannot contain separators".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A syntactically plausible email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Parse an email address.
    ///
    /// # Errors
    /// - Returns error if there is no non-empty local part and domain
    pub fn new(address: impl Into<String>) -> crate::Result<Self> {
        let address = address.into();
        match address.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
                Ok(Self(address))
            }
            _ => Err(crate::Error::InvalidInput(format!(
                "Invalid email address: {}",
                address
            ))),
        }
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
