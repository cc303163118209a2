//! Session token lifecycle.
//!
//! Tokens live in a [`TokenRepository`] supplied by the host application;
//! this module only decides when to read, write or clear them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use sealdrop_common::{Error, Maybe, Result, Username};

/// How long a refresh token is meant to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenType {
    /// Bound to the current session; discarded when the session ends.
    Session,
    /// Bound to this device; survives restarts.
    Device,
}

impl TokenType {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Session => "session",
            TokenType::Device => "device",
        }
    }

    /// Inverse of [`TokenType::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "session" => Some(TokenType::Session),
            "device" => Some(TokenType::Device),
            _ => None,
        }
    }
}

/// Slots in the token repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageKey {
    AuthenticationToken,
    RefreshToken,
    RefreshTokenType,
    /// Marker naming the logged-in user.
    UserSession,
}

/// Whether a slot currently holds a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Absent,
    Present,
}

/// Storage for session credentials.
///
/// Implementations decide where tokens live (memory, disk, keychain).
/// A single slot must be written atomically; last writer wins.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Store the bearer token used for authenticated requests.
    async fn store_authentication_token(&self, token: &str) -> Result<()>;

    /// Store the refresh token together with its type.
    async fn store_refresh_token(&self, token: &str, token_type: TokenType) -> Result<()>;

    /// Write an arbitrary slot.
    async fn set_item(&self, key: StorageKey, value: &str) -> Result<()>;

    /// Whether a slot holds a value.
    async fn has_item(&self, key: StorageKey) -> bool;

    /// Read a slot.
    async fn get_item(&self, key: StorageKey) -> Maybe<String>;

    /// Remove every stored credential.
    async fn clear(&self) -> Result<()>;
}

/// In-memory repository. Credentials vanish with the process.
#[derive(Default)]
pub struct MemoryTokenRepository {
    items: RwLock<HashMap<StorageKey, String>>,
}

impl MemoryTokenRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn store_authentication_token(&self, token: &str) -> Result<()> {
        self.set_item(StorageKey::AuthenticationToken, token).await
    }

    async fn store_refresh_token(&self, token: &str, token_type: TokenType) -> Result<()> {
        let mut items = self.items.write().await;
        items.insert(StorageKey::RefreshToken, token.to_string());
        items.insert(StorageKey::RefreshTokenType, token_type.as_str().to_string());
        Ok(())
    }

    async fn set_item(&self, key: StorageKey, value: &str) -> Result<()> {
        self.items.write().await.insert(key, value.to_string());
        Ok(())
    }

    async fn has_item(&self, key: StorageKey) -> bool {
        self.items.read().await.contains_key(&key)
    }

    async fn get_item(&self, key: StorageKey) -> Maybe<String> {
        self.items.read().await.get(&key).cloned().into()
    }

    async fn clear(&self) -> Result<()> {
        self.items.write().await.clear();
        Ok(())
    }
}

/// Whether a request needs the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    /// Never attach a token.
    None,
    /// Attach the token when one is stored.
    Optional,
    /// Fail locally with `NotAuthenticated` unless a session is stored.
    Required,
}

/// Bearer credential ready to be put in a header. Redacted in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// `Authorization` header value.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken([REDACTED])")
    }
}

/// Reads and rotates credentials on behalf of the transport adapter.
#[derive(Clone)]
pub struct TokenLifecycle {
    repository: Arc<dyn TokenRepository>,
}

impl TokenLifecycle {
    /// Wrap a repository.
    pub fn new(repository: Arc<dyn TokenRepository>) -> Self {
        Self { repository }
    }

    /// The underlying repository.
    pub fn repository(&self) -> &Arc<dyn TokenRepository> {
        &self.repository
    }

    /// State of one slot.
    pub async fn state(&self, key: StorageKey) -> TokenState {
        if self.repository.has_item(key).await {
            TokenState::Present
        } else {
            TokenState::Absent
        }
    }

    /// Whether a full session (user marker and auth token) is stored.
    pub async fn has_session(&self) -> bool {
        self.state(StorageKey::UserSession).await == TokenState::Present
            && self.state(StorageKey::AuthenticationToken).await == TokenState::Present
    }

    /// Resolve the credential for a request.
    ///
    /// # Errors
    /// - `NotAuthenticated` if `auth` is `Required` and no session is stored.
    ///   Raised before anything touches the network.
    pub async fn authorize(&self, auth: Auth) -> Result<Maybe<BearerToken>> {
        match auth {
            Auth::None => Ok(Maybe::None),
            Auth::Optional => Ok(self
                .repository
                .get_item(StorageKey::AuthenticationToken)
                .await
                .map(BearerToken)),
            Auth::Required => {
                if !self.has_session().await {
                    debug!("Authenticated request refused locally: no stored session");
                    return Err(Error::NotAuthenticated);
                }
                self.repository
                    .get_item(StorageKey::AuthenticationToken)
                    .await
                    .map(BearerToken)
                    .to_either(|| Error::NotAuthenticated)
                    .into_result()
                    .map(Maybe::Some)
            }
        }
    }

    /// Persist a fresh session after login.
    pub async fn store_session(
        &self,
        username: &Username,
        authentication_token: &str,
        refresh_token: &str,
        token_type: TokenType,
    ) -> Result<()> {
        self.repository
            .store_authentication_token(authentication_token)
            .await?;
        self.repository
            .store_refresh_token(refresh_token, token_type)
            .await?;
        self.repository
            .set_item(StorageKey::UserSession, username.as_str())
            .await?;
        debug!(user = %username, token_type = token_type.as_str(), "Session stored");
        Ok(())
    }

    /// Replace the auth token after a refresh, keeping the session marker.
    pub async fn rotate(
        &self,
        authentication_token: &str,
        refresh_token: &str,
        token_type: TokenType,
    ) -> Result<()> {
        self.repository
            .store_authentication_token(authentication_token)
            .await?;
        self.repository
            .store_refresh_token(refresh_token, token_type)
            .await
    }

    /// Stored refresh token and its type, if any.
    pub async fn refresh_token(&self) -> Maybe<(String, TokenType)> {
        let token = self.repository.get_item(StorageKey::RefreshToken).await;
        let token_type = self
            .repository
            .get_item(StorageKey::RefreshTokenType)
            .await
            .bind(|value| TokenType::parse(&value).into());

        match (token, token_type) {
            (Maybe::Some(token), Maybe::Some(token_type)) => Maybe::Some((token, token_type)),
            _ => Maybe::None,
        }
    }

    /// Name of the logged-in user, if any.
    pub async fn current_user(&self) -> Maybe<String> {
        self.repository.get_item(StorageKey::UserSession).await
    }

    /// React to a 401 on an authenticated request: drop every stored
    /// credential and report the session as expired. Never retries.
    pub async fn handle_unauthorized(&self) -> Error {
        warn!("Server rejected the session token; clearing stored credentials");
        if let Err(e) = self.repository.clear().await {
            warn!(error = %e, "Failed to clear token repository");
        }
        Error::SessionExpired
    }

    /// Forget the session.
    pub async fn clear(&self) -> Result<()> {
        self.repository.clear().await
    }
}
