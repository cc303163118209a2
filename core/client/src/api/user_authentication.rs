//! Registration, login and session refresh.
//!
//! Passwords never leave the client in the clear: they are hardened with
//! Argon2id on the blocking pool before being sent.

use tracing::info;
use zeroize::Zeroizing;

use super::routes;
use crate::contracts::{
    ErrorResponse, LoginRequest, RefreshRequest, RegistrationRequest, TokenResponse,
};
use crate::http::TransportAdapter;
use crate::tokens::{Auth, TokenType};
use sealdrop_common::{EmailAddress, Either, Error, Maybe, Result, Unit, Username};
use sealdrop_crypto::{derive_login_key, KdfParams};

/// User authentication API.
pub struct UserAuthenticationClient<'a> {
    adapter: &'a TransportAdapter,
    kdf: &'a KdfParams,
}

impl<'a> UserAuthenticationClient<'a> {
    pub(crate) fn new(adapter: &'a TransportAdapter, kdf: &'a KdfParams) -> Self {
        Self { adapter, kdf }
    }

    /// Create an account.
    pub async fn register(
        &self,
        username: &Username,
        password: &[u8],
        email_address: Option<EmailAddress>,
    ) -> Result<Either<ErrorResponse, Unit>> {
        let request = RegistrationRequest {
            username: username.clone(),
            password: self.harden(username, password).await?,
            email_address,
        };
        self.adapter
            .post_either_unit_with_body(routes::REGISTER, &request, Auth::None)
            .await
    }

    /// Log in and store the issued tokens and the session marker.
    pub async fn login(
        &self,
        username: &Username,
        password: &[u8],
        refresh_token_type: TokenType,
    ) -> Result<Either<ErrorResponse, TokenResponse>> {
        let request = LoginRequest {
            username: username.clone(),
            password: self.harden(username, password).await?,
            refresh_token_type,
        };
        let result: Either<ErrorResponse, TokenResponse> = self
            .adapter
            .post_either(routes::LOGIN, &request, Auth::None)
            .await?;

        if let Either::Right(tokens) = &result {
            self.adapter
                .tokens()
                .store_session(
                    username,
                    &tokens.authentication_token,
                    &tokens.refresh_token,
                    tokens.refresh_token_type,
                )
                .await?;
            info!(user = %username, "Logged in");
        }
        Ok(result)
    }

    /// Exchange the stored refresh token for new tokens.
    ///
    /// Never called implicitly; callers opt into silent refresh.
    ///
    /// # Errors
    /// - `NotAuthenticated` if no refresh token is stored
    pub async fn refresh(&self) -> Result<Either<ErrorResponse, TokenResponse>> {
        let stored = self.adapter.tokens().refresh_token().await;
        let (refresh_token, refresh_token_type) = match stored {
            Maybe::Some(stored) => stored,
            Maybe::None => return Err(Error::NotAuthenticated),
        };

        let request = RefreshRequest {
            refresh_token,
            refresh_token_type,
        };
        let result: Either<ErrorResponse, TokenResponse> = self
            .adapter
            .post_either(routes::REFRESH, &request, Auth::None)
            .await?;

        if let Either::Right(tokens) = &result {
            self.adapter
                .tokens()
                .rotate(
                    &tokens.authentication_token,
                    &tokens.refresh_token,
                    tokens.refresh_token_type,
                )
                .await?;
        }
        Ok(result)
    }

    /// End the session on the server and forget it locally.
    ///
    /// Stored tokens are cleared whatever the server answers, including
    /// when it cannot be reached.
    pub async fn logout(&self) -> Result<Either<ErrorResponse, Unit>> {
        let result = self
            .adapter
            .post_either_unit(routes::LOGOUT, Auth::Required)
            .await;
        self.adapter.tokens().clear().await?;
        result
    }

    async fn harden(&self, username: &Username, password: &[u8]) -> Result<String> {
        let username = username.as_str().to_string();
        let password = Zeroizing::new(password.to_vec());
        let params = self.kdf.clone();

        let hardening = move || derive_login_key(&username, &password, &params);
        let key = tokio::task::spawn_blocking(hardening)
            .await
            .map_err(|e| Error::Crypto(format!("Password hardening task failed: {}", e)))??;
        Ok(key.to_base64())
    }
}
