//! Typed API client, grouped by server feature.

mod file_transfer;
mod user_authentication;
mod user_key;
mod user_recovery;

pub use file_transfer::FileTransferClient;
pub use user_authentication::UserAuthenticationClient;
pub use user_key::UserKeyClient;
pub use user_recovery::UserRecoveryClient;

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::http::TransportAdapter;
use crate::tokens::{TokenLifecycle, TokenRepository};
use crate::transport::{HttpTransport, ReqwestTransport};
use sealdrop_common::Result;
use sealdrop_crypto::KdfParams;

/// Server routes.
pub mod routes {
    use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
    use sealdrop_common::{Maybe, TransferId, Username};

    /// Characters left as-is in path segments and query values.
    const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'_')
        .remove(b'.')
        .remove(b'~');

    pub const FILE_TRANSFER: &str = "/api/file/transfer";
    pub const ANONYMOUS_KEY: &str = "/api/file/transfer/anonymous-key";
    pub const RECEIVED_TRANSFERS: &str = "/api/file/transfer/received";
    pub const REGISTER: &str = "/api/user/authentication/register";
    pub const LOGIN: &str = "/api/user/authentication/login";
    pub const REFRESH: &str = "/api/user/authentication/refresh";
    pub const LOGOUT: &str = "/api/user/authentication/logout";
    pub const USER_KEY: &str = "/api/user/key";
    pub const RECOVERY_EMAIL: &str = "/api/user/recovery/email";

    fn encode(value: &str) -> String {
        utf8_percent_encode(value, COMPONENT).to_string()
    }

    /// Upload route, addressed to a user or anonymous.
    pub fn upload(recipient: Maybe<&Username>) -> String {
        recipient.match_with(
            || FILE_TRANSFER.to_string(),
            |username| format!("{}?username={}", FILE_TRANSFER, encode(username.as_str())),
        )
    }

    pub fn user_public_key(username: &Username) -> String {
        format!("/api/user/{}/public-key", encode(username.as_str()))
    }

    pub fn transfer_preview(id: &TransferId) -> String {
        format!("{}/{}/preview", FILE_TRANSFER, encode(id.as_str()))
    }

    pub fn transfer_ciphertext(id: &TransferId) -> String {
        format!("{}/{}/ciphertext", FILE_TRANSFER, encode(id.as_str()))
    }
}

/// Entry point to every server feature.
#[derive(Clone)]
pub struct ApiClient {
    adapter: TransportAdapter,
    kdf: KdfParams,
}

impl ApiClient {
    /// Create a client over any transport.
    pub fn new(transport: Arc<dyn HttpTransport>, repository: Arc<dyn TokenRepository>) -> Self {
        Self {
            adapter: TransportAdapter::new(transport, TokenLifecycle::new(repository)),
            kdf: KdfParams::default(),
        }
    }

    /// Create a client talking to the configured server over HTTP.
    ///
    /// # Errors
    /// - `Config` if the configuration is invalid
    pub fn from_config(
        config: &ClientConfig,
        repository: Arc<dyn TokenRepository>,
    ) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), repository).with_kdf(config.kdf_params()))
    }

    /// Use custom password hardening parameters.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn file_transfer(&self) -> FileTransferClient<'_> {
        FileTransferClient::new(&self.adapter)
    }

    pub fn user_authentication(&self) -> UserAuthenticationClient<'_> {
        UserAuthenticationClient::new(&self.adapter, &self.kdf)
    }

    pub fn user_key(&self) -> UserKeyClient<'_> {
        UserKeyClient::new(&self.adapter)
    }

    pub fn user_recovery(&self) -> UserRecoveryClient<'_> {
        UserRecoveryClient::new(&self.adapter)
    }

    /// Session token lifecycle.
    pub fn tokens(&self) -> &TokenLifecycle {
        self.adapter.tokens()
    }
}
