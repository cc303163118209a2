//! Account recovery endpoints.

use super::routes;
use crate::contracts::{SendRecoveryEmailError, SendRecoveryEmailRequest};
use crate::http::TransportAdapter;
use crate::tokens::Auth;
use sealdrop_common::{EmailAddress, Either, Result, Unit};

/// Account recovery API.
pub struct UserRecoveryClient<'a> {
    adapter: &'a TransportAdapter,
}

impl<'a> UserRecoveryClient<'a> {
    pub(crate) fn new(adapter: &'a TransportAdapter) -> Self {
        Self { adapter }
    }

    /// Ask the server to mail a recovery link to `email_address`.
    pub async fn send_recovery_email(
        &self,
        email_address: &EmailAddress,
    ) -> Result<Either<SendRecoveryEmailError, Unit>> {
        let request = SendRecoveryEmailRequest {
            email_address: email_address.clone(),
        };
        let result = self
            .adapter
            .post_either_unit_with_body(routes::RECOVERY_EMAIL, &request, Auth::None)
            .await?;
        Ok(result.map_left(SendRecoveryEmailError::from))
    }
}
