//! User key endpoints.

use super::routes;
use crate::contracts::{ErrorResponse, InsertKeyPairRequest, PublicKeyResponse};
use crate::http::TransportAdapter;
use crate::tokens::Auth;
use sealdrop_common::{Either, Result, Unit, Username};

/// User key API.
pub struct UserKeyClient<'a> {
    adapter: &'a TransportAdapter,
}

impl<'a> UserKeyClient<'a> {
    pub(crate) fn new(adapter: &'a TransportAdapter) -> Self {
        Self { adapter }
    }

    /// Registered public key of `username`.
    pub async fn get_public_key(
        &self,
        username: &Username,
    ) -> Result<Either<ErrorResponse, PublicKeyResponse>> {
        self.adapter
            .get_either(&routes::user_public_key(username), Auth::None)
            .await
    }

    /// Register the logged-in user's key pair.
    pub async fn insert_key_pair(
        &self,
        request: &InsertKeyPairRequest,
    ) -> Result<Either<ErrorResponse, Unit>> {
        self.adapter
            .put_either_unit_with_body(routes::USER_KEY, request, Auth::Required)
            .await
    }
}
