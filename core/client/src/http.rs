//! Transport adapter: turns raw HTTP exchanges into `Maybe` / `Either`.
//!
//! Success statuses decode the body as `T`. Failure statuses decode the
//! body as [`ErrorResponse`] (or discard it, for `Maybe`). A body that does
//! not match the expected schema is a `Protocol` error, never a `Left`.
//!
//! A 401 on a request that carried a session token clears every stored
//! credential and ends the call with `SessionExpired`.

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::contracts::{ErrorResponse, StreamDownloadResponse};
use crate::tokens::{Auth, TokenLifecycle};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use sealdrop_common::{Either, Error, Maybe, Result, Unit};

/// Largest JSON body the adapter will buffer.
pub const MAX_JSON_BODY: usize = 4 * 1024 * 1024;

/// Typed request helpers over an [`HttpTransport`].
#[derive(Clone)]
pub struct TransportAdapter {
    transport: Arc<dyn HttpTransport>,
    tokens: TokenLifecycle,
}

impl TransportAdapter {
    /// Create an adapter.
    pub fn new(transport: Arc<dyn HttpTransport>, tokens: TokenLifecycle) -> Self {
        Self { transport, tokens }
    }

    /// Token lifecycle used for authorization.
    pub fn tokens(&self) -> &TokenLifecycle {
        &self.tokens
    }

    /// GET, discarding error detail.
    pub async fn get_maybe<T: DeserializeOwned>(&self, uri: &str, auth: Auth) -> Result<Maybe<T>> {
        let response = self.execute(HttpRequest::new(Method::GET, uri), auth).await?;
        maybe_body(response).await
    }

    /// GET, decoding either the success body or the error envelope.
    pub async fn get_either<T: DeserializeOwned>(
        &self,
        uri: &str,
        auth: Auth,
    ) -> Result<Either<ErrorResponse, T>> {
        let response = self.execute(HttpRequest::new(Method::GET, uri), auth).await?;
        either_body(response).await
    }

    /// GET with no success payload.
    pub async fn get_either_unit(
        &self,
        uri: &str,
        auth: Auth,
    ) -> Result<Either<ErrorResponse, Unit>> {
        let response = self.execute(HttpRequest::new(Method::GET, uri), auth).await?;
        either_unit(response).await
    }

    /// GET a body as a live stream with its declared length.
    ///
    /// # Errors
    /// - `Protocol` if a success response has no content length
    pub async fn get_stream(
        &self,
        uri: &str,
        auth: Auth,
    ) -> Result<Either<ErrorResponse, StreamDownloadResponse>> {
        let response = self.execute(HttpRequest::new(Method::GET, uri), auth).await?;
        if !response.status.is_success() {
            return error_body(response).await.map(Either::Left);
        }

        let content_length = response.content_length.ok_or_else(|| {
            Error::Protocol("Streaming response did not declare its length".to_string())
        })?;
        Ok(Either::Right(StreamDownloadResponse {
            content_length,
            stream: response.body,
        }))
    }

    /// POST a JSON body, decoding either outcome.
    pub async fn post_either<B, T>(
        &self,
        uri: &str,
        body: &B,
        auth: Auth,
    ) -> Result<Either<ErrorResponse, T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::new(Method::POST, uri).with_json(body)?;
        let response = self.execute(request, auth).await?;
        either_body(response).await
    }

    /// POST a JSON body, reporting only whether it succeeded.
    pub async fn post_maybe_unit<B>(&self, uri: &str, body: &B, auth: Auth) -> Result<Maybe<Unit>>
    where
        B: Serialize + ?Sized,
    {
        let request = HttpRequest::new(Method::POST, uri).with_json(body)?;
        let response = self.execute(request, auth).await?;
        Ok(status_only(&response))
    }

    /// POST without a body.
    pub async fn post_either_unit(
        &self,
        uri: &str,
        auth: Auth,
    ) -> Result<Either<ErrorResponse, Unit>> {
        let response = self.execute(HttpRequest::new(Method::POST, uri), auth).await?;
        either_unit(response).await
    }

    /// POST a JSON body with no success payload.
    pub async fn post_either_unit_with_body<B>(
        &self,
        uri: &str,
        body: &B,
        auth: Auth,
    ) -> Result<Either<ErrorResponse, Unit>>
    where
        B: Serialize + ?Sized,
    {
        let request = HttpRequest::new(Method::POST, uri).with_json(body)?;
        let response = self.execute(request, auth).await?;
        either_unit(response).await
    }

    /// PUT a JSON body with no success payload.
    pub async fn put_either_unit_with_body<B>(
        &self,
        uri: &str,
        body: &B,
        auth: Auth,
    ) -> Result<Either<ErrorResponse, Unit>>
    where
        B: Serialize + ?Sized,
    {
        let request = HttpRequest::new(Method::PUT, uri).with_json(body)?;
        let response = self.execute(request, auth).await?;
        either_unit(response).await
    }

    /// DELETE, reporting only whether it succeeded.
    pub async fn delete_unit(&self, uri: &str, auth: Auth) -> Result<Maybe<Unit>> {
        let response = self.execute(HttpRequest::new(Method::DELETE, uri), auth).await?;
        Ok(status_only(&response))
    }

    /// Send a caller-built request (e.g. a streamed upload).
    pub async fn send(
        &self,
        request: HttpRequest,
        auth: Auth,
    ) -> Result<Either<ErrorResponse, Unit>> {
        let response = self.execute(request, auth).await?;
        either_unit(response).await
    }

    /// Authorize and dispatch a request.
    ///
    /// # Errors
    /// - `NotAuthenticated` before any network call if `auth` is `Required`
    ///   and no session is stored
    /// - `SessionExpired` if a request carrying a token got a 401
    /// - `Network` if the transport failed
    async fn execute(&self, mut request: HttpRequest, auth: Auth) -> Result<HttpResponse> {
        let bearer = self.tokens.authorize(auth).await?;
        let authorized = bearer.is_some();

        if let Maybe::Some(bearer) = bearer {
            let mut value = HeaderValue::from_str(&bearer.header_value()).map_err(|_| {
                Error::Protocol("Stored token is not a valid header value".to_string())
            })?;
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        let method = request.method.clone();
        let uri = request.uri.clone();
        let response = self.transport.send(request).await?;
        debug!(method = %method, uri = %uri, status = %response.status, "Request completed");

        if response.status == StatusCode::UNAUTHORIZED && authorized {
            return Err(self.tokens.handle_unauthorized().await);
        }
        Ok(response)
    }
}

fn status_only(response: &HttpResponse) -> Maybe<Unit> {
    if response.status.is_success() {
        Maybe::Some(Unit)
    } else {
        Maybe::None
    }
}

async fn maybe_body<T: DeserializeOwned>(response: HttpResponse) -> Result<Maybe<T>> {
    if response.status.is_success() {
        success_body(response).await.map(Maybe::Some)
    } else {
        Ok(Maybe::None)
    }
}

async fn either_body<T>(response: HttpResponse) -> Result<Either<ErrorResponse, T>>
where
    T: DeserializeOwned,
{
    if response.status.is_success() {
        success_body(response).await.map(Either::Right)
    } else {
        error_body(response).await.map(Either::Left)
    }
}

async fn either_unit(response: HttpResponse) -> Result<Either<ErrorResponse, Unit>> {
    if response.status.is_success() {
        Ok(Either::Right(Unit))
    } else {
        error_body(response).await.map(Either::Left)
    }
}

async fn success_body<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
    let status = response.status;
    let bytes = response.bytes_limited(MAX_JSON_BODY).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::Protocol(format!(
            "Response body ({}) does not match the expected schema: {}",
            status, e
        ))
    })
}

/// An empty failure body becomes an `ErrorResponse` carrying the status code.
async fn error_body(response: HttpResponse) -> Result<ErrorResponse> {
    let status = response.status;
    let bytes = response.bytes_limited(MAX_JSON_BODY).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(ErrorResponse::from_status(status.as_u16()));
    }
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::Protocol(format!(
            "Error body ({}) is not a valid error response: {}",
            status, e
        ))
    })
}
