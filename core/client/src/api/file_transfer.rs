//! File transfer endpoints.

use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::Method;

use super::routes;
use crate::contracts::{
    ErrorResponse, PublicKeyResponse, StreamDownloadResponse, TransferPreview, TransferRequest,
    TransferSummary,
};
use crate::http::TransportAdapter;
use crate::tokens::Auth;
use crate::transport::{ByteStream, HttpRequest};
use sealdrop_common::{Either, Maybe, Result, TransferId, Unit, Username};

/// File transfer API.
pub struct FileTransferClient<'a> {
    adapter: &'a TransportAdapter,
}

impl<'a> FileTransferClient<'a> {
    pub(crate) fn new(adapter: &'a TransportAdapter) -> Self {
        Self { adapter }
    }

    /// Transient key material for a transfer with no registered recipient.
    pub async fn anonymous_key(&self) -> Result<Either<ErrorResponse, PublicKeyResponse>> {
        self.adapter.get_either(routes::ANONYMOUS_KEY, Auth::None).await
    }

    /// Upload an encrypted transfer.
    ///
    /// The body is `multipart/related`: the JSON envelope, then the
    /// ciphertext, streamed as it is produced.
    ///
    /// # Preconditions
    /// - `ciphertext` yields exactly `ciphertext_length` bytes
    ///
    /// # Errors
    /// - `NotAuthenticated` before any network call if `with_authentication`
    ///   is set and no session is stored
    pub async fn upload_file_transfer(
        &self,
        recipient: Maybe<&Username>,
        request: &TransferRequest,
        ciphertext: ByteStream,
        ciphertext_length: u64,
        with_authentication: bool,
    ) -> Result<Either<ErrorResponse, Unit>> {
        let auth = if with_authentication {
            Auth::Required
        } else {
            Auth::None
        };

        let body = MultipartBody::new(request, ciphertext, ciphertext_length)?;
        let http_request = HttpRequest::new(Method::POST, routes::upload(recipient)).with_stream(
            body.content_type,
            Some(body.content_length),
            body.stream,
        );
        self.adapter.send(http_request, auth).await
    }

    /// Metadata and key exchange parameters of a transfer.
    pub async fn preview(&self, id: &TransferId) -> Result<Either<ErrorResponse, TransferPreview>> {
        self.adapter
            .get_either(&routes::transfer_preview(id), Auth::Optional)
            .await
    }

    /// The ciphertext of a transfer, as a live stream.
    pub async fn ciphertext(
        &self,
        id: &TransferId,
    ) -> Result<Either<ErrorResponse, StreamDownloadResponse>> {
        self.adapter
            .get_stream(&routes::transfer_ciphertext(id), Auth::Optional)
            .await
    }

    /// Transfers addressed to the logged-in user.
    pub async fn received_transfers(&self) -> Result<Either<ErrorResponse, Vec<TransferSummary>>> {
        self.adapter
            .get_either(routes::RECEIVED_TRANSFERS, Auth::Required)
            .await
    }
}

/// Streamed `multipart/related` body: envelope part, then ciphertext part.
pub(crate) struct MultipartBody {
    pub content_type: String,
    pub content_length: u64,
    pub stream: ByteStream,
}

impl MultipartBody {
    pub(crate) fn new(
        request: &TransferRequest,
        ciphertext: ByteStream,
        ciphertext_length: u64,
    ) -> Result<Self> {
        // The nonce is fresh per transfer, so the boundary is too.
        let boundary: String = request
            .key_exchange_nonce
            .as_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        let boundary = format!("sealdrop-{}", boundary);

        let mut head = Vec::new();
        head.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        head.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        head.extend_from_slice(&serde_json::to_vec(request)?);
        head.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
        head.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");

        let tail = format!("\r\n--{}--", boundary).into_bytes();
        let content_length = head.len() as u64 + ciphertext_length + tail.len() as u64;

        let stream = stream::once(async move { Ok(Bytes::from(head)) })
            .chain(ciphertext)
            .chain(stream::once(async move { Ok(Bytes::from(tail)) }));

        Ok(Self {
            content_type: format!("multipart/related; boundary={}", boundary),
            content_length,
            stream: Box::pin(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use sealdrop_crypto::{KeyExchangeNonce, KeyExchangeProof, KeyPair};

    fn envelope() -> TransferRequest {
        TransferRequest {
            file_name: "a.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            sender_public_key: *KeyPair::generate().public_key(),
            key_exchange_nonce: KeyExchangeNonce::from_bytes([0xab; 16]),
            key_exchange_proof: KeyExchangeProof::from_bytes([1u8; 32]),
            lifetime_hours: 1,
        }
    }

    #[tokio::test]
    async fn test_multipart_body_layout_and_length() {
        let ciphertext: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"\x00\x01")),
            Ok(Bytes::from_static(b"\x02")),
        ]));
        let body = MultipartBody::new(&envelope(), ciphertext, 3).unwrap();
        let boundary = format!("sealdrop-{}", "ab".repeat(16));
        assert_eq!(body.content_type, format!("multipart/related; boundary={}", boundary));

        let declared = body.content_length;
        let chunks: Vec<Bytes> = body.stream.try_collect().await.unwrap();
        let bytes = chunks.concat();

        assert_eq!(bytes.len() as u64, declared);
        assert!(bytes.starts_with(format!("--{}\r\n", boundary).as_bytes()));
        assert!(bytes.ends_with(format!("\x00\x01\x02\r\n--{}--", boundary).as_bytes()));
    }
}
