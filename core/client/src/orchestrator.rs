//! Transfer orchestration.
//!
//! Sequences key exchange, cipher setup and chunked transport for uploads
//! and downloads, and publishes each transfer's progress through a
//! [`TransferTracker`].
//!
//! # State machine
//! ```text
//! PreparingKeyExchange ─┬─> StreamingUpload ───┬─> Completed
//!                       ├─> StreamingDownload ─┤
//!                       └──────────────────────┴─> Failed(reason)
//! ```

use futures::StreamExt;
use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::api::ApiClient;
use crate::contracts::{
    ErrorCode, ErrorResponse, KnownErrorCode, TransferPreview, TransferRequest,
};
use crate::transport::ByteStream;
use sealdrop_common::{Either, Error, Maybe, Result, TransferId, Unit, Username};
use sealdrop_crypto::{
    derive_recipient_key, derive_sender_key, verify_proof, DecryptionStream, EncryptionStream,
    KeyPair, PublicKey, SecretKey, SenderKeyExchange, TransferKey,
};

/// Where a transfer currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    PreparingKeyExchange,
    StreamingUpload,
    StreamingDownload,
    Completed,
    Failed(String),
}

impl TransferState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed(_))
    }

    /// Whether `next` may follow this state.
    pub fn can_transition_to(&self, next: &TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (PreparingKeyExchange, StreamingUpload)
                | (PreparingKeyExchange, StreamingDownload)
                | (PreparingKeyExchange, Failed(_))
                | (StreamingUpload, Completed)
                | (StreamingUpload, Failed(_))
                | (StreamingDownload, Completed)
                | (StreamingDownload, Failed(_))
        )
    }
}

/// Publishes the state of one transfer.
///
/// Fresh trackers start in `PreparingKeyExchange`. Observers subscribe to a
/// `watch` channel and always see the latest state.
pub struct TransferTracker {
    sender: watch::Sender<TransferState>,
}

impl TransferTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(TransferState::PreparingKeyExchange);
        Self { sender }
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.sender.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        self.sender.borrow().clone()
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// - `InvalidInput` if the transition is not allowed
    fn advance(&self, next: TransferState) -> Result<()> {
        let current = self.state();
        if !current.can_transition_to(&next) {
            return Err(Error::InvalidInput(format!(
                "Illegal transfer state transition {:?} -> {:?}",
                current, next
            )));
        }
        debug!(from = ?current, to = ?next, "Transfer state changed");
        self.sender.send_replace(next);
        Ok(())
    }

    /// Record the outcome of a run.
    fn finish<T>(&self, outcome: &Result<Either<ErrorResponse, T>>) {
        let next = match outcome {
            Ok(Either::Right(_)) => TransferState::Completed,
            Ok(Either::Left(error)) => TransferState::Failed(error.to_string()),
            Err(error) => TransferState::Failed(error.to_string()),
        };
        if let Err(e) = self.advance(next) {
            warn!(error = %e, "Transfer outcome not recorded");
        }
    }
}

impl Default for TransferTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A plaintext to send.
pub struct UploadRequest<R> {
    /// `None` for an anonymous transfer using server-issued key material.
    pub recipient: Maybe<Username>,
    pub file_name: String,
    pub content_type: String,
    /// Plaintext source; must yield exactly `plaintext_length` bytes.
    pub plaintext: R,
    pub plaintext_length: u64,
    /// Defaults to the orchestrator's lifetime.
    pub lifetime_hours: Option<u32>,
    /// Demand a logged-in sender; fails locally if no session is stored.
    pub authenticate_sender: bool,
}

/// A transfer decrypted into memory.
pub struct DownloadedTransfer {
    pub preview: TransferPreview,
    /// Authenticated plaintext; zeroized on drop.
    pub plaintext: Zeroizing<Vec<u8>>,
}

/// Coordinates uploads and downloads.
pub struct TransferOrchestrator {
    api: ApiClient,
    default_lifetime_hours: u32,
}

impl TransferOrchestrator {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            default_lifetime_hours: 24,
        }
    }

    /// Lifetime used when an upload does not name one.
    pub fn with_default_lifetime(mut self, hours: u32) -> Self {
        self.default_lifetime_hours = hours;
        self
    }

    /// Underlying API client.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Encrypt and upload a plaintext.
    ///
    /// Returns the server's `Either` unchanged; `Left` carries
    /// `recipientNotFound` when the named recipient has no registered key.
    ///
    /// # Errors
    /// - `NotAuthenticated` before any network call if the sender must be
    ///   authenticated and no session is stored
    /// - `InvalidKeyMaterial` if the recipient key is unusable
    /// - `Cancelled` if `cancel` fires first
    /// - transport faults as `Network` / `Protocol`
    pub async fn upload<R>(
        &self,
        request: UploadRequest<R>,
        cancel: CancellationToken,
    ) -> Result<Either<ErrorResponse, Unit>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.upload_tracked(request, cancel, &TransferTracker::new())
            .await
    }

    /// [`TransferOrchestrator::upload`], publishing progress on `tracker`.
    ///
    /// # Errors
    /// - `InvalidInput` if `tracker` has already been used
    pub async fn upload_tracked<R>(
        &self,
        request: UploadRequest<R>,
        cancel: CancellationToken,
        tracker: &TransferTracker,
    ) -> Result<Either<ErrorResponse, Unit>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        ensure_fresh(tracker)?;
        let outcome = self.run_upload(request, &cancel, tracker).await;
        tracker.finish(&outcome);
        outcome
    }

    async fn run_upload<R>(
        &self,
        request: UploadRequest<R>,
        cancel: &CancellationToken,
        tracker: &TransferTracker,
    ) -> Result<Either<ErrorResponse, Unit>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        if request.authenticate_sender && !self.api.tokens().has_session().await {
            return Err(Error::NotAuthenticated);
        }

        let resolving = self.recipient_key(request.recipient.as_ref());
        let recipient_key = match cancellable(cancel, resolving).await? {
            Either::Left(error) => return Ok(Either::Left(error)),
            Either::Right(key) => key,
        };

        let exchanging =
            blocking(move || derive_sender_key(KeyPair::generate(), &recipient_key));
        let SenderKeyExchange {
            sender_public,
            nonce,
            proof,
            key,
        } = cancellable(cancel, exchanging).await?;

        let envelope = TransferRequest {
            file_name: request.file_name,
            content_type: request.content_type,
            sender_public_key: sender_public,
            key_exchange_nonce: nonce,
            key_exchange_proof: proof,
            lifetime_hours: request
                .lifetime_hours
                .unwrap_or(self.default_lifetime_hours),
        };

        let encrypting =
            EncryptionStream::new(request.plaintext, request.plaintext_length, key, nonce);
        let ciphertext_length = encrypting.ciphertext_length();
        let ciphertext: ByteStream = Box::pin(encrypting);

        tracker.advance(TransferState::StreamingUpload)?;
        info!(
            file = %envelope.file_name,
            anonymous = request.recipient.is_none(),
            bytes = request.plaintext_length,
            "Uploading transfer"
        );

        // Cancelling drops the request future, and with it the encryption
        // stream and its key.
        cancellable(
            cancel,
            self.api.file_transfer().upload_file_transfer(
                request.recipient.as_ref(),
                &envelope,
                ciphertext,
                ciphertext_length,
                request.authenticate_sender,
            ),
        )
        .await
    }

    /// Registered key of the recipient, or the server's anonymous key.
    async fn recipient_key(
        &self,
        recipient: Maybe<&Username>,
    ) -> Result<Either<ErrorResponse, PublicKey>> {
        let response = match recipient {
            Maybe::None => self.api.file_transfer().anonymous_key().await?,
            Maybe::Some(username) => self
                .api
                .user_key()
                .get_public_key(username)
                .await?
                .map_left(recipient_not_found),
        };
        Ok(response.map(|r| r.public_key))
    }

    /// Download, verify and decrypt a transfer into the file `destination`.
    ///
    /// The key exchange proof is checked before any ciphertext is fetched.
    /// Plaintext is staged in a temporary file beside `destination` and
    /// moved into place only after the final chunk authenticates. On any
    /// failure the staged file is removed and `destination` is untouched.
    ///
    /// # Errors
    /// - `ProofMismatch` if `recipient` does not match the sender's key
    /// - `Corrupted` if any chunk fails authentication or the stream is cut
    /// - `Cancelled` if `cancel` fires first
    /// - `Io` if the staging file cannot be created or moved into place
    pub async fn download(
        &self,
        id: &TransferId,
        recipient: &SecretKey,
        destination: &Path,
        cancel: CancellationToken,
    ) -> Result<Either<ErrorResponse, TransferPreview>> {
        self.download_tracked(id, recipient, destination, cancel, &TransferTracker::new())
            .await
    }

    /// [`TransferOrchestrator::download`], publishing progress on `tracker`.
    pub async fn download_tracked(
        &self,
        id: &TransferId,
        recipient: &SecretKey,
        destination: &Path,
        cancel: CancellationToken,
        tracker: &TransferTracker,
    ) -> Result<Either<ErrorResponse, TransferPreview>> {
        ensure_fresh(tracker)?;
        let outcome = self
            .download_staged(id, recipient, destination, &cancel, tracker)
            .await;
        tracker.finish(&outcome);
        outcome
    }

    /// Download, verify and decrypt a transfer into memory.
    ///
    /// The plaintext is returned only once every chunk has authenticated;
    /// on failure the partial buffer is zeroized and dropped.
    pub async fn download_bytes(
        &self,
        id: &TransferId,
        recipient: &SecretKey,
        cancel: CancellationToken,
    ) -> Result<Either<ErrorResponse, DownloadedTransfer>> {
        let tracker = TransferTracker::new();
        let mut staged = Zeroizing::new(Vec::<u8>::new());
        let outcome = self
            .run_download(id, recipient, &mut *staged, &cancel, &tracker)
            .await;
        tracker.finish(&outcome);

        Ok(outcome?.map(|preview| DownloadedTransfer {
            preview,
            plaintext: staged,
        }))
    }

    async fn download_staged(
        &self,
        id: &TransferId,
        recipient: &SecretKey,
        destination: &Path,
        cancel: &CancellationToken,
        tracker: &TransferTracker,
    ) -> Result<Either<ErrorResponse, TransferPreview>> {
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        // Dropping `staged` on any early return deletes the partial plaintext.
        let staged = tempfile::NamedTempFile::new_in(dir)?;
        let mut file = tokio::fs::File::from_std(staged.reopen()?);

        let outcome = self
            .run_download(id, recipient, &mut file, cancel, tracker)
            .await?;
        if outcome.is_right() {
            file.sync_all().await?;
            drop(file);
            staged
                .persist(destination)
                .map_err(|e| Error::Io(e.error))?;
            debug!(path = %destination.display(), "Download committed");
        }
        Ok(outcome)
    }

    /// Decrypt into `staging`, which the caller releases only on success.
    async fn run_download<W>(
        &self,
        id: &TransferId,
        recipient: &SecretKey,
        staging: &mut W,
        cancel: &CancellationToken,
        tracker: &TransferTracker,
    ) -> Result<Either<ErrorResponse, TransferPreview>>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let file_transfer = self.api.file_transfer();
        let previewing = file_transfer.preview(id);
        let preview = match cancellable(cancel, previewing).await? {
            Either::Left(error) => return Ok(Either::Left(error)),
            Either::Right(preview) => preview,
        };

        let deriving = recipient_transfer_key(recipient.clone(), &preview);
        let key = cancellable(cancel, deriving).await?;

        let fetching = file_transfer.ciphertext(id);
        let download = match cancellable(cancel, fetching).await? {
            Either::Left(error) => return Ok(Either::Left(error)),
            Either::Right(download) => download,
        };
        if download.content_length != preview.ciphertext_length {
            return Err(Error::Corrupted(format!(
                "Server sent {} ciphertext bytes, transfer declares {}",
                download.content_length, preview.ciphertext_length
            )));
        }

        let mut decrypting = DecryptionStream::new(
            download.stream,
            download.content_length,
            key,
            preview.key_exchange_nonce,
        )?;

        tracker.advance(TransferState::StreamingDownload)?;
        info!(transfer = %id, bytes = decrypting.plaintext_length(), "Downloading transfer");

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = decrypting.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                written = staging.write_all(&chunk) => written?,
            }
        }
        staging.flush().await?;

        Ok(Either::Right(preview))
    }
}

/// Recompute the transfer key on the recipient side and check the proof.
async fn recipient_transfer_key(
    recipient: SecretKey,
    preview: &TransferPreview,
) -> Result<TransferKey> {
    let sender_public = preview.sender_public_key;
    let proof = preview.key_exchange_proof;
    blocking(move || {
        let key = derive_recipient_key(&recipient, &sender_public)?;
        verify_proof(&key, &proof)?;
        Ok(key)
    })
    .await
}

/// An unknown recipient is reported as `recipientNotFound`.
fn recipient_not_found(error: ErrorResponse) -> ErrorResponse {
    if error.is(KnownErrorCode::UserNotFound) || error.error_code == ErrorCode::Numeric(404) {
        ErrorResponse::new(KnownErrorCode::RecipientNotFound)
    } else {
        error
    }
}

fn ensure_fresh(tracker: &TransferTracker) -> Result<()> {
    if tracker.state() != TransferState::PreparingKeyExchange {
        return Err(Error::InvalidInput(
            "Transfer tracker has already been used".to_string(),
        ));
    }
    Ok(())
}

/// Run CPU-heavy key work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Crypto(format!("Key exchange task failed: {}", e)))?
}

/// Race `future` against cancellation.
async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}
