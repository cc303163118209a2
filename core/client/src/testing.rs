//! In-process server for tests.
//!
//! Implements [`HttpTransport`] by routing requests to an in-memory model of
//! the Sealdrop server: accounts, sessions, registered keys and stored
//! transfers. Ciphertext is stored as uploaded and never decrypted.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use futures::{stream, StreamExt};
use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::contracts::{
    ErrorResponse, InsertKeyPairRequest, KnownErrorCode, LoginRequest, PublicKeyResponse,
    RefreshRequest, RegistrationRequest, SendRecoveryEmailRequest, TokenResponse, TransferPreview,
    TransferRequest, TransferSummary,
};
use crate::transport::{ByteStream, HttpRequest, HttpResponse, HttpTransport, RequestBody};
use sealdrop_common::{Error, Result, TransferId, Username};
use sealdrop_crypto::stream::plaintext_length;
use sealdrop_crypto::{KeyPair, PublicKey, SecretKey, CHUNK_SIZE};

/// Longest lifetime the server accepts.
pub const MAX_LIFETIME_HOURS: u32 = 168;

/// Size of the pieces the ciphertext is served in.
const SERVE_PIECE: usize = 1000;

struct Account {
    password: String,
    public_key: Option<PublicKey>,
}

struct StoredTransfer {
    preview: TransferPreview,
    ciphertext: Vec<u8>,
}

#[derive(Default)]
struct ServerState {
    accounts: HashMap<String, Account>,
    sessions: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    transfers: HashMap<String, StoredTransfer>,
    recovery_emails: Vec<String>,
    next_id: u64,
}

pub struct FakeServer {
    state: Mutex<ServerState>,
    anonymous: KeyPair,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState::default()),
            anonymous: KeyPair::generate(),
            calls: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
        })
    }

    /// Number of requests that reached the server.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Secret half of the anonymous key, as held by the anonymous recipient.
    pub fn anonymous_secret(&self) -> SecretKey {
        self.anonymous.secret_key().clone()
    }

    /// Make every following request fail at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Invalidate every issued session token.
    pub fn revoke_sessions(&self) {
        self.lock().sessions.clear();
    }

    /// Ids of stored transfers, oldest first.
    pub fn transfer_ids(&self) -> Vec<TransferId> {
        let state = self.lock();
        let mut previews: Vec<&TransferPreview> =
            state.transfers.values().map(|t| &t.preview).collect();
        previews.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        previews.into_iter().map(|p| p.id.clone()).collect()
    }

    /// Flip one bit of a stored ciphertext.
    pub fn tamper(&self, id: &TransferId, index: usize) {
        if let Some(transfer) = self.lock().transfers.get_mut(id.as_str()) {
            transfer.ciphertext[index] ^= 0x01;
        }
    }

    /// Replace the stored proof of a transfer.
    pub fn replace_proof(&self, id: &TransferId, proof: sealdrop_crypto::KeyExchangeProof) {
        if let Some(transfer) = self.lock().transfers.get_mut(id.as_str()) {
            transfer.preview.key_exchange_proof = proof;
        }
    }

    /// Addresses recovery emails were requested for.
    pub fn recovery_emails(&self) -> Vec<String> {
        self.lock().recovery_emails.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn caller(&self, headers: &HeaderMap) -> Caller {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Caller::Anonymous;
        };
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default();
        match self.lock().sessions.get(token) {
            Some(username) => Caller::User(username.clone()),
            None => Caller::Rejected,
        }
    }

    fn issue_tokens(
        &self,
        username: &str,
        request_type: crate::tokens::TokenType,
    ) -> TokenResponse {
        let mut state = self.lock();
        let authentication_token = format!("auth-{}", Uuid::new_v4().simple());
        let refresh_token = format!("refresh-{}", Uuid::new_v4().simple());
        state
            .sessions
            .insert(authentication_token.clone(), username.to_string());
        state
            .refresh_tokens
            .insert(refresh_token.clone(), username.to_string());
        TokenResponse {
            authentication_token,
            refresh_token,
            refresh_token_type: request_type,
        }
    }

    fn route(
        &self,
        method: &Method,
        path: &str,
        query: &str,
        caller: Caller,
        content_type: &str,
        body: &[u8],
    ) -> HttpResponse {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            (&Method::POST, ["api", "user", "authentication", "register"]) => {
                let request: RegistrationRequest = match parse(body) {
                    Ok(request) => request,
                    Err(response) => return response,
                };
                let mut state = self.lock();
                if state.accounts.contains_key(request.username.as_str()) {
                    return error(StatusCode::CONFLICT, KnownErrorCode::UsernameTaken);
                }
                state.accounts.insert(
                    request.username.as_str().to_string(),
                    Account {
                        password: request.password,
                        public_key: None,
                    },
                );
                empty(StatusCode::OK)
            }
            (&Method::POST, ["api", "user", "authentication", "login"]) => {
                let request: LoginRequest = match parse(body) {
                    Ok(request) => request,
                    Err(response) => return response,
                };
                let valid = self
                    .lock()
                    .accounts
                    .get(request.username.as_str())
                    .is_some_and(|account| account.password == request.password);
                if !valid {
                    return error(StatusCode::UNAUTHORIZED, KnownErrorCode::InvalidCredentials);
                }
                json(
                    StatusCode::OK,
                    &self.issue_tokens(request.username.as_str(), request.refresh_token_type),
                )
            }
            (&Method::POST, ["api", "user", "authentication", "refresh"]) => {
                let request: RefreshRequest = match parse(body) {
                    Ok(request) => request,
                    Err(response) => return response,
                };
                let username = self.lock().refresh_tokens.remove(&request.refresh_token);
                match username {
                    Some(username) => json(
                        StatusCode::OK,
                        &self.issue_tokens(&username, request.refresh_token_type),
                    ),
                    None => error(StatusCode::UNAUTHORIZED, KnownErrorCode::Unauthorized),
                }
            }
            (&Method::POST, ["api", "user", "authentication", "logout"]) => match caller {
                Caller::User(username) => {
                    self.lock().sessions.retain(|_, user| *user != username);
                    empty(StatusCode::OK)
                }
                _ => unauthorized(),
            },
            (&Method::PUT, ["api", "user", "key"]) => {
                let Caller::User(username) = caller else {
                    return unauthorized();
                };
                let request: InsertKeyPairRequest = match parse(body) {
                    Ok(request) => request,
                    Err(response) => return response,
                };
                let mut state = self.lock();
                match state.accounts.get_mut(&username) {
                    Some(account) if account.public_key.is_some() => {
                        error(StatusCode::CONFLICT, KnownErrorCode::KeyPairAlreadyExists)
                    }
                    Some(account) => {
                        account.public_key = Some(request.public_key);
                        empty(StatusCode::OK)
                    }
                    None => error(StatusCode::NOT_FOUND, KnownErrorCode::UserNotFound),
                }
            }
            (&Method::GET, ["api", "user", username, "public-key"]) => {
                let username = decode(username);
                let key = self
                    .lock()
                    .accounts
                    .get(&username)
                    .and_then(|account| account.public_key);
                match key {
                    Some(public_key) => json(StatusCode::OK, &PublicKeyResponse { public_key }),
                    None => error(StatusCode::NOT_FOUND, KnownErrorCode::UserNotFound),
                }
            }
            (&Method::POST, ["api", "user", "recovery", "email"]) => {
                let request: SendRecoveryEmailRequest = match parse(body) {
                    Ok(request) => request,
                    Err(response) => return response,
                };
                if !request.email_address.as_str().contains('@') {
                    return error(StatusCode::BAD_REQUEST, KnownErrorCode::InvalidEmailAddress);
                }
                self.lock()
                    .recovery_emails
                    .push(request.email_address.as_str().to_string());
                empty(StatusCode::OK)
            }
            (&Method::GET, ["api", "file", "transfer", "anonymous-key"]) => json(
                StatusCode::OK,
                &PublicKeyResponse {
                    public_key: *self.anonymous.public_key(),
                },
            ),
            (&Method::GET, ["api", "file", "transfer", "received"]) => {
                let Caller::User(username) = caller else {
                    return unauthorized();
                };
                let state = self.lock();
                let mut received: Vec<TransferSummary> = state
                    .transfers
                    .values()
                    .filter(|t| {
                        t.preview.recipient.as_ref().map(Username::as_str)
                            == Some(username.as_str())
                    })
                    .map(|t| TransferSummary {
                        id: t.preview.id.clone(),
                        file_name: t.preview.file_name.clone(),
                        sender: t.preview.sender.clone(),
                        ciphertext_length: t.preview.ciphertext_length,
                        expires_at: t.preview.expires_at,
                    })
                    .collect();
                received.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
                json(StatusCode::OK, &received)
            }
            (&Method::POST, ["api", "file", "transfer"]) => {
                self.store_upload(query, caller, content_type, body)
            }
            (&Method::GET, ["api", "file", "transfer", id, "preview"]) => {
                match self.visible_transfer(id, &caller) {
                    Some(preview) => json(StatusCode::OK, &preview),
                    None => error(StatusCode::NOT_FOUND, KnownErrorCode::TransferNotFound),
                }
            }
            (&Method::GET, ["api", "file", "transfer", id, "ciphertext"]) => {
                if self.visible_transfer(id, &caller).is_none() {
                    return error(StatusCode::NOT_FOUND, KnownErrorCode::TransferNotFound);
                }
                let ciphertext = self
                    .lock()
                    .transfers
                    .get(&decode(id))
                    .map(|t| t.ciphertext.clone())
                    .unwrap_or_default();
                let length = ciphertext.len() as u64;
                let pieces: Vec<Result<Bytes>> = ciphertext
                    .chunks(SERVE_PIECE)
                    .map(|piece| Ok(Bytes::copy_from_slice(piece)))
                    .collect();
                HttpResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    content_length: Some(length),
                    body: Box::pin(stream::iter(pieces)),
                }
            }
            _ => error(StatusCode::NOT_FOUND, KnownErrorCode::InvalidRequest),
        }
    }

    fn store_upload(
        &self,
        query: &str,
        caller: Caller,
        content_type: &str,
        body: &[u8],
    ) -> HttpResponse {
        let sender = match caller {
            Caller::User(username) => Username::new(username).ok(),
            Caller::Anonymous => None,
            Caller::Rejected => return unauthorized(),
        };
        let recipient = query
            .strip_prefix("username=")
            .map(decode)
            .filter(|name| !name.is_empty());

        if let Some(name) = &recipient {
            if !self.lock().accounts.contains_key(name) {
                return error(StatusCode::NOT_FOUND, KnownErrorCode::RecipientNotFound);
            }
        }

        let Some((envelope, ciphertext)) = split_multipart(content_type, body) else {
            return error(StatusCode::BAD_REQUEST, KnownErrorCode::InvalidRequest);
        };
        let request: TransferRequest = match parse(envelope) {
            Ok(request) => request,
            Err(response) => return response,
        };
        if request.lifetime_hours == 0 || request.lifetime_hours > MAX_LIFETIME_HOURS {
            return error(StatusCode::BAD_REQUEST, KnownErrorCode::InvalidLifetime);
        }
        if plaintext_length(ciphertext.len() as u64, CHUNK_SIZE).is_err() {
            return error(StatusCode::BAD_REQUEST, KnownErrorCode::InvalidRequest);
        }

        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("transfer-{:04}", state.next_id);
        let now = Utc::now();
        let preview = TransferPreview {
            id: TransferId::new(id.clone()).expect("generated ids are valid"),
            file_name: request.file_name,
            content_type: request.content_type,
            sender,
            recipient: recipient.and_then(|name| Username::new(name).ok()),
            sender_public_key: request.sender_public_key,
            key_exchange_nonce: request.key_exchange_nonce,
            key_exchange_proof: request.key_exchange_proof,
            ciphertext_length: ciphertext.len() as u64,
            created_at: now,
            expires_at: now + Duration::hours(i64::from(request.lifetime_hours)),
        };
        state.transfers.insert(
            id,
            StoredTransfer {
                preview,
                ciphertext: ciphertext.to_vec(),
            },
        );
        empty(StatusCode::OK)
    }

    /// Transfers addressed to a user are visible only to that user.
    fn visible_transfer(&self, id: &str, caller: &Caller) -> Option<TransferPreview> {
        let state = self.lock();
        let transfer = state.transfers.get(&decode(id))?;
        match (&transfer.preview.recipient, caller) {
            (None, _) => Some(transfer.preview.clone()),
            (Some(recipient), Caller::User(user)) if recipient.as_str() == user => {
                Some(transfer.preview.clone())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Caller {
    Anonymous,
    User(String),
    Rejected,
}

#[async_trait]
impl HttpTransport for FakeServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("connection refused".to_string()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (content_type, body) = match request.body {
            RequestBody::Empty => (String::new(), Vec::new()),
            RequestBody::Json(bytes) => ("application/json".to_string(), bytes),
            RequestBody::Stream {
                content_type,
                content_length,
                mut stream,
            } => {
                let mut body = Vec::new();
                while let Some(chunk) = stream.next().await {
                    body.extend_from_slice(&chunk?);
                }
                if content_length.is_some_and(|len| len != body.len() as u64) {
                    return Err(Error::Network("request body length mismatch".to_string()));
                }
                (content_type, body)
            }
        };

        let (path, query) = request.uri.split_once('?').unwrap_or((request.uri.as_str(), ""));
        let caller = self.caller(&request.headers);
        if matches!(caller, Caller::Rejected) {
            return Ok(unauthorized());
        }
        Ok(self.route(&request.method, path, query, caller, &content_type, &body))
    }
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> std::result::Result<T, HttpResponse> {
    serde_json::from_slice(body)
        .map_err(|_| error(StatusCode::BAD_REQUEST, KnownErrorCode::InvalidRequest))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn part_body(part: &[u8]) -> Option<&[u8]> {
    find(part, b"\r\n\r\n").map(|at| &part[at + 4..])
}

/// Split a two-part `multipart/related` body into its envelope and data.
fn split_multipart<'a>(content_type: &str, body: &'a [u8]) -> Option<(&'a [u8], &'a [u8])> {
    let boundary = content_type.split("boundary=").nth(1)?.trim();
    let opening = format!("--{}\r\n", boundary);
    let separator = format!("\r\n--{}\r\n", boundary);
    let closing = format!("\r\n--{}--", boundary);

    let inner = body
        .strip_prefix(opening.as_bytes())?
        .strip_suffix(closing.as_bytes())?;
    let at = find(inner, separator.as_bytes())?;
    let envelope = part_body(&inner[..at])?;
    let data = part_body(&inner[at + separator.len()..])?;
    Some((envelope, data))
}

fn respond(status: StatusCode, body: Vec<u8>) -> HttpResponse {
    let length = body.len() as u64;
    let stream: ByteStream = Box::pin(stream::iter(vec![Ok(Bytes::from(body))]));
    HttpResponse {
        status,
        headers: HeaderMap::new(),
        content_length: Some(length),
        body: stream,
    }
}

fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> HttpResponse {
    respond(status, serde_json::to_vec(value).unwrap_or_default())
}

fn empty(status: StatusCode) -> HttpResponse {
    respond(status, Vec::new())
}

fn error(status: StatusCode, code: KnownErrorCode) -> HttpResponse {
    json(status, &ErrorResponse::new(code))
}

fn unauthorized() -> HttpResponse {
    error(StatusCode::UNAUTHORIZED, KnownErrorCode::Unauthorized)
}
