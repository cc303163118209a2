//! Sealdrop client
//!
//! This module provides everything needed to talk to a Sealdrop server:
//! - An HTTP transport and an adapter mapping responses onto `Maybe` / `Either`
//! - Session token storage and per-request authorization
//! - Typed sub-clients for transfers, keys, authentication and recovery
//! - The transfer orchestrator tying key exchange, encryption and transport together

pub mod api;
pub mod config;
pub mod contracts;
pub mod http;
pub mod orchestrator;
pub mod tokens;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use api::ApiClient;
pub use config::ClientConfig;
pub use contracts::{ErrorCode, ErrorResponse, KnownErrorCode, TransferPreview, TransferSummary};
pub use http::TransportAdapter;
pub use orchestrator::{
    DownloadedTransfer, TransferOrchestrator, TransferState, TransferTracker, UploadRequest,
};
pub use tokens::{
    Auth, MemoryTokenRepository, StorageKey, TokenLifecycle, TokenRepository, TokenType,
};
pub use transport::{ByteStream, HttpTransport, ReqwestTransport};
