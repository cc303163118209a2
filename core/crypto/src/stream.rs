//! Streaming encryption for transfer payloads.
//!
//! The payload is cut into fixed-size chunks, each sealed independently so
//! uploads and downloads run in constant memory.
//!
//! # Format
//! - Chunk `i` is `ciphertext || tag`, sealed under nonce `prefix || i`
//! - Associated data: version (1 byte) + plaintext length (8 bytes LE) +
//!   final flag (1 byte)
//! - An empty payload still produces one (empty) authenticated chunk
//!
//! Binding the declared length and the final flag into every chunk means a
//! truncated, extended or reordered ciphertext never authenticates.

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use zeroize::Zeroize;

use crate::aead::{chunk_nonce, open, seal, NONCE_SIZE, TAG_SIZE};
use crate::keys::{KeyExchangeNonce, TransferKey};
use sealdrop_common::{Error, Result};

/// Plaintext bytes per chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Stream format version, bound into every chunk.
pub const STREAM_VERSION: u8 = 1;

/// Number of chunks for a payload of `plaintext_len` bytes.
pub fn chunk_count(plaintext_len: u64, chunk_size: usize) -> u64 {
    if plaintext_len == 0 {
        1
    } else {
        plaintext_len.div_ceil(chunk_size as u64)
    }
}

/// Exact ciphertext length for a payload of `plaintext_len` bytes.
pub fn ciphertext_length(plaintext_len: u64, chunk_size: usize) -> u64 {
    plaintext_len + chunk_count(plaintext_len, chunk_size) * TAG_SIZE as u64
}

/// Recover the plaintext length from a declared ciphertext length.
///
/// # Errors
/// - `Corrupted` if no plaintext length produces exactly `ciphertext_len`
pub fn plaintext_length(ciphertext_len: u64, chunk_size: usize) -> Result<u64> {
    let sealed_chunk = (chunk_size + TAG_SIZE) as u64;
    let full_chunks = ciphertext_len / sealed_chunk;
    let remainder = ciphertext_len % sealed_chunk;

    let plaintext_len = if remainder == 0 {
        full_chunks * chunk_size as u64
    } else if remainder >= TAG_SIZE as u64 {
        full_chunks * chunk_size as u64 + remainder - TAG_SIZE as u64
    } else {
        return Err(Error::Corrupted(format!(
            "Ciphertext length {} is not a valid chunk layout",
            ciphertext_len
        )));
    };

    if ciphertext_length(plaintext_len, chunk_size) != ciphertext_len {
        return Err(Error::Corrupted(format!(
            "Ciphertext length {} is not a valid chunk layout",
            ciphertext_len
        )));
    }
    Ok(plaintext_len)
}

/// Per-transfer chunk sealer/opener.
///
/// Owns the transfer key and the chunk counter. The counter only moves
/// forward, so a nonce is never reused for this key.
pub struct ChunkCipher {
    key: TransferKey,
    nonce: KeyExchangeNonce,
    chunk_size: usize,
    plaintext_len: u64,
    counter: u64,
}

impl ChunkCipher {
    /// Create a cipher for a payload of `plaintext_len` bytes.
    pub fn new(key: TransferKey, nonce: KeyExchangeNonce, plaintext_len: u64) -> Self {
        Self {
            key,
            nonce,
            chunk_size: CHUNK_SIZE,
            plaintext_len,
            counter: 0,
        }
    }

    /// Set a custom chunk size. Both sides must agree on it.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Declared plaintext length.
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext_len
    }

    /// Chunk size in plaintext bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total number of chunks in this stream.
    pub fn total_chunks(&self) -> u64 {
        chunk_count(self.plaintext_len, self.chunk_size)
    }

    /// Number of chunks processed so far.
    pub fn chunks_processed(&self) -> u64 {
        self.counter
    }

    /// Whether every chunk has been processed.
    pub fn is_complete(&self) -> bool {
        self.counter >= self.total_chunks()
    }

    /// Whether the next chunk is the last one.
    pub fn is_final_chunk(&self) -> bool {
        self.counter + 1 == self.total_chunks()
    }

    /// Plaintext length of the next chunk.
    pub fn next_plaintext_len(&self) -> usize {
        if self.is_final_chunk() {
            (self.plaintext_len - (self.total_chunks() - 1) * self.chunk_size as u64) as usize
        } else {
            self.chunk_size
        }
    }

    /// Effective nonce of the next chunk.
    pub fn next_nonce(&self) -> [u8; NONCE_SIZE] {
        chunk_nonce(&self.nonce, self.counter)
    }

    fn associated_data(&self) -> [u8; 10] {
        let mut aad = [0u8; 10];
        aad[0] = STREAM_VERSION;
        aad[1..9].copy_from_slice(&self.plaintext_len.to_le_bytes());
        aad[9] = u8::from(self.is_final_chunk());
        aad
    }

    /// Seal the next chunk.
    ///
    /// # Errors
    /// - `Crypto` if the stream is already complete
    /// - `InvalidInput` if `plaintext` is not exactly `next_plaintext_len()` bytes
    pub fn seal_next(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.is_complete() {
            return Err(Error::Crypto("Encryption stream already finished".to_string()));
        }
        if plaintext.len() != self.next_plaintext_len() {
            return Err(Error::InvalidInput(format!(
                "Chunk {} must be {} bytes, got {}",
                self.counter,
                self.next_plaintext_len(),
                plaintext.len()
            )));
        }

        let sealed = seal(&self.key, &self.next_nonce(), &self.associated_data(), plaintext)?;
        self.counter += 1;
        Ok(sealed)
    }

    /// Open and authenticate the next chunk.
    ///
    /// # Errors
    /// - `Corrupted` on wrong size, extra chunks or failed authentication
    pub fn open_next(&mut self, sealed: &[u8]) -> Result<Vec<u8>> {
        if self.is_complete() {
            return Err(Error::Corrupted("Data after final chunk".to_string()));
        }
        if sealed.len() != self.next_plaintext_len() + TAG_SIZE {
            return Err(Error::Corrupted(format!(
                "Chunk {} has wrong length {}",
                self.counter,
                sealed.len()
            )));
        }

        let opened = open(&self.key, &self.next_nonce(), &self.associated_data(), sealed)
            .map_err(|_| {
                Error::Corrupted(format!("Chunk {} failed authentication", self.counter))
            })?;
        self.counter += 1;
        Ok(opened)
    }
}

/// Lazy, forward-only encryption of a plaintext source.
///
/// Yields sealed chunks as the source is read. Not restartable: to retry,
/// build a new stream over a fresh source. The plaintext buffer is zeroized
/// whenever a chunk is sealed, on failure and on drop.
pub struct EncryptionStream<R> {
    source: R,
    cipher: ChunkCipher,
    buffer: Vec<u8>,
    filled: usize,
    finished: bool,
}

impl<R: AsyncRead + Unpin> EncryptionStream<R> {
    /// Wrap `source`, which must yield exactly `plaintext_len` bytes.
    pub fn new(source: R, plaintext_len: u64, key: TransferKey, nonce: KeyExchangeNonce) -> Self {
        Self {
            source,
            cipher: ChunkCipher::new(key, nonce, plaintext_len),
            buffer: Vec::new(),
            filled: 0,
            finished: false,
        }
    }

    /// Set a custom chunk size. Must be called before the first poll.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.cipher.chunk_size = size.max(1);
        self
    }

    /// Declared plaintext length.
    pub fn plaintext_length(&self) -> u64 {
        self.cipher.plaintext_len()
    }

    /// Exact number of ciphertext bytes this stream will produce.
    pub fn ciphertext_length(&self) -> u64 {
        ciphertext_length(self.cipher.plaintext_len(), self.cipher.chunk_size())
    }

    /// Number of chunks produced so far.
    pub fn chunks_emitted(&self) -> u64 {
        self.cipher.chunks_processed()
    }

    fn fail(&mut self, err: Error) -> Poll<Option<Result<Bytes>>> {
        self.finished = true;
        self.buffer.zeroize();
        self.filled = 0;
        Poll::Ready(Some(Err(err)))
    }
}

impl<R: AsyncRead + Unpin> Stream for EncryptionStream<R> {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let target = this.cipher.next_plaintext_len();
        if this.buffer.len() < target {
            this.buffer.resize(target, 0);
        }

        while this.filled < target {
            let mut read_buf = ReadBuf::new(&mut this.buffer[this.filled..target]);
            if let Err(e) = ready!(Pin::new(&mut this.source).poll_read(cx, &mut read_buf)) {
                return this.fail(e.into());
            }
            let n = read_buf.filled().len();
            if n == 0 {
                let declared = this.cipher.plaintext_len();
                return this.fail(Error::InvalidInput(format!(
                    "Plaintext source ended before the declared {} bytes",
                    declared
                )));
            }
            this.filled += n;
        }

        // The source must end exactly at the declared length.
        if this.cipher.is_final_chunk() {
            let mut extra = [0u8; 1];
            let mut read_buf = ReadBuf::new(&mut extra);
            if let Err(e) = ready!(Pin::new(&mut this.source).poll_read(cx, &mut read_buf)) {
                return this.fail(e.into());
            }
            if !read_buf.filled().is_empty() {
                let declared = this.cipher.plaintext_len();
                return this.fail(Error::InvalidInput(format!(
                    "Plaintext source is longer than the declared {} bytes",
                    declared
                )));
            }
        }

        let sealed = this.cipher.seal_next(&this.buffer[..target]);
        this.buffer[..target].zeroize();
        this.filled = 0;

        match sealed {
            Ok(chunk) => {
                if this.cipher.is_complete() {
                    this.finished = true;
                    this.buffer.zeroize();
                }
                Poll::Ready(Some(Ok(Bytes::from(chunk))))
            }
            Err(e) => this.fail(e),
        }
    }
}

impl<R> Drop for EncryptionStream<R> {
    fn drop(&mut self) {
        self.buffer.zeroize();
    }
}

/// Lazy, forward-only decryption of a ciphertext byte stream.
///
/// Every yielded chunk has been authenticated. The first failure ends the
/// stream with `Corrupted`; nothing is yielded after it. The final chunk is
/// only released once the source is confirmed to hold no trailing bytes.
pub struct DecryptionStream<S> {
    source: S,
    cipher: ChunkCipher,
    pending: Bytes,
    sealed: Vec<u8>,
    held_final: Option<Bytes>,
    finished: bool,
}

impl<S: Stream<Item = Result<Bytes>> + Unpin> DecryptionStream<S> {
    /// Wrap a ciphertext stream whose exact length is `ciphertext_len`.
    ///
    /// # Errors
    /// - `Corrupted` if `ciphertext_len` is not a valid chunk layout
    pub fn new(
        source: S,
        ciphertext_len: u64,
        key: TransferKey,
        nonce: KeyExchangeNonce,
    ) -> Result<Self> {
        Self::with_chunk_size(source, ciphertext_len, key, nonce, CHUNK_SIZE)
    }

    /// Same as [`DecryptionStream::new`] with a custom chunk size.
    pub fn with_chunk_size(
        source: S,
        ciphertext_len: u64,
        key: TransferKey,
        nonce: KeyExchangeNonce,
        chunk_size: usize,
    ) -> Result<Self> {
        let chunk_size = chunk_size.max(1);
        let plaintext_len = plaintext_length(ciphertext_len, chunk_size)?;
        Ok(Self {
            source,
            cipher: ChunkCipher::new(key, nonce, plaintext_len).with_chunk_size(chunk_size),
            pending: Bytes::new(),
            sealed: Vec::new(),
            held_final: None,
            finished: false,
        })
    }

    /// Plaintext length implied by the declared ciphertext length.
    pub fn plaintext_length(&self) -> u64 {
        self.cipher.plaintext_len()
    }

    fn fail(&mut self, err: Error) -> Poll<Option<Result<Bytes>>> {
        self.finished = true;
        self.held_final = None;
        self.sealed.clear();
        Poll::Ready(Some(Err(err)))
    }
}

impl<S: Stream<Item = Result<Bytes>> + Unpin> Stream for DecryptionStream<S> {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            if this.held_final.is_some() {
                if !this.pending.is_empty() {
                    let trailing = "Trailing data after final chunk".to_string();
                    return this.fail(Error::Corrupted(trailing));
                }
                match ready!(Pin::new(&mut this.source).poll_next(cx)) {
                    Some(Ok(extra)) if extra.is_empty() => continue,
                    Some(Ok(_)) => {
                        return this.fail(Error::Corrupted(
                            "Trailing data after final chunk".to_string(),
                        ))
                    }
                    Some(Err(e)) => return this.fail(e),
                    None => {
                        this.finished = true;
                        return Poll::Ready(this.held_final.take().map(Ok));
                    }
                }
            }

            let target = this.cipher.next_plaintext_len() + TAG_SIZE;
            while this.sealed.len() < target {
                if this.pending.is_empty() {
                    match ready!(Pin::new(&mut this.source).poll_next(cx)) {
                        Some(Ok(bytes)) => this.pending = bytes,
                        Some(Err(e)) => return this.fail(e),
                        None => {
                            return this.fail(Error::Corrupted("Ciphertext truncated".to_string()))
                        }
                    }
                    continue;
                }
                let take = (target - this.sealed.len()).min(this.pending.len());
                let part = this.pending.split_to(take);
                this.sealed.extend_from_slice(&part);
            }

            let opened = this.cipher.open_next(&this.sealed);
            this.sealed.clear();

            match opened {
                Err(e) => return this.fail(e),
                Ok(plaintext) if this.cipher.is_complete() => {
                    this.held_final = Some(Bytes::from(plaintext));
                }
                Ok(plaintext) => return Poll::Ready(Some(Ok(Bytes::from(plaintext)))),
            }
        }
    }
}

/// Encrypt a complete byte slice.
///
/// This is a convenience function for when the complete data is available.
pub fn encrypt_bytes(key: &TransferKey, nonce: &KeyExchangeNonce, data: &[u8]) -> Result<Vec<u8>> {
    let mut cipher = ChunkCipher::new(key.clone(), *nonce, data.len() as u64);
    seal_all(&mut cipher, data)
}

/// Decrypt a complete byte slice produced by [`encrypt_bytes`].
pub fn decrypt_bytes(key: &TransferKey, nonce: &KeyExchangeNonce, data: &[u8]) -> Result<Vec<u8>> {
    let plaintext_len = plaintext_length(data.len() as u64, CHUNK_SIZE)?;
    let mut cipher = ChunkCipher::new(key.clone(), *nonce, plaintext_len);
    open_all(&mut cipher, data)
}

fn seal_all(cipher: &mut ChunkCipher, data: &[u8]) -> Result<Vec<u8>> {
    let mut output =
        Vec::with_capacity(ciphertext_length(cipher.plaintext_len(), cipher.chunk_size()) as usize);
    let mut offset = 0;
    while !cipher.is_complete() {
        let len = cipher.next_plaintext_len();
        output.extend_from_slice(&cipher.seal_next(&data[offset..offset + len])?);
        offset += len;
    }
    Ok(output)
}

fn open_all(cipher: &mut ChunkCipher, data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(cipher.plaintext_len() as usize);
    let mut offset = 0;
    while !cipher.is_complete() {
        let len = cipher.next_plaintext_len() + TAG_SIZE;
        let chunk = data
            .get(offset..offset + len)
            .ok_or_else(|| Error::Corrupted("Ciphertext truncated".to_string()))?;
        output.extend_from_slice(&cipher.open_next(chunk)?);
        offset += len;
    }
    if offset != data.len() {
        return Err(Error::Corrupted("Trailing data after final chunk".to_string()));
    }
    Ok(output)
}
