//! On-wire layout of a stream.
//!
//! ```text
//! header:  [algorithm: u8][chunk_size: u32 BE][base nonce: 12 bytes]
//! chunk:   [ciphertext: chunk_size bytes][tag: 16 bytes]
//! final:   [ciphertext: 0..chunk_size bytes][tag: 16 bytes]
//! ```
//!
//! Chunks carry no length prefix. Every chunk but the last is exactly
//! [`ciphertext_chunk_size`] bytes long, and the last one is shorter.
//! A stream always ends with a final chunk, even an empty one.

use bytes::BytesMut;
use std::mem::MaybeUninit;

use crate::{nonce::Nonce, Algorithm, Error, NONCE_SIZE, TAG_SIZE};

/// Length of the stream header.
pub const HEADER_SIZE: usize = 1 + 4 + NONCE_SIZE;

/// Chunk size used when none is given.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Largest chunk size a reader will accept.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Wire length of a full chunk.
pub fn ciphertext_chunk_size(chunk_size: usize) -> usize {
    chunk_size + TAG_SIZE
}

/// Fixed per-stream parameters, sent ahead of the first chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub algorithm: Algorithm,
    pub chunk_size: usize,
    pub base_nonce: Nonce,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        // chunk_size was checked against MAX_CHUNK_SIZE, which fits a u32
        let chunk_size = self.chunk_size as u32;

        let mut bytes = [0; HEADER_SIZE];
        bytes[0] = self.algorithm.id();
        bytes[1..5].copy_from_slice(&chunk_size.to_be_bytes());
        bytes[5..].copy_from_slice(&self.base_nonce);
        bytes
    }

    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self, Error> {
        let algorithm = Algorithm::from_id(bytes[0])
            .ok_or_else(|| Error::Header(format!("unknown algorithm id {}", bytes[0])))?;

        let mut chunk_size = [0; 4];
        chunk_size.copy_from_slice(&bytes[1..5]);
        let chunk_size = u32::from_be_bytes(chunk_size) as usize;
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Header(format!(
                "chunk size {chunk_size} outside 1..={MAX_CHUNK_SIZE}"
            )));
        }

        let mut base_nonce = [0; NONCE_SIZE];
        base_nonce.copy_from_slice(&bytes[5..]);

        Ok(Self {
            algorithm,
            chunk_size,
            base_nonce,
        })
    }
}

/// Resolves a requested chunk size, where 0 means the default.
pub fn resolve_chunk_size(requested: usize) -> Result<usize, Error> {
    match requested {
        0 => Ok(DEFAULT_CHUNK_SIZE),
        n if n > MAX_CHUNK_SIZE => Err(Error::Config(format!(
            "chunk size {n} exceeds maximum of {MAX_CHUNK_SIZE}"
        ))),
        n => Ok(n),
    }
}

/// How a short read at the end of the transport is to be treated.
#[derive(Debug, PartialEq, Eq)]
pub enum Tail {
    /// Nothing left: the stream was cut at a chunk boundary.
    Missing,
    /// Too short to hold a tag.
    Malformed,
    /// A final chunk of this many plaintext bytes.
    Final(usize),
}

/// Classifies `len` bytes received before end of input.
/// `len` must be smaller than a full chunk.
pub fn classify_tail(len: usize) -> Tail {
    match len {
        0 => Tail::Missing,
        n if n < TAG_SIZE => Tail::Malformed,
        n => Tail::Final(n - TAG_SIZE),
    }
}

/// A flat buffer of fixed capacity with a read cursor.
///
/// Holds one chunk at a time: plaintext collected for sealing, a sealed
/// chunk being handed to the transport, or an opened chunk being read.
/// Never grows past the capacity it was made with.
pub(crate) struct ChunkBuf {
    buf: BytesMut,
    cursor: usize,
}

impl ChunkBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Bytes written but not yet consumed.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.cursor..]
    }

    /// Total bytes written since the last reset, consumed or not.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        debug_assert!(self.buf.len() + bytes.len() <= self.buf.capacity());
        self.buf.extend_from_slice(bytes);
    }

    /// Marks `num_bytes` of data as consumed. Resets the buffer once
    /// everything is consumed.
    pub fn advance_cursor(&mut self, num_bytes: usize) {
        self.cursor += num_bytes;
        assert!(self.cursor <= self.buf.len());

        if self.cursor == self.buf.len() {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.cursor = 0;
    }

    /// Uninitialized space after the written bytes, up to `upto` total bytes.
    pub fn spare_mut(&mut self, upto: usize) -> &mut [MaybeUninit<u8>] {
        let filled = self.buf.len();
        &mut self.buf.spare_capacity_mut()[..upto - filled]
    }

    /// Marks the first `num_bytes` of [`Self::spare_mut`] as written.
    ///
    /// # Safety
    ///
    /// Those bytes must have been initialized.
    pub unsafe fn assume_filled(&mut self, num_bytes: usize) {
        let new_len = self.buf.len() + num_bytes;
        debug_assert!(new_len <= self.buf.capacity());
        self.buf.set_len(new_len);
    }

    /// The whole buffer, for in-place sealing or opening.
    pub fn as_mut_bytes(&mut self) -> &mut BytesMut {
        debug_assert_eq!(self.cursor, 0);
        &mut self.buf
    }
}
