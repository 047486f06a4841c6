//! Chunked authenticated encryption for tokio byte streams.
//!
//! [`EncryptedWriter`] splits plaintext of any length into fixed-size
//! chunks and seals each one with an AEAD (AES-GCM by default) under its
//! own nonce. [`EncryptedReader`] verifies every chunk before releasing
//! any of its plaintext, and reports a stream that was cut short instead
//! of returning it as complete.
//!
//! ```no_run
//! use aesgcm_io::{EncryptedReader, EncryptedWriter, WriterConfig};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let key = [0x42; 32];
//!
//! let mut writer = EncryptedWriter::new(Vec::new(), &key, WriterConfig::default())?;
//! writer.write_all(b"attack at dawn").await?;
//! writer.close().await?;
//! let ciphertext = writer.into_inner();
//!
//! let mut reader = EncryptedReader::new(&ciphertext[..], &key).await?;
//! let mut plaintext = Vec::new();
//! reader.read_to_end(&mut plaintext).await?;
//! assert_eq!(plaintext, b"attack at dawn");
//! # Ok(())
//! # }
//! ```

mod cipher;
mod error;
mod frame;
mod nonce;
mod reader;
mod writer;


pub use cipher::Algorithm;
pub use error::Error;
pub use frame::{ciphertext_chunk_size, DEFAULT_CHUNK_SIZE, HEADER_SIZE, MAX_CHUNK_SIZE};
pub use nonce::{NonceSequencer, MAX_CHUNKS};
pub use reader::{AsyncReadable, EncryptedReader};
pub use writer::{AsyncWritable, EncryptedWriter, WriterConfig};

/// Length of an authentication tag.
pub const TAG_SIZE: usize = 16;

/// Length of a nonce.
pub const NONCE_SIZE: usize = 12;

/// Lifecycle of an [`EncryptedWriter`] or [`EncryptedReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Constructed, no data moved yet.
    Created,
    /// In use.
    Open,
    /// Writer: closed successfully. Reader: final chunk verified and consumed.
    Closed,
    /// An operation failed. Nothing further succeeds.
    Faulted,
}
