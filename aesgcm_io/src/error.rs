use std::io::ErrorKind;
use thiserror::Error;

/// Everything that can go wrong while encrypting or decrypting a stream.
///
/// The first error returned by a stream is final: the stream moves to
/// [`Status::Faulted`](crate::Status::Faulted) and every later call
/// returns [`Error::Faulted`].
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid key length, chunk size or other construction parameter.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The stream header is missing, truncated or malformed.
    #[error("Invalid stream header: {0}")]
    Header(String),

    /// The underlying byte stream failed.
    #[error("IO error at chunk {chunk}: {source}")]
    Transport {
        chunk: u64,
        #[source]
        source: std::io::Error,
    },

    /// The stream ended with fewer bytes than a tag can occupy.
    #[error("Chunk {chunk} is {len} bytes, too short to hold an authentication tag")]
    Framing { chunk: u64, len: usize },

    /// A chunk failed tag verification.
    #[error("Chunk {chunk} failed authentication")]
    Authentication { chunk: u64 },

    /// The nonce counter is exhausted.
    #[error("Stream exceeds the maximum of {max} chunks")]
    StreamTooLong { max: u64 },

    #[error("Stream was already closed")]
    AlreadyClosed,

    #[error("Can't write to a closed stream")]
    StreamClosed,

    /// The stream ended without a final authenticated chunk.
    #[error("Stream ended before its final chunk (after {chunk} chunks)")]
    UnexpectedEnd { chunk: u64 },

    /// An earlier call on this stream already failed.
    #[error("Stream is unusable after an earlier error")]
    Faulted,
}

impl Error {
    /// Recovers the typed error from an [`std::io::Error`] returned by
    /// the [`tokio::io`] trait impls of the reader and writer.
    pub fn from_io(err: &std::io::Error) -> Option<&Error> {
        err.get_ref()?.downcast_ref::<Error>()
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::StreamTooLong { .. } => ErrorKind::InvalidInput,
            Error::Header(_) | Error::Framing { .. } | Error::Authentication { .. } => {
                ErrorKind::InvalidData
            }
            Error::Transport { source, .. } => source.kind(),
            Error::UnexpectedEnd { .. } => ErrorKind::UnexpectedEof,
            Error::AlreadyClosed | Error::StreamClosed | Error::Faulted => ErrorKind::Other,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        std::io::Error::new(err.kind(), err)
    }
}
