use pin_project::pin_project;
use rand::{rngs::OsRng, CryptoRng, RngCore};
use std::{
    future::poll_fn,
    io::ErrorKind,
    pin::Pin,
    task::{ready, Context, Poll},
};
use tokio::io::AsyncWrite;
use tracing::{debug, trace};

use crate::{
    cipher::Cipher,
    frame::{self, ChunkBuf, Header},
    Algorithm, Error, NonceSequencer, Status,
};

pub trait AsyncWritable: AsyncWrite + Send + Unpin {}
impl<T: AsyncWrite + Send + Unpin> AsyncWritable for T {}

/// Parameters of a new encrypted stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// Plaintext bytes per chunk. 0 selects [`DEFAULT_CHUNK_SIZE`](crate::DEFAULT_CHUNK_SIZE).
    pub chunk_size: usize,
    pub algorithm: Algorithm,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            chunk_size: frame::DEFAULT_CHUNK_SIZE,
            algorithm: Algorithm::default(),
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
enum Mode {
    /// Collecting plaintext for the next chunk.
    Collecting,
    /// Handing the header or a sealed full chunk to the inner writer.
    Flushing,
    /// Handing the sealed final chunk to the inner writer.
    Finishing,
    Closed,
    Faulted,
}

/// Encrypts everything written to it and passes the ciphertext to an
/// inner [`AsyncWrite`].
///
/// Plaintext is sealed one full chunk at a time. [`EncryptedWriter::close`]
/// (or [`shutdown`](tokio::io::AsyncWriteExt::shutdown)) must be called
/// once at the end to seal the final chunk, otherwise the stream can't
/// be decrypted.
///
/// Flushing hands every sealed chunk to the inner writer, but never seals
/// a partial chunk, so up to `chunk_size - 1` bytes stay buffered until
/// the chunk fills or the stream is closed.
#[pin_project]
pub struct EncryptedWriter<T: AsyncWritable> {
    #[pin]
    writer: T,
    cipher: Cipher,
    sequencer: NonceSequencer,
    chunk_size: usize,
    bytes: ChunkBuf,
    mode: Mode,
    started: bool,
}

impl<T: AsyncWritable> EncryptedWriter<T> {
    /// Creates a writer with a base nonce from the operating system's RNG.
    ///
    /// Nothing is written to `writer` until the first write, flush or close.
    pub fn new(writer: T, key: &[u8], config: WriterConfig) -> Result<Self, Error> {
        Self::with_rng(writer, key, config, &mut OsRng)
    }

    /// Creates a writer that draws its base nonce from `rng`.
    pub fn with_rng<R: RngCore + CryptoRng>(
        writer: T,
        key: &[u8],
        config: WriterConfig,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let chunk_size = frame::resolve_chunk_size(config.chunk_size)?;
        let cipher = Cipher::new(config.algorithm, key)?;
        let sequencer = NonceSequencer::generate(rng);

        let header = Header {
            algorithm: config.algorithm,
            chunk_size,
            base_nonce: *sequencer.base(),
        };

        // the header is always smaller than one sealed chunk
        let mut bytes = ChunkBuf::with_capacity(frame::ciphertext_chunk_size(chunk_size));
        bytes.extend_from_slice(&header.encode());

        Ok(Self {
            writer,
            cipher,
            sequencer,
            chunk_size,
            bytes,
            mode: Mode::Flushing,
            started: false,
        })
    }

    /// Seals the buffered plaintext as the final chunk and hands all
    /// remaining ciphertext to the inner writer, then flushes it.
    ///
    /// Returns [`Error::AlreadyClosed`] if called again. The inner writer
    /// isn't shut down, see [`Self::into_inner`].
    pub async fn close(&mut self) -> Result<(), Error> {
        poll_fn(|cx| Pin::new(&mut *self).poll_close(cx)).await
    }

    pub fn status(&self) -> Status {
        match self.mode {
            Mode::Closed => Status::Closed,
            Mode::Faulted => Status::Faulted,
            _ if !self.started => Status::Created,
            _ => Status::Open,
        }
    }

    /// Number of chunks sealed so far.
    pub fn chunks(&self) -> u64 {
        self.sequencer.index()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn get_ref(&self) -> &T {
        &self.writer
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.writer
    }

    pub fn into_inner(self) -> T {
        self.writer
    }

    /// Index of the chunk currently being handed to the inner writer.
    fn current_chunk(&self) -> u64 {
        self.sequencer.index().saturating_sub(1)
    }

    fn fault(&mut self, err: &dyn std::fmt::Display) {
        if self.mode != Mode::Faulted {
            debug!(chunk = self.current_chunk(), %err, "encrypted writer faulted");
            self.mode = Mode::Faulted;
            self.bytes.clear();
        }
    }

    /// Encrypts the buffered plaintext in place.
    ///
    /// The nonce is claimed first, so an exhausted counter fails before
    /// anything of this chunk reaches the inner writer.
    fn seal(&mut self, is_final: bool) -> Result<(), Error> {
        let nonce = self.sequencer.next_nonce()?;
        let chunk = self.current_chunk();
        let len = self.bytes.len();

        self.cipher
            .seal(&nonce, is_final, self.bytes.as_mut_bytes())
            .map_err(|_| Error::Config(format!("cipher refused chunk {chunk} of {len} bytes")))?;
        debug_assert!(self.bytes.len() <= self.bytes.capacity());

        trace!(chunk, len, is_final, "sealed chunk");
        self.mode = if is_final {
            Mode::Finishing
        } else {
            Mode::Flushing
        };
        Ok(())
    }

    /// Hands the buffered header or ciphertext to the inner writer.
    fn poll_drain(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let mut this = self.project();
        *this.started = true;

        while !this.bytes.data().is_empty() {
            let bytes_wrote = ready!(this.writer.as_mut().poll_write(cx, this.bytes.data()))?;
            if bytes_wrote == 0 {
                return Poll::Ready(Err(ErrorKind::WriteZero.into()));
            }
            this.bytes.advance_cursor(bytes_wrote);
        }

        Poll::Ready(Ok(()))
    }

    fn poll_write_inner(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut bytes_taken = 0;

        loop {
            match self.mode {
                Mode::Closed | Mode::Finishing => {
                    return Poll::Ready(Err(Error::StreamClosed.into()))
                }
                Mode::Faulted => return Poll::Ready(Err(Error::Faulted.into())),
                Mode::Flushing => {
                    match self.as_mut().poll_drain(cx) {
                        // report what was taken so far, the chunk drains on the next call
                        Poll::Pending if bytes_taken > 0 => return Poll::Ready(Ok(bytes_taken)),
                        poll => ready!(poll)?,
                    }
                    self.mode = Mode::Collecting;
                }
                Mode::Collecting => {
                    if bytes_taken == buf.len() {
                        return Poll::Ready(Ok(bytes_taken));
                    }

                    let room = self.chunk_size - self.bytes.len();
                    let num_bytes = std::cmp::min(room, buf.len() - bytes_taken);
                    self.bytes
                        .extend_from_slice(&buf[bytes_taken..bytes_taken + num_bytes]);
                    bytes_taken += num_bytes;

                    if self.bytes.len() == self.chunk_size {
                        self.seal(false)?;
                    }
                }
            }
        }
    }

    fn poll_close_inner(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        loop {
            let chunk = self.current_chunk();
            let wrap = |source| Error::Transport { chunk, source };

            match self.mode {
                Mode::Closed => return Poll::Ready(Err(Error::AlreadyClosed)),
                Mode::Faulted => return Poll::Ready(Err(Error::Faulted)),
                Mode::Flushing => {
                    ready!(self.as_mut().poll_drain(cx)).map_err(wrap)?;
                    self.mode = Mode::Collecting;
                }
                Mode::Collecting => self.seal(true)?,
                Mode::Finishing => {
                    ready!(self.as_mut().poll_drain(cx)).map_err(wrap)?;
                    ready!(self.as_mut().project().writer.poll_flush(cx)).map_err(wrap)?;

                    debug!(chunks = self.chunks(), "closed encrypted stream");
                    self.mode = Mode::Closed;
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        let poll = self.as_mut().poll_close_inner(cx);
        if let Poll::Ready(Err(err)) = &poll {
            if !matches!(err, Error::AlreadyClosed) {
                self.fault(err);
            }
        }
        poll
    }
}

impl<T: AsyncWritable> AsyncWrite for EncryptedWriter<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = self.as_mut().poll_write_inner(cx, buf);
        if let Poll::Ready(Err(err)) = &poll {
            if !matches!(self.mode, Mode::Closed | Mode::Finishing) {
                self.fault(err);
            }
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.mode {
            Mode::Faulted => return Poll::Ready(Err(Error::Faulted.into())),
            Mode::Flushing | Mode::Finishing => {
                if let Err(err) = ready!(self.as_mut().poll_drain(cx)) {
                    self.fault(&err);
                    return Poll::Ready(Err(err));
                }
                if self.mode == Mode::Flushing {
                    self.mode = Mode::Collecting;
                }
            }
            Mode::Collecting | Mode::Closed => {}
        }

        self.project().writer.poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if self.mode != Mode::Closed {
            ready!(self.as_mut().poll_close(cx))?;
        }
        self.project().writer.poll_shutdown(cx)
    }
}

#[cfg(test)]
impl<T: AsyncWritable> EncryptedWriter<T> {
    /// Moves the nonce counter forward, to reach its limit in tests.
    pub(crate) fn skip_to_chunk(&mut self, index: u64) {
        self.sequencer = NonceSequencer::starting_at(*self.sequencer.base(), index);
    }
}
