use pin_project::pin_project;
use std::{
    io::ErrorKind,
    pin::Pin,
    task::{ready, Context, Poll},
};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, ReadBuf};
use tracing::{debug, trace, warn};

use crate::{
    cipher::Cipher,
    frame::{self, ChunkBuf, Header, Tail, HEADER_SIZE},
    Algorithm, Error, NonceSequencer, Status,
};

pub trait AsyncReadable: AsyncRead + Send + Unpin {}
impl<T: AsyncRead + Send + Unpin> AsyncReadable for T {}

#[derive(PartialEq, Debug, Clone, Copy)]
enum Mode {
    /// Receiving the ciphertext of the next chunk.
    Filling,
    /// Handing out the plaintext of a verified chunk.
    Serving { last: bool },
    /// The final chunk was verified and fully read.
    Done,
    Faulted,
}

/// Decrypts and verifies a stream made by [`EncryptedWriter`](crate::EncryptedWriter).
///
/// Chunks are opened strictly in order, one at a time, and a chunk's
/// plaintext is only handed out after its tag checks out. End of file is
/// reported only after the final chunk verified; a stream that stops
/// anywhere else is an error.
#[pin_project]
pub struct EncryptedReader<T: AsyncReadable> {
    #[pin]
    reader: T,
    cipher: Cipher,
    sequencer: NonceSequencer,
    header: Header,
    bytes: ChunkBuf,
    mode: Mode,
    started: bool,
}

impl<T: AsyncReadable> EncryptedReader<T> {
    /// Reads the stream header from `reader`.
    pub async fn new(mut reader: T, key: &[u8]) -> Result<Self, Error> {
        let mut header = [0; HEADER_SIZE];
        reader
            .read_exact(&mut header)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::UnexpectedEof => {
                    Error::Header(format!("stream is shorter than the {HEADER_SIZE} byte header"))
                }
                _ => Error::Transport {
                    chunk: 0,
                    source: err,
                },
            })?;

        let header = Header::parse(&header)?;
        let cipher = Cipher::new(header.algorithm, key)?;
        debug!(
            algorithm = ?header.algorithm,
            chunk_size = header.chunk_size,
            "read encrypted stream header"
        );

        Ok(Self {
            reader,
            cipher,
            sequencer: NonceSequencer::from_base(header.base_nonce),
            bytes: ChunkBuf::with_capacity(frame::ciphertext_chunk_size(header.chunk_size)),
            header,
            mode: Mode::Filling,
            started: false,
        })
    }

    pub fn status(&self) -> Status {
        match self.mode {
            Mode::Done => Status::Closed,
            Mode::Faulted => Status::Faulted,
            _ if !self.started => Status::Created,
            _ => Status::Open,
        }
    }

    /// Number of chunks verified so far.
    pub fn chunks(&self) -> u64 {
        self.sequencer.index()
    }

    pub fn chunk_size(&self) -> usize {
        self.header.chunk_size
    }

    pub fn algorithm(&self) -> Algorithm {
        self.header.algorithm
    }

    pub fn get_ref(&self) -> &T {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.reader
    }

    pub fn into_inner(self) -> T {
        self.reader
    }

    /// Reads from the inner reader into self.bytes, up to `upto` bytes in total.
    /// Returns how many bytes were read.
    fn poll_inner_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        upto: usize,
    ) -> Poll<std::io::Result<usize>> {
        let this = self.project();
        *this.started = true;

        let mut read_buf = ReadBuf::uninit(this.bytes.spare_mut(upto));
        ready!(this.reader.poll_read(cx, &mut read_buf))?;
        let bytes_read = read_buf.filled().len();

        // SAFETY: ReadBuf only reports bytes as filled once they are initialized
        unsafe { this.bytes.assume_filled(bytes_read) };
        Poll::Ready(Ok(bytes_read))
    }

    /// Collects the next chunk and opens it.
    fn poll_fill(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        let frame_len = frame::ciphertext_chunk_size(self.header.chunk_size);

        while self.bytes.len() < frame_len {
            let chunk = self.sequencer.index();
            let bytes_read = ready!(self.as_mut().poll_inner_read(cx, frame_len))
                .map_err(|source| Error::Transport { chunk, source })?;

            if bytes_read == 0 {
                return Poll::Ready(self.open_tail());
            }
        }

        Poll::Ready(self.open(false))
    }

    /// Handles end of input in the middle of collecting a chunk.
    fn open_tail(&mut self) -> Result<(), Error> {
        let chunk = self.sequencer.index();
        match frame::classify_tail(self.bytes.len()) {
            Tail::Missing => Err(Error::UnexpectedEnd { chunk }),
            Tail::Malformed => {
                let len = self.bytes.len();
                warn!(chunk, len, "final chunk too short for a tag");
                Err(Error::Framing { chunk, len })
            }
            Tail::Final(_) => self.open(true),
        }
    }

    fn open(&mut self, is_final: bool) -> Result<(), Error> {
        let chunk = self.sequencer.index();
        let nonce = self.sequencer.next_nonce()?;

        if self
            .cipher
            .open(&nonce, is_final, self.bytes.as_mut_bytes())
            .is_err()
        {
            warn!(chunk, is_final, "chunk failed authentication");
            return Err(Error::Authentication { chunk });
        }

        trace!(chunk, len = self.bytes.len(), is_final, "opened chunk");
        self.mode = Mode::Serving { last: is_final };
        Ok(())
    }

    fn poll_plaintext_inner(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), Error>> {
        loop {
            match self.mode {
                Mode::Faulted => return Poll::Ready(Err(Error::Faulted)),
                Mode::Done => return Poll::Ready(Ok(())),
                Mode::Serving { last } => {
                    if !self.bytes.data().is_empty() {
                        return Poll::Ready(Ok(()));
                    }

                    self.bytes.clear();
                    if last {
                        debug!(chunks = self.chunks(), "reached end of encrypted stream");
                        self.mode = Mode::Done;
                    } else {
                        self.mode = Mode::Filling;
                    }
                }
                Mode::Filling => ready!(self.as_mut().poll_fill(cx))?,
            }
        }
    }

    /// Makes verified plaintext available in self.bytes.
    /// Ready with empty self.bytes means end of stream.
    fn poll_plaintext(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        let poll = self.as_mut().poll_plaintext_inner(cx);
        if let Poll::Ready(Err(err)) = &poll {
            if self.mode != Mode::Faulted {
                debug!(chunk = self.chunks(), %err, "encrypted reader faulted");
                self.mode = Mode::Faulted;
                // nothing of a chunk that failed may be released
                self.bytes.clear();
            }
        }
        poll
    }
}

impl<T: AsyncReadable> AsyncRead for EncryptedReader<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        ready!(self.as_mut().poll_plaintext(cx))?;

        let chunk = self.bytes.data();
        let num_bytes = std::cmp::min(buf.remaining(), chunk.len());

        buf.put_slice(&chunk[0..num_bytes]);

        self.bytes.advance_cursor(num_bytes);

        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncReadable> AsyncBufRead for EncryptedReader<T> {
    fn poll_fill_buf(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<&[u8]>> {
        ready!(self.as_mut().poll_plaintext(cx))?;
        let this = self.project();
        Poll::Ready(Ok(this.bytes.data()))
    }

    fn consume(mut self: Pin<&mut Self>, amt: usize) {
        self.bytes.advance_cursor(amt);
    }
}
