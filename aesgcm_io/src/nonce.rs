use crate::{Error, NONCE_SIZE};
use rand::{CryptoRng, RngCore};

/// Number of trailing nonce bytes used as the chunk counter.
const COUNTER_SIZE: usize = 4;

/// Most chunks a single stream may hold.
pub const MAX_CHUNKS: u64 = 1 << (8 * COUNTER_SIZE);

/// A per-chunk nonce.
pub type Nonce = [u8; NONCE_SIZE];

/// Derives one nonce per chunk from a random base nonce.
///
/// The last 4 bytes of the base are read as a big-endian counter and
/// chunk `i` gets that counter plus `i` (mod 2^32), so no two chunks of a
/// stream share a nonce. The leading 8 bytes never change.
#[derive(Debug, Clone)]
pub struct NonceSequencer {
    base: Nonce,
    index: u64,
}

impl NonceSequencer {
    /// Starts a new sequence from a freshly drawn base nonce.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut base = [0; NONCE_SIZE];
        rng.fill_bytes(&mut base);
        Self::from_base(base)
    }

    /// Rebuilds the sequence a writer started, from the base nonce in the
    /// stream header.
    pub fn from_base(base: Nonce) -> Self {
        Self { base, index: 0 }
    }

    pub fn base(&self) -> &Nonce {
        &self.base
    }

    /// Index of the chunk the next call to [`Self::next_nonce`] is for.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the nonce for the current chunk index and advances.
    ///
    /// Fails with [`Error::StreamTooLong`] once the counter is exhausted,
    /// without advancing.
    pub fn next_nonce(&mut self) -> Result<Nonce, Error> {
        if self.index >= MAX_CHUNKS {
            return Err(Error::StreamTooLong { max: MAX_CHUNKS });
        }

        let nonce = derive(&self.base, self.index);
        self.index += 1;
        Ok(nonce)
    }
}

fn derive(base: &Nonce, index: u64) -> Nonce {
    let mut counter = [0; COUNTER_SIZE];
    counter.copy_from_slice(&base[NONCE_SIZE - COUNTER_SIZE..]);

    // index < MAX_CHUNKS, so this truncation is lossless
    let counter = u32::from_be_bytes(counter).wrapping_add(index as u32);

    let mut nonce = *base;
    nonce[NONCE_SIZE - COUNTER_SIZE..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

#[cfg(test)]
impl NonceSequencer {
    pub(crate) fn starting_at(base: Nonce, index: u64) -> Self {
        Self { base, index }
    }
}
