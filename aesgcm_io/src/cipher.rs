use aead::{generic_array::GenericArray, AeadInPlace, KeyInit};
use aes_gcm::{aes::Aes192, aead::consts::U12, Aes128Gcm, Aes256Gcm, AesGcm};
use bytes::BytesMut;
use chacha20poly1305::ChaCha20Poly1305;

use crate::{nonce::Nonce, Error};

type Aes192Gcm = AesGcm<Aes192, U12>;

/// AEAD algorithm a stream is sealed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// AES-GCM. The key length (16, 24 or 32 bytes) picks AES-128/192/256.
    #[default]
    AesGcm,
    /// ChaCha20-Poly1305 with a 32-byte key.
    ChaCha20Poly1305,
}

impl Algorithm {
    pub(crate) fn id(self) -> u8 {
        match self {
            Algorithm::AesGcm => 1,
            Algorithm::ChaCha20Poly1305 => 2,
        }
    }

    pub(crate) fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Algorithm::AesGcm),
            2 => Some(Algorithm::ChaCha20Poly1305),
            _ => None,
        }
    }
}

/// Associated data of a full chunk.
const FULL_CHUNK: &[u8] = &[0];
/// Associated data of the final chunk.
const FINAL_CHUNK: &[u8] = &[1];

/// A keyed single-message AEAD.
pub(crate) enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
    ChaCha(ChaCha20Poly1305),
}

impl Cipher {
    pub fn new(algorithm: Algorithm, key: &[u8]) -> Result<Self, Error> {
        let invalid = || {
            Error::Config(format!(
                "{} byte key doesn't fit {algorithm:?}",
                key.len()
            ))
        };

        let cipher = match (algorithm, key.len()) {
            (Algorithm::AesGcm, 16) => Aes128Gcm::new_from_slice(key).map(Cipher::Aes128),
            (Algorithm::AesGcm, 24) => Aes192Gcm::new_from_slice(key).map(Cipher::Aes192),
            (Algorithm::AesGcm, 32) => Aes256Gcm::new_from_slice(key).map(Cipher::Aes256),
            (Algorithm::ChaCha20Poly1305, 32) => {
                ChaCha20Poly1305::new_from_slice(key).map(Cipher::ChaCha)
            }
            _ => return Err(invalid()),
        };
        cipher.map_err(|_| invalid())
    }

    /// Encrypts `buf` in place and appends the tag.
    pub fn seal(&self, nonce: &Nonce, is_final: bool, buf: &mut BytesMut) -> Result<(), aead::Error> {
        let nonce = GenericArray::from_slice(&nonce[..]);
        let aad = chunk_aad(is_final);
        match self {
            Cipher::Aes128(c) => c.encrypt_in_place(nonce, aad, buf),
            Cipher::Aes192(c) => c.encrypt_in_place(nonce, aad, buf),
            Cipher::Aes256(c) => c.encrypt_in_place(nonce, aad, buf),
            Cipher::ChaCha(c) => c.encrypt_in_place(nonce, aad, buf),
        }
    }

    /// Verifies and strips the tag at the end of `buf`, then decrypts in place.
    ///
    /// On failure the contents of `buf` are unspecified and must be discarded.
    pub fn open(&self, nonce: &Nonce, is_final: bool, buf: &mut BytesMut) -> Result<(), aead::Error> {
        let nonce = GenericArray::from_slice(&nonce[..]);
        let aad = chunk_aad(is_final);
        match self {
            Cipher::Aes128(c) => c.decrypt_in_place(nonce, aad, buf),
            Cipher::Aes192(c) => c.decrypt_in_place(nonce, aad, buf),
            Cipher::Aes256(c) => c.decrypt_in_place(nonce, aad, buf),
            Cipher::ChaCha(c) => c.decrypt_in_place(nonce, aad, buf),
        }
    }
}

fn chunk_aad(is_final: bool) -> &'static [u8] {
    if is_final {
        FINAL_CHUNK
    } else {
        FULL_CHUNK
    }
}
