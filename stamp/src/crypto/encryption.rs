//! # AES-256-GCM Encryption
//!
//! The symmetric half of the FIRS envelope. Every envelope gets a fresh
//! random key and a fresh random nonce, so nonce reuse under one key cannot
//! happen by construction.
//!
//! ## Nonce size
//!
//! GCM is usually run with 96-bit nonces. The authority's envelope format
//! carries a 128-bit IV, so this module instantiates `AesGcm` with a 16-byte
//! nonce. GCM handles that by running the nonce through GHASH to derive the
//! initial counter block. It is slightly slower and entirely standard
//! (NIST SP 800-38D, section 7.1).
//!
//! ## Wire format
//!
//! Unlike a `nonce || ciphertext || tag` blob, [`seal`] returns the three
//! parts separately because the envelope encodes each one in its own field.

use aes_gcm::{
    aead::{consts::U16, AeadInPlace, KeyInit},
    aes::Aes256,
    AesGcm, Nonce, Tag,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm128 = AesGcm<Aes256, U16>;

/// Errors from the AEAD layer. Deliberately uninformative.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("invalid key length: expected {AES_KEY_LENGTH} bytes")]
    InvalidKeyLength,
}

/// Output of [`seal`]: nonce, ciphertext (same length as the plaintext)
/// and the detached authentication tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedBox {
    pub nonce: [u8; AES_NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; AES_TAG_LENGTH],
}

/// Draw a fresh 256-bit key from the OS RNG.
pub fn generate_key() -> [u8; AES_KEY_LENGTH] {
    let mut key = [0u8; AES_KEY_LENGTH];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypt `plaintext` under `key` with a random nonce, authenticating
/// `aad` alongside it.
///
/// The caller must supply the same `aad` when the box is opened.
pub fn seal(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<SealedBox, CipherError> {
    let cipher = Aes256Gcm128::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)?;

    let mut nonce = [0u8; AES_NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&nonce), aad, &mut buffer)
        .map_err(|_| CipherError::EncryptFailed)?;

    let mut tag_bytes = [0u8; AES_TAG_LENGTH];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(SealedBox {
        nonce,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypt a [`SealedBox`]. Only the authority decrypts envelopes in
/// production; this exists so tests can prove the envelopes open.
#[cfg(test)]
pub(crate) fn open(
    key: &[u8; AES_KEY_LENGTH],
    sealed: &SealedBox,
    aad: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes256Gcm128::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)?;
    let mut buffer = sealed.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&sealed.nonce),
            aad,
            &mut buffer,
            Tag::from_slice(&sealed.tag),
        )
        .map_err(|_| CipherError::DecryptFailed)?;
    Ok(buffer)
}
