//! AES-256-GCM sealing for credential records at rest
//!
//! Each record is sealed under the device master key with a fresh 96-bit
//! nonce. The associated data binds the ciphertext to its relying party,
//! so a record moved to another RP, or an edited RP hash, fails to open.

extern crate alloc;
use alloc::vec::Vec;

use crate::error::{CryptoError, Result};
use crate::rng;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::Zeroizing;

/// GCM nonce length
pub const NONCE_LENGTH: usize = 12;

/// GCM tag length appended to every ciphertext
pub const TAG_LENGTH: usize = 16;

/// Generate a fresh random nonce
pub fn nonce() -> [u8; NONCE_LENGTH] {
    rng::bytes()
}

/// Encrypt `plaintext`, returning `ciphertext || tag`
pub fn seal(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LENGTH],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    Aes256Gcm::new(key.into())
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt `ciphertext || tag`; any tampering yields [`CryptoError::TagMismatch`]
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LENGTH],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if ciphertext.len() < TAG_LENGTH {
        return Err(CryptoError::InvalidLength {
            expected: TAG_LENGTH,
            actual: ciphertext.len(),
        });
    }
    Aes256Gcm::new(key.into())
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::TagMismatch)
}
