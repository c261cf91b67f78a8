//! PIN/UV auth protocols One and Two
//!
//! Protocol One: `K = SHA-256(Z)` serves as both the AES-256-CBC key
//! (zero IV, no padding) and the HMAC key; pinUvAuthParam is the first
//! 16 bytes of HMAC-SHA-256.
//!
//! Protocol Two: HKDF-SHA-256 splits `Z` into an HMAC key and an AES key;
//! ciphertexts carry a random 16-byte IV prefix and pinUvAuthParam is the
//! full 32-byte HMAC.

extern crate alloc;
use alloc::vec::Vec;

use crate::digest::{hmac_sha256, sha256};
use crate::error::{CryptoError, Result};
use crate::rng;

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK: usize = 16;

fn cbc_encrypt(key: &[u8; 32], iv: &[u8; BLOCK], plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.len() % BLOCK != 0 {
        return Err(CryptoError::EncryptionFailed);
    }
    let mut buffer = plaintext.to_vec();
    let len = buffer.len();
    Aes256CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(buffer)
}

fn cbc_decrypt(key: &[u8; 32], iv: &[u8; BLOCK], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK != 0 {
        return Err(CryptoError::DecryptionFailed);
    }
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(buffer)
}

/// PIN/UV auth protocol One
pub mod v1 {
    use super::*;

    /// Length of a protocol One pinUvAuthParam
    pub const AUTH_LENGTH: usize = 16;

    /// Derive the shared secret `SHA-256(Z)`
    pub fn derive_key(z: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(sha256(z))
    }

    /// AES-256-CBC with a zero IV; `plaintext` must be block aligned
    ///
    /// # Examples
    ///
    /// ```
    /// use openfido_crypto::pin_protocol::v1;
    ///
    /// let key = [0x42u8; 32];
    /// let ciphertext = v1::encrypt(&key, &[0x31u8; 64]).unwrap();
    /// assert_eq!(ciphertext.len(), 64);
    /// assert_eq!(&v1::decrypt(&key, &ciphertext).unwrap()[..], &[0x31u8; 64][..]);
    /// ```
    pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
        cbc_encrypt(key, &[0u8; BLOCK], plaintext)
    }

    /// Inverse of [`encrypt`]
    pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        cbc_decrypt(key, &[0u8; BLOCK], ciphertext)
    }

    /// `LEFT(HMAC-SHA-256(key, message), 16)`
    pub fn authenticate(key: &[u8], message: &[u8]) -> Result<[u8; AUTH_LENGTH]> {
        let mac = hmac_sha256(key, &[message])?;
        let mut out = [0u8; AUTH_LENGTH];
        out.copy_from_slice(&mac[..AUTH_LENGTH]);
        Ok(out)
    }

    /// Constant-time check of a pinUvAuthParam
    pub fn verify(key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        if signature.len() != AUTH_LENGTH {
            return false;
        }
        match authenticate(key, message) {
            Ok(expected) => expected[..].ct_eq(signature).into(),
            Err(_) => false,
        }
    }
}

/// PIN/UV auth protocol Two
pub mod v2 {
    use super::*;

    use hkdf::Hkdf;
    use sha2::Sha256;

    /// Length of a protocol Two pinUvAuthParam
    pub const AUTH_LENGTH: usize = 32;

    fn hkdf(z: &[u8; 32], info: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let salt = [0u8; 32];
        let hk = Hkdf::<Sha256>::new(Some(&salt), z);
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(info, &mut okm[..])
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(okm)
    }

    /// Derive `(hmac_key, aes_key)` from `Z`
    pub fn derive_keys(z: &[u8; 32]) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>)> {
        Ok((hkdf(z, b"CTAP2 HMAC key")?, hkdf(z, b"CTAP2 AES key")?))
    }

    /// AES-256-CBC with a random IV, returned as `iv || ciphertext`
    pub fn encrypt(aes_key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv: [u8; BLOCK] = rng::bytes();
        let ciphertext = cbc_encrypt(aes_key, &iv, plaintext)?;
        let mut out = Vec::with_capacity(BLOCK + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Inverse of [`encrypt`]
    pub fn decrypt(aes_key: &[u8; 32], data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if data.len() < BLOCK {
            return Err(CryptoError::DecryptionFailed);
        }
        let (iv, ciphertext) = data.split_at(BLOCK);
        let mut iv_block = [0u8; BLOCK];
        iv_block.copy_from_slice(iv);
        cbc_decrypt(aes_key, &iv_block, ciphertext)
    }

    /// Full 32-byte HMAC-SHA-256
    pub fn authenticate(key: &[u8], message: &[u8]) -> Result<[u8; AUTH_LENGTH]> {
        hmac_sha256(key, &[message])
    }

    /// Constant-time check of a pinUvAuthParam
    pub fn verify(key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        if signature.len() != AUTH_LENGTH {
            return false;
        }
        match authenticate(key, message) {
            Ok(expected) => expected[..].ct_eq(signature).into(),
            Err(_) => false,
        }
    }
}
