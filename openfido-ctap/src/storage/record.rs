//! Encrypted credential slots
//!
//! ```text
//! state(1) | id(16) | rp_id_hash(32) | nonce(12) | ct_len(2, LE) | ciphertext ‖ tag
//! ```
//!
//! `id` stays in plaintext as the lookup key. `rp_id_hash` stays in
//! plaintext so RP scans can skip foreign slots, and is the AES-GCM
//! associated data, so moving a ciphertext under another RP fails the tag.
//! The plaintext is a CBOR map with integer keys; user metadata is only
//! written for resident credentials.

use alloc::vec::Vec;

use openfido_crypto::aead::{self, NONCE_LENGTH, TAG_LENGTH};
use zeroize::Zeroizing;

use super::StorageError;
use super::layout::SLOT_SIZE;
use crate::cbor::{Decoder, Encoder};
use crate::extensions::CredProtect;
use crate::types::{
    CREDENTIAL_ID_LENGTH, CoseAlgorithm, Credential, CredentialId, MAX_DISPLAY_NAME_LENGTH,
    MAX_RP_ID_LENGTH, MAX_USER_ID_LENGTH, MAX_USER_NAME_LENGTH, UserId, bounded_str,
};

/// Slot holds a credential
pub const SLOT_VALID: u8 = 0x5A;
/// Slot was deleted and may be reused
pub const SLOT_DELETED: u8 = 0x00;

const ID_OFFSET: usize = 1;
const RP_HASH_OFFSET: usize = ID_OFFSET + CREDENTIAL_ID_LENGTH;
const NONCE_OFFSET: usize = RP_HASH_OFFSET + 32;
const LEN_OFFSET: usize = NONCE_OFFSET + NONCE_LENGTH;
pub const SLOT_HEADER_LEN: usize = LEN_OFFSET + 2;

pub const MAX_CIPHERTEXT_LEN: usize = SLOT_SIZE - SLOT_HEADER_LEN;
pub const MAX_PLAINTEXT_LEN: usize = MAX_CIPHERTEXT_LEN - TAG_LENGTH;

mod key {
    pub const PRIVATE_KEY: u64 = 1;
    pub const SIGN_COUNT: u64 = 2;
    pub const ALGORITHM: u64 = 3;
    pub const RESIDENT: u64 = 4;
    pub const CRED_PROTECT: u64 = 5;
    pub const RP_ID: u64 = 6;
    pub const USER_ID: u64 = 7;
    pub const USER_NAME: u64 = 8;
    pub const DISPLAY_NAME: u64 = 9;
    pub const HMAC_SECRET: u64 = 10;
}

/// Plaintext fields of a valid slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    pub id: CredentialId,
    pub rp_id_hash: [u8; 32],
}

impl SlotHeader {
    /// `None` for free or deleted slots
    pub fn parse(raw: &[u8; SLOT_SIZE]) -> Option<Self> {
        if raw[0] != SLOT_VALID {
            return None;
        }
        let mut id = [0u8; CREDENTIAL_ID_LENGTH];
        id.copy_from_slice(&raw[ID_OFFSET..RP_HASH_OFFSET]);
        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&raw[RP_HASH_OFFSET..NONCE_OFFSET]);
        Some(Self { id, rp_id_hash })
    }
}

fn encode_plaintext(credential: &Credential) -> Result<Zeroizing<Vec<u8>>, StorageError> {
    let mut buf = Zeroizing::new([0u8; SLOT_SIZE]);
    let mut enc = Encoder::new(&mut buf[..]);
    let write = |enc: &mut Encoder<'_>| -> crate::cbor::Result<()> {
        let entries = if credential.resident { 10 } else { 6 };
        enc.map(entries)?
            .unsigned(key::PRIVATE_KEY)?
            .bytes(&credential.private_key[..])?
            .unsigned(key::SIGN_COUNT)?
            .unsigned(u64::from(credential.sign_count))?
            .unsigned(key::ALGORITHM)?
            .int(credential.algorithm.to_i64())?
            .unsigned(key::RESIDENT)?
            .bool(credential.resident)?
            .unsigned(key::CRED_PROTECT)?
            .unsigned(u64::from(credential.cred_protect.to_u8()))?
            .unsigned(key::HMAC_SECRET)?
            .bool(credential.hmac_secret)?;
        if credential.resident {
            enc.unsigned(key::RP_ID)?
                .text(&credential.rp_id)?
                .unsigned(key::USER_ID)?
                .bytes(&credential.user.id)?
                .unsigned(key::USER_NAME)?
                .text(&credential.user.name)?
                .unsigned(key::DISPLAY_NAME)?
                .text(&credential.user.display_name)?;
        }
        Ok(())
    };
    write(&mut enc).map_err(|_| StorageError::InvalidParam)?;
    if enc.len() > MAX_PLAINTEXT_LEN {
        return Err(StorageError::InvalidParam);
    }
    Ok(Zeroizing::new(enc.as_bytes().to_vec()))
}

fn decode_plaintext(header: &SlotHeader, plaintext: &[u8]) -> Result<Credential, StorageError> {
    let corrupted = |_| StorageError::Corrupted;
    let mut dec = Decoder::new(plaintext);
    let mut private_key = None;
    let mut credential = Credential::new(header.id, header.rp_id_hash, Zeroizing::new([0; 32]));

    for _ in 0..dec.map().map_err(corrupted)? {
        match dec.unsigned().map_err(corrupted)? {
            key::PRIVATE_KEY => {
                let raw = dec.bytes().map_err(corrupted)?;
                let mut secret = Zeroizing::new([0u8; 32]);
                if raw.len() != secret.len() {
                    return Err(StorageError::Corrupted);
                }
                secret.copy_from_slice(raw);
                private_key = Some(secret);
            }
            key::SIGN_COUNT => {
                credential.sign_count = u32::try_from(dec.unsigned().map_err(corrupted)?)
                    .map_err(|_| StorageError::Corrupted)?
            }
            key::ALGORITHM => {
                credential.algorithm = CoseAlgorithm::from_i64(dec.int().map_err(corrupted)?)
                    .ok_or(StorageError::Corrupted)?
            }
            key::RESIDENT => credential.resident = dec.bool().map_err(corrupted)?,
            key::HMAC_SECRET => credential.hmac_secret = dec.bool().map_err(corrupted)?,
            key::CRED_PROTECT => {
                credential.cred_protect = u8::try_from(dec.unsigned().map_err(corrupted)?)
                    .ok()
                    .and_then(CredProtect::from_u8)
                    .ok_or(StorageError::Corrupted)?
            }
            key::RP_ID => {
                let text = dec.text_max(MAX_RP_ID_LENGTH).map_err(corrupted)?;
                credential.rp_id = bounded_str(text).map_err(|_| StorageError::Corrupted)?;
            }
            key::USER_ID => {
                let raw = dec.bytes_max(MAX_USER_ID_LENGTH).map_err(corrupted)?;
                credential.user.id = UserId::from_slice(raw).map_err(|_| StorageError::Corrupted)?;
            }
            key::USER_NAME => {
                let text = dec.text_max(MAX_USER_NAME_LENGTH).map_err(corrupted)?;
                credential.user.name = bounded_str(text).map_err(|_| StorageError::Corrupted)?;
            }
            key::DISPLAY_NAME => {
                let text = dec.text_max(MAX_DISPLAY_NAME_LENGTH).map_err(corrupted)?;
                credential.user.display_name =
                    bounded_str(text).map_err(|_| StorageError::Corrupted)?;
            }
            _ => dec.skip().map_err(corrupted)?,
        }
    }

    credential.private_key = private_key.ok_or(StorageError::Corrupted)?;
    Ok(credential)
}

/// Encrypt `credential` into a full slot image
pub fn seal(
    master_key: &[u8; 32],
    credential: &Credential,
) -> Result<[u8; SLOT_SIZE], StorageError> {
    let plaintext = encode_plaintext(credential)?;
    let nonce = aead::nonce();
    let ciphertext = aead::seal(master_key, &nonce, &credential.rp_id_hash, &plaintext)
        .map_err(|_| StorageError::Corrupted)?;
    if ciphertext.len() > MAX_CIPHERTEXT_LEN {
        return Err(StorageError::InvalidParam);
    }

    let mut slot = [0u8; SLOT_SIZE];
    slot[0] = SLOT_VALID;
    slot[ID_OFFSET..RP_HASH_OFFSET].copy_from_slice(&credential.id);
    slot[RP_HASH_OFFSET..NONCE_OFFSET].copy_from_slice(&credential.rp_id_hash);
    slot[NONCE_OFFSET..LEN_OFFSET].copy_from_slice(&nonce);
    slot[LEN_OFFSET..SLOT_HEADER_LEN].copy_from_slice(&(ciphertext.len() as u16).to_le_bytes());
    slot[SLOT_HEADER_LEN..SLOT_HEADER_LEN + ciphertext.len()].copy_from_slice(&ciphertext);
    Ok(slot)
}

/// Decrypt a slot image; `Ok(None)` for a free slot
pub fn open(
    master_key: &[u8; 32],
    slot: &[u8; SLOT_SIZE],
) -> Result<Option<Credential>, StorageError> {
    let Some(header) = SlotHeader::parse(slot) else {
        return Ok(None);
    };
    let ciphertext_len =
        usize::from(u16::from_le_bytes([slot[LEN_OFFSET], slot[LEN_OFFSET + 1]]));
    if ciphertext_len > MAX_CIPHERTEXT_LEN {
        return Err(StorageError::Corrupted);
    }
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce.copy_from_slice(&slot[NONCE_OFFSET..LEN_OFFSET]);
    let ciphertext = &slot[SLOT_HEADER_LEN..SLOT_HEADER_LEN + ciphertext_len];

    let plaintext = aead::open(master_key, &nonce, &header.rp_id_hash, ciphertext)
        .map_err(|_| StorageError::Corrupted)?;
    decode_plaintext(&header, &plaintext).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::User;

    const MASTER_KEY: [u8; 32] = [0x5C; 32];

    fn resident() -> Credential {
        let mut credential = Credential::new([1; 16], [2; 32], Zeroizing::new([3; 32]));
        credential.resident = true;
        credential.sign_count = 12;
        credential.cred_protect = CredProtect::UserVerificationRequired;
        credential.rp_id = bounded_str("example.com").unwrap();
        credential.user = User {
            id: UserId::from_slice(&[0xA1; 32]).unwrap(),
            name: bounded_str("alice@example.com").unwrap(),
            display_name: bounded_str("Alice").unwrap(),
        };
        credential
    }

    #[test]
    fn test_seal_open() {
        let slot = seal(&MASTER_KEY, &resident()).unwrap();
        let opened = open(&MASTER_KEY, &slot).unwrap().unwrap();
        assert_eq!(*opened.private_key, [3; 32]);
        assert_eq!(opened.sign_count, 12);
        assert_eq!(opened.user.display_name.as_str(), "Alice");
        assert_eq!(opened.cred_protect, CredProtect::UserVerificationRequired);
        assert!(opened.resident);
    }

    #[test]
    fn test_non_resident_drops_user_metadata() {
        let mut credential = resident();
        credential.resident = false;
        let slot = seal(&MASTER_KEY, &credential).unwrap();
        let opened = open(&MASTER_KEY, &slot).unwrap().unwrap();
        assert!(opened.user.id.is_empty());
        assert!(opened.rp_id.is_empty());
    }

    #[test]
    fn test_eddsa_credential_keeps_algorithm() {
        let mut credential = Credential::generate([4; 16], [5; 32], CoseAlgorithm::EdDsa).unwrap();
        credential.hmac_secret = true;
        let slot = seal(&MASTER_KEY, &credential).unwrap();
        let opened = open(&MASTER_KEY, &slot).unwrap().unwrap();
        assert_eq!(opened.algorithm, CoseAlgorithm::EdDsa);
        assert!(opened.hmac_secret);
        assert_eq!(opened.public_key().unwrap(), credential.public_key().unwrap());
    }

    #[test]
    fn test_private_key_not_in_plaintext() {
        let slot = seal(&MASTER_KEY, &resident()).unwrap();
        assert!(!slot.windows(32).any(|w| w == [3; 32]));
    }

    #[test]
    fn test_tampered_rp_hash_fails() {
        let mut slot = seal(&MASTER_KEY, &resident()).unwrap();
        slot[RP_HASH_OFFSET] ^= 0x01;
        assert_eq!(open(&MASTER_KEY, &slot).unwrap_err(), StorageError::Corrupted);
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let slot = seal(&MASTER_KEY, &resident()).unwrap();
        assert_eq!(open(&[0; 32], &slot).unwrap_err(), StorageError::Corrupted);
    }

    #[test]
    fn test_free_slot() {
        assert!(open(&MASTER_KEY, &[0xFF; SLOT_SIZE]).unwrap().is_none());
        assert!(SlotHeader::parse(&[SLOT_DELETED; SLOT_SIZE]).is_none());
    }

    #[test]
    fn test_oversized_record_rejected() {
        let mut credential = resident();
        credential.rp_id = bounded_str(&"r".repeat(MAX_RP_ID_LENGTH)).unwrap();
        credential.user.id = UserId::from_slice(&[9; MAX_USER_ID_LENGTH]).unwrap();
        credential.user.name = bounded_str(&"n".repeat(MAX_USER_NAME_LENGTH)).unwrap();
        credential.user.display_name = bounded_str(&"d".repeat(MAX_DISPLAY_NAME_LENGTH)).unwrap();
        assert_eq!(seal(&MASTER_KEY, &credential).unwrap_err(), StorageError::InvalidParam);
    }
}
