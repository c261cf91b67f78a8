//! Encrypted credential store on flash
//!
//! The store owns the [`Flash`] partition and keeps the small singleton
//! records (header, PIN record, signature counter, attestation key) cached
//! in memory. Credential slots are read from flash on every lookup and are
//! never cached in plaintext.
//!
//! Every mutating operation bumps [`CredentialStore::generation`], which
//! lets callers holding slot snapshots detect that the table changed.

pub mod flash;
pub mod layout;
pub mod record;

use alloc::vec::Vec;

use openfido_crypto::{digest, ecdsa, rng};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub use flash::{Flash, FlashError, RamFlash};
pub use layout::{MAX_CREDENTIALS, PIN_MAX_LENGTH, PIN_MAX_RETRIES, PIN_MIN_LENGTH, PinRecord};

use crate::status::StatusCode;
use crate::types::{Credential, CredentialId, User};
use layout::{Header, SLOT_SIZE, slot_offset};
use record::{SLOT_DELETED, SlotHeader};

/// Credential store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum StorageError {
    /// No free slot
    #[cfg_attr(feature = "std", error("Credential store full"))]
    Full,
    /// No credential with the requested id
    #[cfg_attr(feature = "std", error("Credential not found"))]
    NotFound,
    /// Record does not fit the slot format
    #[cfg_attr(feature = "std", error("Invalid parameter"))]
    InvalidParam,
    /// Authentication tag or record encoding check failed
    #[cfg_attr(feature = "std", error("Storage corrupted"))]
    Corrupted,
    /// Flash I/O failed
    #[cfg_attr(feature = "std", error("Flash access failed: {0:?}"))]
    Flash(FlashError),
}

#[cfg(not(feature = "std"))]
impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => write!(f, "Credential store full"),
            Self::NotFound => write!(f, "Credential not found"),
            Self::InvalidParam => write!(f, "Invalid parameter"),
            Self::Corrupted => write!(f, "Storage corrupted"),
            Self::Flash(err) => write!(f, "Flash access failed: {:?}", err),
        }
    }
}

impl From<FlashError> for StorageError {
    fn from(err: FlashError) -> Self {
        Self::Flash(err)
    }
}

impl From<StorageError> for StatusCode {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Full => StatusCode::KeyStoreFull,
            StorageError::NotFound => StatusCode::NoCredentials,
            StorageError::InvalidParam => StatusCode::RequestTooLarge,
            StorageError::Corrupted | StorageError::Flash(_) => StatusCode::Processing,
        }
    }
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// Outcome of a PIN comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    Match,
    Mismatch { retries: u8 },
    /// No retries left; nothing was compared
    Blocked,
}

/// Persistent authenticator state
pub struct CredentialStore<F: Flash> {
    flash: F,
    master_key: Zeroizing<[u8; 32]>,
    pin: PinRecord,
    counter: u32,
    attestation_key: Zeroizing<[u8; 32]>,
    generation: u32,
}

impl<F: Flash> CredentialStore<F> {
    /// Load the partition, formatting it when no valid header is found
    pub fn open(mut flash: F) -> Result<Self> {
        let mut raw = Zeroizing::new([0u8; Header::LEN]);
        flash.read(layout::HEADER_OFFSET, &mut raw[..])?;
        let header = Header::from_bytes(&raw);

        if header.magic != layout::MAGIC {
            log::warn!("Storage not formatted, formatting now");
            let mut store = Self {
                flash,
                master_key: Zeroizing::new([0; 32]),
                pin: PinRecord::default(),
                counter: 0,
                attestation_key: Zeroizing::new([0; 32]),
                generation: 0,
            };
            store.format()?;
            return Ok(store);
        }
        if header.version != layout::LAYOUT_VERSION {
            log::error!("Unsupported storage layout version {}", header.version);
            return Err(StorageError::Corrupted);
        }

        let mut pin_raw = [0u8; PinRecord::LEN];
        flash.read(layout::PIN_OFFSET, &mut pin_raw)?;
        let Some(pin) = PinRecord::from_bytes(&pin_raw) else {
            log::error!("PIN record unreadable");
            return Err(StorageError::Corrupted);
        };

        let mut counter_raw = [0u8; 5];
        flash.read(layout::COUNTER_OFFSET, &mut counter_raw)?;
        let mut counter = [0u8; 4];
        if !layout::marked(&counter_raw, &mut counter) {
            return Err(StorageError::Corrupted);
        }

        let mut key_raw = Zeroizing::new([0u8; 33]);
        flash.read(layout::ATTESTATION_OFFSET, &mut key_raw[..])?;
        let mut attestation_key = Zeroizing::new([0u8; 32]);
        if !layout::marked(&key_raw[..], &mut *attestation_key) {
            return Err(StorageError::Corrupted);
        }

        log::info!("Storage opened, {} retries left", pin.retries);
        Ok(Self {
            flash,
            master_key: header.master_key,
            pin,
            counter: u32::from_le_bytes(counter),
            attestation_key,
            generation: 0,
        })
    }

    /// Erase everything and start over with fresh keys
    pub fn format(&mut self) -> Result<()> {
        log::info!("Formatting storage");
        for offset in (0..layout::PARTITION_SIZE).step_by(layout::SECTOR_SIZE as usize) {
            self.flash.erase(offset, layout::SECTOR_SIZE)?;
        }

        let header = Header {
            magic: layout::MAGIC,
            version: layout::LAYOUT_VERSION,
            master_key: Zeroizing::new(rng::bytes()),
        };
        self.flash.write(layout::HEADER_OFFSET, &header.to_bytes()[..])?;
        self.master_key = header.master_key;

        self.pin = PinRecord::default();
        self.write_pin_record()?;

        self.counter = 0;
        self.write_counter()?;

        let (attestation_key, _) = ecdsa::generate_keypair();
        let mut key_raw = Zeroizing::new([0u8; 33]);
        key_raw[0] = layout::RECORD_MARKER;
        key_raw[1..].copy_from_slice(&attestation_key[..]);
        self.flash.write(layout::ATTESTATION_OFFSET, &key_raw[..])?;
        self.attestation_key = attestation_key;

        self.bump_generation();
        Ok(())
    }

    /// Hand the flash back, e.g. to simulate a power cycle
    pub fn into_flash(self) -> F {
        self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Changes on every mutation of the slot table or its records
    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn read_raw_slot(&mut self, index: usize) -> Result<[u8; SLOT_SIZE]> {
        let mut raw = [0u8; SLOT_SIZE];
        self.flash.read(slot_offset(index), &mut raw)?;
        Ok(raw)
    }

    fn locate(&mut self, id: &CredentialId) -> Result<(usize, [u8; SLOT_SIZE])> {
        for index in 0..MAX_CREDENTIALS {
            let raw = self.read_raw_slot(index)?;
            if let Some(header) = SlotHeader::parse(&raw) {
                if bool::from(header.id[..].ct_eq(&id[..])) {
                    return Ok((index, raw));
                }
            }
        }
        Err(StorageError::NotFound)
    }

    fn write_slot(&mut self, index: usize, credential: &Credential) -> Result<()> {
        let slot = record::seal(&self.master_key, credential)?;
        self.flash.write(slot_offset(index), &slot)?;
        self.bump_generation();
        Ok(())
    }

    /// Persist a new credential in the first free slot
    pub fn store(&mut self, credential: &Credential) -> Result<()> {
        for index in 0..MAX_CREDENTIALS {
            let raw = self.read_raw_slot(index)?;
            if SlotHeader::parse(&raw).is_none() {
                self.write_slot(index, credential)?;
                log::debug!("Credential stored in slot {}", index);
                return Ok(());
            }
        }
        log::warn!("Credential store full");
        Err(StorageError::Full)
    }

    /// Decrypt the credential with `id`
    pub fn find(&mut self, id: &CredentialId) -> Result<Credential> {
        let (index, raw) = self.locate(id)?;
        match record::open(&self.master_key, &raw)? {
            Some(credential) => Ok(credential),
            None => {
                log::warn!("Slot {} changed during lookup", index);
                Err(StorageError::Corrupted)
            }
        }
    }

    /// Decrypt slot `index`; `Ok(None)` when the slot is free
    pub fn read_slot(&mut self, index: usize) -> Result<Option<Credential>> {
        if index >= MAX_CREDENTIALS {
            return Err(StorageError::InvalidParam);
        }
        let raw = self.read_raw_slot(index)?;
        record::open(&self.master_key, &raw)
    }

    /// Indices of slots holding resident credentials, in slot order
    ///
    /// Slots that fail to decrypt are skipped.
    pub fn resident_slots(&mut self) -> Result<Vec<usize>> {
        let mut slots = Vec::new();
        for index in 0..MAX_CREDENTIALS {
            match self.read_slot(index) {
                Ok(Some(credential)) if credential.resident => slots.push(index),
                Ok(_) => {}
                Err(StorageError::Corrupted) => log::warn!("Skipping corrupted slot {}", index),
                Err(err) => return Err(err),
            }
        }
        Ok(slots)
    }

    /// All resident credentials bound to `rp_id_hash`, in slot order
    ///
    /// Slots that fail to decrypt are skipped.
    pub fn find_by_rp(&mut self, rp_id_hash: &[u8; 32]) -> Result<Vec<Credential>> {
        let mut found = Vec::new();
        for index in 0..MAX_CREDENTIALS {
            let raw = self.read_raw_slot(index)?;
            let Some(header) = SlotHeader::parse(&raw) else {
                continue;
            };
            if header.rp_id_hash != *rp_id_hash {
                continue;
            }
            match record::open(&self.master_key, &raw) {
                Ok(Some(credential)) if credential.resident => found.push(credential),
                Ok(_) => {}
                Err(StorageError::Corrupted) => log::warn!("Skipping corrupted slot {}", index),
                Err(err) => return Err(err),
            }
        }
        Ok(found)
    }

    pub fn update_sign_count(&mut self, id: &CredentialId, sign_count: u32) -> Result<()> {
        let (index, raw) = self.locate(id)?;
        let mut credential = record::open(&self.master_key, &raw)?.ok_or(StorageError::NotFound)?;
        credential.sign_count = sign_count;
        self.write_slot(index, &credential)
    }

    /// Replace the user metadata of a resident credential
    pub fn update_user(&mut self, id: &CredentialId, user: &User) -> Result<()> {
        let (index, raw) = self.locate(id)?;
        let mut credential = record::open(&self.master_key, &raw)?.ok_or(StorageError::NotFound)?;
        if !credential.resident {
            return Err(StorageError::InvalidParam);
        }
        credential.user = user.clone();
        self.write_slot(index, &credential)
    }

    pub fn delete(&mut self, id: &CredentialId) -> Result<()> {
        let (index, _) = self.locate(id)?;
        self.flash.write(slot_offset(index), &[SLOT_DELETED; SLOT_SIZE])?;
        self.bump_generation();
        log::debug!("Credential deleted from slot {}", index);
        Ok(())
    }

    /// Number of occupied slots
    pub fn count(&mut self) -> Result<usize> {
        let mut count = 0;
        for index in 0..MAX_CREDENTIALS {
            if SlotHeader::parse(&self.read_raw_slot(index)?).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn resident_count(&mut self) -> Result<usize> {
        Ok(self.resident_slots()?.len())
    }

    /// Free slots left
    pub fn remaining(&mut self) -> Result<usize> {
        Ok(MAX_CREDENTIALS - self.count()?)
    }

    /// Advance the global signature counter and return the new value
    ///
    /// The new value is on flash before it is handed out.
    pub fn next_counter(&mut self) -> Result<u32> {
        let next = self.counter.checked_add(1).ok_or(StorageError::Corrupted)?;
        let previous = self.counter;
        self.counter = next;
        if let Err(err) = self.write_counter() {
            self.counter = previous;
            return Err(err);
        }
        Ok(next)
    }

    fn write_counter(&mut self) -> Result<()> {
        let mut raw = [layout::RECORD_MARKER; 5];
        raw[1..].copy_from_slice(&self.counter.to_le_bytes());
        self.flash.write(layout::COUNTER_OFFSET, &raw)?;
        Ok(())
    }

    pub fn attestation_key(&self) -> &[u8; 32] {
        &self.attestation_key
    }

    /// Per-credential hmac-secret key, split on whether UV was performed
    pub fn cred_random(
        &self,
        private_key: &[u8; 32],
        uv: bool,
    ) -> crate::status::Result<Zeroizing<[u8; 32]>> {
        let key = digest::hmac_sha256(
            &self.master_key[..],
            &[b"credRandom", &[u8::from(uv)], &private_key[..]],
        )?;
        Ok(Zeroizing::new(key))
    }

    pub fn pin_record(&self) -> &PinRecord {
        &self.pin
    }

    pub fn is_pin_set(&self) -> bool {
        self.pin.pin_set
    }

    pub fn is_pin_blocked(&self) -> bool {
        self.pin.is_blocked()
    }

    fn write_pin_record(&mut self) -> Result<()> {
        self.flash.write(layout::PIN_OFFSET, &self.pin.to_bytes())?;
        Ok(())
    }

    /// Modify the PIN record and persist it
    pub fn update_pin_record(&mut self, update: impl FnOnce(&mut PinRecord)) -> Result<()> {
        let mut record = self.pin.clone();
        update(&mut record);
        let previous = core::mem::replace(&mut self.pin, record);
        if let Err(err) = self.write_pin_record() {
            self.pin = previous;
            return Err(err);
        }
        Ok(())
    }

    /// Store a new PIN hash and restore the full retry budget
    pub fn set_pin_hash(&mut self, pin_hash: [u8; 32]) -> Result<()> {
        self.update_pin_record(|record| {
            record.pin_set = true;
            record.retries = PIN_MAX_RETRIES;
            record.pin_hash = pin_hash;
        })
    }

    /// Compare `candidate` against the leading bytes of the stored PIN hash
    ///
    /// The retry counter is decremented on flash before the comparison and
    /// restored on a match, so cutting power mid-check still costs a retry.
    pub fn verify_pin_hash(&mut self, candidate: &[u8]) -> Result<PinCheck> {
        if self.pin.is_blocked() {
            return Ok(PinCheck::Blocked);
        }
        if candidate.is_empty() || candidate.len() > self.pin.pin_hash.len() {
            return Err(StorageError::InvalidParam);
        }
        self.update_pin_record(|record| record.retries -= 1)?;

        let matches = self.pin.pin_set
            && bool::from(self.pin.pin_hash[..candidate.len()].ct_eq(candidate));
        if matches {
            self.update_pin_record(|record| record.retries = PIN_MAX_RETRIES)?;
            Ok(PinCheck::Match)
        } else {
            log::warn!("PIN mismatch, {} retries left", self.pin.retries);
            Ok(PinCheck::Mismatch {
                retries: self.pin.retries,
            })
        }
    }

    /// Hash `pin` and verify it against the stored hash
    pub fn verify_pin(&mut self, pin: &[u8]) -> Result<PinCheck> {
        let hash = Zeroizing::new(digest::sha256(pin));
        self.verify_pin_hash(&hash[..])
    }
}
