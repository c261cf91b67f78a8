//! Partition layout
//!
//! ```text
//! 0x0000  header       magic u32 | version u16 | reserved u16 | master key [32]
//! 0x0100  PIN record   marker | set | retries | hash [32] | min len | config flags
//! 0x0200  counter      marker | u32 LE
//! 0x0300  attestation  marker | private key [32]
//! 0x0800  slots        50 x 512 bytes
//! ```
//!
//! These offsets must not move between firmware versions.

use zeroize::Zeroizing;

use super::flash::ERASED;

pub const PARTITION_SIZE: u32 = 64 * 1024;
pub const SECTOR_SIZE: u32 = 4096;

pub const HEADER_OFFSET: u32 = 0;
pub const PIN_OFFSET: u32 = 256;
pub const COUNTER_OFFSET: u32 = 512;
pub const ATTESTATION_OFFSET: u32 = 768;
pub const SLOTS_OFFSET: u32 = 2048;

pub const SLOT_SIZE: usize = 512;
pub const MAX_CREDENTIALS: usize = 50;

/// "FID2"
pub const MAGIC: u32 = 0x4649_4432;
pub const LAYOUT_VERSION: u16 = 1;

/// Marks an initialized record; erased flash never carries it
pub const RECORD_MARKER: u8 = 0xA5;

pub const PIN_MIN_LENGTH: usize = 4;
pub const PIN_MAX_LENGTH: usize = 63;
pub const PIN_MAX_RETRIES: u8 = 8;

pub const fn slot_offset(index: usize) -> u32 {
    SLOTS_OFFSET + (index * SLOT_SIZE) as u32
}

/// Partition header
pub struct Header {
    pub magic: u32,
    pub version: u16,
    pub master_key: Zeroizing<[u8; 32]>,
}

impl Header {
    pub const LEN: usize = 40;

    pub fn to_bytes(&self) -> Zeroizing<[u8; Self::LEN]> {
        let mut out = Zeroizing::new([0u8; Self::LEN]);
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[8..40].copy_from_slice(&self.master_key[..]);
        out
    }

    pub fn from_bytes(raw: &[u8; Self::LEN]) -> Self {
        let mut master_key = Zeroizing::new([0u8; 32]);
        master_key.copy_from_slice(&raw[8..40]);
        Self {
            magic: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            version: u16::from_le_bytes([raw[4], raw[5]]),
            master_key,
        }
    }
}

const FLAG_ALWAYS_UV: u8 = 0x01;
const FLAG_ENTERPRISE_ATTESTATION: u8 = 0x02;

/// Persisted PIN and authenticator configuration state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRecord {
    pub pin_set: bool,
    pub retries: u8,
    /// SHA-256 of the PIN
    pub pin_hash: [u8; 32],
    pub min_pin_length: u8,
    pub always_uv: bool,
    pub enterprise_attestation: bool,
}

impl Default for PinRecord {
    fn default() -> Self {
        Self {
            pin_set: false,
            retries: PIN_MAX_RETRIES,
            pin_hash: [0; 32],
            min_pin_length: PIN_MIN_LENGTH as u8,
            always_uv: false,
            enterprise_attestation: false,
        }
    }
}

impl PinRecord {
    pub const LEN: usize = 37;

    pub fn is_blocked(&self) -> bool {
        self.retries == 0
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = RECORD_MARKER;
        out[1] = u8::from(self.pin_set);
        out[2] = self.retries;
        out[3..35].copy_from_slice(&self.pin_hash);
        out[35] = self.min_pin_length;
        if self.always_uv {
            out[36] |= FLAG_ALWAYS_UV;
        }
        if self.enterprise_attestation {
            out[36] |= FLAG_ENTERPRISE_ATTESTATION;
        }
        out
    }

    /// `None` when the area is unwritten or damaged
    pub fn from_bytes(raw: &[u8; Self::LEN]) -> Option<Self> {
        if raw[0] != RECORD_MARKER || raw[1] > 1 {
            return None;
        }
        let mut pin_hash = [0u8; 32];
        pin_hash.copy_from_slice(&raw[3..35]);
        Some(Self {
            pin_set: raw[1] == 1,
            retries: raw[2].min(PIN_MAX_RETRIES),
            pin_hash,
            min_pin_length: raw[35],
            always_uv: raw[36] & FLAG_ALWAYS_UV != 0,
            enterprise_attestation: raw[36] & FLAG_ENTERPRISE_ATTESTATION != 0,
        })
    }
}

/// Marker-prefixed fixed-size value, used for the counter and attestation key
pub fn marked<const N: usize>(raw: &[u8], value: &mut [u8; N]) -> bool {
    if raw.len() != N + 1 || raw[0] != RECORD_MARKER {
        return false;
    }
    value.copy_from_slice(&raw[1..]);
    true
}

pub fn is_erased(raw: &[u8]) -> bool {
    raw.iter().all(|&b| b == ERASED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_fit_partition() {
        assert_eq!(slot_offset(0), 2048);
        assert_eq!(slot_offset(1), 2560);
        assert!(slot_offset(MAX_CREDENTIALS) <= PARTITION_SIZE);
        assert!(ATTESTATION_OFFSET as usize + 33 <= SLOTS_OFFSET as usize);
    }

    #[test]
    fn test_header_round_trip() {
        let header = Header {
            magic: MAGIC,
            version: LAYOUT_VERSION,
            master_key: Zeroizing::new([7; 32]),
        };
        let raw = header.to_bytes();
        assert_eq!(&raw[0..4], &[0x32, 0x44, 0x49, 0x46]);
        let back = Header::from_bytes(&raw);
        assert_eq!(back.magic, MAGIC);
        assert_eq!(back.version, LAYOUT_VERSION);
        assert_eq!(*back.master_key, [7; 32]);
    }

    #[test]
    fn test_pin_record_round_trip() {
        let record = PinRecord {
            pin_set: true,
            retries: 5,
            pin_hash: [0x42; 32],
            min_pin_length: 6,
            always_uv: true,
            enterprise_attestation: false,
        };
        assert_eq!(PinRecord::from_bytes(&record.to_bytes()), Some(record));
    }

    #[test]
    fn test_erased_pin_record() {
        assert_eq!(PinRecord::from_bytes(&[ERASED; PinRecord::LEN]), None);
        let mut raw = PinRecord::default().to_bytes();
        raw[1] = 0x7F;
        assert_eq!(PinRecord::from_bytes(&raw), None);
        assert!(!PinRecord::default().is_blocked());
    }

    #[test]
    fn test_marked_value() {
        let mut value = [0u8; 4];
        assert!(marked(&[RECORD_MARKER, 1, 2, 3, 4], &mut value));
        assert_eq!(value, [1, 2, 3, 4]);
        assert!(!marked(&[ERASED; 5], &mut value));
        assert!(is_erased(&[ERASED; 5]));
    }
}
