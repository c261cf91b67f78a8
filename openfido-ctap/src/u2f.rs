//! U2F (CTAP1) adapter
//!
//! Raw-message APDUs on top of the same credential store as CTAP2. Key
//! handles are credential IDs of non-resident credentials whose RP hash is
//! the U2F application parameter, so a key registered here is also usable
//! from CTAP2 GetAssertion with an allowList.

use alloc::vec::Vec;
use core::fmt;

use openfido_crypto::{ecdsa, rng};

use crate::authenticator::Authenticator;
use crate::hal::Platform;
use crate::storage::{Flash, StorageError};
use crate::types::{CREDENTIAL_ID_LENGTH, CoseAlgorithm, Credential};

const APDU_HEADER_LEN: usize = 4;
const U2F_CLA: u8 = 0x00;

/// Legacy leading byte of a registration response
const REGISTER_RESERVED: u8 = 0x05;
const USER_PRESENCE_FLAG: u8 = 0x01;
const VERSION: &[u8] = b"U2F_V2";

/// SubjectPublicKeyInfo prefix for an uncompressed P-256 point
const SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01, 0x06, 0x08, 0x2A,
    0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

/// ISO 7816 status words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusWord {
    NoError = 0x9000,
    WrongLength = 0x6700,
    ConditionsNotSatisfied = 0x6985,
    CommandNotAllowed = 0x6986,
    WrongData = 0x6A80,
    InsNotSupported = 0x6D00,
    ClaNotSupported = 0x6E00,
}

impl StatusWord {
    pub fn to_bytes(self) -> [u8; 2] {
        (self as u16).to_be_bytes()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SW {:04X}", *self as u16)
    }
}

impl From<StorageError> for StatusWord {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => StatusWord::WrongData,
            _ => StatusWord::CommandNotAllowed,
        }
    }
}

impl From<openfido_crypto::CryptoError> for StatusWord {
    fn from(_: openfido_crypto::CryptoError) -> Self {
        StatusWord::CommandNotAllowed
    }
}

pub type Result<T> = core::result::Result<T, StatusWord>;

/// Authenticate control byte (P1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Control {
    CheckOnly = 0x07,
    EnforceUserPresence = 0x03,
    DontEnforceUserPresence = 0x08,
}

impl Control {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x07 => Some(Self::CheckOnly),
            0x03 => Some(Self::EnforceUserPresence),
            0x08 => Some(Self::DontEnforceUserPresence),
            _ => None,
        }
    }
}

/// Command APDU split into header and body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Apdu<'a> {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: &'a [u8],
}

impl<'a> Apdu<'a> {
    /// Parse short (`Lc`) or extended (`00 Lc1 Lc2`) encodings
    ///
    /// A trailing `Le` of up to three bytes is accepted and ignored.
    pub fn parse(frame: &'a [u8]) -> Result<Self> {
        if frame.len() < APDU_HEADER_LEN {
            return Err(StatusWord::WrongData);
        }
        let (header, body) = frame.split_at(APDU_HEADER_LEN);

        let data: &[u8] = match body {
            // no body, or Le only
            [] | [_] | [0x00, _, _] => &[],
            [0x00, hi, lo, rest @ ..] => {
                let lc = usize::from(u16::from_be_bytes([*hi, *lo]));
                take_data(rest, lc, 2)?
            }
            [lc, rest @ ..] => take_data(rest, usize::from(*lc), 1)?,
        };

        Ok(Self {
            cla: header[0],
            ins: header[1],
            p1: header[2],
            p2: header[3],
            data,
        })
    }
}

fn take_data(rest: &[u8], lc: usize, max_le: usize) -> Result<&[u8]> {
    if rest.len() < lc || rest.len() - lc > max_le {
        return Err(StatusWord::WrongLength);
    }
    Ok(&rest[..lc])
}

/// Handle one APDU and return the response data without status word
pub fn handle<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    frame: &[u8],
) -> Result<Vec<u8>> {
    let apdu = Apdu::parse(frame)?;
    if apdu.cla != U2F_CLA {
        return Err(StatusWord::ClaNotSupported);
    }
    log::debug!("U2F INS {:#04x} P1 {:#04x} Lc {}", apdu.ins, apdu.p1, apdu.data.len());

    match apdu.ins {
        0x01 => register(auth, apdu.data),
        0x02 => authenticate(auth, apdu.p1, apdu.data),
        0x03 => {
            if !apdu.data.is_empty() {
                return Err(StatusWord::WrongLength);
            }
            Ok(VERSION.to_vec())
        }
        _ => Err(StatusWord::InsNotSupported),
    }
}

/// Handle one APDU and append the status word
pub fn process<F: Flash, P: Platform>(auth: &mut Authenticator<F, P>, frame: &[u8]) -> Vec<u8> {
    match handle(auth, frame) {
        Ok(mut response) => {
            response.extend_from_slice(&StatusWord::NoError.to_bytes());
            response
        }
        Err(sw) => {
            log::debug!("U2F request failed: {}", sw);
            sw.to_bytes().to_vec()
        }
    }
}

fn split_parameters(data: &[u8]) -> ([u8; 32], [u8; 32]) {
    let mut challenge = [0u8; 32];
    let mut application = [0u8; 32];
    challenge.copy_from_slice(&data[..32]);
    application.copy_from_slice(&data[32..64]);
    (challenge, application)
}

fn user_presence<F: Flash, P: Platform>(auth: &mut Authenticator<F, P>) -> Result<()> {
    auth.wait_for_user_presence()
        .map_err(|_| StatusWord::ConditionsNotSatisfied)
}

/// `challenge(32) ‖ application(32)`
fn register<F: Flash, P: Platform>(auth: &mut Authenticator<F, P>, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() != 64 {
        return Err(StatusWord::WrongLength);
    }
    let (challenge, application) = split_parameters(data);

    user_presence(auth)?;

    let (private_key, public_key) = ecdsa::generate_keypair();
    let mut credential = Credential::new(rng::bytes(), application, private_key);
    credential.sign_count = auth.store_mut().next_counter()?;
    auth.store_mut().store(&credential)?;

    let mut signed = Vec::with_capacity(1 + 32 + 32 + CREDENTIAL_ID_LENGTH + public_key.len());
    signed.push(0x00);
    signed.extend_from_slice(&application);
    signed.extend_from_slice(&challenge);
    signed.extend_from_slice(&credential.id);
    signed.extend_from_slice(&public_key);
    let signature = ecdsa::sign(auth.store().attestation_key(), &signed)?;

    let attestation_public = ecdsa::public_from_private(auth.store().attestation_key())?;

    let mut response = Vec::with_capacity(
        1 + public_key.len()
            + 1
            + CREDENTIAL_ID_LENGTH
            + SPKI_PREFIX.len()
            + attestation_public.len()
            + signature.len(),
    );
    response.push(REGISTER_RESERVED);
    response.extend_from_slice(&public_key);
    response.push(CREDENTIAL_ID_LENGTH as u8);
    response.extend_from_slice(&credential.id);
    response.extend_from_slice(&SPKI_PREFIX);
    response.extend_from_slice(&attestation_public);
    response.extend_from_slice(&signature);

    log::info!("U2F registration stored");
    Ok(response)
}

/// `challenge(32) ‖ application(32) ‖ L ‖ keyHandle(L)`
fn authenticate<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    p1: u8,
    data: &[u8],
) -> Result<Vec<u8>> {
    if data.len() < 65 || data.len() != 65 + usize::from(data[64]) {
        return Err(StatusWord::WrongLength);
    }
    let control = Control::from_u8(p1).ok_or(StatusWord::WrongData)?;
    let (challenge, application) = split_parameters(data);

    let id: [u8; CREDENTIAL_ID_LENGTH] = data[65..]
        .try_into()
        .map_err(|_| StatusWord::WrongData)?;
    let credential = auth.store_mut().find(&id)?;
    // U2F signatures are ECDSA P-256 only
    if credential.rp_id_hash != application || credential.algorithm != CoseAlgorithm::Es256 {
        return Err(StatusWord::WrongData);
    }

    let flags = match control {
        // the handle is ours; a real sign request must follow
        Control::CheckOnly => return Err(StatusWord::ConditionsNotSatisfied),
        Control::EnforceUserPresence => {
            user_presence(auth)?;
            USER_PRESENCE_FLAG
        }
        Control::DontEnforceUserPresence => 0x00,
    };

    let counter = auth.store_mut().next_counter()?;
    auth.store_mut().update_sign_count(&credential.id, counter)?;

    let mut signed = Vec::with_capacity(32 + 1 + 4 + 32);
    signed.extend_from_slice(&application);
    signed.push(flags);
    signed.extend_from_slice(&counter.to_be_bytes());
    signed.extend_from_slice(&challenge);
    let signature = ecdsa::sign(&credential.private_key, &signed)?;

    let mut response = Vec::with_capacity(1 + 4 + signature.len());
    response.push(flags);
    response.extend_from_slice(&counter.to_be_bytes());
    response.extend_from_slice(&signature);
    Ok(response)
}
