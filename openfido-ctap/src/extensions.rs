//! CTAP extension processing
//!
//! Unknown extension identifiers in a request are skipped so newer
//! platforms keep working.
//!
//! | Extension | makeCredential | getAssertion |
//! |-----------|----------------|--------------|
//! | credProtect | input stored, echoed in authData | enforced on lookup |
//! | hmac-secret | flag stored, `true` echoed | encrypted HMAC outputs of the salts |

use alloc::vec::Vec;

use openfido_crypto::digest;
use zeroize::Zeroizing;

use crate::cbor::{Decoder, Encoder};
use crate::pin_token::{PinProtocol, SharedSecret};
use crate::status::{Result, StatusCode};
use crate::types::decode_cose_key;

/// Extension identifiers
pub mod ext_ids {
    pub const CRED_PROTECT: &str = "credProtect";
    pub const HMAC_SECRET: &str = "hmac-secret";
}

/// hmac-secret getAssertion input keys
mod hmac_keys {
    pub const KEY_AGREEMENT: u64 = 0x01;
    pub const SALT_ENC: u64 = 0x02;
    pub const SALT_AUTH: u64 = 0x03;
    pub const PIN_UV_AUTH_PROTOCOL: u64 = 0x04;
}

const SALT_LENGTH: usize = 32;

/// Credential protection policy levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CredProtect {
    /// UV not required
    #[default]
    UserVerificationOptional = 0x01,
    /// UV required unless the credential id was presented in an allowList
    UserVerificationOptionalWithCredentialIdList = 0x02,
    /// UV always required
    UserVerificationRequired = 0x03,
}

impl CredProtect {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::UserVerificationOptional),
            0x02 => Some(Self::UserVerificationOptionalWithCredentialIdList),
            0x03 => Some(Self::UserVerificationRequired),
            _ => None,
        }
    }

    /// Whether a credential with this policy may be used in an assertion
    ///
    /// `listed` is true when the caller named the credential in an allowList.
    pub fn permits(self, user_verified: bool, listed: bool) -> bool {
        match self {
            Self::UserVerificationOptional => true,
            Self::UserVerificationOptionalWithCredentialIdList => user_verified || listed,
            Self::UserVerificationRequired => user_verified,
        }
    }
}

/// makeCredential extension inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MakeCredentialExtensions {
    pub cred_protect: Option<CredProtect>,
    pub hmac_secret: bool,
}

impl MakeCredentialExtensions {
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut extensions = Self::default();
        for _ in 0..dec.map()? {
            match dec.text()? {
                ext_ids::CRED_PROTECT => {
                    let level = u8::try_from(dec.unsigned()?)
                        .ok()
                        .and_then(CredProtect::from_u8)
                        .ok_or(StatusCode::InvalidOption)?;
                    extensions.cred_protect = Some(level);
                }
                ext_ids::HMAC_SECRET => extensions.hmac_secret = dec.bool()?,
                other => {
                    log::debug!("Ignoring extension {}", other);
                    dec.skip()?;
                }
            }
        }
        Ok(extensions)
    }

    /// Encoded extension output map for authenticator data, if any output exists
    pub fn encode_outputs(&self) -> Result<Option<Vec<u8>>> {
        let entries = usize::from(self.cred_protect.is_some()) + usize::from(self.hmac_secret);
        if entries == 0 {
            return Ok(None);
        }
        let mut buf = [0u8; 32];
        let mut enc = Encoder::new(&mut buf);
        let write = |enc: &mut Encoder<'_>| -> crate::cbor::Result<()> {
            enc.map(entries)?;
            if let Some(level) = self.cred_protect {
                enc.text(ext_ids::CRED_PROTECT)?.unsigned(u64::from(level.to_u8()))?;
            }
            if self.hmac_secret {
                enc.text(ext_ids::HMAC_SECRET)?.bool(true)?;
            }
            Ok(())
        };
        write(&mut enc).map_err(|_| StatusCode::Processing)?;
        Ok(Some(enc.as_bytes().to_vec()))
    }
}

/// Platform half of a getAssertion hmac-secret request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmacSecretInput {
    /// Platform key agreement point `(x, y)`
    pub key_agreement: ([u8; 32], [u8; 32]),
    pub salt_enc: Vec<u8>,
    pub salt_auth: Vec<u8>,
    pub protocol: PinProtocol,
}

impl HmacSecretInput {
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut key_agreement = None;
        let mut salt_enc = None;
        let mut salt_auth = None;
        let mut protocol = PinProtocol::One;
        for _ in 0..dec.map()? {
            match dec.unsigned()? {
                hmac_keys::KEY_AGREEMENT => key_agreement = Some(decode_cose_key(dec)?),
                hmac_keys::SALT_ENC => salt_enc = Some(dec.bytes()?.to_vec()),
                hmac_keys::SALT_AUTH => salt_auth = Some(dec.bytes()?.to_vec()),
                hmac_keys::PIN_UV_AUTH_PROTOCOL => {
                    protocol = PinProtocol::from_u64(dec.unsigned()?)?
                }
                _ => dec.skip()?,
            }
        }
        Ok(Self {
            key_agreement: key_agreement.ok_or(StatusCode::MissingParameter)?,
            salt_enc: salt_enc.ok_or(StatusCode::MissingParameter)?,
            salt_auth: salt_auth.ok_or(StatusCode::MissingParameter)?,
            protocol,
        })
    }
}

/// getAssertion extension inputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetAssertionExtensions {
    pub hmac_secret: Option<HmacSecretInput>,
}

impl GetAssertionExtensions {
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut extensions = Self::default();
        for _ in 0..dec.map()? {
            match dec.text()? {
                ext_ids::HMAC_SECRET => {
                    extensions.hmac_secret = Some(HmacSecretInput::decode(dec)?)
                }
                other => {
                    log::debug!("Ignoring extension {}", other);
                    dec.skip()?;
                }
            }
        }
        Ok(extensions)
    }
}

/// Authenticated hmac-secret salts, kept for the whole assertion batch
pub struct HmacSecret {
    secret: SharedSecret,
    salts: Zeroizing<Vec<u8>>,
}

impl HmacSecret {
    /// Check `saltAuth` and decrypt the one or two salts
    pub fn open(secret: SharedSecret, input: &HmacSecretInput) -> Result<Self> {
        if !secret.verify(&input.salt_enc, &input.salt_auth) {
            log::warn!("hmac-secret saltAuth mismatch");
            return Err(StatusCode::PinAuthInvalid);
        }
        let salts = secret.decrypt(&input.salt_enc)?;
        if salts.len() != SALT_LENGTH && salts.len() != 2 * SALT_LENGTH {
            return Err(StatusCode::InvalidParameter);
        }
        Ok(Self { secret, salts })
    }

    /// `{"hmac-secret": enc(HMAC(credRandom, salt1) [|| HMAC(credRandom, salt2)])}`
    pub fn encode_output(&self, cred_random: &[u8; 32]) -> Result<Vec<u8>> {
        let mut outputs = Zeroizing::new(Vec::with_capacity(self.salts.len()));
        for salt in self.salts.chunks(SALT_LENGTH) {
            outputs.extend_from_slice(&digest::hmac_sha256(cred_random, &[salt])?);
        }
        let encrypted = self.secret.encrypt(&outputs)?;

        let mut buf = [0u8; 128];
        let mut enc = Encoder::new(&mut buf);
        enc.map(1)
            .and_then(|e| e.text(ext_ids::HMAC_SECRET))
            .and_then(|e| e.bytes(&encrypted))
            .map_err(|_| StatusCode::Processing)?;
        Ok(enc.as_bytes().to_vec())
    }
}
