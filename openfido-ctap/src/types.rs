//! CTAP data types
//!
//! Request entities (relying party, user, credential descriptors, options),
//! the stored [`Credential`] record, COSE key encoding and the
//! authenticator data layout. Text fields are bounded `heapless` strings:
//! a value longer than its bound is rejected while decoding, never
//! truncated.

use core::fmt;

use alloc::vec::Vec;

use openfido_crypto::{ecdsa, eddsa};
use zeroize::Zeroizing;

use crate::cbor::{Decoder, Encoder};
use crate::extensions::CredProtect;
use crate::status::{Result, StatusCode};

/// Length of authenticator-generated credential ids
pub const CREDENTIAL_ID_LENGTH: usize = 16;
pub const MAX_RP_ID_LENGTH: usize = 256;
pub const MAX_USER_ID_LENGTH: usize = 64;
pub const MAX_USER_NAME_LENGTH: usize = 64;
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

pub type CredentialId = [u8; CREDENTIAL_ID_LENGTH];
pub type RpId = heapless::String<MAX_RP_ID_LENGTH>;
pub type UserId = heapless::Vec<u8, MAX_USER_ID_LENGTH>;
pub type UserName = heapless::String<MAX_USER_NAME_LENGTH>;
pub type DisplayName = heapless::String<MAX_DISPLAY_NAME_LENGTH>;

pub const PUBLIC_KEY_TYPE: &str = "public-key";

/// Authenticator data flag bits
pub mod flags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;
}

/// COSE algorithm identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoseAlgorithm {
    /// ECDSA P-256 with SHA-256
    Es256,
    /// Ed25519
    EdDsa,
    /// ECDH-ES + HKDF-256, used for PIN key agreement
    EcdhEsHkdf256,
}

impl CoseAlgorithm {
    /// Credential algorithms in order of preference
    pub const CREDENTIAL: [Self; 2] = [Self::Es256, Self::EdDsa];

    pub fn to_i64(self) -> i64 {
        match self {
            Self::Es256 => -7,
            Self::EdDsa => -8,
            Self::EcdhEsHkdf256 => -25,
        }
    }

    /// Only algorithms usable for credentials are recognized here
    pub fn from_i64(value: i64) -> Option<Self> {
        Self::CREDENTIAL
            .into_iter()
            .find(|alg| alg.to_i64() == value)
    }
}

/// Copy a decoded string into a bounded buffer
pub(crate) fn bounded_str<const N: usize>(value: &str) -> Result<heapless::String<N>> {
    let mut out = heapless::String::new();
    out.push_str(value).map_err(|_| StatusCode::InvalidLength)?;
    Ok(out)
}

/// Relying party entity; only the id is retained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    pub id: RpId,
}

impl RelyingParty {
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut id = None;
        for _ in 0..dec.map()? {
            match dec.text()? {
                "id" => id = Some(bounded_str(dec.text_max(MAX_RP_ID_LENGTH)?)?),
                _ => dec.skip()?,
            }
        }
        Ok(Self {
            id: id.ok_or(StatusCode::MissingParameter)?,
        })
    }
}

/// User entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: UserName,
    pub display_name: DisplayName,
}

impl User {
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut id = None;
        let mut user = Self::default();
        for _ in 0..dec.map()? {
            match dec.text()? {
                "id" => {
                    let raw = dec.bytes_max(MAX_USER_ID_LENGTH)?;
                    id = Some(UserId::from_slice(raw).map_err(|_| StatusCode::InvalidLength)?);
                }
                "name" => user.name = bounded_str(dec.text_max(MAX_USER_NAME_LENGTH)?)?,
                "displayName" => {
                    user.display_name = bounded_str(dec.text_max(MAX_DISPLAY_NAME_LENGTH)?)?
                }
                _ => dec.skip()?,
            }
        }
        user.id = id.ok_or(StatusCode::MissingParameter)?;
        Ok(user)
    }

    /// `{"id", "name"?, "displayName"?}` in canonical key order
    pub fn encode(&self, enc: &mut Encoder<'_>) -> crate::cbor::Result<()> {
        let entries =
            1 + usize::from(!self.name.is_empty()) + usize::from(!self.display_name.is_empty());
        enc.map(entries)?.text("id")?.bytes(&self.id)?;
        if !self.name.is_empty() {
            enc.text("name")?.text(&self.name)?;
        }
        if !self.display_name.is_empty() {
            enc.text("displayName")?.text(&self.display_name)?;
        }
        Ok(())
    }
}

/// Entry of an allowList or excludeList, borrowing the id from the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialDescriptor<'a> {
    pub id: &'a [u8],
    pub public_key: bool,
}

impl<'a> CredentialDescriptor<'a> {
    pub fn decode(dec: &mut Decoder<'a>) -> Result<Self> {
        let mut id = None;
        let mut cred_type = None;
        for _ in 0..dec.map()? {
            match dec.text()? {
                "id" => id = Some(dec.bytes()?),
                "type" => cred_type = Some(dec.text()?),
                _ => dec.skip()?,
            }
        }
        Ok(Self {
            id: id.ok_or(StatusCode::MissingParameter)?,
            public_key: cred_type.ok_or(StatusCode::MissingParameter)? == PUBLIC_KEY_TYPE,
        })
    }

    /// Id as an authenticator credential id, if it has the right shape
    pub fn credential_id(&self) -> Option<CredentialId> {
        if !self.public_key {
            return None;
        }
        self.id.try_into().ok()
    }

    /// Decode an array of descriptors, bounded by `max`
    pub fn decode_list(dec: &mut Decoder<'a>, max: usize) -> Result<Vec<Self>> {
        let count = dec.array()?;
        if count > max {
            return Err(StatusCode::LimitExceeded);
        }
        let mut list = Vec::with_capacity(count);
        for _ in 0..count {
            list.push(Self::decode(dec)?);
        }
        Ok(list)
    }
}

/// One entry of pubKeyCredParams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialParameter {
    pub alg: i64,
    pub public_key: bool,
}

impl CredentialParameter {
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut alg = None;
        let mut cred_type = None;
        for _ in 0..dec.map()? {
            match dec.text()? {
                "alg" => alg = Some(dec.int()?),
                "type" => cred_type = Some(dec.text()?),
                _ => dec.skip()?,
            }
        }
        Ok(Self {
            alg: alg.ok_or(StatusCode::MissingParameter)?,
            public_key: cred_type.ok_or(StatusCode::MissingParameter)? == PUBLIC_KEY_TYPE,
        })
    }
}

/// Request options map; absent keys stay `None`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub rk: Option<bool>,
    pub up: Option<bool>,
    pub uv: Option<bool>,
}

impl RequestOptions {
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut options = Self::default();
        for _ in 0..dec.map()? {
            match dec.text()? {
                "rk" => options.rk = Some(dec.bool()?),
                "up" => options.up = Some(dec.bool()?),
                "uv" => options.uv = Some(dec.bool()?),
                _ => dec.skip()?,
            }
        }
        Ok(options)
    }
}

/// Encode an uncompressed P-256 point as a COSE_Key
pub fn encode_cose_key(
    enc: &mut Encoder<'_>,
    x: &[u8; 32],
    y: &[u8; 32],
    alg: CoseAlgorithm,
) -> crate::cbor::Result<()> {
    enc.map(5)?
        .unsigned(1)? // kty: EC2
        .unsigned(2)?
        .unsigned(3)? // alg
        .int(alg.to_i64())?
        .int(-1)? // crv: P-256
        .unsigned(1)?
        .int(-2)?
        .bytes(x)?
        .int(-3)?
        .bytes(y)?;
    Ok(())
}

/// Encode an Ed25519 public key as an OKP COSE_Key
pub fn encode_okp_key(enc: &mut Encoder<'_>, x: &[u8; 32]) -> crate::cbor::Result<()> {
    enc.map(4)?
        .unsigned(1)? // kty: OKP
        .unsigned(1)?
        .unsigned(3)? // alg
        .int(CoseAlgorithm::EdDsa.to_i64())?
        .int(-1)? // crv: Ed25519
        .unsigned(6)?
        .int(-2)?
        .bytes(x)?;
    Ok(())
}

/// Public half of a credential key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKey {
    /// Uncompressed SEC1 point
    Es256([u8; ecdsa::PUBLIC_KEY_LENGTH]),
    /// Compressed Edwards point
    EdDsa([u8; eddsa::PUBLIC_KEY_LENGTH]),
}

impl PublicKey {
    pub fn encode_cose(&self, enc: &mut Encoder<'_>) -> crate::cbor::Result<()> {
        match self {
            Self::Es256(point) => {
                let (x, y) = ecdsa::coordinates(point);
                encode_cose_key(enc, &x, &y, CoseAlgorithm::Es256)
            }
            Self::EdDsa(point) => encode_okp_key(enc, point),
        }
    }
}

/// Parse a peer COSE_Key, returning the point coordinates
pub fn decode_cose_key(dec: &mut Decoder<'_>) -> Result<([u8; 32], [u8; 32])> {
    let mut x = None;
    let mut y = None;
    for _ in 0..dec.map()? {
        match dec.int()? {
            1 => {
                if dec.int()? != 2 {
                    return Err(StatusCode::InvalidParameter);
                }
            }
            -1 => {
                if dec.int()? != 1 {
                    return Err(StatusCode::InvalidParameter);
                }
            }
            -2 => x = Some(dec.bytes()?),
            -3 => y = Some(dec.bytes()?),
            _ => dec.skip()?,
        }
    }
    let x = x.ok_or(StatusCode::MissingParameter)?;
    let y = y.ok_or(StatusCode::MissingParameter)?;
    Ok((
        x.try_into().map_err(|_| StatusCode::InvalidParameter)?,
        y.try_into().map_err(|_| StatusCode::InvalidParameter)?,
    ))
}

/// A credential as held in memory after decryption
#[derive(Clone)]
pub struct Credential {
    pub id: CredentialId,
    pub rp_id_hash: [u8; 32],
    /// Empty for non-resident credentials
    pub rp_id: RpId,
    pub user: User,
    pub private_key: Zeroizing<[u8; 32]>,
    pub sign_count: u32,
    pub algorithm: CoseAlgorithm,
    pub resident: bool,
    pub cred_protect: CredProtect,
    /// Created with the hmac-secret extension
    pub hmac_secret: bool,
}

impl Credential {
    /// A credential for `rp_id_hash` with empty user metadata
    pub fn new(id: CredentialId, rp_id_hash: [u8; 32], private_key: Zeroizing<[u8; 32]>) -> Self {
        Self {
            id,
            rp_id_hash,
            rp_id: RpId::new(),
            user: User::default(),
            private_key,
            sign_count: 0,
            algorithm: CoseAlgorithm::Es256,
            resident: false,
            cred_protect: CredProtect::UserVerificationOptional,
            hmac_secret: false,
        }
    }

    /// A credential with a fresh key for `algorithm`
    pub fn generate(
        id: CredentialId,
        rp_id_hash: [u8; 32],
        algorithm: CoseAlgorithm,
    ) -> Result<Self> {
        let private_key = match algorithm {
            CoseAlgorithm::Es256 => ecdsa::generate_keypair().0,
            CoseAlgorithm::EdDsa => eddsa::generate_keypair().0,
            CoseAlgorithm::EcdhEsHkdf256 => return Err(StatusCode::UnsupportedAlgorithm),
        };
        let mut credential = Self::new(id, rp_id_hash, private_key);
        credential.algorithm = algorithm;
        Ok(credential)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        match self.algorithm {
            CoseAlgorithm::Es256 => Ok(PublicKey::Es256(ecdsa::public_from_private(
                &self.private_key,
            )?)),
            CoseAlgorithm::EdDsa => Ok(PublicKey::EdDsa(eddsa::public_from_private(
                &self.private_key,
            ))),
            CoseAlgorithm::EcdhEsHkdf256 => Err(StatusCode::UnsupportedAlgorithm),
        }
    }

    /// Sign `data`: a DER signature for ES256, raw `R || S` for EdDSA
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.algorithm {
            CoseAlgorithm::Es256 => Ok(ecdsa::sign(&self.private_key, data)?),
            CoseAlgorithm::EdDsa => Ok(eddsa::sign(&self.private_key, data).to_vec()),
            CoseAlgorithm::EcdhEsHkdf256 => Err(StatusCode::UnsupportedAlgorithm),
        }
    }
}

// never print the key
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("rp_id", &self.rp_id)
            .field("user", &self.user)
            .field("sign_count", &self.sign_count)
            .field("algorithm", &self.algorithm)
            .field("resident", &self.resident)
            .field("cred_protect", &self.cred_protect)
            .finish_non_exhaustive()
    }
}

/// Attested credential data appended to authenticator data on registration
pub struct AttestedCredential<'a> {
    pub aaguid: &'a [u8; 16],
    pub credential_id: &'a [u8],
    /// Encoded COSE public key
    pub public_key: &'a [u8],
}

/// Authenticator data:
/// `rpIdHash(32) ‖ flags(1) ‖ signCount(4, BE) ‖ [attested] ‖ [extensions]`
pub struct AuthenticatorData<'a> {
    pub rp_id_hash: &'a [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested: Option<AttestedCredential<'a>>,
    /// Encoded extension output map
    pub extensions: Option<&'a [u8]>,
}

impl AuthenticatorData<'_> {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut flags = self.flags;
        if self.attested.is_some() {
            flags |= flags::ATTESTED_CREDENTIAL_DATA;
        }
        if self.extensions.is_some() {
            flags |= flags::EXTENSION_DATA;
        }

        let mut out = Vec::with_capacity(37 + 18 + CREDENTIAL_ID_LENGTH + 80);
        out.extend_from_slice(self.rp_id_hash);
        out.push(flags);
        out.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(attested) = &self.attested {
            out.extend_from_slice(attested.aaguid);
            out.extend_from_slice(&(attested.credential_id.len() as u16).to_be_bytes());
            out.extend_from_slice(attested.credential_id);
            out.extend_from_slice(attested.public_key);
        }
        if let Some(extensions) = self.extensions {
            out.extend_from_slice(extensions);
        }
        out
    }
}
