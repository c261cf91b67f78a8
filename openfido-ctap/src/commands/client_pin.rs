//! authenticatorClientPIN command
//!
//! Subcommands:
//! - getPinRetries (0x01)
//! - getKeyAgreement (0x02)
//! - setPin (0x03)
//! - changePin (0x04)
//! - getPinToken (0x05)
//! - getPinUvAuthTokenUsingPinWithPermissions (0x09)
//!
//! Every subcommand except getPinRetries runs over the ECDH channel set up
//! with getKeyAgreement and the selected PIN/UV auth protocol.

use alloc::vec::Vec;

use openfido_crypto::digest;
use zeroize::Zeroizing;

use super::encode_response;
use crate::authenticator::Authenticator;
use crate::cbor::Decoder;
use crate::hal::Platform;
use crate::pin_token::{LEGACY_PERMISSIONS, Permission, PinProtocol, SharedSecret};
use crate::status::{Result, StatusCode};
use crate::storage::Flash;
use crate::storage::layout::PIN_MAX_LENGTH;
use crate::types::{CoseAlgorithm, MAX_RP_ID_LENGTH, decode_cose_key, encode_cose_key};

/// ClientPIN request parameter keys
mod req_keys {
    pub const PIN_UV_AUTH_PROTOCOL: u64 = 0x01;
    pub const SUB_COMMAND: u64 = 0x02;
    pub const KEY_AGREEMENT: u64 = 0x03;
    pub const PIN_UV_AUTH_PARAM: u64 = 0x04;
    pub const NEW_PIN_ENC: u64 = 0x05;
    pub const PIN_HASH_ENC: u64 = 0x06;
    pub const PERMISSIONS: u64 = 0x09;
    pub const RP_ID: u64 = 0x0A;
}

/// ClientPIN response keys
mod resp_keys {
    pub const KEY_AGREEMENT: u64 = 0x01;
    pub const PIN_UV_AUTH_TOKEN: u64 = 0x02;
    pub const PIN_RETRIES: u64 = 0x03;
}

/// ClientPIN subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PinSubCommand {
    GetPinRetries = 0x01,
    GetKeyAgreement = 0x02,
    SetPin = 0x03,
    ChangePin = 0x04,
    GetPinToken = 0x05,
    GetPinUvAuthTokenUsingPinWithPermissions = 0x09,
}

impl PinSubCommand {
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0x01 => Some(Self::GetPinRetries),
            0x02 => Some(Self::GetKeyAgreement),
            0x03 => Some(Self::SetPin),
            0x04 => Some(Self::ChangePin),
            0x05 => Some(Self::GetPinToken),
            0x09 => Some(Self::GetPinUvAuthTokenUsingPinWithPermissions),
            _ => None,
        }
    }
}

/// Padded PIN block length inside newPinEnc
const PADDED_PIN_LENGTH: usize = 64;

/// Length of `LEFT(SHA-256(pin), 16)` inside pinHashEnc
const PIN_HASH_LENGTH: usize = 16;

#[derive(Default)]
struct Request<'a> {
    protocol: Option<u64>,
    sub_command: Option<u64>,
    key_agreement: Option<([u8; 32], [u8; 32])>,
    pin_uv_auth_param: Option<&'a [u8]>,
    new_pin_enc: Option<&'a [u8]>,
    pin_hash_enc: Option<&'a [u8]>,
    permissions: Option<u64>,
    rp_id: Option<&'a str>,
}

impl<'a> Request<'a> {
    fn decode(data: &'a [u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let mut req = Self::default();
        for _ in 0..dec.map()? {
            match dec.unsigned()? {
                req_keys::PIN_UV_AUTH_PROTOCOL => req.protocol = Some(dec.unsigned()?),
                req_keys::SUB_COMMAND => req.sub_command = Some(dec.unsigned()?),
                req_keys::KEY_AGREEMENT => req.key_agreement = Some(decode_cose_key(&mut dec)?),
                req_keys::PIN_UV_AUTH_PARAM => req.pin_uv_auth_param = Some(dec.bytes()?),
                req_keys::NEW_PIN_ENC => req.new_pin_enc = Some(dec.bytes()?),
                req_keys::PIN_HASH_ENC => req.pin_hash_enc = Some(dec.bytes()?),
                req_keys::PERMISSIONS => req.permissions = Some(dec.unsigned()?),
                req_keys::RP_ID => req.rp_id = Some(dec.text_max(MAX_RP_ID_LENGTH)?),
                _ => dec.skip()?,
            }
        }
        Ok(req)
    }

    fn protocol(&self) -> Result<PinProtocol> {
        PinProtocol::from_u64(self.protocol.ok_or(StatusCode::MissingParameter)?)
    }

    fn key_agreement(&self) -> Result<&([u8; 32], [u8; 32])> {
        self.key_agreement.as_ref().ok_or(StatusCode::MissingParameter)
    }
}

/// Handle authenticatorClientPIN
pub fn handle<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let req = Request::decode(data)?;
    let sub_command = req.sub_command.ok_or(StatusCode::MissingParameter)?;
    let sub_command = PinSubCommand::from_u64(sub_command).ok_or(StatusCode::InvalidSubcommand)?;
    log::debug!("ClientPIN {:?}", sub_command);

    match sub_command {
        PinSubCommand::GetPinRetries => get_pin_retries(auth),
        PinSubCommand::GetKeyAgreement => get_key_agreement(auth, &req),
        PinSubCommand::SetPin => set_pin(auth, &req),
        PinSubCommand::ChangePin => change_pin(auth, &req),
        PinSubCommand::GetPinToken => get_pin_token(auth, &req, LEGACY_PERMISSIONS, None),
        PinSubCommand::GetPinUvAuthTokenUsingPinWithPermissions => {
            get_token_with_permissions(auth, &req)
        }
    }
}

fn get_pin_retries<F: Flash, P: Platform>(auth: &Authenticator<F, P>) -> Result<Vec<u8>> {
    let retries = auth.pin_retries();
    encode_response(16, |enc| {
        enc.map(1)?.unsigned(resp_keys::PIN_RETRIES)?.unsigned(u64::from(retries))?;
        Ok(())
    })
}

fn get_key_agreement<F: Flash, P: Platform>(
    auth: &Authenticator<F, P>,
    req: &Request<'_>,
) -> Result<Vec<u8>> {
    req.protocol()?;
    let (x, y) = auth.key_agreement().public_key_cose();
    encode_response(96, |enc| {
        enc.map(1)?.unsigned(resp_keys::KEY_AGREEMENT)?;
        encode_cose_key(enc, &x, &y, CoseAlgorithm::EcdhEsHkdf256)
    })
}

fn set_pin<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    req: &Request<'_>,
) -> Result<Vec<u8>> {
    let protocol = req.protocol()?;
    let peer = req.key_agreement()?;
    let pin_auth = req.pin_uv_auth_param.ok_or(StatusCode::MissingParameter)?;
    let new_pin_enc = req.new_pin_enc.ok_or(StatusCode::MissingParameter)?;

    if auth.is_pin_set() {
        return Err(StatusCode::NotAllowed);
    }

    let secret = auth.shared_secret(protocol, peer)?;
    if !secret.verify(new_pin_enc, pin_auth) {
        log::warn!("setPin pinUvAuthParam did not verify");
        return Err(StatusCode::PinAuthInvalid);
    }

    let pin_hash = decrypt_new_pin(&secret, new_pin_enc, auth.min_pin_length())?;
    auth.store_mut().set_pin_hash(*pin_hash)?;
    log::info!("PIN set");
    Ok(Vec::new())
}

fn change_pin<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    req: &Request<'_>,
) -> Result<Vec<u8>> {
    let protocol = req.protocol()?;
    let peer = req.key_agreement()?;
    let pin_auth = req.pin_uv_auth_param.ok_or(StatusCode::MissingParameter)?;
    let new_pin_enc = req.new_pin_enc.ok_or(StatusCode::MissingParameter)?;
    let pin_hash_enc = req.pin_hash_enc.ok_or(StatusCode::MissingParameter)?;

    if !auth.is_pin_set() {
        return Err(StatusCode::PinNotSet);
    }
    if auth.store().is_pin_blocked() {
        return Err(StatusCode::PinBlocked);
    }

    let secret = auth.shared_secret(protocol, peer)?;
    let mut message = Vec::with_capacity(new_pin_enc.len() + pin_hash_enc.len());
    message.extend_from_slice(new_pin_enc);
    message.extend_from_slice(pin_hash_enc);
    if !secret.verify(&message, pin_auth) {
        log::warn!("changePin pinUvAuthParam did not verify");
        return Err(StatusCode::PinAuthInvalid);
    }

    check_pin_hash_enc(auth, &secret, pin_hash_enc)?;

    let pin_hash = decrypt_new_pin(&secret, new_pin_enc, auth.min_pin_length())?;
    auth.store_mut().set_pin_hash(*pin_hash)?;
    auth.pin_tokens_mut().clear();
    auth.clear_cursors();
    log::info!("PIN changed");
    Ok(Vec::new())
}

fn get_token_with_permissions<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    req: &Request<'_>,
) -> Result<Vec<u8>> {
    let requested = req.permissions.ok_or(StatusCode::MissingParameter)?;
    // unknown bits are ignored
    let permissions = (requested & 0x3F) as u8;
    if permissions == 0 {
        return Err(StatusCode::InvalidParameter);
    }
    if Permission::BioEnrollment.is_set_in(permissions) {
        return Err(StatusCode::UnauthorizedPermission);
    }

    let rp_scoped = Permission::MakeCredential.is_set_in(permissions)
        || Permission::GetAssertion.is_set_in(permissions);
    if rp_scoped && req.rp_id.is_none() {
        return Err(StatusCode::MissingParameter);
    }
    let rp_id_hash = req.rp_id.map(|rp_id| digest::sha256(rp_id.as_bytes()));

    get_pin_token(auth, req, permissions, rp_id_hash)
}

fn get_pin_token<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    req: &Request<'_>,
    permissions: u8,
    rp_id_hash: Option<[u8; 32]>,
) -> Result<Vec<u8>> {
    let protocol = req.protocol()?;
    let peer = req.key_agreement()?;
    let pin_hash_enc = req.pin_hash_enc.ok_or(StatusCode::MissingParameter)?;

    if !auth.is_pin_set() {
        return Err(StatusCode::PinNotSet);
    }

    let secret = auth.shared_secret(protocol, peer)?;
    check_pin_hash_enc(auth, &secret, pin_hash_enc)?;

    // enumerations begun under the replaced token end with it
    auth.clear_cursors();
    let token = *auth.pin_tokens_mut().issue(permissions, rp_id_hash).value();
    let token = Zeroizing::new(token);
    let encrypted = secret.encrypt(&token[..])?;
    log::info!("PIN token issued with permissions {:#04x}", permissions);

    encode_response(96, |enc| {
        enc.map(1)?.unsigned(resp_keys::PIN_UV_AUTH_TOKEN)?.bytes(&encrypted)?;
        Ok(())
    })
}

/// Decrypt pinHashEnc and check it against the stored PIN
fn check_pin_hash_enc<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    secret: &SharedSecret,
    pin_hash_enc: &[u8],
) -> Result<()> {
    let pin_hash = secret
        .decrypt(pin_hash_enc)
        .map_err(|_| StatusCode::InvalidParameter)?;
    if pin_hash.len() != PIN_HASH_LENGTH {
        return Err(StatusCode::InvalidParameter);
    }
    auth.check_pin_hash(&pin_hash)
}

/// Decrypt a padded newPinEnc block and hash the PIN it carries
///
/// The PIN is the bytes before the first zero; its length must lie in
/// `min_length..=63`.
fn decrypt_new_pin(
    secret: &SharedSecret,
    new_pin_enc: &[u8],
    min_length: usize,
) -> Result<Zeroizing<[u8; 32]>> {
    let padded = secret
        .decrypt(new_pin_enc)
        .map_err(|_| StatusCode::InvalidParameter)?;
    if padded.len() != PADDED_PIN_LENGTH {
        return Err(StatusCode::InvalidParameter);
    }
    let length = padded.iter().position(|&b| b == 0).unwrap_or(padded.len());
    if length < min_length || length > PIN_MAX_LENGTH {
        log::warn!("New PIN length {} outside policy", length);
        return Err(StatusCode::PinPolicyViolation);
    }
    Ok(Zeroizing::new(digest::sha256(&padded[..length])))
}
