//! authenticatorCredentialManagement command
//!
//! Metadata, RP and credential enumeration, deletion and user updates for
//! resident credentials. Enumeration state lives in [`SlotCursor`]s on the
//! authenticator; a begin subcommand replaces the cursor and any store
//! mutation invalidates it.
//!
//! Requires a PIN/UV auth token with the credential management permission.
//! The get-next subcommands carry no pinUvAuthParam; they continue an
//! authorized enumeration only while that token is still held, and only
//! when no other command ran since the previous step.

use alloc::vec::Vec;

use super::encode_response;
use crate::authenticator::{Authenticator, CursorKind, SlotCursor};
use crate::cbor::{Decoder, Encoder};
use crate::hal::Platform;
use crate::pin_token::{Permission, PinProtocol};
use crate::status::{Result, StatusCode};
use crate::storage::Flash;
use crate::types::{Credential, CredentialDescriptor, PUBLIC_KEY_TYPE, PublicKey, User};

/// Credential management subcommand codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubCommand {
    GetCredsMetadata = 0x01,
    EnumerateRpsBegin = 0x02,
    EnumerateRpsGetNextRp = 0x03,
    EnumerateCredentialsBegin = 0x04,
    EnumerateCredentialsGetNextCredential = 0x05,
    DeleteCredential = 0x06,
    UpdateUserInformation = 0x07,
}

impl SubCommand {
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0x01 => Some(Self::GetCredsMetadata),
            0x02 => Some(Self::EnumerateRpsBegin),
            0x03 => Some(Self::EnumerateRpsGetNextRp),
            0x04 => Some(Self::EnumerateCredentialsBegin),
            0x05 => Some(Self::EnumerateCredentialsGetNextCredential),
            0x06 => Some(Self::DeleteCredential),
            0x07 => Some(Self::UpdateUserInformation),
            _ => None,
        }
    }

    /// Get-next subcommands ride on the authorization of their begin
    fn requires_auth(self) -> bool {
        self.continues().is_none()
    }

    /// Enumeration a get-next subcommand steps through
    fn continues(self) -> Option<CursorKind> {
        match self {
            Self::EnumerateRpsGetNextRp => Some(CursorKind::RelyingParties),
            Self::EnumerateCredentialsGetNextCredential => Some(CursorKind::Credentials),
            _ => None,
        }
    }
}

/// Cursor a request body would continue, if it is a well-formed get-next
pub fn continued_cursor(data: &[u8]) -> Option<CursorKind> {
    let mut dec = Decoder::new(data);
    for _ in 0..dec.map().ok()? {
        if dec.unsigned().ok()? == req_keys::SUB_COMMAND {
            return SubCommand::from_u64(dec.unsigned().ok()?)?.continues();
        }
        dec.skip().ok()?;
    }
    None
}

/// Request parameter keys
mod req_keys {
    pub const SUB_COMMAND: u64 = 0x01;
    pub const SUB_COMMAND_PARAMS: u64 = 0x02;
    pub const PIN_UV_AUTH_PROTOCOL: u64 = 0x03;
    pub const PIN_UV_AUTH_PARAM: u64 = 0x04;
}

/// Response keys
mod resp_keys {
    pub const EXISTING_RESIDENT_CREDENTIALS_COUNT: u64 = 0x01;
    pub const MAX_POSSIBLE_REMAINING_RESIDENT_CREDENTIALS_COUNT: u64 = 0x02;
    pub const RP: u64 = 0x03;
    pub const RP_ID_HASH: u64 = 0x04;
    pub const TOTAL_RPS: u64 = 0x05;
    pub const USER: u64 = 0x06;
    pub const CREDENTIAL_ID: u64 = 0x07;
    pub const PUBLIC_KEY: u64 = 0x08;
    pub const TOTAL_CREDENTIALS: u64 = 0x09;
    pub const CRED_PROTECT: u64 = 0x0A;
}

/// Subcommand parameter keys
mod subparam_keys {
    pub const RP_ID_HASH: u64 = 0x01;
    pub const CREDENTIAL_ID: u64 = 0x02;
    pub const USER: u64 = 0x03;
}

/// Decoded subCommandParams
#[derive(Default)]
struct Params<'a> {
    rp_id_hash: Option<[u8; 32]>,
    credential_id: Option<CredentialDescriptor<'a>>,
    user: Option<User>,
}

impl<'a> Params<'a> {
    fn decode(raw: &'a [u8]) -> Result<Self> {
        let mut dec = Decoder::new(raw);
        let mut params = Self::default();
        for _ in 0..dec.map()? {
            match dec.unsigned()? {
                subparam_keys::RP_ID_HASH => {
                    let hash = dec.bytes()?;
                    let hash = hash.try_into().map_err(|_| StatusCode::InvalidParameter)?;
                    params.rp_id_hash = Some(hash);
                }
                subparam_keys::CREDENTIAL_ID => {
                    params.credential_id = Some(CredentialDescriptor::decode(&mut dec)?);
                }
                subparam_keys::USER => params.user = Some(User::decode(&mut dec)?),
                _ => dec.skip()?,
            }
        }
        Ok(params)
    }

    /// Absent subCommandParams decode to all-`None`
    fn decode_or_default(raw: &'a [u8]) -> Result<Self> {
        if raw.is_empty() {
            Ok(Self::default())
        } else {
            Self::decode(raw)
        }
    }

    fn credential_id(&self) -> Result<[u8; 16]> {
        let descriptor = self.credential_id.ok_or(StatusCode::MissingParameter)?;
        // ids of another shape were never issued here
        descriptor.credential_id().ok_or(StatusCode::NoCredentials)
    }
}

/// Handle authenticatorCredentialManagement
pub fn handle<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let mut dec = Decoder::new(data);
    let mut sub_command = None;
    let mut raw_params: &[u8] = &[];
    let mut protocol = None;
    let mut pin_auth = None;
    for _ in 0..dec.map()? {
        match dec.unsigned()? {
            req_keys::SUB_COMMAND => sub_command = Some(dec.unsigned()?),
            req_keys::SUB_COMMAND_PARAMS => raw_params = dec.raw_item()?,
            req_keys::PIN_UV_AUTH_PROTOCOL => protocol = Some(dec.unsigned()?),
            req_keys::PIN_UV_AUTH_PARAM => pin_auth = Some(dec.bytes()?),
            _ => dec.skip()?,
        }
    }

    let code = sub_command.ok_or(StatusCode::MissingParameter)?;
    let sub_command = SubCommand::from_u64(code).ok_or(StatusCode::InvalidSubcommand)?;
    let params = Params::decode_or_default(raw_params)?;
    log::debug!("CredentialManagement {:?}", sub_command);

    if sub_command.requires_auth() {
        let Some(pin_auth) = pin_auth else {
            return Err(if auth.is_pin_set() {
                StatusCode::PinRequired
            } else {
                StatusCode::PinNotSet
            });
        };
        let protocol = PinProtocol::from_u64(protocol.ok_or(StatusCode::MissingParameter)?)?;

        let mut message = Vec::with_capacity(1 + raw_params.len());
        message.push(code as u8);
        message.extend_from_slice(raw_params);
        auth.verify_pin_auth(protocol, &message, pin_auth, Permission::CredentialManagement, None)?;
    } else if !auth
        .pin_tokens()
        .token()
        .is_some_and(|token| token.has_permission(Permission::CredentialManagement))
    {
        log::warn!("Enumeration continued without a token");
        auth.clear_cursors();
        return Err(StatusCode::PinRequired);
    }

    match sub_command {
        SubCommand::GetCredsMetadata => get_creds_metadata(auth),
        SubCommand::EnumerateRpsBegin => enumerate_rps_begin(auth),
        SubCommand::EnumerateRpsGetNextRp => enumerate_rps_next(auth),
        SubCommand::EnumerateCredentialsBegin => enumerate_credentials_begin(auth, &params),
        SubCommand::EnumerateCredentialsGetNextCredential => enumerate_credentials_next(auth),
        SubCommand::DeleteCredential => delete_credential(auth, &params),
        SubCommand::UpdateUserInformation => update_user_information(auth, &params),
    }
}

fn get_creds_metadata<F: Flash, P: Platform>(auth: &mut Authenticator<F, P>) -> Result<Vec<u8>> {
    let existing = auth.store_mut().resident_count()?;
    let remaining = auth.store_mut().remaining()?;
    encode_response(32, |enc| {
        enc.map(2)?
            .unsigned(resp_keys::EXISTING_RESIDENT_CREDENTIALS_COUNT)?
            .unsigned(existing as u64)?
            .unsigned(resp_keys::MAX_POSSIBLE_REMAINING_RESIDENT_CREDENTIALS_COUNT)?
            .unsigned(remaining as u64)?;
        Ok(())
    })
}

/// Read a slot handed out by a cursor
fn cursor_credential<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    slot: usize,
) -> Result<Credential> {
    // the generation check guarantees the slot is still occupied
    auth.store_mut().read_slot(slot)?.ok_or(StatusCode::NoOperationPending)
}

fn enumerate_rps_begin<F: Flash, P: Platform>(auth: &mut Authenticator<F, P>) -> Result<Vec<u8>> {
    auth.rp_cursor = None;

    // one representative slot per RP, in slot order
    let mut seen: Vec<[u8; 32]> = Vec::new();
    let mut slots = Vec::new();
    for slot in auth.store_mut().resident_slots()? {
        let Some(credential) = auth.store_mut().read_slot(slot)? else {
            continue;
        };
        if !seen.contains(&credential.rp_id_hash) {
            seen.push(credential.rp_id_hash);
            slots.push(slot);
        }
    }

    let Some(&first) = slots.first() else {
        return Err(StatusCode::NoCredentials);
    };
    let total = slots.len();
    let credential = cursor_credential(auth, first)?;
    auth.rp_cursor = Some(SlotCursor::new(slots, auth.store().generation()));

    encode_response(auth.config().max_msg_size, |enc| {
        enc.map(3)?;
        encode_rp(enc, &credential)?;
        enc.unsigned(resp_keys::TOTAL_RPS)?.unsigned(total as u64)?;
        Ok(())
    })
}

fn enumerate_rps_next<F: Flash, P: Platform>(auth: &mut Authenticator<F, P>) -> Result<Vec<u8>> {
    let generation = auth.store().generation();
    let cursor = auth.rp_cursor.as_mut().ok_or(StatusCode::NoOperationPending)?;
    let slot = cursor.next_slot(generation)?;
    let credential = cursor_credential(auth, slot)?;

    encode_response(auth.config().max_msg_size, |enc| {
        enc.map(2)?;
        encode_rp(enc, &credential)
    })
}

fn encode_rp(enc: &mut Encoder<'_>, credential: &Credential) -> crate::cbor::Result<()> {
    enc.unsigned(resp_keys::RP)?
        .map(1)?
        .text("id")?
        .text(&credential.rp_id)?
        .unsigned(resp_keys::RP_ID_HASH)?
        .bytes(&credential.rp_id_hash)?;
    Ok(())
}

fn enumerate_credentials_begin<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    params: &Params<'_>,
) -> Result<Vec<u8>> {
    let rp_id_hash = params.rp_id_hash.ok_or(StatusCode::MissingParameter)?;
    auth.credential_cursor = None;

    let mut slots = Vec::new();
    for slot in auth.store_mut().resident_slots()? {
        if let Some(credential) = auth.store_mut().read_slot(slot)? {
            if credential.rp_id_hash == rp_id_hash {
                slots.push(slot);
            }
        }
    }

    let Some(&first) = slots.first() else {
        return Err(StatusCode::NoCredentials);
    };
    let total = slots.len();
    let credential = cursor_credential(auth, first)?;
    auth.credential_cursor = Some(SlotCursor::new(slots, auth.store().generation()));

    let public_key = credential.public_key()?;
    encode_response(auth.config().max_msg_size, |enc| {
        enc.map(5)?;
        encode_credential(enc, &credential, &public_key)?;
        enc.unsigned(resp_keys::TOTAL_CREDENTIALS)?.unsigned(total as u64)?;
        enc.unsigned(resp_keys::CRED_PROTECT)?
            .unsigned(u64::from(credential.cred_protect.to_u8()))?;
        Ok(())
    })
}

fn enumerate_credentials_next<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
) -> Result<Vec<u8>> {
    let generation = auth.store().generation();
    let cursor = auth.credential_cursor.as_mut().ok_or(StatusCode::NoOperationPending)?;
    let slot = cursor.next_slot(generation)?;
    let credential = cursor_credential(auth, slot)?;

    let public_key = credential.public_key()?;
    encode_response(auth.config().max_msg_size, |enc| {
        enc.map(4)?;
        encode_credential(enc, &credential, &public_key)?;
        enc.unsigned(resp_keys::CRED_PROTECT)?
            .unsigned(u64::from(credential.cred_protect.to_u8()))?;
        Ok(())
    })
}

/// user, credentialID and publicKey entries
fn encode_credential(
    enc: &mut Encoder<'_>,
    credential: &Credential,
    public_key: &PublicKey,
) -> crate::cbor::Result<()> {
    enc.unsigned(resp_keys::USER)?;
    credential.user.encode(enc)?;
    enc.unsigned(resp_keys::CREDENTIAL_ID)?
        .map(2)?
        .text("id")?
        .bytes(&credential.id)?
        .text("type")?
        .text(PUBLIC_KEY_TYPE)?;
    enc.unsigned(resp_keys::PUBLIC_KEY)?;
    public_key.encode_cose(enc)
}

fn delete_credential<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    params: &Params<'_>,
) -> Result<Vec<u8>> {
    let id = params.credential_id()?;
    auth.store_mut().delete(&id)?;
    log::info!("Credential deleted");
    Ok(Vec::new())
}

fn update_user_information<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    params: &Params<'_>,
) -> Result<Vec<u8>> {
    let id = params.credential_id()?;
    let user = params.user.as_ref().ok_or(StatusCode::MissingParameter)?;

    let credential = auth.store_mut().find(&id)?;
    if !credential.resident {
        return Err(StatusCode::NoCredentials);
    }
    if credential.user.id != user.id {
        return Err(StatusCode::InvalidParameter);
    }
    auth.store_mut().update_user(&id, user)?;
    Ok(Vec::new())
}
