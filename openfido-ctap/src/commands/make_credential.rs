//! authenticatorMakeCredential command
//!
//! Creates a new ES256 or Ed25519 credential for a relying party and
//! returns a `packed` attestation signed with the device ES256 attestation
//! key.

use alloc::vec::Vec;

use openfido_crypto::{digest, ecdsa, rng};

use super::{PinUvAuth, authorize_pin_uv, encode_response};
use crate::authenticator::Authenticator;
use crate::cbor::{Decoder, Encoder};
use crate::extensions::MakeCredentialExtensions;
use crate::hal::Platform;
use crate::pin_token::Permission;
use crate::status::{Result, StatusCode};
use crate::storage::{Flash, StorageError};
use crate::types::{
    AttestedCredential, AuthenticatorData, CoseAlgorithm, Credential, CredentialDescriptor,
    CredentialParameter, RelyingParty, RequestOptions, User, flags,
};

/// MakeCredential request parameter keys
mod req_keys {
    pub const CLIENT_DATA_HASH: u64 = 0x01;
    pub const RP: u64 = 0x02;
    pub const USER: u64 = 0x03;
    pub const PUB_KEY_CRED_PARAMS: u64 = 0x04;
    pub const EXCLUDE_LIST: u64 = 0x05;
    pub const EXTENSIONS: u64 = 0x06;
    pub const OPTIONS: u64 = 0x07;
    pub const PIN_UV_AUTH_PARAM: u64 = 0x08;
    pub const PIN_UV_AUTH_PROTOCOL: u64 = 0x09;
    pub const ENTERPRISE_ATTESTATION: u64 = 0x0A;
}

/// MakeCredential response keys
mod resp_keys {
    pub const FMT: u64 = 0x01;
    pub const AUTH_DATA: u64 = 0x02;
    pub const ATT_STMT: u64 = 0x03;
}

/// Decoded request, borrowing byte strings from the frame
struct Request<'a> {
    client_data_hash: [u8; 32],
    rp: RelyingParty,
    user: User,
    pub_key_cred_params: Vec<CredentialParameter>,
    exclude_list: Vec<CredentialDescriptor<'a>>,
    extensions: MakeCredentialExtensions,
    options: RequestOptions,
    pin: PinUvAuth<'a>,
    enterprise_attestation: Option<u64>,
}

impl<'a> Request<'a> {
    fn decode(data: &'a [u8], max_list: usize) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let mut client_data_hash = None;
        let mut rp = None;
        let mut user = None;
        let mut pub_key_cred_params = None;
        let mut exclude_list = Vec::new();
        let mut extensions = MakeCredentialExtensions::default();
        let mut options = RequestOptions::default();
        let mut pin = PinUvAuth::default();
        let mut enterprise_attestation = None;

        for _ in 0..dec.map()? {
            match dec.unsigned()? {
                req_keys::CLIENT_DATA_HASH => {
                    client_data_hash = Some(super::client_data_hash(dec.bytes()?)?)
                }
                req_keys::RP => rp = Some(RelyingParty::decode(&mut dec)?),
                req_keys::USER => user = Some(User::decode(&mut dec)?),
                req_keys::PUB_KEY_CRED_PARAMS => {
                    let count = dec.array()?;
                    let mut params = Vec::with_capacity(count);
                    for _ in 0..count {
                        params.push(CredentialParameter::decode(&mut dec)?);
                    }
                    pub_key_cred_params = Some(params);
                }
                req_keys::EXCLUDE_LIST => {
                    exclude_list = CredentialDescriptor::decode_list(&mut dec, max_list)?
                }
                req_keys::EXTENSIONS => extensions = MakeCredentialExtensions::decode(&mut dec)?,
                req_keys::OPTIONS => options = RequestOptions::decode(&mut dec)?,
                req_keys::PIN_UV_AUTH_PARAM => pin.param = Some(dec.bytes()?),
                req_keys::PIN_UV_AUTH_PROTOCOL => pin.protocol = Some(dec.unsigned()?),
                req_keys::ENTERPRISE_ATTESTATION => enterprise_attestation = Some(dec.unsigned()?),
                _ => dec.skip()?,
            }
        }

        Ok(Self {
            client_data_hash: client_data_hash.ok_or(StatusCode::MissingParameter)?,
            rp: rp.ok_or(StatusCode::MissingParameter)?,
            user: user.ok_or(StatusCode::MissingParameter)?,
            pub_key_cred_params: pub_key_cred_params.ok_or(StatusCode::MissingParameter)?,
            exclude_list,
            extensions,
            options,
            pin,
            enterprise_attestation,
        })
    }
}

/// Handle authenticatorMakeCredential
pub fn handle<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let req = Request::decode(data, auth.config().max_credential_count_in_list)?;
    let rp_id_hash = digest::sha256(req.rp.id.as_bytes());

    let algorithm = req
        .pub_key_cred_params
        .iter()
        .filter(|param| param.public_key)
        .find_map(|param| CoseAlgorithm::from_i64(param.alg))
        .ok_or(StatusCode::UnsupportedAlgorithm)?;

    if req.options.up == Some(false) {
        return Err(StatusCode::InvalidOption);
    }
    if let Some(ep) = req.enterprise_attestation {
        if !auth.enterprise_attestation() {
            return Err(StatusCode::InvalidParameter);
        }
        if !(1..=2).contains(&ep) {
            return Err(StatusCode::InvalidOption);
        }
    }

    let resident = req.options.rk == Some(true);
    let pin_required = resident || req.options.uv == Some(true) || auth.always_uv();
    let user_verified = authorize_pin_uv(
        auth,
        req.pin,
        pin_required,
        &req.client_data_hash,
        Permission::MakeCredential,
        &rp_id_hash,
    )?;

    for descriptor in &req.exclude_list {
        let Some(id) = descriptor.credential_id() else {
            continue;
        };
        match auth.store_mut().find(&id) {
            Ok(existing) if existing.rp_id_hash == rp_id_hash => {
                log::info!("Credential in excludeList already registered for {}", req.rp.id);
                auth.wait_for_user_presence()?;
                return Err(StatusCode::CredentialExcluded);
            }
            Ok(_) | Err(StorageError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
    }

    if auth.store_mut().remaining()? == 0 {
        return Err(StatusCode::KeyStoreFull);
    }

    auth.wait_for_user_presence()?;

    let mut credential = Credential::generate(rng::bytes(), rp_id_hash, algorithm)?;
    credential.resident = resident;
    credential.cred_protect = req.extensions.cred_protect.unwrap_or_default();
    credential.hmac_secret = req.extensions.hmac_secret;
    if resident {
        credential.rp_id = req.rp.id.clone();
        credential.user = req.user.clone();
    }
    credential.sign_count = auth.store_mut().next_counter()?;
    auth.store_mut().store(&credential)?;
    log::info!(
        "Created {} credential for {}",
        if resident { "resident" } else { "server-side" },
        req.rp.id
    );

    let public_key = credential.public_key()?;
    let cose_key = encode_response(128, |enc| public_key.encode_cose(enc))?;
    let extension_outputs = req.extensions.encode_outputs()?;

    let mut flag_bits = flags::USER_PRESENT;
    if user_verified {
        flag_bits |= flags::USER_VERIFIED;
    }
    let auth_data = AuthenticatorData {
        rp_id_hash: &rp_id_hash,
        flags: flag_bits,
        sign_count: credential.sign_count,
        attested: Some(AttestedCredential {
            aaguid: &auth.config().aaguid,
            credential_id: &credential.id,
            public_key: &cose_key,
        }),
        extensions: extension_outputs.as_deref(),
    }
    .to_bytes();

    let mut signed = Vec::with_capacity(auth_data.len() + 32);
    signed.extend_from_slice(&auth_data);
    signed.extend_from_slice(&req.client_data_hash);
    let signature = ecdsa::sign(auth.store().attestation_key(), &signed)?;

    let capacity = auth.config().max_msg_size;
    encode_response(capacity, |enc| encode_attestation(enc, &auth_data, &signature))
}

/// Packed self-contained attestation; `alg` names the attestation key, not the credential
fn encode_attestation(
    enc: &mut Encoder<'_>,
    auth_data: &[u8],
    signature: &[u8],
) -> crate::cbor::Result<()> {
    enc.map(3)?
        .unsigned(resp_keys::FMT)?
        .text("packed")?
        .unsigned(resp_keys::AUTH_DATA)?
        .bytes(auth_data)?
        .unsigned(resp_keys::ATT_STMT)?
        .map(2)?
        .text("alg")?
        .int(CoseAlgorithm::Es256.to_i64())?
        .text("sig")?
        .bytes(signature)?;
    Ok(())
}
