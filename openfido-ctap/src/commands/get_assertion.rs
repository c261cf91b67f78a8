//! authenticatorGetAssertion command
//!
//! Signs a challenge with an existing credential. With an allowList the
//! listed ids are tried in order; without one the resident credentials of
//! the RP are discovered and any beyond the first are queued for
//! authenticatorGetNextAssertion.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use openfido_crypto::digest;

use super::{PinUvAuth, authorize_pin_uv, encode_response};
use crate::authenticator::{Authenticator, PendingAssertions};
use crate::cbor::Decoder;
use crate::extensions::{GetAssertionExtensions, HmacSecret};
use crate::hal::Platform;
use crate::pin_token::Permission;
use crate::status::{Result, StatusCode};
use crate::storage::{Flash, StorageError};
use crate::types::{
    AuthenticatorData, Credential, CredentialDescriptor, MAX_RP_ID_LENGTH, PUBLIC_KEY_TYPE,
    RequestOptions, RpId, bounded_str, flags,
};

/// GetAssertion request parameter keys
mod req_keys {
    pub const RP_ID: u64 = 0x01;
    pub const CLIENT_DATA_HASH: u64 = 0x02;
    pub const ALLOW_LIST: u64 = 0x03;
    pub const EXTENSIONS: u64 = 0x04;
    pub const OPTIONS: u64 = 0x05;
    pub const PIN_UV_AUTH_PARAM: u64 = 0x06;
    pub const PIN_UV_AUTH_PROTOCOL: u64 = 0x07;
}

/// GetAssertion response keys
mod resp_keys {
    pub const CREDENTIAL: u64 = 0x01;
    pub const AUTH_DATA: u64 = 0x02;
    pub const SIGNATURE: u64 = 0x03;
    pub const USER: u64 = 0x04;
    pub const NUMBER_OF_CREDENTIALS: u64 = 0x05;
}

struct Request<'a> {
    rp_id: RpId,
    client_data_hash: [u8; 32],
    allow_list: Vec<CredentialDescriptor<'a>>,
    extensions: GetAssertionExtensions,
    options: RequestOptions,
    pin: PinUvAuth<'a>,
}

impl<'a> Request<'a> {
    fn decode(data: &'a [u8], max_list: usize) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let mut rp_id = None;
        let mut client_data_hash = None;
        let mut allow_list = Vec::new();
        let mut extensions = GetAssertionExtensions::default();
        let mut options = RequestOptions::default();
        let mut pin = PinUvAuth::default();

        for _ in 0..dec.map()? {
            match dec.unsigned()? {
                req_keys::RP_ID => {
                    rp_id = Some(bounded_str(dec.text_max(MAX_RP_ID_LENGTH)?)?);
                }
                req_keys::CLIENT_DATA_HASH => {
                    client_data_hash = Some(super::client_data_hash(dec.bytes()?)?);
                }
                req_keys::ALLOW_LIST => {
                    allow_list = CredentialDescriptor::decode_list(&mut dec, max_list)?;
                }
                req_keys::EXTENSIONS => extensions = GetAssertionExtensions::decode(&mut dec)?,
                req_keys::OPTIONS => options = RequestOptions::decode(&mut dec)?,
                req_keys::PIN_UV_AUTH_PARAM => pin.param = Some(dec.bytes()?),
                req_keys::PIN_UV_AUTH_PROTOCOL => pin.protocol = Some(dec.unsigned()?),
                _ => dec.skip()?,
            }
        }

        Ok(Self {
            rp_id: rp_id.ok_or(StatusCode::MissingParameter)?,
            client_data_hash: client_data_hash.ok_or(StatusCode::MissingParameter)?,
            allow_list,
            extensions,
            options,
            pin,
        })
    }
}

/// A signed assertion ready to encode
pub(crate) struct Assertion {
    pub credential: Credential,
    pub auth_data: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Handle authenticatorGetAssertion
pub fn handle<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let req = Request::decode(data, auth.config().max_credential_count_in_list)?;
    let rp_id_hash = digest::sha256(req.rp_id.as_bytes());

    if req.options.rk == Some(true) {
        return Err(StatusCode::InvalidOption);
    }
    // hmac-secret outputs are only released with user presence
    if req.extensions.hmac_secret.is_some() && req.options.up == Some(false) {
        return Err(StatusCode::UnsupportedOption);
    }

    let discovery = req.allow_list.is_empty();
    let pin_required = discovery || req.options.uv == Some(true) || auth.always_uv();
    let user_verified = authorize_pin_uv(
        auth,
        req.pin,
        pin_required,
        &req.client_data_hash,
        Permission::GetAssertion,
        &rp_id_hash,
    )?;

    let mut candidates = if discovery {
        let mut found = auth.store_mut().find_by_rp(&rp_id_hash)?;
        found.retain(|credential| credential.cred_protect.permits(user_verified, false));
        found
    } else {
        find_listed(auth, &req.allow_list, &rp_id_hash, user_verified)?
            .into_iter()
            .collect::<Vec<_>>()
    };
    if candidates.is_empty() {
        log::info!("No credentials for {}", req.rp_id);
        return Err(StatusCode::NoCredentials);
    }

    let hmac_secret = match &req.extensions.hmac_secret {
        Some(input) => {
            let secret = auth.shared_secret(input.protocol, &input.key_agreement)?;
            Some(HmacSecret::open(secret, input)?)
        }
        None => None,
    };

    let mut flag_bits = 0;
    if req.options.up != Some(false) {
        auth.wait_for_user_presence()?;
        flag_bits |= flags::USER_PRESENT;
    }
    if user_verified {
        flag_bits |= flags::USER_VERIFIED;
    }

    let total = candidates.len();
    let first = candidates.remove(0);
    let assertion =
        sign_assertion(auth, first, &req.client_data_hash, flag_bits, hmac_secret.as_ref())?;

    if total > 1 {
        auth.pending_assertions = Some(PendingAssertions {
            rp_id_hash,
            client_data_hash: req.client_data_hash,
            flags: flag_bits,
            credential_ids: candidates
                .iter()
                .map(|credential| credential.id)
                .collect::<VecDeque<_>>(),
            hmac_secret,
        });
    }

    let number_of_credentials = (total > 1).then_some(total);
    encode_assertion(auth.config().max_msg_size, &assertion, number_of_credentials)
}

/// First allowList entry that belongs to the RP and may be used
fn find_listed<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    allow_list: &[CredentialDescriptor<'_>],
    rp_id_hash: &[u8; 32],
    user_verified: bool,
) -> Result<Option<Credential>> {
    for descriptor in allow_list {
        let Some(id) = descriptor.credential_id() else {
            continue;
        };
        match auth.store_mut().find(&id) {
            Ok(credential)
                if credential.rp_id_hash == *rp_id_hash
                    && credential.cred_protect.permits(user_verified, true) =>
            {
                return Ok(Some(credential));
            }
            Ok(_) | Err(StorageError::NotFound) => {}
            Err(StorageError::Corrupted) => log::warn!("Skipping corrupted credential"),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(None)
}

/// Advance the counter and sign `authData ‖ clientDataHash` with the credential key
///
/// hmac-secret outputs are only added for credentials created with the
/// extension.
pub(crate) fn sign_assertion<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    mut credential: Credential,
    client_data_hash: &[u8; 32],
    flag_bits: u8,
    hmac_secret: Option<&HmacSecret>,
) -> Result<Assertion> {
    let extension_outputs = match hmac_secret {
        Some(hmac_secret) if credential.hmac_secret => {
            let uv = flag_bits & flags::USER_VERIFIED != 0;
            let cred_random = auth.store().cred_random(&credential.private_key, uv)?;
            Some(hmac_secret.encode_output(&cred_random)?)
        }
        _ => None,
    };

    let sign_count = auth.store_mut().next_counter()?;
    auth.store_mut().update_sign_count(&credential.id, sign_count)?;
    credential.sign_count = sign_count;

    let auth_data = AuthenticatorData {
        rp_id_hash: &credential.rp_id_hash,
        flags: flag_bits,
        sign_count,
        attested: None,
        extensions: extension_outputs.as_deref(),
    }
    .to_bytes();

    let mut signed = Vec::with_capacity(auth_data.len() + client_data_hash.len());
    signed.extend_from_slice(&auth_data);
    signed.extend_from_slice(client_data_hash);
    let signature = credential.sign(&signed)?;

    Ok(Assertion {
        credential,
        auth_data,
        signature,
    })
}

/// Encode the response map; user details only for resident credentials
pub(crate) fn encode_assertion(
    capacity: usize,
    assertion: &Assertion,
    number_of_credentials: Option<usize>,
) -> Result<Vec<u8>> {
    let credential = &assertion.credential;
    let entries =
        3 + usize::from(credential.resident) + usize::from(number_of_credentials.is_some());
    encode_response(capacity, |enc| {
        enc.map(entries)?
            .unsigned(resp_keys::CREDENTIAL)?
            .map(2)?
            .text("id")?
            .bytes(&credential.id)?
            .text("type")?
            .text(PUBLIC_KEY_TYPE)?
            .unsigned(resp_keys::AUTH_DATA)?
            .bytes(&assertion.auth_data)?
            .unsigned(resp_keys::SIGNATURE)?
            .bytes(&assertion.signature)?;
        if credential.resident {
            enc.unsigned(resp_keys::USER)?;
            credential.user.encode(enc)?;
        }
        if let Some(count) = number_of_credentials {
            enc.unsigned(resp_keys::NUMBER_OF_CREDENTIALS)?.unsigned(count as u64)?;
        }
        Ok(())
    })
}
