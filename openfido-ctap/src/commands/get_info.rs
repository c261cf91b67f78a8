//! authenticatorGetInfo command
//!
//! Reports versions, options, limits and the PIN state. Option keys are
//! written in canonical CBOR order (shorter keys first, then bytewise).

use alloc::vec::Vec;

use super::encode_response;
use crate::authenticator::{Authenticator, MAX_LARGE_BLOB_SIZE};
use crate::cbor::Encoder;
use crate::extensions::ext_ids;
use crate::hal::Platform;
use crate::status::Result;
use crate::storage::Flash;
use crate::types::{CREDENTIAL_ID_LENGTH, CoseAlgorithm, PUBLIC_KEY_TYPE};

/// GetInfo response keys
mod keys {
    pub const VERSIONS: u64 = 0x01;
    pub const EXTENSIONS: u64 = 0x02;
    pub const AAGUID: u64 = 0x03;
    pub const OPTIONS: u64 = 0x04;
    pub const MAX_MSG_SIZE: u64 = 0x05;
    pub const PIN_UV_AUTH_PROTOCOLS: u64 = 0x06;
    pub const MAX_CREDENTIAL_COUNT_IN_LIST: u64 = 0x07;
    pub const MAX_CREDENTIAL_ID_LENGTH: u64 = 0x08;
    pub const TRANSPORTS: u64 = 0x09;
    pub const ALGORITHMS: u64 = 0x0A;
    pub const MAX_SERIALIZED_LARGE_BLOB_ARRAY: u64 = 0x0B;
    pub const FORCE_PIN_CHANGE: u64 = 0x0C;
    pub const MIN_PIN_LENGTH: u64 = 0x0D;
    pub const FIRMWARE_VERSION: u64 = 0x0E;
    pub const REMAINING_DISCOVERABLE_CREDENTIALS: u64 = 0x14;
}

const VERSIONS: [&str; 3] = ["FIDO_2_1", "FIDO_2_0", "U2F_V2"];

/// Snapshot of the state GetInfo reports
struct Info {
    aaguid: [u8; 16],
    max_msg_size: usize,
    max_credential_count_in_list: usize,
    firmware_version: Option<u32>,
    pin_set: bool,
    always_uv: bool,
    enterprise_attestation: bool,
    min_pin_length: usize,
    remaining: usize,
}

/// Handle authenticatorGetInfo; the request carries no parameters
pub fn handle<F: Flash, P: Platform>(auth: &mut Authenticator<F, P>) -> Result<Vec<u8>> {
    let remaining = auth.store_mut().remaining()?;
    let config = auth.config();
    let info = Info {
        aaguid: config.aaguid,
        max_msg_size: config.max_msg_size,
        max_credential_count_in_list: config.max_credential_count_in_list,
        firmware_version: config.firmware_version,
        pin_set: auth.is_pin_set(),
        always_uv: auth.always_uv(),
        enterprise_attestation: auth.enterprise_attestation(),
        min_pin_length: auth.min_pin_length(),
        remaining,
    };
    encode_response(auth.config().max_msg_size, |enc| encode_info(enc, &info))
}

fn encode_info(enc: &mut Encoder<'_>, info: &Info) -> crate::cbor::Result<()> {
    let entries = 14 + usize::from(info.firmware_version.is_some());
    enc.map(entries)?;

    enc.unsigned(keys::VERSIONS)?.array(VERSIONS.len())?;
    for version in VERSIONS {
        enc.text(version)?;
    }
    enc.unsigned(keys::EXTENSIONS)?
        .array(2)?
        .text(ext_ids::CRED_PROTECT)?
        .text(ext_ids::HMAC_SECRET)?;
    enc.unsigned(keys::AAGUID)?.bytes(&info.aaguid)?;

    enc.unsigned(keys::OPTIONS)?
        .map(10 + usize::from(info.enterprise_attestation))?;
    if info.enterprise_attestation {
        enc.text("ep")?.bool(true)?;
    }
    enc.text("rk")?
        .bool(true)?
        .text("up")?
        .bool(true)?
        .text("plat")?
        .bool(false)?
        .text("alwaysUv")?
        .bool(info.always_uv)?
        .text("credMgmt")?
        .bool(true)?
        .text("authnrCfg")?
        .bool(true)?
        .text("clientPin")?
        .bool(info.pin_set)?
        .text("largeBlobs")?
        .bool(true)?
        .text("pinUvAuthToken")?
        .bool(true)?
        .text("setMinPINLength")?
        .bool(true)?;

    enc.unsigned(keys::MAX_MSG_SIZE)?.unsigned(info.max_msg_size as u64)?;
    enc.unsigned(keys::PIN_UV_AUTH_PROTOCOLS)?.array(2)?.unsigned(2)?.unsigned(1)?;
    enc.unsigned(keys::MAX_CREDENTIAL_COUNT_IN_LIST)?
        .unsigned(info.max_credential_count_in_list as u64)?;
    enc.unsigned(keys::MAX_CREDENTIAL_ID_LENGTH)?
        .unsigned(CREDENTIAL_ID_LENGTH as u64)?;
    enc.unsigned(keys::TRANSPORTS)?.array(1)?.text("usb")?;
    enc.unsigned(keys::ALGORITHMS)?.array(CoseAlgorithm::CREDENTIAL.len())?;
    for algorithm in CoseAlgorithm::CREDENTIAL {
        enc.map(2)?
            .text("alg")?
            .int(algorithm.to_i64())?
            .text("type")?
            .text(PUBLIC_KEY_TYPE)?;
    }
    enc.unsigned(keys::MAX_SERIALIZED_LARGE_BLOB_ARRAY)?
        .unsigned(MAX_LARGE_BLOB_SIZE as u64)?;
    enc.unsigned(keys::FORCE_PIN_CHANGE)?.bool(false)?;
    enc.unsigned(keys::MIN_PIN_LENGTH)?.unsigned(info.min_pin_length as u64)?;
    if let Some(version) = info.firmware_version {
        enc.unsigned(keys::FIRMWARE_VERSION)?.unsigned(u64::from(version))?;
    }
    enc.unsigned(keys::REMAINING_DISCOVERABLE_CREDENTIALS)?
        .unsigned(info.remaining as u64)?;
    Ok(())
}
