//! authenticatorLargeBlobs command
//!
//! The serialized large-blob array is held in memory only and starts out
//! as the empty array `0x80 ‖ LEFT(SHA-256(0x80), 16)`. Reads return a
//! window of it; writes replace it from `offset` onwards.

use alloc::vec::Vec;

use openfido_crypto::digest;

use super::encode_response;
use crate::authenticator::{Authenticator, MAX_LARGE_BLOB_SIZE};
use crate::cbor::Decoder;
use crate::hal::Platform;
use crate::pin_token::{Permission, PinProtocol};
use crate::status::{Result, StatusCode};
use crate::storage::Flash;

/// LargeBlobs request parameter keys
mod req_keys {
    pub const GET: u64 = 0x01;
    pub const SET: u64 = 0x02;
    pub const OFFSET: u64 = 0x03;
    pub const LENGTH: u64 = 0x04;
    pub const PIN_UV_AUTH_PARAM: u64 = 0x05;
    pub const PIN_UV_AUTH_PROTOCOL: u64 = 0x06;
}

/// LargeBlobs response keys
mod resp_keys {
    pub const CONFIG: u64 = 0x01;
}

/// Response framing allowance subtracted from maxMsgSize
const RESPONSE_OVERHEAD: usize = 64;

#[derive(Default)]
struct Request<'a> {
    get: Option<u64>,
    set: Option<&'a [u8]>,
    offset: Option<u64>,
    length: Option<u64>,
    pin_uv_auth_param: Option<&'a [u8]>,
    pin_uv_auth_protocol: Option<u64>,
}

impl<'a> Request<'a> {
    fn decode(data: &'a [u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let mut req = Self::default();
        for _ in 0..dec.map()? {
            match dec.unsigned()? {
                req_keys::GET => req.get = Some(dec.unsigned()?),
                req_keys::SET => req.set = Some(dec.bytes()?),
                req_keys::OFFSET => req.offset = Some(dec.unsigned()?),
                req_keys::LENGTH => req.length = Some(dec.unsigned()?),
                req_keys::PIN_UV_AUTH_PARAM => req.pin_uv_auth_param = Some(dec.bytes()?),
                req_keys::PIN_UV_AUTH_PROTOCOL => req.pin_uv_auth_protocol = Some(dec.unsigned()?),
                _ => dec.skip()?,
            }
        }
        Ok(req)
    }
}

/// Handle authenticatorLargeBlobs
pub fn handle<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let req = Request::decode(data)?;
    let offset = usize::try_from(req.offset.ok_or(StatusCode::MissingParameter)?)
        .map_err(|_| StatusCode::InvalidParameter)?;

    match (req.get, req.set) {
        (Some(length), None) => get(auth, offset, length),
        (None, Some(fragment)) => set(auth, &req, offset, fragment),
        (Some(_), Some(_)) => Err(StatusCode::InvalidParameter),
        (None, None) => Err(StatusCode::MissingParameter),
    }
}

fn get<F: Flash, P: Platform>(
    auth: &Authenticator<F, P>,
    offset: usize,
    length: u64,
) -> Result<Vec<u8>> {
    let blob = auth.large_blob();
    if offset > blob.len() {
        return Err(StatusCode::InvalidParameter);
    }

    let available = blob.len() - offset;
    let limit = auth.config().max_msg_size - RESPONSE_OVERHEAD;
    let requested = match usize::try_from(length) {
        Ok(0) | Err(_) => available,
        Ok(requested) => requested,
    };
    let count = requested.min(available).min(limit);
    let window = &blob[offset..offset + count];

    encode_response(count + 16, |enc| {
        enc.map(1)?.unsigned(resp_keys::CONFIG)?.bytes(window)?;
        Ok(())
    })
}

fn set<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    req: &Request<'_>,
    offset: usize,
    fragment: &[u8],
) -> Result<Vec<u8>> {
    offset
        .checked_add(fragment.len())
        .filter(|end| *end <= MAX_LARGE_BLOB_SIZE)
        .ok_or(StatusCode::RequestTooLarge)?;
    if let Some(length) = req.length {
        if offset == 0 && length > MAX_LARGE_BLOB_SIZE as u64 {
            return Err(StatusCode::RequestTooLarge);
        }
    }
    if offset > auth.large_blob().len() {
        return Err(StatusCode::InvalidParameter);
    }

    if auth.is_pin_set() {
        let pin_auth = req.pin_uv_auth_param.ok_or(StatusCode::PinRequired)?;
        let protocol = PinProtocol::from_u64(
            req.pin_uv_auth_protocol
                .ok_or(StatusCode::MissingParameter)?,
        )?;

        let mut message = Vec::with_capacity(32 + 2 + 4 + 32);
        message.extend_from_slice(&[0xFF; 32]);
        message.extend_from_slice(&[0x0C, 0x00]);
        message.extend_from_slice(&(offset as u32).to_le_bytes());
        message.extend_from_slice(&digest::sha256(fragment));
        auth.verify_pin_auth(protocol, &message, pin_auth, Permission::LargeBlobWrite, None)?;
    }

    let blob = auth.large_blob_mut();
    blob.truncate(offset);
    blob.extend_from_slice(fragment);
    log::debug!("Large blob now {} bytes", blob.len());
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{self, authenticator};

    fn get_request(offset: u64, length: u64) -> Vec<u8> {
        test_support::encode(|e| {
            e.map(2)?.unsigned(1)?.unsigned(length)?.unsigned(3)?.unsigned(offset)?;
            Ok(())
        })
    }

    fn set_request(offset: u64, fragment: &[u8], pin_auth: Option<&[u8]>) -> Vec<u8> {
        test_support::encode(|e| {
            e.map(2 + 2 * usize::from(pin_auth.is_some()))?;
            e.unsigned(2)?.bytes(fragment)?.unsigned(3)?.unsigned(offset)?;
            if let Some(pin_auth) = pin_auth {
                e.unsigned(5)?.bytes(pin_auth)?.unsigned(6)?.unsigned(1)?;
            }
            Ok(())
        })
    }

    fn read(response: &[u8]) -> Vec<u8> {
        let mut dec = Decoder::new(response);
        assert_eq!(dec.map().unwrap(), 1);
        assert_eq!(dec.unsigned().unwrap(), 1);
        dec.bytes().unwrap().to_vec()
    }

    #[test]
    fn test_initial_array() {
        let mut auth = authenticator();
        let blob = read(&handle(&mut auth, &get_request(0, 0)).unwrap());
        assert_eq!(blob.len(), 17);
        assert_eq!(blob[0], 0x80);
        assert_eq!(&blob[1..], &digest::sha256(&[0x80])[..16]);

        let tail = read(&handle(&mut auth, &get_request(10, 100)).unwrap());
        assert_eq!(tail.len(), 7);
        assert_eq!(handle(&mut auth, &get_request(18, 1)), Err(StatusCode::InvalidParameter));
    }

    #[test]
    fn test_set_without_pin() {
        let mut auth = authenticator();
        handle(&mut auth, &set_request(0, &[1, 2, 3, 4], None)).unwrap();
        handle(&mut auth, &set_request(4, &[5, 6], None)).unwrap();
        assert_eq!(auth.large_blob(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(
            handle(&mut auth, &set_request(7, &[0], None)),
            Err(StatusCode::InvalidParameter)
        );
    }

    #[test]
    fn test_set_too_large() {
        let mut auth = authenticator();
        let fragment = alloc::vec![0u8; MAX_LARGE_BLOB_SIZE];
        handle(&mut auth, &set_request(0, &fragment, None)).unwrap();
        assert_eq!(
            handle(&mut auth, &set_request(1, &fragment, None)),
            Err(StatusCode::RequestTooLarge)
        );
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_set_offset_overflow() {
        let mut auth = authenticator();
        assert_eq!(
            handle(&mut auth, &set_request(u64::MAX, &[1], None)),
            Err(StatusCode::RequestTooLarge)
        );
        assert_eq!(auth.large_blob().len(), 17);
    }

    #[test]
    fn test_set_with_pin() {
        let mut auth = authenticator();
        auth.store_mut().set_pin_hash(digest::sha256(b"1234")).unwrap();
        assert_eq!(handle(&mut auth, &set_request(0, &[9], None)), Err(StatusCode::PinRequired));

        let token = *auth.pin_tokens_mut().issue(Permission::LargeBlobWrite.to_u8(), None).value();
        let mut message = alloc::vec![0xFF; 32];
        message.extend_from_slice(&[0x0C, 0x00, 0, 0, 0, 0]);
        message.extend_from_slice(&digest::sha256(&[9]));
        let pin_auth = PinProtocol::One.authenticate(&token, &message).unwrap();
        handle(&mut auth, &set_request(0, &[9], Some(&pin_auth))).unwrap();
        assert_eq!(auth.large_blob(), &[9]);

        assert_eq!(
            handle(&mut auth, &set_request(0, &[8], Some(&pin_auth))),
            Err(StatusCode::PinAuthInvalid)
        );
    }

    #[test]
    fn test_missing_operation() {
        let mut auth = authenticator();
        let raw = test_support::encode(|e| {
            e.map(1)?.unsigned(3)?.unsigned(0)?;
            Ok(())
        });
        assert_eq!(handle(&mut auth, &raw), Err(StatusCode::MissingParameter));
    }
}
