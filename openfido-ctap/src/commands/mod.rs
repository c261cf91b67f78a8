//! CTAP command handlers
//!
//! Each handler decodes its own request map, enforces its PIN policy and
//! returns the encoded response body. Handlers never see the status byte;
//! the dispatcher prepends it.

pub mod client_pin;
pub mod config;
pub mod credential_management;
pub mod get_assertion;
pub mod get_info;
pub mod get_next_assertion;
pub mod large_blobs;
pub mod make_credential;
pub mod reset;

use alloc::vec;
use alloc::vec::Vec;

use crate::authenticator::Authenticator;
use crate::cbor::{self, Encoder};
use crate::hal::Platform;
use crate::pin_token::{Permission, PinProtocol};
use crate::status::{Result, StatusCode};
use crate::storage::Flash;

/// CTAP command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    MakeCredential = 0x01,
    GetAssertion = 0x02,
    GetInfo = 0x04,
    ClientPin = 0x06,
    Reset = 0x07,
    GetNextAssertion = 0x08,
    CredentialManagement = 0x0A,
    LargeBlobs = 0x0C,
    Config = 0x0D,
}

impl CommandCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::MakeCredential),
            0x02 => Some(Self::GetAssertion),
            0x04 => Some(Self::GetInfo),
            0x06 => Some(Self::ClientPin),
            0x07 => Some(Self::Reset),
            0x08 => Some(Self::GetNextAssertion),
            0x0A => Some(Self::CredentialManagement),
            0x0C => Some(Self::LargeBlobs),
            0x0D => Some(Self::Config),
            _ => None,
        }
    }
}

/// Encode a response body into a buffer of `capacity` bytes
///
/// Running out of room is an internal failure; a truncated body is never
/// returned.
pub(crate) fn encode_response<W>(capacity: usize, write: W) -> Result<Vec<u8>>
where
    W: FnOnce(&mut Encoder<'_>) -> cbor::Result<()>,
{
    let mut buf = vec![0u8; capacity];
    let mut enc = Encoder::new(&mut buf);
    if let Err(err) = write(&mut enc) {
        log::error!("Response encoding failed: {}", err);
        return Err(StatusCode::Processing);
    }
    let len = enc.len();
    buf.truncate(len);
    Ok(buf)
}

/// pinUvAuthParam and pinUvAuthProtocol of a MakeCredential or GetAssertion request
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PinUvAuth<'a> {
    pub param: Option<&'a [u8]>,
    pub protocol: Option<u64>,
}

/// Apply the PIN policy shared by MakeCredential and GetAssertion
///
/// Returns whether the user was verified through a PIN token. A
/// zero-length pinUvAuthParam is a platform check: it costs a touch and
/// then reports whether a PIN exists.
pub(crate) fn authorize_pin_uv<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    pin: PinUvAuth<'_>,
    pin_required: bool,
    client_data_hash: &[u8; 32],
    permission: Permission,
    rp_id_hash: &[u8; 32],
) -> Result<bool> {
    let Some(param) = pin.param else {
        if pin_required {
            return Err(if auth.is_pin_set() {
                StatusCode::PinRequired
            } else {
                StatusCode::PinNotSet
            });
        }
        return Ok(false);
    };

    if param.is_empty() {
        auth.wait_for_user_presence()?;
        return Err(if auth.is_pin_set() {
            StatusCode::PinInvalid
        } else {
            StatusCode::PinNotSet
        });
    }

    let protocol = PinProtocol::from_u64(pin.protocol.ok_or(StatusCode::MissingParameter)?)?;
    if !auth.is_pin_set() {
        return Err(StatusCode::PinNotSet);
    }
    auth.verify_pin_auth(protocol, client_data_hash, param, permission, Some(rp_id_hash))?;
    Ok(true)
}

/// 32-byte clientDataHash
pub(crate) fn client_data_hash(raw: &[u8]) -> Result<[u8; 32]> {
    raw.try_into().map_err(|_| StatusCode::InvalidParameter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(CommandCode::from_u8(0x01), Some(CommandCode::MakeCredential));
        assert_eq!(CommandCode::from_u8(0x0D), Some(CommandCode::Config));
        assert_eq!(CommandCode::from_u8(0x0B), None);
        assert_eq!(CommandCode::from_u8(0x03), None);
    }

    #[test]
    fn test_encode_response_overflow() {
        let err = encode_response(4, |enc| {
            enc.bytes(&[0; 8])?;
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err, StatusCode::Processing);

        let body = encode_response(4, |enc| {
            enc.map(1)?.unsigned(1)?.bool(true)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(body, [0xA1, 0x01, 0xF5]);
    }
}
