//! authenticatorConfig command
//!
//! Enterprise attestation, the alwaysUv toggle and the minimum PIN length.
//! All settings persist in the PIN record and survive power cycles; Reset
//! restores the defaults.

use alloc::vec::Vec;

use crate::authenticator::Authenticator;
use crate::cbor::Decoder;
use crate::hal::Platform;
use crate::pin_token::{Permission, PinProtocol};
use crate::status::{Result, StatusCode};
use crate::storage::Flash;
use crate::storage::layout::{PIN_MAX_LENGTH, PIN_MIN_LENGTH};

/// authenticatorConfig request parameter keys
mod req_keys {
    pub const SUB_COMMAND: u64 = 0x01;
    pub const SUB_COMMAND_PARAMS: u64 = 0x02;
    pub const PIN_UV_AUTH_PROTOCOL: u64 = 0x03;
    pub const PIN_UV_AUTH_PARAM: u64 = 0x04;
}

/// setMinPINLength parameter keys
mod min_pin_keys {
    pub const NEW_MIN_PIN_LENGTH: u64 = 0x01;
}

/// authenticatorConfig subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigSubCommand {
    EnableEnterpriseAttestation = 0x01,
    ToggleAlwaysUv = 0x02,
    SetMinPinLength = 0x03,
    VendorPrototype = 0xFF,
}

impl ConfigSubCommand {
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0x01 => Some(Self::EnableEnterpriseAttestation),
            0x02 => Some(Self::ToggleAlwaysUv),
            0x03 => Some(Self::SetMinPinLength),
            0xFF => Some(Self::VendorPrototype),
            _ => None,
        }
    }
}

/// Handle authenticatorConfig
///
/// Every subcommand needs a token with the authenticator configuration
/// permission; the MAC covers `32×0xFF ‖ 0x0D ‖ subCommand ‖ subCommandParams`.
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
    let sub_command = ConfigSubCommand::from_u64(code).ok_or(StatusCode::InvalidSubcommand)?;

    if !auth.is_pin_set() {
        return Err(StatusCode::PinNotSet);
    }
    let pin_auth = pin_auth.ok_or(StatusCode::PinRequired)?;
    let protocol = PinProtocol::from_u64(protocol.ok_or(StatusCode::MissingParameter)?)?;

    let mut message = Vec::with_capacity(34 + raw_params.len());
    message.extend_from_slice(&[0xFF; 32]);
    message.push(0x0D);
    message.push(code as u8);
    message.extend_from_slice(raw_params);
    auth.verify_pin_auth(
        protocol,
        &message,
        pin_auth,
        Permission::AuthenticatorConfiguration,
        None,
    )?;

    match sub_command {
        ConfigSubCommand::EnableEnterpriseAttestation => {
            auth.store_mut()
                .update_pin_record(|record| record.enterprise_attestation = true)?;
            log::info!("Enterprise attestation enabled");
        }
        ConfigSubCommand::ToggleAlwaysUv => {
            auth.store_mut()
                .update_pin_record(|record| record.always_uv = !record.always_uv)?;
            log::info!("alwaysUv is now {}", auth.always_uv());
        }
        ConfigSubCommand::SetMinPinLength => set_min_pin_length(auth, raw_params)?,
        ConfigSubCommand::VendorPrototype => log::debug!("Vendor prototype command ignored"),
    }
    Ok(Vec::new())
}

fn set_min_pin_length<F: Flash, P: Platform>(
    auth: &mut Authenticator<F, P>,
    raw_params: &[u8],
) -> Result<()> {
    let mut new_length = None;
    if !raw_params.is_empty() {
        let mut dec = Decoder::new(raw_params);
        for _ in 0..dec.map()? {
            match dec.unsigned()? {
                min_pin_keys::NEW_MIN_PIN_LENGTH => new_length = Some(dec.unsigned()?),
                _ => dec.skip()?,
            }
        }
    }

    let new_length = new_length.ok_or(StatusCode::MissingParameter)?;
    if !((PIN_MIN_LENGTH as u64)..=(PIN_MAX_LENGTH as u64)).contains(&new_length) {
        return Err(StatusCode::InvalidParameter);
    }
    // the minimum may only grow
    if (new_length as usize) < auth.min_pin_length() {
        return Err(StatusCode::PinPolicyViolation);
    }

    auth.store_mut()
        .update_pin_record(|record| record.min_pin_length = new_length as u8)?;
    log::info!("Minimum PIN length set to {}", new_length);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{self, authenticator};
    use crate::pin_token::LEGACY_PERMISSIONS;
    use crate::storage::RamFlash;
    use openfido_crypto::digest;

    type TestAuth = Authenticator<RamFlash, test_support::AlwaysPress>;

    fn setup() -> TestAuth {
        let mut auth = authenticator();
        auth.store_mut().set_pin_hash(digest::sha256(b"1234")).unwrap();
        auth.pin_tokens_mut().issue(LEGACY_PERMISSIONS, None);
        auth
    }

    fn request(auth: &TestAuth, sub_command: u64, params: Option<&[u8]>) -> Vec<u8> {
        let mut message = alloc::vec![0xFF; 32];
        message.push(0x0D);
        message.push(sub_command as u8);
        message.extend_from_slice(params.unwrap_or(&[]));
        let token = auth.pin_tokens().token().unwrap().value();
        let pin_auth = PinProtocol::One.authenticate(token, &message).unwrap();
        test_support::encode(|e| {
            e.map(3 + usize::from(params.is_some()))?;
            e.unsigned(1)?.unsigned(sub_command)?;
            if let Some(params) = params {
                e.unsigned(2)?.raw(params)?;
            }
            e.unsigned(3)?.unsigned(1)?;
            e.unsigned(4)?.bytes(&pin_auth)?;
            Ok(())
        })
    }

    fn min_length(length: u64) -> Vec<u8> {
        test_support::encode(|e| {
            e.map(1)?.unsigned(1)?.unsigned(length)?;
            Ok(())
        })
    }

    #[test]
    fn test_requires_pin() {
        let mut auth = authenticator();
        let raw = test_support::encode(|e| {
            e.map(1)?.unsigned(1)?.unsigned(2)?;
            Ok(())
        });
        assert_eq!(handle(&mut auth, &raw), Err(StatusCode::PinNotSet));
        auth.store_mut().set_pin_hash(digest::sha256(b"1234")).unwrap();
        assert_eq!(handle(&mut auth, &raw), Err(StatusCode::PinRequired));
    }

    #[test]
    fn test_toggle_always_uv() {
        let mut auth = setup();
        let raw = request(&auth, 2, None);
        handle(&mut auth, &raw).unwrap();
        assert!(auth.always_uv());
        handle(&mut auth, &raw).unwrap();
        assert!(!auth.always_uv());
    }

    #[test]
    fn test_enable_enterprise_attestation() {
        let mut auth = setup();
        let raw = request(&auth, 1, None);
        handle(&mut auth, &raw).unwrap();
        assert!(auth.enterprise_attestation());
    }

    #[test]
    fn test_set_min_pin_length() {
        let mut auth = setup();
        let raw = request(&auth, 3, Some(&min_length(6)));
        handle(&mut auth, &raw).unwrap();
        assert_eq!(auth.min_pin_length(), 6);

        let raw = request(&auth, 3, Some(&min_length(5)));
        assert_eq!(handle(&mut auth, &raw), Err(StatusCode::PinPolicyViolation));
        let raw = request(&auth, 3, Some(&min_length(64)));
        assert_eq!(handle(&mut auth, &raw), Err(StatusCode::InvalidParameter));
        let raw = request(&auth, 3, None);
        assert_eq!(handle(&mut auth, &raw), Err(StatusCode::MissingParameter));
    }

    #[test]
    fn test_vendor_prototype_and_unknown() {
        let mut auth = setup();
        let raw = request(&auth, 0xFF, None);
        assert_eq!(handle(&mut auth, &raw), Ok(Vec::new()));
        let raw = request(&auth, 0x04, None);
        assert_eq!(handle(&mut auth, &raw), Err(StatusCode::InvalidSubcommand));
    }

    #[test]
    fn test_token_without_permission() {
        let mut auth = setup();
        auth.pin_tokens_mut().issue(Permission::GetAssertion.to_u8(), None);
        let raw = request(&auth, 2, None);
        assert_eq!(handle(&mut auth, &raw), Err(StatusCode::UnauthorizedPermission));
    }
}
