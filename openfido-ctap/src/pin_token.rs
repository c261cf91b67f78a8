//! PIN/UV auth tokens and permissions
//!
//! A token is issued by ClientPIN after the PIN checks out. It carries a
//! permission bitmap and, optionally, the RP it is scoped to. Every
//! privileged command verifies its `pinUvAuthParam` against the current
//! token and then checks the permission bit it needs.
//!
//! There is no clock in the engine, so tokens do not expire on their own;
//! they are replaced by the next issuance and dropped on Reset or on a
//! PIN change.

use alloc::vec::Vec;

use openfido_crypto::pin_protocol::{v1, v2};
use openfido_crypto::rng;
use zeroize::Zeroizing;

use crate::status::{Result, StatusCode};

/// Token permissions
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    MakeCredential = 0x01,
    GetAssertion = 0x02,
    CredentialManagement = 0x04,
    BioEnrollment = 0x08,
    LargeBlobWrite = 0x10,
    AuthenticatorConfiguration = 0x20,
}

impl Permission {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_set_in(self, permissions: u8) -> bool {
        (permissions & self.to_u8()) != 0
    }

    /// Permissions scoped to a relying party
    fn is_rp_scoped(self) -> bool {
        matches!(self, Self::MakeCredential | Self::GetAssertion)
    }
}

/// Permissions granted by the legacy getPinToken subcommand
pub const LEGACY_PERMISSIONS: u8 = Permission::MakeCredential as u8
    | Permission::GetAssertion as u8
    | Permission::CredentialManagement as u8
    | Permission::AuthenticatorConfiguration as u8;

/// PIN/UV auth protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinProtocol {
    One,
    Two,
}

impl PinProtocol {
    pub fn from_u64(value: u64) -> Result<Self> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(StatusCode::InvalidParameter),
        }
    }

    pub fn to_u64(self) -> u64 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    /// Constant-time check of `signature` over `message`
    pub fn verify(self, key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::One => v1::verify(key, message, signature),
            Self::Two => v2::verify(key, message, signature),
        }
    }

    pub fn authenticate(self, key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        Ok(match self {
            Self::One => v1::authenticate(key, message)?.to_vec(),
            Self::Two => v2::authenticate(key, message)?.to_vec(),
        })
    }
}

/// Keys derived from the ECDH secret with the platform
pub struct SharedSecret {
    protocol: PinProtocol,
    hmac_key: Zeroizing<[u8; 32]>,
    aes_key: Zeroizing<[u8; 32]>,
}

impl SharedSecret {
    /// Derive the protocol keys from the raw ECDH output `z`
    pub fn derive(protocol: PinProtocol, z: &[u8; 32]) -> Result<Self> {
        let (hmac_key, aes_key) = match protocol {
            PinProtocol::One => {
                let key = v1::derive_key(z);
                (key.clone(), key)
            }
            PinProtocol::Two => v2::derive_keys(z)?,
        };
        Ok(Self {
            protocol,
            hmac_key,
            aes_key,
        })
    }

    pub fn protocol(&self) -> PinProtocol {
        self.protocol
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(match self.protocol {
            PinProtocol::One => v1::encrypt(&self.aes_key, plaintext)?,
            PinProtocol::Two => v2::encrypt(&self.aes_key, plaintext)?,
        })
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        Ok(match self.protocol {
            PinProtocol::One => v1::decrypt(&self.aes_key, ciphertext)?,
            PinProtocol::Two => v2::decrypt(&self.aes_key, ciphertext)?,
        })
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        self.protocol.verify(&self.hmac_key[..], message, signature)
    }

    /// MAC `message` with the channel key, as the platform does for setPin
    pub fn authenticate(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.protocol.authenticate(&self.hmac_key[..], message)
    }
}

/// Issued PIN/UV auth token
pub struct PinToken {
    value: Zeroizing<[u8; 32]>,
    permissions: u8,
    rp_id_hash: Option<[u8; 32]>,
}

impl PinToken {
    pub fn new(value: [u8; 32], permissions: u8, rp_id_hash: Option<[u8; 32]>) -> Self {
        Self {
            value: Zeroizing::new(value),
            permissions,
            rp_id_hash,
        }
    }

    pub fn value(&self) -> &[u8; 32] {
        &self.value
    }

    pub fn permissions(&self) -> u8 {
        self.permissions
    }

    pub fn rp_id_hash(&self) -> Option<&[u8; 32]> {
        self.rp_id_hash.as_ref()
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        permission.is_set_in(self.permissions)
    }

    /// Check that the token may perform `permission`
    ///
    /// A token not yet bound to an RP becomes bound to `rp_id_hash` the
    /// first time it authorizes an RP-scoped operation. Failures on
    /// RP-scoped permissions report [`StatusCode::PinAuthInvalid`], the
    /// rest [`StatusCode::UnauthorizedPermission`].
    pub fn verify_permission(
        &mut self,
        permission: Permission,
        rp_id_hash: Option<&[u8; 32]>,
    ) -> Result<()> {
        let denied = if permission.is_rp_scoped() {
            StatusCode::PinAuthInvalid
        } else {
            StatusCode::UnauthorizedPermission
        };

        if !self.has_permission(permission) {
            log::warn!("Token lacks permission {:?}", permission);
            return Err(denied);
        }

        match (self.rp_id_hash, rp_id_hash) {
            (Some(bound), Some(requested)) if bound != *requested => {
                log::warn!("Token is bound to another RP");
                Err(denied)
            }
            (None, Some(requested)) if permission.is_rp_scoped() => {
                self.rp_id_hash = Some(*requested);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Holds the single active token
#[derive(Default)]
pub struct PinTokenManager {
    current: Option<PinToken>,
}

impl PinTokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any existing token with a fresh random one
    pub fn issue(&mut self, permissions: u8, rp_id_hash: Option<[u8; 32]>) -> &PinToken {
        self.current.insert(PinToken::new(rng::bytes(), permissions, rp_id_hash))
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn token(&self) -> Option<&PinToken> {
        self.current.as_ref()
    }

    pub fn token_mut(&mut self) -> Option<&mut PinToken> {
        self.current.as_mut()
    }

    /// Verify `pin_uv_auth_param` over `message` with the current token
    ///
    /// Returns the token on success so the caller can check permissions.
    pub fn verify_auth(
        &mut self,
        protocol: PinProtocol,
        message: &[u8],
        pin_uv_auth_param: &[u8],
    ) -> Result<&mut PinToken> {
        let token = self.current.as_mut().ok_or(StatusCode::PinAuthInvalid)?;
        if !protocol.verify(&token.value[..], message, pin_uv_auth_param) {
            log::warn!("pinUvAuthParam did not verify");
            return Err(StatusCode::PinAuthInvalid);
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_bits() {
        assert_eq!(Permission::MakeCredential.to_u8(), 0x01);
        assert_eq!(Permission::AuthenticatorConfiguration.to_u8(), 0x20);
        assert!(Permission::GetAssertion.is_set_in(0x03));
        assert!(!Permission::LargeBlobWrite.is_set_in(LEGACY_PERMISSIONS));
    }

    #[test]
    fn test_missing_permission_fails_closed() {
        let mut token = PinToken::new([1; 32], Permission::GetAssertion.to_u8(), None);
        assert_eq!(
            token.verify_permission(Permission::MakeCredential, Some(&[2; 32])),
            Err(StatusCode::PinAuthInvalid)
        );
        assert_eq!(
            token.verify_permission(Permission::CredentialManagement, None),
            Err(StatusCode::UnauthorizedPermission)
        );
    }

    #[test]
    fn test_rp_binding() {
        let mut token = PinToken::new([1; 32], LEGACY_PERMISSIONS, None);
        token.verify_permission(Permission::GetAssertion, Some(&[2; 32])).unwrap();
        assert_eq!(token.rp_id_hash(), Some(&[2; 32]));
        assert_eq!(
            token.verify_permission(Permission::GetAssertion, Some(&[3; 32])),
            Err(StatusCode::PinAuthInvalid)
        );
        // credential management is not RP scoped
        token.verify_permission(Permission::CredentialManagement, None).unwrap();
    }

    #[test]
    fn test_verify_auth() {
        let mut manager = PinTokenManager::new();
        assert_eq!(
            manager.verify_auth(PinProtocol::One, b"msg", &[0; 16]).err(),
            Some(StatusCode::PinAuthInvalid)
        );

        let value = *manager.issue(LEGACY_PERMISSIONS, None).value();
        let good = PinProtocol::One.authenticate(&value, b"msg").unwrap();
        assert!(manager.verify_auth(PinProtocol::One, b"msg", &good).is_ok());
        assert!(manager.verify_auth(PinProtocol::One, b"other", &good).is_err());
        // protocol Two expects the full 32-byte MAC
        assert!(manager.verify_auth(PinProtocol::Two, b"msg", &good).is_err());
    }

    #[test]
    fn test_issue_replaces_token() {
        let mut manager = PinTokenManager::new();
        let first = *manager.issue(LEGACY_PERMISSIONS, None).value();
        let second = *manager.issue(Permission::GetAssertion.to_u8(), Some([9; 32])).value();
        assert_ne!(first, second);
        assert_eq!(manager.token().unwrap().permissions(), 0x02);
        manager.clear();
        assert!(manager.token().is_none());
    }

    #[test]
    fn test_shared_secret_protocols() {
        let z = [0x17; 32];
        for protocol in [PinProtocol::One, PinProtocol::Two] {
            let secret = SharedSecret::derive(protocol, &z).unwrap();
            let ciphertext = secret.encrypt(&[0x55; 32]).unwrap();
            assert_eq!(&secret.decrypt(&ciphertext).unwrap()[..], &[0x55; 32][..]);
        }
        assert_eq!(PinProtocol::from_u64(3), Err(StatusCode::InvalidParameter));
    }
}
