//! Authenticator context
//!
//! [`Authenticator`] owns everything a command handler may touch: the
//! configuration, the credential store, the platform (button and LED), the
//! PIN token, the key agreement key, and the cursors that span several
//! requests (credential enumeration, pending assertions). Handlers receive
//! it by mutable reference; there is no global state.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use openfido_crypto::digest;
use openfido_crypto::ecdh::KeyPair;

use crate::dispatcher::DispatchState;
use crate::extensions::HmacSecret;
use crate::hal::{self, Platform};
use crate::pin_token::{Permission, PinProtocol, PinTokenManager, SharedSecret};
use crate::status::{Result, StatusCode};
use crate::storage::{CredentialStore, Flash, PinCheck};
use crate::types::CredentialId;

/// Default maximum message size
pub const DEFAULT_MAX_MSG_SIZE: usize = 1024;

/// Largest serialized large-blob array accepted
pub const MAX_LARGE_BLOB_SIZE: usize = 2048;

/// PIN mismatches allowed per power cycle before PIN commands are refused
const MAX_CONSECUTIVE_PIN_MISMATCHES: u8 = 3;

/// Authenticator configuration
#[derive(Debug, Clone)]
pub struct AuthenticatorConfig {
    /// Authenticator Attestation GUID
    pub aaguid: [u8; 16],

    /// Largest request or response message
    pub max_msg_size: usize,

    /// Longest allowList or excludeList accepted
    pub max_credential_count_in_list: usize,

    /// User presence timeout for MakeCredential, GetAssertion and U2F
    pub up_timeout_ms: u32,

    /// User presence timeout for Reset
    pub reset_timeout_ms: u32,

    pub firmware_version: Option<u32>,
}

impl AuthenticatorConfig {
    pub fn new() -> Self {
        Self {
            aaguid: [0u8; 16],
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            max_credential_count_in_list: 10,
            up_timeout_ms: 30_000,
            reset_timeout_ms: 10_000,
            firmware_version: None,
        }
    }

    pub fn with_aaguid(mut self, aaguid: [u8; 16]) -> Self {
        self.aaguid = aaguid;
        self
    }

    /// Set maximum message size; values below 1024 are raised to 1024
    pub fn with_max_msg_size(mut self, size: usize) -> Self {
        self.max_msg_size = size.max(DEFAULT_MAX_MSG_SIZE);
        self
    }

    pub fn with_max_credential_count_in_list(mut self, count: usize) -> Self {
        self.max_credential_count_in_list = count;
        self
    }

    pub fn with_up_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.up_timeout_ms = timeout_ms;
        self
    }

    pub fn with_reset_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.reset_timeout_ms = timeout_ms;
        self
    }

    pub fn with_firmware_version(mut self, version: u32) -> Self {
        self.firmware_version = Some(version);
        self
    }
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of slot indices walked by a credential management enumeration
///
/// The snapshot is tied to the store generation it was taken at; any store
/// mutation makes the cursor unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCursor {
    slots: Vec<usize>,
    next: usize,
    generation: u32,
}

impl SlotCursor {
    /// Cursor over `slots` with the first entry already handed out
    pub fn new(slots: Vec<usize>, generation: u32) -> Self {
        Self {
            slots,
            next: 1,
            generation,
        }
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Next slot index
    ///
    /// Fails with [`StatusCode::NoOperationPending`] when the store changed
    /// since the snapshot and with [`StatusCode::NoCredentials`] once the
    /// snapshot is exhausted.
    pub fn next_slot(&mut self, generation: u32) -> Result<usize> {
        if generation != self.generation {
            return Err(StatusCode::NoOperationPending);
        }
        let slot = *self.slots.get(self.next).ok_or(StatusCode::NoCredentials)?;
        self.next += 1;
        Ok(slot)
    }
}

/// Remaining credentials of a GetAssertion discovery
pub struct PendingAssertions {
    pub rp_id_hash: [u8; 32],
    pub client_data_hash: [u8; 32],
    /// Authenticator data flags of the original request
    pub flags: u8,
    pub credential_ids: VecDeque<CredentialId>,
    /// Salts of an hmac-secret request, applied to every queued credential
    pub hmac_secret: Option<HmacSecret>,
}

/// Which credential management enumeration a get-next continues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    RelyingParties,
    Credentials,
}

/// Authenticator state shared by all command handlers
pub struct Authenticator<F: Flash, P: Platform> {
    config: AuthenticatorConfig,
    store: CredentialStore<F>,
    platform: P,
    pin_tokens: PinTokenManager,
    key_agreement: KeyPair,
    pin_mismatches: u8,
    large_blob: Vec<u8>,
    state: DispatchState,
    pub(crate) rp_cursor: Option<SlotCursor>,
    pub(crate) credential_cursor: Option<SlotCursor>,
    pub(crate) pending_assertions: Option<PendingAssertions>,
}

fn empty_large_blob() -> Vec<u8> {
    let mut blob = Vec::with_capacity(17);
    blob.push(0x80);
    blob.extend_from_slice(&digest::sha256(&[0x80])[..16]);
    blob
}

impl<F: Flash, P: Platform> Authenticator<F, P> {
    /// Open the credential store on `flash` and build the context
    pub fn new(config: AuthenticatorConfig, flash: F, platform: P) -> Result<Self> {
        let store = CredentialStore::open(flash)?;
        log::info!(
            "Authenticator ready, PIN {}",
            if store.is_pin_set() { "set" } else { "not set" }
        );
        Ok(Self {
            config,
            store,
            platform,
            pin_tokens: PinTokenManager::new(),
            key_agreement: KeyPair::generate(),
            pin_mismatches: 0,
            large_blob: empty_large_blob(),
            state: DispatchState::Idle,
            rp_cursor: None,
            credential_cursor: None,
            pending_assertions: None,
        })
    }

    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore<F> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CredentialStore<F> {
        &mut self.store
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Tear down and return the flash, e.g. to simulate a power cycle
    pub fn into_flash(self) -> F {
        self.store.into_flash()
    }

    pub fn is_pin_set(&self) -> bool {
        self.store.is_pin_set()
    }

    pub fn pin_retries(&self) -> u8 {
        self.store.pin_record().retries
    }

    pub fn min_pin_length(&self) -> usize {
        usize::from(self.store.pin_record().min_pin_length)
    }

    pub fn always_uv(&self) -> bool {
        self.store.pin_record().always_uv
    }

    pub fn enterprise_attestation(&self) -> bool {
        self.store.pin_record().enterprise_attestation
    }

    /// Block on a button press with the configured UP timeout
    pub fn wait_for_user_presence(&mut self) -> Result<()> {
        self.wait_for_user_presence_within(self.config.up_timeout_ms)
    }

    /// Block on a button press for at most `timeout_ms`
    pub fn wait_for_user_presence_within(&mut self, timeout_ms: u32) -> Result<()> {
        self.state = DispatchState::AwaitingUserPresence;
        let result = hal::wait_for_user_presence(&mut self.platform, timeout_ms);
        self.state = DispatchState::Signing;
        result
    }

    /// Phase of the request being processed
    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: DispatchState) {
        self.state = state;
    }

    pub fn pin_tokens(&self) -> &PinTokenManager {
        &self.pin_tokens
    }

    pub fn pin_tokens_mut(&mut self) -> &mut PinTokenManager {
        &mut self.pin_tokens
    }

    pub fn key_agreement(&self) -> &KeyPair {
        &self.key_agreement
    }

    pub fn regenerate_key_agreement(&mut self) {
        self.key_agreement = KeyPair::generate();
    }

    /// ECDH with the platform key and derive the protocol keys
    pub fn shared_secret(
        &self,
        protocol: PinProtocol,
        peer: &([u8; 32], [u8; 32]),
    ) -> Result<SharedSecret> {
        let z = self.key_agreement.shared_secret(&peer.0, &peer.1)?;
        SharedSecret::derive(protocol, &z)
    }

    /// Check a decrypted `pinHashEnc` against the stored PIN
    ///
    /// A mismatch costs a persistent retry and regenerates the key agreement
    /// key. After three mismatches in one power cycle every further attempt
    /// fails with [`StatusCode::PinAuthBlocked`] until the device restarts.
    pub fn check_pin_hash(&mut self, pin_hash: &[u8]) -> Result<()> {
        if self.store.is_pin_blocked() {
            return Err(StatusCode::PinBlocked);
        }
        if self.pin_mismatches >= MAX_CONSECUTIVE_PIN_MISMATCHES {
            return Err(StatusCode::PinAuthBlocked);
        }

        match self.store.verify_pin_hash(pin_hash)? {
            PinCheck::Match => {
                self.pin_mismatches = 0;
                Ok(())
            }
            PinCheck::Blocked => Err(StatusCode::PinBlocked),
            PinCheck::Mismatch { retries } => {
                self.regenerate_key_agreement();
                self.pin_mismatches += 1;
                if retries == 0 {
                    Err(StatusCode::PinBlocked)
                } else if self.pin_mismatches >= MAX_CONSECUTIVE_PIN_MISMATCHES {
                    Err(StatusCode::PinAuthBlocked)
                } else {
                    Err(StatusCode::PinInvalid)
                }
            }
        }
    }

    /// Verify a pinUvAuthParam with the current token and check `permission`
    pub fn verify_pin_auth(
        &mut self,
        protocol: PinProtocol,
        message: &[u8],
        pin_uv_auth_param: &[u8],
        permission: Permission,
        rp_id_hash: Option<&[u8; 32]>,
    ) -> Result<()> {
        self.pin_tokens
            .verify_auth(protocol, message, pin_uv_auth_param)?
            .verify_permission(permission, rp_id_hash)
    }

    /// Drop cursors that only survive between consecutive related commands
    pub fn clear_pending_assertions(&mut self) {
        self.pending_assertions = None;
    }

    /// End any credential management enumeration
    pub fn clear_cursors(&mut self) {
        self.rp_cursor = None;
        self.credential_cursor = None;
    }

    /// Keep only the enumeration cursor `keep` continues, if any
    pub fn retain_cursor(&mut self, keep: Option<CursorKind>) {
        if keep != Some(CursorKind::RelyingParties) {
            self.rp_cursor = None;
        }
        if keep != Some(CursorKind::Credentials) {
            self.credential_cursor = None;
        }
    }

    pub fn large_blob(&self) -> &[u8] {
        &self.large_blob
    }

    pub(crate) fn large_blob_mut(&mut self) -> &mut Vec<u8> {
        &mut self.large_blob
    }

    /// Wipe credentials, PIN and all session state
    pub fn reset(&mut self) -> Result<()> {
        self.store.format()?;
        self.pin_tokens.clear();
        self.regenerate_key_agreement();
        self.pin_mismatches = 0;
        self.large_blob = empty_large_blob();
        self.clear_cursors();
        self.pending_assertions = None;
        log::info!("Authenticator reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::LedState;
    use crate::storage::RamFlash;
    use crate::storage::layout::PARTITION_SIZE;

    struct AlwaysPress;

    impl Platform for AlwaysPress {
        fn button_wait_press(&mut self, _timeout_ms: u32) -> bool {
            true
        }

        fn set_led(&mut self, _state: LedState) {}
    }

    fn authenticator() -> Authenticator<RamFlash, AlwaysPress> {
        Authenticator::new(
            AuthenticatorConfig::default(),
            RamFlash::new(PARTITION_SIZE as usize),
            AlwaysPress,
        )
        .unwrap()
    }

    #[test]
    fn test_config_builder() {
        let config = AuthenticatorConfig::new()
            .with_aaguid([7; 16])
            .with_max_msg_size(512)
            .with_up_timeout_ms(100)
            .with_firmware_version(3);
        assert_eq!(config.aaguid, [7; 16]);
        assert_eq!(config.max_msg_size, DEFAULT_MAX_MSG_SIZE);
        assert_eq!(config.up_timeout_ms, 100);
        assert_eq!(config.reset_timeout_ms, 10_000);
        assert_eq!(config.firmware_version, Some(3));
    }

    #[test]
    fn test_slot_cursor() {
        let mut cursor = SlotCursor::new(alloc::vec![3, 5, 9], 4);
        assert_eq!(cursor.total(), 3);
        assert_eq!(cursor.next_slot(4), Ok(5));
        assert_eq!(cursor.next_slot(4), Ok(9));
        assert_eq!(cursor.next_slot(4), Err(StatusCode::NoCredentials));
    }

    #[test]
    fn test_slot_cursor_invalidated() {
        let mut cursor = SlotCursor::new(alloc::vec![0, 1], 4);
        assert_eq!(cursor.next_slot(5), Err(StatusCode::NoOperationPending));
    }

    #[test]
    fn test_retain_cursor() {
        let mut auth = authenticator();
        auth.rp_cursor = Some(SlotCursor::new(alloc::vec![0, 1], 0));
        auth.credential_cursor = Some(SlotCursor::new(alloc::vec![2, 3], 0));

        auth.retain_cursor(Some(CursorKind::Credentials));
        assert!(auth.rp_cursor.is_none());
        assert!(auth.credential_cursor.is_some());

        auth.retain_cursor(None);
        assert!(auth.credential_cursor.is_none());
    }

    #[test]
    fn test_pin_mismatch_lockout() {
        let mut auth = authenticator();
        let hash = digest::sha256(b"1234");
        auth.store_mut().set_pin_hash(hash).unwrap();

        let before = auth.key_agreement().public_key_cose();
        assert_eq!(auth.check_pin_hash(&[0; 16]), Err(StatusCode::PinInvalid));
        assert_ne!(auth.key_agreement().public_key_cose(), before);
        assert_eq!(auth.check_pin_hash(&[0; 16]), Err(StatusCode::PinInvalid));
        assert_eq!(auth.check_pin_hash(&[0; 16]), Err(StatusCode::PinAuthBlocked));
        // the right PIN is refused until a power cycle
        assert_eq!(auth.check_pin_hash(&hash[..16]), Err(StatusCode::PinAuthBlocked));
        assert_eq!(auth.pin_retries(), 5);

        let flash = auth.into_flash();
        let mut auth =
            Authenticator::new(AuthenticatorConfig::default(), flash, AlwaysPress).unwrap();
        auth.check_pin_hash(&hash[..16]).unwrap();
        assert_eq!(auth.pin_retries(), 8);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut auth = authenticator();
        auth.store_mut().set_pin_hash(digest::sha256(b"1234")).unwrap();
        auth.pin_tokens_mut().issue(0x3F, None);
        auth.large_blob_mut().push(1);
        auth.rp_cursor = Some(SlotCursor::new(alloc::vec![0, 1], 0));

        auth.reset().unwrap();
        assert!(auth.rp_cursor.is_none());
        assert!(!auth.is_pin_set());
        assert!(auth.pin_tokens().token().is_none());
        assert_eq!(auth.large_blob().len(), 17);
        assert_eq!(auth.large_blob()[0], 0x80);
    }
}
