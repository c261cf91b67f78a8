//! CTAP command dispatcher
//!
//! Takes a reassembled transport frame (`command ‖ CBOR body`), routes it to
//! its handler and frames the reply as `status ‖ body`. One request runs to
//! completion before the next is accepted.

use alloc::vec::Vec;

use crate::authenticator::Authenticator;
use crate::commands::{self, CommandCode};
use crate::hal::Platform;
use crate::status::{Result, StatusCode};
use crate::storage::Flash;
use crate::u2f;

/// Phase of the request in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    /// No request in flight
    #[default]
    Idle,
    Decoding,
    AwaitingUserPresence,
    /// Touch confirmed, producing keys and signatures
    Signing,
    Encoding,
}

/// A decoded command, borrowing its CBOR body from the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    MakeCredential(&'a [u8]),
    GetAssertion(&'a [u8]),
    GetInfo,
    ClientPin(&'a [u8]),
    Reset,
    GetNextAssertion,
    CredentialManagement(&'a [u8]),
    LargeBlobs(&'a [u8]),
    Config(&'a [u8]),
}

impl<'a> Command<'a> {
    /// Split a frame into command and body
    pub fn parse(frame: &'a [u8]) -> Result<Self> {
        let (&code, body) = frame.split_first().ok_or(StatusCode::InvalidLength)?;
        let code = CommandCode::from_u8(code).ok_or_else(|| {
            log::warn!("Unknown command {:#04x}", code);
            StatusCode::InvalidCommand
        })?;
        Ok(match code {
            CommandCode::MakeCredential => Self::MakeCredential(body),
            CommandCode::GetAssertion => Self::GetAssertion(body),
            CommandCode::GetInfo => Self::GetInfo,
            CommandCode::ClientPin => Self::ClientPin(body),
            CommandCode::Reset => Self::Reset,
            CommandCode::GetNextAssertion => Self::GetNextAssertion,
            CommandCode::CredentialManagement => Self::CredentialManagement(body),
            CommandCode::LargeBlobs => Self::LargeBlobs(body),
            CommandCode::Config => Self::Config(body),
        })
    }

    pub fn code(&self) -> CommandCode {
        match self {
            Self::MakeCredential(_) => CommandCode::MakeCredential,
            Self::GetAssertion(_) => CommandCode::GetAssertion,
            Self::GetInfo => CommandCode::GetInfo,
            Self::ClientPin(_) => CommandCode::ClientPin,
            Self::Reset => CommandCode::Reset,
            Self::GetNextAssertion => CommandCode::GetNextAssertion,
            Self::CredentialManagement(_) => CommandCode::CredentialManagement,
            Self::LargeBlobs(_) => CommandCode::LargeBlobs,
            Self::Config(_) => CommandCode::Config,
        }
    }
}

/// CTAP command dispatcher
///
/// Owns the authenticator context and threads it through every handler.
pub struct CommandDispatcher<F: Flash, P: Platform> {
    authenticator: Authenticator<F, P>,
}

impl<F: Flash, P: Platform> CommandDispatcher<F, P> {
    pub fn new(authenticator: Authenticator<F, P>) -> Self {
        Self { authenticator }
    }

    /// Dispatch a frame and return the response body, or the failure status
    pub fn dispatch(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        if frame.len() > self.authenticator.config().max_msg_size {
            return Err(StatusCode::InvalidLength);
        }

        self.authenticator.set_state(DispatchState::Decoding);
        let result = Command::parse(frame).and_then(|command| self.run(command));
        self.authenticator.set_state(DispatchState::Idle);

        if let Err(status) = result {
            log::debug!("Command failed: {}", status);
        }
        result
    }

    /// Dispatch a frame and frame the reply as `status ‖ body`
    pub fn process(&mut self, frame: &[u8]) -> Vec<u8> {
        match self.dispatch(frame) {
            Ok(body) => {
                let mut response = Vec::with_capacity(1 + body.len());
                response.push(StatusCode::Success.to_u8());
                response.extend_from_slice(&body);
                response
            }
            Err(status) => alloc::vec![status.to_u8()],
        }
    }

    /// Handle a U2F APDU; the reply carries its own status word
    pub fn process_u2f(&mut self, apdu: &[u8]) -> Vec<u8> {
        self.authenticator.clear_pending_assertions();
        self.authenticator.clear_cursors();
        self.authenticator.set_state(DispatchState::Decoding);
        let response = u2f::process(&mut self.authenticator, apdu);
        self.authenticator.set_state(DispatchState::Idle);
        response
    }

    fn run(&mut self, command: Command<'_>) -> Result<Vec<u8>> {
        log::debug!("Dispatching {:?}", command.code());
        let auth = &mut self.authenticator;
        if command != Command::GetNextAssertion {
            auth.clear_pending_assertions();
        }
        // an enumeration only survives its own get-next steps
        let continued = match command {
            Command::CredentialManagement(body) => {
                commands::credential_management::continued_cursor(body)
            }
            _ => None,
        };
        auth.retain_cursor(continued);

        let body = match command {
            Command::MakeCredential(body) => commands::make_credential::handle(auth, body),
            Command::GetAssertion(body) => commands::get_assertion::handle(auth, body),
            Command::GetInfo => commands::get_info::handle(auth),
            Command::ClientPin(body) => commands::client_pin::handle(auth, body),
            Command::Reset => commands::reset::handle(auth),
            Command::GetNextAssertion => commands::get_next_assertion::handle(auth),
            Command::CredentialManagement(body) => {
                commands::credential_management::handle(auth, body)
            }
            Command::LargeBlobs(body) => commands::large_blobs::handle(auth, body),
            Command::Config(body) => commands::config::handle(auth, body),
        }?;
        auth.set_state(DispatchState::Encoding);
        Ok(body)
    }

    /// Current phase; always [`DispatchState::Idle`] between requests
    pub fn state(&self) -> DispatchState {
        self.authenticator.state()
    }

    pub fn authenticator(&self) -> &Authenticator<F, P> {
        &self.authenticator
    }

    pub fn authenticator_mut(&mut self) -> &mut Authenticator<F, P> {
        &mut self.authenticator
    }

    pub fn into_authenticator(self) -> Authenticator<F, P> {
        self.authenticator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::PendingAssertions;
    use crate::commands::test_support::{self, authenticator};
    use crate::pin_token::{LEGACY_PERMISSIONS, PinProtocol};
    use crate::storage::RamFlash;
    use openfido_crypto::digest;

    fn dispatcher() -> CommandDispatcher<RamFlash, test_support::AlwaysPress> {
        CommandDispatcher::new(authenticator())
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&[0x04]), Ok(Command::GetInfo));
        assert_eq!(Command::parse(&[0x06, 0xA0]), Ok(Command::ClientPin(&[0xA0])));
        assert_eq!(Command::parse(&[0x03]), Err(StatusCode::InvalidCommand));
        assert_eq!(Command::parse(&[]), Err(StatusCode::InvalidLength));
    }

    #[test]
    fn test_get_info_command() {
        let mut dispatcher = dispatcher();
        let response = dispatcher.process(&[0x04]);
        assert_eq!(response[0], 0x00);
        assert_eq!(response[1] & 0xE0, 0xA0);
        assert_eq!(dispatcher.state(), DispatchState::Idle);
    }

    #[test]
    fn test_invalid_command() {
        let mut dispatcher = dispatcher();
        assert_eq!(dispatcher.process(&[0xFF]), [0x01]);
        assert_eq!(dispatcher.dispatch(&[0xFF]), Err(StatusCode::InvalidCommand));
    }

    #[test]
    fn test_empty_command() {
        let mut dispatcher = dispatcher();
        assert_eq!(dispatcher.dispatch(&[]), Err(StatusCode::InvalidLength));
    }

    #[test]
    fn test_oversized_frame() {
        let mut dispatcher = dispatcher();
        let frame = alloc::vec![0x01; 2000];
        assert_eq!(dispatcher.dispatch(&frame), Err(StatusCode::InvalidLength));
    }

    #[test]
    fn test_malformed_cbor() {
        let mut dispatcher = dispatcher();
        assert_eq!(dispatcher.process(&[0x01, 0xA1]), [0x12]);
        assert_eq!(dispatcher.state(), DispatchState::Idle);
    }

    #[test]
    fn test_reset_command() {
        let mut dispatcher = dispatcher();
        dispatcher
            .authenticator_mut()
            .store_mut()
            .set_pin_hash(digest::sha256(b"1234"))
            .unwrap();

        assert_eq!(dispatcher.process(&[0x07]), [0x00]);
        assert!(!dispatcher.authenticator().is_pin_set());
    }

    #[test]
    fn test_other_command_drops_pending_assertions() {
        let mut dispatcher = dispatcher();
        dispatcher.authenticator_mut().pending_assertions = Some(PendingAssertions {
            rp_id_hash: [0; 32],
            client_data_hash: [0; 32],
            flags: 0,
            credential_ids: [[1; 16]].into_iter().collect(),
            hmac_secret: None,
        });
        dispatcher.process(&[0x04]);
        assert_eq!(dispatcher.process(&[0x08]), [StatusCode::NoOperationPending.to_u8()]);
    }

    /// Resident credentials for `example.com` plus a credential management
    /// token, with an enumeration of them begun
    fn begin_enumeration(dispatcher: &mut CommandDispatcher<RamFlash, test_support::AlwaysPress>) {
        let auth = dispatcher.authenticator_mut();
        auth.store_mut().set_pin_hash(digest::sha256(b"1234")).unwrap();
        for (id, user) in [([1; 16], &b"alice"[..]), ([2; 16], &b"bob"[..])] {
            let credential = test_support::resident_credential(id, "example.com", user);
            auth.store_mut().store(&credential).unwrap();
        }
        let token = *auth.pin_tokens_mut().issue(LEGACY_PERMISSIONS, None).value();

        let params = test_support::encode(|e| {
            e.map(1)?.unsigned(1)?.bytes(&digest::sha256(b"example.com"))?;
            Ok(())
        });
        let mut message = alloc::vec![0x04];
        message.extend_from_slice(&params);
        let pin_auth = PinProtocol::One.authenticate(&token, &message).unwrap();
        let mut frame = alloc::vec![0x0A];
        frame.extend(test_support::encode(|e| {
            e.map(4)?;
            e.unsigned(1)?.unsigned(4)?;
            e.unsigned(2)?.raw(&params)?;
            e.unsigned(3)?.unsigned(1)?;
            e.unsigned(4)?.bytes(&pin_auth)?;
            Ok(())
        }));
        assert_eq!(dispatcher.process(&frame)[0], 0x00);
    }

    /// `{1: 5}`, enumerateCredentialsGetNextCredential without a token
    const NEXT_CREDENTIAL: [u8; 4] = [0x0A, 0xA1, 0x01, 0x05];

    #[test]
    fn test_enumeration_continues_across_get_next() {
        let mut dispatcher = dispatcher();
        begin_enumeration(&mut dispatcher);
        assert_eq!(dispatcher.process(&NEXT_CREDENTIAL)[0], 0x00);
    }

    #[test]
    fn test_other_command_ends_enumeration() {
        let mut dispatcher = dispatcher();
        begin_enumeration(&mut dispatcher);

        dispatcher.authenticator_mut().pin_tokens_mut().clear();
        assert_eq!(dispatcher.process(&[0x04])[0], 0x00);
        let response = dispatcher.process(&NEXT_CREDENTIAL);
        assert_ne!(response[0], StatusCode::Success.to_u8());
        assert!(dispatcher.authenticator().credential_cursor.is_none());
    }

    #[test]
    fn test_token_still_held_does_not_keep_enumeration() {
        let mut dispatcher = dispatcher();
        begin_enumeration(&mut dispatcher);
        assert_eq!(dispatcher.process(&[0x04])[0], 0x00);
        assert_eq!(
            dispatcher.process(&NEXT_CREDENTIAL),
            [StatusCode::NoOperationPending.to_u8()]
        );
    }

    #[test]
    fn test_u2f_ends_enumeration() {
        let mut dispatcher = dispatcher();
        begin_enumeration(&mut dispatcher);
        dispatcher.process_u2f(&[0x00, 0x03, 0x00, 0x00]);
        assert!(dispatcher.authenticator().credential_cursor.is_none());
    }

    #[test]
    fn test_u2f_version() {
        let mut dispatcher = dispatcher();
        assert_eq!(dispatcher.process_u2f(&[0x00, 0x03, 0x00, 0x00]), b"U2F_V2\x90\x00");
        assert_eq!(dispatcher.state(), DispatchState::Idle);
    }
}
