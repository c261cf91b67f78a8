//! CTAP2 and U2F authenticator engine
//!
//! Turns reassembled transport frames into CTAP2 or U2F responses. Credentials,
//! the PIN and the signature counter live in an encrypted flash partition; the
//! button and LED are reached through [`Platform`].
//!
//! ```ignore
//! let auth = Authenticator::new(AuthenticatorConfig::default(), flash, board)?;
//! let mut dispatcher = CommandDispatcher::new(auth);
//! let response = dispatcher.process(&frame);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod authenticator;
pub mod cbor;
pub mod commands;
pub mod dispatcher;
pub mod extensions;
pub mod hal;
pub mod pin_token;
pub mod status;
pub mod storage;
pub mod types;
pub mod u2f;

// Re-export commonly used types
pub use authenticator::{Authenticator, AuthenticatorConfig};
pub use dispatcher::{Command, CommandDispatcher, DispatchState};
pub use extensions::CredProtect;
pub use hal::{LedState, Platform};
pub use pin_token::{Permission, PinProtocol, PinToken, PinTokenManager};
pub use status::{Result, StatusCode};
pub use storage::{CredentialStore, Flash, FlashError, RamFlash, StorageError};
pub use types::{CoseAlgorithm, Credential, CredentialId, RelyingParty, User};
pub use u2f::StatusWord;
