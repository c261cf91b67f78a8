//! Cryptographic primitives for the OpenFIDO authenticator
//!
//! The CTAP engine treats everything in this crate as a black box:
//!
//! - **ECDSA**: ES256 key generation and signatures for attestation, assertions and U2F
//! - **EdDSA**: Ed25519 credential keys
//! - **ECDH**: P-256 key agreement for the PIN/UV auth protocols
//! - **PIN Protocols**: One (AES-256-CBC, zero IV + truncated HMAC) and Two (HKDF + random IV)
//! - **AEAD**: AES-256-GCM sealing of credential records at rest
//! - **Digest**: SHA-256 and HMAC-SHA-256
//!
//! Every buffer that carries secret key material is returned wrapped in
//! [`zeroize::Zeroizing`] so it is wiped when dropped.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod aead;
pub mod digest;
pub mod ecdh;
pub mod ecdsa;
pub mod eddsa;
pub mod error;
pub mod pin_protocol;
pub mod rng;

pub use error::{CryptoError, Result};
