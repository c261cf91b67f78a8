//! Ed25519 (EdDSA) credential keys
//!
//! COSE algorithm identifier: -8 (EdDSA), curve Ed25519 (COSE crv 6)
//!
//! The private key is the 32-byte seed. Signatures are the raw 64-byte
//! `R || S` encoding; there is no DER wrapping for EdDSA.

use crate::error::{CryptoError, Result};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Length of a compressed Edwards point
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of an Ed25519 signature
pub const SIGNATURE_LENGTH: usize = 64;

/// Generate a new random Ed25519 key pair
///
/// Returns `(seed, public_key)`. The seed is wiped when dropped.
///
/// # Examples
///
/// ```
/// use openfido_crypto::eddsa;
///
/// let (seed, public_key) = eddsa::generate_keypair();
/// let signature = eddsa::sign(&seed, b"authData || clientDataHash");
/// assert!(eddsa::verify(&public_key, b"authData || clientDataHash", &signature).is_ok());
/// ```
pub fn generate_keypair() -> (Zeroizing<[u8; 32]>, [u8; PUBLIC_KEY_LENGTH]) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let seed = Zeroizing::new(signing_key.to_bytes());
    (seed, signing_key.verifying_key().to_bytes())
}

/// Sign `data` with the key derived from `seed`
pub fn sign(seed: &[u8; 32], data: &[u8]) -> [u8; SIGNATURE_LENGTH] {
    SigningKey::from_bytes(seed).sign(data).to_bytes()
}

/// Verify a raw signature against a compressed public key
pub fn verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<()> {
    let public_key: &[u8; PUBLIC_KEY_LENGTH] =
        public_key.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key
        .verify(data, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Public key of a seed
pub fn public_from_private(seed: &[u8; 32]) -> [u8; PUBLIC_KEY_LENGTH] {
    SigningKey::from_bytes(seed).verifying_key().to_bytes()
}
