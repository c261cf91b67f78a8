//! P-256 ECDSA (ES256) for attestation, assertions and U2F
//!
//! COSE algorithm identifier: -7 (ES256)
//!
//! - Curve: P-256 (secp256r1 / prime256v1)
//! - Hash: SHA-256, applied internally by [`sign`] and [`verify`]
//! - Signature format: ASN.1 DER, as both CTAP2 packed attestation and U2F expect

extern crate alloc;
use alloc::vec::Vec;

use crate::error::{CryptoError, Result};

use p256::ecdsa::{Signature, SigningKey, VerifyingKey, signature::Signer, signature::Verifier};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Length of an uncompressed SEC1 public key (0x04 || x || y)
pub const PUBLIC_KEY_LENGTH: usize = 65;

/// Generate a new random ES256 key pair
///
/// Returns `(private_key, public_key)` where the public key is in
/// uncompressed SEC1 form. The private scalar is wiped when dropped.
///
/// # Examples
///
/// ```
/// use openfido_crypto::ecdsa;
///
/// let (private_key, public_key) = ecdsa::generate_keypair();
/// assert_eq!(private_key.len(), 32);
/// assert_eq!(public_key[0], 0x04);
/// ```
pub fn generate_keypair() -> (Zeroizing<[u8; 32]>, [u8; PUBLIC_KEY_LENGTH]) {
    let signing_key = SigningKey::random(&mut OsRng);
    let private_key = Zeroizing::new(signing_key.to_bytes().into());
    (private_key, encode_public(signing_key.verifying_key()))
}

/// Sign `data` with ES256, returning a DER signature (70-72 bytes)
///
/// # Examples
///
/// ```
/// use openfido_crypto::ecdsa;
///
/// let (private_key, public_key) = ecdsa::generate_keypair();
/// let signature = ecdsa::sign(&private_key, b"authData || clientDataHash").unwrap();
/// assert!(ecdsa::verify(&public_key, b"authData || clientDataHash", &signature).is_ok());
/// ```
pub fn sign(private_key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    let signing_key =
        SigningKey::from_bytes(private_key.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
    let signature: Signature = signing_key.sign(data);
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Verify a DER signature against an uncompressed SEC1 public key
pub fn verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::from_der(signature).map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key
        .verify(data, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Derive the uncompressed SEC1 public key for a private scalar
pub fn public_from_private(private_key: &[u8; 32]) -> Result<[u8; PUBLIC_KEY_LENGTH]> {
    let signing_key =
        SigningKey::from_bytes(private_key.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
    Ok(encode_public(signing_key.verifying_key()))
}

/// Split an uncompressed SEC1 key into its COSE `x` and `y` coordinates
pub fn coordinates(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> ([u8; 32], [u8; 32]) {
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    x.copy_from_slice(&public_key[1..33]);
    y.copy_from_slice(&public_key[33..65]);
    (x, y)
}

fn encode_public(verifying_key: &VerifyingKey) -> [u8; PUBLIC_KEY_LENGTH] {
    let point = verifying_key.to_encoded_point(false);
    let mut out = [0u8; PUBLIC_KEY_LENGTH];
    out.copy_from_slice(point.as_bytes());
    out
}
