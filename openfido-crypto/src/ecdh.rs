//! P-256 ECDH for PIN/UV auth protocol key agreement
//!
//! The authenticator publishes its key agreement key as a COSE_Key
//! (kty: 2, alg: -25, crv: 1). The raw shared secret `Z` is the
//! x-coordinate of the ECDH point; the protocols hash or HKDF it further.

use crate::error::{CryptoError, Result};

use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// P-256 key pair for ECDH key agreement
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key agreement key pair
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Public key as COSE `(x, y)` coordinates
    pub fn public_key_cose(&self) -> ([u8; 32], [u8; 32]) {
        let point = self.public.to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        if let (Some(px), Some(py)) = (point.x(), point.y()) {
            x.copy_from_slice(px);
            y.copy_from_slice(py);
        }
        (x, y)
    }

    /// Compute the raw shared secret `Z` with a peer given by its COSE coordinates
    pub fn shared_secret(&self, peer_x: &[u8], peer_y: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        if peer_x.len() != 32 || peer_y.len() != 32 {
            return Err(CryptoError::InvalidPublicKey);
        }
        let point = EncodedPoint::from_affine_coordinates(peer_x.into(), peer_y.into(), false);
        let peer: Option<PublicKey> = PublicKey::from_encoded_point(&point).into();
        let peer = peer.ok_or(CryptoError::InvalidPublicKey)?;

        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let mut z = Zeroizing::new([0u8; 32]);
        z.copy_from_slice(shared.raw_secret_bytes());
        Ok(z)
    }
}
