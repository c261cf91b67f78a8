//! Error types for cryptographic operations

#[cfg(feature = "std")]
use thiserror::Error;

#[cfg(not(feature = "std"))]
use core::fmt;

/// Cryptographic operation errors
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Peer public key is not a valid P-256 point
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Private scalar is zero or out of range
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// Signature could not be parsed or did not verify
    #[error("Invalid signature")]
    InvalidSignature,

    /// Ciphertext is malformed or not block aligned
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Plaintext could not be encrypted
    #[error("Encryption failed")]
    EncryptionFailed,

    /// AEAD tag did not match the ciphertext and associated data
    #[error("Authentication tag mismatch")]
    TagMismatch,

    /// Input had the wrong length
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Cryptographic operation errors (no_std version)
#[cfg(not(feature = "std"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Peer public key is not a valid P-256 point
    InvalidPublicKey,

    /// Private scalar is zero or out of range
    InvalidPrivateKey,

    /// Signature could not be parsed or did not verify
    InvalidSignature,

    /// Ciphertext is malformed or not block aligned
    DecryptionFailed,

    /// Plaintext could not be encrypted
    EncryptionFailed,

    /// AEAD tag did not match the ciphertext and associated data
    TagMismatch,

    /// Input had the wrong length
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(not(feature = "std"))]
impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPublicKey => write!(f, "Invalid public key"),
            Self::InvalidPrivateKey => write!(f, "Invalid private key"),
            Self::InvalidSignature => write!(f, "Invalid signature"),
            Self::DecryptionFailed => write!(f, "Decryption failed"),
            Self::EncryptionFailed => write!(f, "Encryption failed"),
            Self::TagMismatch => write!(f, "Authentication tag mismatch"),
            Self::InvalidLength { expected, actual } => {
                write!(f, "Invalid length: expected {}, got {}", expected, actual)
            }
        }
    }
}

/// Result type alias for cryptographic operations
pub type Result<T> = core::result::Result<T, CryptoError>;
