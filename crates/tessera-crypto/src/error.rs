//! Error types for cryptographic operations

use thiserror::Error;

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Raw entropy input rejected before any derivation
    #[error("Invalid entropy input: {0}")]
    InvalidEntropy(String),

    /// Entropy estimate below the configured floor
    #[error("Insufficient entropy: estimated {estimated_bits} bits, need {required_bits}")]
    InsufficientEntropy {
        /// Estimate for the rejected rolls
        estimated_bits: u32,
        /// Configured minimum
        required_bits: u32,
    },

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Invalid key length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Invalid signature
    #[error("Invalid signature")]
    InvalidSignature,

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authentication failed (AEAD tag verification)
    #[error("Message authentication failed")]
    AuthenticationFailed,

    /// Invalid public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Message too large
    #[error("Message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Plaintext length
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Out of order message with a gap beyond the skipped-key bound
    #[error("Message gap too large: {gap} messages skipped, bound is {max}")]
    MessageGapTooLarge {
        /// Keys that would have to be skipped
        gap: u32,
        /// Skipped-key bound
        max: u32,
    },

    /// Message key already consumed or evicted
    #[error("Message key unavailable for counter {counter}")]
    MessageKeyUnavailable {
        /// Message counter from the header
        counter: u32,
    },

    /// Ratchet state corrupted
    #[error("Ratchet state corrupted: {0}")]
    RatchetCorrupted(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key exchange failed
    #[error("Key exchange failed: {0}")]
    KeyExchangeFailed(String),

    /// Referenced one-time pre-key unknown or already consumed
    #[error("One-time pre-key {0} unknown or already consumed")]
    OneTimePreKeyUnavailable(u32),

    /// Referenced signed pre-key is neither the current nor the previous one
    #[error("Signed pre-key {0} not found")]
    SignedPreKeyNotFound(u32),
}

impl From<bincode::Error> for CryptoError {
    fn from(err: bincode::Error) -> Self {
        CryptoError::Serialization(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for CryptoError {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        CryptoError::InvalidSignature
    }
}

impl From<chacha20poly1305::Error> for CryptoError {
    fn from(_: chacha20poly1305::Error) -> Self {
        CryptoError::AuthenticationFailed
    }
}

impl From<argon2::Error> for CryptoError {
    fn from(err: argon2::Error) -> Self {
        CryptoError::KeyDerivation(err.to_string())
    }
}
