//! Error types for Tessera core

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Debug, Error)]
pub enum Error {
    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] tessera_crypto::CryptoError),

    /// Vault read or write failed
    #[error("Vault error: {0}")]
    Vault(String),

    /// Peer directory could not be reached
    #[error("Peer directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Peer directory rejected the request
    #[error("Peer directory error: {0}")]
    Directory(String),

    /// Malformed envelope or payload
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::InvalidEnvelope(err.to_string())
    }
}
