//! Protocol error types
//!
//! Every error maps to one [`ErrorKind`], which tells the caller how to
//! react: fix the input, distrust the peer, re-establish the session,
//! retry later, or report a bug.

use tessera_core::PeerId;
use tessera_crypto::CryptoError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Error classes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input rejected before any cryptographic work
    Validation,
    /// Signature, fingerprint or AEAD check failed; fail closed
    Authentication,
    /// Session state lost, reset or exhausted; not retryable as-is
    StaleSession,
    /// Vault or directory unreachable
    Availability,
    /// Handshake reused consumed key material
    Replay,
    /// Bug or unexpected runtime failure
    Internal,
}

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] tessera_core::Error),

    /// Crypto error
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No local identity has been created
    #[error("No local identity")]
    NoIdentity,

    /// Plaintext exceeds the configured maximum
    #[error("Message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Plaintext length
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Envelope version not understood
    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(String),

    /// Payload format not understood
    #[error("Unsupported payload format: {0}")]
    UnsupportedFormat(String),

    /// Envelope carries no sender copy
    #[error("Envelope has no sender copy")]
    MissingSenderCopy,

    /// Directory has no bundle for the peer
    #[error("Peer {0} not found in directory")]
    PeerNotFound(PeerId),

    /// Directory unreachable and nothing cached
    #[error("Peer directory unavailable for {peer}: {reason}")]
    DirectoryUnavailable {
        /// Peer concerned
        peer: PeerId,
        /// What went wrong
        reason: String,
    },

    /// Published bundle is not self-consistent
    #[error("Invalid key bundle for {peer}: {reason}")]
    InvalidBundle {
        /// Peer concerned
        peer: PeerId,
        /// What went wrong
        reason: String,
    },

    /// Handshake identity does not match the peer's known identity key
    #[error("Identity key mismatch for {0}")]
    IdentityMismatch(PeerId),

    /// Session missing or unusable
    #[error("Stale session with {peer}: {reason}")]
    StaleSession {
        /// Peer concerned
        peer: PeerId,
        /// What went wrong
        reason: String,
    },

    /// Handshake references consumed key material
    #[error("Handshake replay from {peer}: {reason}")]
    HandshakeReplay {
        /// Peer concerned
        peer: PeerId,
        /// What went wrong
        reason: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Core(e) => core_kind(e),
            ProtocolError::Crypto(e) => crypto_kind(e),
            ProtocolError::Configuration(_)
            | ProtocolError::NoIdentity
            | ProtocolError::MessageTooLarge { .. }
            | ProtocolError::UnsupportedVersion(_)
            | ProtocolError::UnsupportedFormat(_)
            | ProtocolError::MissingSenderCopy => ErrorKind::Validation,
            ProtocolError::PeerNotFound(_) | ProtocolError::DirectoryUnavailable { .. } => {
                ErrorKind::Availability
            }
            ProtocolError::InvalidBundle { .. } | ProtocolError::IdentityMismatch(_) => {
                ErrorKind::Authentication
            }
            ProtocolError::StaleSession { .. } => ErrorKind::StaleSession,
            ProtocolError::HandshakeReplay { .. } => ErrorKind::Replay,
            ProtocolError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Availability
    }
}

fn core_kind(err: &tessera_core::Error) -> ErrorKind {
    use tessera_core::Error;
    match err {
        Error::Crypto(e) => crypto_kind(e),
        Error::Vault(_) | Error::DirectoryUnavailable(_) | Error::Directory(_) => {
            ErrorKind::Availability
        }
        Error::InvalidEnvelope(_) => ErrorKind::Validation,
        Error::Serialization(_) => ErrorKind::Internal,
    }
}

fn crypto_kind(err: &CryptoError) -> ErrorKind {
    match err {
        CryptoError::InvalidEntropy(_)
        | CryptoError::InsufficientEntropy { .. }
        | CryptoError::InvalidKeyLength { .. }
        | CryptoError::InvalidPublicKey(_)
        | CryptoError::MessageTooLarge { .. } => ErrorKind::Validation,
        CryptoError::InvalidSignature | CryptoError::AuthenticationFailed => {
            ErrorKind::Authentication
        }
        CryptoError::MessageGapTooLarge { .. }
        | CryptoError::MessageKeyUnavailable { .. }
        | CryptoError::RatchetCorrupted(_)
        | CryptoError::SignedPreKeyNotFound(_) => ErrorKind::StaleSession,
        CryptoError::OneTimePreKeyUnavailable(_) => ErrorKind::Replay,
        CryptoError::KeyDerivation(_)
        | CryptoError::EncryptionFailed(_)
        | CryptoError::Serialization(_)
        | CryptoError::KeyExchangeFailed(_) => ErrorKind::Internal,
    }
}
