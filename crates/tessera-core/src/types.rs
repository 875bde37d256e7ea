//! Core types used throughout Tessera

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_crypto::keys::{fingerprint, PublicKeyBytes};

/// Lowercase hex SHA-256 of an identity public key
pub type Fingerprint = String;

/// Peer identifier, as understood by the peer directory
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Create from string
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Locally cached view of a peer's identity key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerKeyRecord {
    /// The peer
    pub peer_id: PeerId,
    /// Raw identity public key
    pub cached_public_key: PublicKeyBytes,
    /// Fingerprint recorded with the key
    pub cached_fingerprint: Fingerprint,
    /// When the key was last confirmed against the directory
    pub verified_at: DateTime<Utc>,
}

impl PeerKeyRecord {
    /// Record a freshly verified key
    pub fn new(peer_id: PeerId, public_key: PublicKeyBytes, verified_at: DateTime<Utc>) -> Self {
        Self {
            peer_id,
            cached_public_key: public_key,
            cached_fingerprint: fingerprint(&public_key),
            verified_at,
        }
    }

    /// Whether the stored fingerprint still matches the stored key bytes
    pub fn is_consistent(&self) -> bool {
        fingerprint(&self.cached_public_key) == self.cached_fingerprint
    }
}
