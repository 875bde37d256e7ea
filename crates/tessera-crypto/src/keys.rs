//! Key types for the Tessera protocol
//!
//! - Agreement keys (X25519) for identity, pre-keys, ratchet and ephemeral use
//! - Serializable public/secret key wrappers
//! - Publishable pre-key bundle

use ed25519_dalek::{Signature, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};

/// Size of X25519 public keys in bytes
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of Ed25519 signatures in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// An X25519 key pair for Diffie-Hellman key agreement
pub struct AgreementKeyPair {
    /// The secret key (zeroized on drop by x25519-dalek)
    secret: X25519StaticSecret,
    /// The public key
    public: X25519PublicKey,
}

impl AgreementKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secret = X25519StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from existing secret bytes
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = X25519StaticSecret::from(bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes::from_x25519(&self.public)
    }

    /// Perform X25519 Diffie-Hellman key agreement
    pub fn diffie_hellman(&self, their_public: &PublicKeyBytes) -> SharedSecret {
        let shared = self.secret.diffie_hellman(&their_public.to_x25519());
        SharedSecret(*shared.as_bytes())
    }

    /// Export the secret for storage
    pub fn secret_bytes(&self) -> SecretKeyBytes {
        SecretKeyBytes(self.secret.to_bytes())
    }
}

impl Clone for AgreementKeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret.to_bytes())
    }
}

impl From<&SecretKeyBytes> for AgreementKeyPair {
    fn from(secret: &SecretKeyBytes) -> Self {
        Self::from_secret_bytes(secret.0)
    }
}

/// A shared secret derived from Diffie-Hellman key agreement
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub(crate) [u8; 32]);

impl SharedSecret {
    /// Get the secret bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// A serializable public key wrapper
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(#[serde(with = "hex::serde")] pub [u8; 32]);

impl PublicKeyBytes {
    /// Create from X25519 public key
    pub fn from_x25519(key: &X25519PublicKey) -> Self {
        Self(*key.as_bytes())
    }

    /// Convert to X25519 public key
    pub fn to_x25519(&self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }

    /// Interpret as an Ed25519 verifying key
    pub fn to_verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0)
            .map_err(|_| CryptoError::InvalidPublicKey("Invalid Ed25519 public key".to_string()))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a byte slice of exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: X25519_PUBLIC_KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }
}

impl From<[u8; 32]> for PublicKeyBytes {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A serializable secret key, wiped on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SecretKeyBytes(#[serde(with = "hex::serde")] pub(crate) [u8; 32]);

impl SecretKeyBytes {
    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKeyBytes(..)")
    }
}

/// Fingerprint of an agreement public key: lowercase hex SHA-256
pub fn fingerprint(public_key: &PublicKeyBytes) -> String {
    hex::encode(Sha256::digest(public_key.as_bytes()))
}

/// A signed pre-key as published
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKey {
    /// The pre-key ID
    pub key_id: u32,
    /// The public key
    pub public_key: PublicKeyBytes,
    /// Signature over the public key by the signing key
    #[serde(with = "hex::serde")]
    pub signature: [u8; SIGNATURE_SIZE],
    /// Unix timestamp (seconds) when this key was issued
    pub timestamp: i64,
}

impl SignedPreKey {
    /// Verify the signature using the owner's signing key
    pub fn verify(&self, signing_key: &VerifyingKey) -> Result<()> {
        let signature = Signature::from_bytes(&self.signature);
        signing_key
            .verify_strict(self.public_key.as_bytes(), &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// A published one-time pre-key (used once and discarded)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePreKey {
    /// The key ID
    pub key_id: u32,
    /// The public key
    pub public_key: PublicKeyBytes,
}

/// A bundle of public keys for asynchronous session establishment.
///
/// This is the JSON shape published to the peer directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyBundle {
    /// Identity agreement key (X25519)
    pub identity_key: PublicKeyBytes,
    /// Signing key (Ed25519)
    pub signing_key: PublicKeyBytes,
    /// Fingerprint of the identity key
    pub fingerprint: String,
    /// Signed pre-key
    pub signed_pre_key: SignedPreKey,
    /// Unused one-time pre-keys
    #[serde(default)]
    pub one_time_pre_keys: Vec<OneTimePreKey>,
}

impl PreKeyBundle {
    /// Check that the advertised fingerprint matches the identity key
    pub fn verify_fingerprint(&self) -> Result<()> {
        if fingerprint(&self.identity_key) != self.fingerprint {
            return Err(CryptoError::InvalidPublicKey(
                "Bundle fingerprint does not match identity key".to_string(),
            ));
        }
        Ok(())
    }

    /// Verify the signed pre-key against the bundle's signing key
    pub fn verify_signed_prekey(&self) -> Result<()> {
        let signing_key = self.signing_key.to_verifying_key()?;
        self.signed_pre_key.verify(&signing_key)
    }
}
