//! Identity and pre-key material
//!
//! All long-term key material of an identity is derived from the
//! [`MasterKey`] through the sub-key hierarchy, so it can be regenerated
//! byte-for-byte from the original dice rolls. Uses X25519 for agreement
//! and Ed25519 for signing the signed pre-key.

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};
use crate::kdf::{derive_rotated_signed_prekey, domain, DerivedKey, SubKeyDeriver};
use crate::keys::{
    fingerprint, AgreementKeyPair, OneTimePreKey, PreKeyBundle, PublicKeyBytes, SecretKeyBytes,
    SharedSecret, SignedPreKey, SIGNATURE_SIZE,
};
use crate::master::MasterKey;

/// Key ID of the signed pre-key derived with an identity. Rotation
/// issues increasing IDs after it.
pub const SIGNED_PREKEY_ID: u32 = 1;

/// Default number of one-time pre-keys per identity
pub const DEFAULT_ONE_TIME_PREKEYS: u32 = 100;

/// Smallest one-time pre-key batch accepted
pub const MIN_ONE_TIME_PREKEYS: u32 = 50;

/// Long-term agreement key pair with its fingerprint
#[derive(Clone)]
pub struct IdentityKeyPair {
    keypair: AgreementKeyPair,
}

impl IdentityKeyPair {
    /// Rebuild from a stored secret
    pub fn from_secret(secret: &SecretKeyBytes) -> Self {
        Self {
            keypair: AgreementKeyPair::from(secret),
        }
    }

    /// Get the public identity key
    pub fn public_key(&self) -> PublicKeyBytes {
        self.keypair.public_key()
    }

    /// Fingerprint of the public identity key
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.keypair.public_key())
    }

    /// Perform Diffie-Hellman key agreement
    pub fn diffie_hellman(&self, their_public: &PublicKeyBytes) -> SharedSecret {
        self.keypair.diffie_hellman(their_public)
    }

    fn secret_bytes(&self) -> SecretKeyBytes {
        self.keypair.secret_bytes()
    }
}

/// Long-term signature key pair
#[derive(Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Rebuild from a stored secret
    pub fn from_secret(secret: &SecretKeyBytes) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret.as_bytes()),
        }
    }

    /// Get the public verifying key bytes
    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes::from(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    fn secret_bytes(&self) -> SecretKeyBytes {
        SecretKeyBytes(self.signing_key.to_bytes())
    }
}

/// Signed pre-key pair (private + public)
#[derive(Clone)]
pub struct SignedPreKeyPair {
    key_id: u32,
    keypair: AgreementKeyPair,
    signature: [u8; SIGNATURE_SIZE],
    timestamp: i64,
}

impl SignedPreKeyPair {
    fn issue(
        key_id: u32,
        keypair: AgreementKeyPair,
        signing: &SigningKeyPair,
        timestamp: i64,
    ) -> Self {
        let signature = signing.sign(keypair.public_key().as_bytes());
        Self {
            key_id,
            keypair,
            signature,
            timestamp,
        }
    }

    fn from_stored(stored: &StoredSignedPreKey, signing: &SigningKeyPair) -> Result<Self> {
        let pair = Self {
            key_id: stored.key_id,
            keypair: AgreementKeyPair::from(&stored.private_key),
            signature: stored.signature,
            timestamp: stored.timestamp,
        };
        pair.public().verify(&signing.public_key().to_verifying_key()?)?;
        Ok(pair)
    }

    fn to_stored(&self) -> StoredSignedPreKey {
        StoredSignedPreKey {
            key_id: self.key_id,
            private_key: self.keypair.secret_bytes(),
            signature: self.signature,
            timestamp: self.timestamp,
        }
    }

    /// Issue time (Unix seconds)
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Key ID
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// The agreement key pair
    pub fn keypair(&self) -> &AgreementKeyPair {
        &self.keypair
    }

    /// The publishable half
    pub fn public(&self) -> SignedPreKey {
        SignedPreKey {
            key_id: self.key_id,
            public_key: self.keypair.public_key(),
            signature: self.signature,
            timestamp: self.timestamp,
        }
    }
}

/// One-time pre-key pair
#[derive(Clone)]
pub struct OneTimePreKeyPair {
    key_id: u32,
    keypair: AgreementKeyPair,
}

impl OneTimePreKeyPair {
    /// Key ID
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// The agreement key pair
    pub fn keypair(&self) -> &AgreementKeyPair {
        &self.keypair
    }

    /// The publishable half
    pub fn public(&self) -> OneTimePreKey {
        OneTimePreKey {
            key_id: self.key_id,
            public_key: self.keypair.public_key(),
        }
    }
}

/// Complete private key material of one identity
#[derive(Clone)]
pub struct KeyMaterial {
    identity: IdentityKeyPair,
    signing: SigningKeyPair,
    prekey_root: SecretKeyBytes,
    signed_prekey: SignedPreKeyPair,
    /// Replaced by the last rotation; kept for handshakes in flight
    previous_signed_prekey: Option<SignedPreKeyPair>,
    one_time_prekeys: Vec<OneTimePreKeyPair>,
}

impl KeyMaterial {
    /// Derive all key material from the master key.
    ///
    /// Fully deterministic: the same master key, count and `issued_at`
    /// always produce byte-identical material. Ed25519 signatures are
    /// deterministic, so the signed pre-key signature is too.
    pub fn derive(master: &MasterKey, one_time_count: u32, issued_at: i64) -> Result<Self> {
        if one_time_count < MIN_ONE_TIME_PREKEYS {
            return Err(CryptoError::KeyDerivation(format!(
                "at least {} one-time pre-keys required, got {}",
                MIN_ONE_TIME_PREKEYS, one_time_count
            )));
        }

        let deriver = SubKeyDeriver::new(master);

        let identity_seed: DerivedKey<32> = deriver.derive(domain::IDENTITY_KEY)?;
        let identity = IdentityKeyPair {
            keypair: AgreementKeyPair::from_secret_bytes(identity_seed.to_bytes()),
        };

        let signing_seed: DerivedKey<32> = deriver.derive(domain::SIGNING_KEY)?;
        let signing = SigningKeyPair {
            signing_key: SigningKey::from_bytes(signing_seed.as_bytes()),
        };

        let prekey_root: DerivedKey<32> = deriver.derive(domain::PREKEY_ROOT)?;

        let spk_seed: DerivedKey<32> = deriver.derive(domain::SIGNED_PREKEY)?;
        let signed_prekey = SignedPreKeyPair::issue(
            SIGNED_PREKEY_ID,
            AgreementKeyPair::from_secret_bytes(spk_seed.to_bytes()),
            &signing,
            issued_at,
        );

        let one_time_prekeys = (0..one_time_count)
            .map(|index| {
                let seed = deriver.one_time_prekey(index)?;
                Ok(OneTimePreKeyPair {
                    key_id: index + 1,
                    keypair: AgreementKeyPair::from_secret_bytes(seed.to_bytes()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            identity,
            signing,
            prekey_root: SecretKeyBytes(prekey_root.to_bytes()),
            signed_prekey,
            previous_signed_prekey: None,
            one_time_prekeys,
        })
    }

    /// Identity key pair
    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    /// Signing key pair
    pub fn signing(&self) -> &SigningKeyPair {
        &self.signing
    }

    /// Current signed pre-key pair
    pub fn signed_prekey(&self) -> &SignedPreKeyPair {
        &self.signed_prekey
    }

    /// Signed pre-key by ID: the current one or the one it replaced
    pub fn signed_prekey_by_id(&self, key_id: u32) -> Option<&SignedPreKeyPair> {
        std::iter::once(&self.signed_prekey)
            .chain(self.previous_signed_prekey.as_ref())
            .find(|k| k.key_id == key_id)
    }

    /// Replace the signed pre-key with the next one in the rotation.
    ///
    /// The new key is derived deterministically from the pre-key root, so
    /// it can be recovered from the rolls. The replaced key stays usable
    /// for handshakes already in flight until the next rotation.
    pub fn rotate_signed_prekey(&mut self, issued_at: i64) -> Result<&SignedPreKeyPair> {
        let key_id = self
            .signed_prekey
            .key_id
            .checked_add(1)
            .ok_or_else(|| CryptoError::KeyDerivation("signed pre-key IDs exhausted".to_string()))?;

        let seed = derive_rotated_signed_prekey(self.prekey_root.as_bytes(), key_id)?;
        let next = SignedPreKeyPair::issue(
            key_id,
            AgreementKeyPair::from_secret_bytes(seed.to_bytes()),
            &self.signing,
            issued_at,
        );

        self.previous_signed_prekey = Some(std::mem::replace(&mut self.signed_prekey, next));
        Ok(&self.signed_prekey)
    }

    /// Remaining one-time pre-keys
    pub fn one_time_prekeys(&self) -> &[OneTimePreKeyPair] {
        &self.one_time_prekeys
    }

    /// Look up an unconsumed one-time pre-key
    pub fn one_time_prekey(&self, key_id: u32) -> Option<&OneTimePreKeyPair> {
        self.one_time_prekeys.iter().find(|k| k.key_id == key_id)
    }

    /// Remove a one-time pre-key. Its private half is dropped (and wiped)
    /// with the returned pair.
    pub fn consume_one_time_prekey(&mut self, key_id: u32) -> Option<OneTimePreKeyPair> {
        let pos = self.one_time_prekeys.iter().position(|k| k.key_id == key_id)?;
        Some(self.one_time_prekeys.remove(pos))
    }

    /// The subset safe for publication
    pub fn public_bundle(&self) -> PreKeyBundle {
        PreKeyBundle {
            identity_key: self.identity.public_key(),
            signing_key: self.signing.public_key(),
            fingerprint: self.identity.fingerprint(),
            signed_pre_key: self.signed_prekey.public(),
            one_time_pre_keys: self.one_time_prekeys.iter().map(|k| k.public()).collect(),
        }
    }

    /// Serializable form for the vault
    pub fn to_stored(&self) -> StoredKeyMaterial {
        StoredKeyMaterial {
            identity_key: self.identity.secret_bytes(),
            signing_key: self.signing.secret_bytes(),
            prekey_root: self.prekey_root.clone(),
            signed_pre_key: self.signed_prekey.to_stored(),
            previous_signed_pre_key: self
                .previous_signed_prekey
                .as_ref()
                .map(SignedPreKeyPair::to_stored),
            one_time_pre_keys: self
                .one_time_prekeys
                .iter()
                .map(|k| StoredOneTimePreKey {
                    key_id: k.key_id,
                    private_key: k.keypair.secret_bytes(),
                })
                .collect(),
        }
    }

    /// Rebuild from the stored form, checking the pre-key signatures
    pub fn from_stored(stored: &StoredKeyMaterial) -> Result<Self> {
        let signing = SigningKeyPair::from_secret(&stored.signing_key);
        let signed_prekey = SignedPreKeyPair::from_stored(&stored.signed_pre_key, &signing)?;
        let previous_signed_prekey = stored
            .previous_signed_pre_key
            .as_ref()
            .map(|k| SignedPreKeyPair::from_stored(k, &signing))
            .transpose()?;

        Ok(Self {
            identity: IdentityKeyPair::from_secret(&stored.identity_key),
            signing,
            prekey_root: stored.prekey_root.clone(),
            signed_prekey,
            previous_signed_prekey,
            one_time_prekeys: stored
                .one_time_pre_keys
                .iter()
                .map(|k| OneTimePreKeyPair {
                    key_id: k.key_id,
                    keypair: AgreementKeyPair::from(&k.private_key),
                })
                .collect(),
        })
    }
}

/// Stored private bundle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKeyMaterial {
    /// Identity agreement secret
    pub identity_key: SecretKeyBytes,
    /// Ed25519 signing seed
    pub signing_key: SecretKeyBytes,
    /// Root for rotated signed pre-keys
    pub prekey_root: SecretKeyBytes,
    /// Signed pre-key with its private half
    pub signed_pre_key: StoredSignedPreKey,
    /// Signed pre-key replaced by the last rotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_signed_pre_key: Option<StoredSignedPreKey>,
    /// Unconsumed one-time pre-keys
    pub one_time_pre_keys: Vec<StoredOneTimePreKey>,
}

/// Stored signed pre-key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSignedPreKey {
    /// Key ID
    pub key_id: u32,
    /// Private half
    pub private_key: SecretKeyBytes,
    /// Signature over the public half
    #[serde(with = "hex::serde")]
    pub signature: [u8; SIGNATURE_SIZE],
    /// Issue time
    pub timestamp: i64,
}

/// Stored one-time pre-key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOneTimePreKey {
    /// Key ID
    pub key_id: u32,
    /// Private half
    pub private_key: SecretKeyBytes,
}
