//! Key Derivation Functions (KDF) for the Tessera protocol
//!
//! HKDF-SHA-512 with mandatory domain separation. Every derivation in the
//! key hierarchy and in the ratchet goes through this module, each with a
//! unique `info` string.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};
use crate::master::MasterKey;

/// HKDF using SHA-512 for key derivation
pub type HkdfSha512 = Hkdf<Sha512>;

/// HMAC-SHA256 for chain key ratcheting
pub type HmacSha256 = Hmac<Sha256>;

/// Domain separation strings for different key derivation contexts
pub mod domain {
    /// Extract salt for the identity sub-key hierarchy
    pub const SUBKEY_SALT: &[u8] = b"tessera-e2ee-v1/subkey-hierarchy";
    /// Long-term agreement key
    pub const IDENTITY_KEY: &[u8] = b"identity-key";
    /// Long-term signature key
    pub const SIGNING_KEY: &[u8] = b"signing-key";
    /// Signed pre-key
    pub const SIGNED_PREKEY: &[u8] = b"signed-prekey";
    /// Root for signed pre-keys issued by rotation
    pub const PREKEY_ROOT: &[u8] = b"prekey-root";
    /// Prefix for rotated signed pre-keys, followed by the decimal key ID
    pub const SIGNED_PREKEY_PREFIX: &str = "signed-prekey-";
    /// Extract salt for rotated signed pre-keys
    pub const SIGNED_PREKEY_ROTATION_SALT: &[u8] = b"tessera-e2ee-v1/signed-prekey-rotation";
    /// Prefix for one-time pre-keys, followed by the decimal index
    pub const ONE_TIME_PREKEY_PREFIX: &str = "one-time-prekey-";
    /// Initial shared secret from the handshake
    pub const HANDSHAKE_SECRET: &[u8] = b"tessera-e2ee-v1/x3dh-secret";
    /// Root key step of the DH ratchet
    pub const RATCHET_ROOT: &[u8] = b"tessera-e2ee-v1/ratchet-root";
    /// Chain key produced by a DH ratchet step
    pub const RATCHET_CHAIN: &[u8] = b"tessera-e2ee-v1/ratchet-chain";
    /// Stateless box key
    pub const STATELESS_BOX: &[u8] = b"tessera-e2ee-v1/stateless-box";
}

/// Chain KDF constant for the message key
const MESSAGE_KEY_SEED: u8 = 0x01;
/// Chain KDF constant for the next chain key
const CHAIN_KEY_SEED: u8 = 0x02;

/// A derived key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey<const N: usize>(pub [u8; N]);

impl<const N: usize> DerivedKey<N> {
    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// Copy out the raw bytes. The copy is the caller's to wipe.
    pub fn to_bytes(&self) -> [u8; N] {
        self.0
    }
}

impl<const N: usize> AsRef<[u8]> for DerivedKey<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key derivation context for HKDF operations
pub struct KeyDerivationContext {
    /// The PRK (Pseudo-Random Key) from HKDF-Extract
    hkdf: HkdfSha512,
}

impl KeyDerivationContext {
    /// Create a new KDF context from input key material
    ///
    /// # Arguments
    /// * `salt` - Optional salt (if None, uses zero-filled salt)
    /// * `ikm` - Input Key Material (e.g., shared secret from DH)
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        let hkdf = HkdfSha512::new(salt, ikm);
        Self { hkdf }
    }

    /// Derive a key with the given info string
    pub fn derive<const N: usize>(&self, info: &[u8]) -> Result<DerivedKey<N>> {
        let mut output = [0u8; N];
        self.hkdf
            .expand(info, &mut output)
            .map_err(|_| CryptoError::KeyDerivation("HKDF expansion failed".to_string()))?;
        Ok(DerivedKey(output))
    }
}

/// Sub-key deriver for one identity.
///
/// Extract runs once over the master key; each call to [`derive`] is an
/// independent Expand under its own `info`.
///
/// [`derive`]: SubKeyDeriver::derive
pub struct SubKeyDeriver {
    ctx: KeyDerivationContext,
}

impl SubKeyDeriver {
    /// Extract a PRK from the master key
    pub fn new(master: &MasterKey) -> Self {
        Self {
            ctx: KeyDerivationContext::new(Some(domain::SUBKEY_SALT), master.as_bytes()),
        }
    }

    /// Expand a sub-key for the given purpose
    pub fn derive<const N: usize>(&self, info: &[u8]) -> Result<DerivedKey<N>> {
        self.ctx.derive(info)
    }

    /// Expand the sub-key for one-time pre-key `index`
    pub fn one_time_prekey(&self, index: u32) -> Result<DerivedKey<32>> {
        let info = format!("{}{}", domain::ONE_TIME_PREKEY_PREFIX, index);
        self.ctx.derive(info.as_bytes())
    }
}

/// Signed pre-key `key_id` under a pre-key root
pub fn derive_rotated_signed_prekey(prekey_root: &[u8; 32], key_id: u32) -> Result<DerivedKey<32>> {
    let ctx = KeyDerivationContext::new(Some(domain::SIGNED_PREKEY_ROTATION_SALT), prekey_root);
    let info = format!("{}{}", domain::SIGNED_PREKEY_PREFIX, key_id);
    ctx.derive(info.as_bytes())
}

/// Root KDF of the DH ratchet.
///
/// Returns (new_root_key, chain_key).
pub fn derive_root_and_chain_keys(
    root_key: &[u8; 32],
    dh_output: &[u8; 32],
) -> Result<([u8; 32], [u8; 32])> {
    let kdf = KeyDerivationContext::new(Some(root_key), dh_output);

    let new_root_key: DerivedKey<32> = kdf.derive(domain::RATCHET_ROOT)?;
    let chain_key: DerivedKey<32> = kdf.derive(domain::RATCHET_CHAIN)?;

    Ok((new_root_key.to_bytes(), chain_key.to_bytes()))
}

/// Symmetric chain step.
///
/// Returns (next_chain_key, message_key). The input chain key must be
/// discarded by the caller.
pub fn derive_message_keys(chain_key: &[u8; 32]) -> Result<([u8; 32], [u8; 32])> {
    let message_key = hmac_derive(chain_key, MESSAGE_KEY_SEED)?;
    let next_chain_key = hmac_derive(chain_key, CHAIN_KEY_SEED)?;
    Ok((next_chain_key, message_key))
}

fn hmac_derive(key: &[u8; 32], input: u8) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(&[input]);
    Ok(mac.finalize().into_bytes().into())
}
