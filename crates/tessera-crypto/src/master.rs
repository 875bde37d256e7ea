//! Memory-hard master key derivation
//!
//! Stretches a [`Seed`] into the [`MasterKey`] with Argon2id.
//!
//! # Security
//!
//! The salt is derived deterministically from the seed so that the same
//! rolls regenerate the same master key during recovery. Salt secrecy
//! therefore adds nothing: the security of every derived key rests entirely
//! on the entropy of the seed. Callers must supply an input source with at
//! least 128 bits of effective entropy.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::entropy::Seed;
use crate::error::{CryptoError, Result};

/// Context string hashed with the seed to form the Argon2 salt
pub const MASTER_SALT_CONTEXT: &[u8] = b"tessera-e2ee-v1/master-key-salt";

/// Master key size in bytes (256 bits)
pub const MASTER_KEY_SIZE: usize = 32;

// Argon2id defaults: 64 MiB, 3 passes, 1 lane
const DEFAULT_M_COST_KIB: u32 = 64 * 1024;
const DEFAULT_T_COST: u32 = 3;
const DEFAULT_P_COST: u32 = 1;

/// Smallest memory cost accepted outside of tests (8 MiB)
const MIN_M_COST_KIB: u32 = 8 * 1024;

/// Argon2id cost parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKeyParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for MasterKeyParams {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_M_COST_KIB,
            iterations: DEFAULT_T_COST,
            parallelism: DEFAULT_P_COST,
        }
    }
}

impl MasterKeyParams {
    /// Cheap parameters for unit tests. Never use for real identities.
    pub fn insecure_for_tests() -> Self {
        Self {
            memory_kib: 256,
            iterations: 3,
            parallelism: 1,
        }
    }

    /// Validate production cost parameters
    pub fn validate(&self) -> Result<()> {
        if self.iterations < 3 {
            return Err(CryptoError::KeyDerivation(format!(
                "iterations must be at least 3, got {}",
                self.iterations
            )));
        }
        if !(1..=4).contains(&self.parallelism) {
            return Err(CryptoError::KeyDerivation(format!(
                "parallelism must be 1..=4, got {}",
                self.parallelism
            )));
        }
        if self.memory_kib < MIN_M_COST_KIB {
            return Err(CryptoError::KeyDerivation(format!(
                "memory cost must be at least {} KiB, got {}",
                MIN_M_COST_KIB, self.memory_kib
            )));
        }
        Ok(())
    }
}

/// Root symmetric key of an identity.
///
/// Only lives in memory while key material is being generated or
/// recovered; zeroized when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; MASTER_KEY_SIZE]);

impl MasterKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; MASTER_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Deterministic salt: SHA-256(context || seed)
pub fn master_salt(seed: &Seed) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(MASTER_SALT_CONTEXT);
    hasher.update(seed.as_bytes());
    hasher.finalize().into()
}

/// Derive the master key with Argon2id.
///
/// This is deliberately slow and blocks the calling thread. Parameters are
/// not validated here so tests can use [`MasterKeyParams::insecure_for_tests`];
/// the protocol layer validates its configuration up front.
pub fn derive_master_key(seed: &Seed, params: &MasterKeyParams) -> Result<MasterKey> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(MASTER_KEY_SIZE),
    )?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let salt = master_salt(seed);

    let mut output = [0u8; MASTER_KEY_SIZE];
    if let Err(e) = argon2.hash_password_into(seed.as_bytes(), &salt, &mut output) {
        output.zeroize();
        return Err(e.into());
    }

    Ok(MasterKey(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_deterministic() {
        let seed = Seed::from_bytes([7u8; 32]);
        let params = MasterKeyParams::insecure_for_tests();

        let a = derive_master_key(&seed, &params).unwrap();
        let b = derive_master_key(&seed, &params).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), seed.as_bytes());
    }

    #[test]
    fn test_different_seeds_different_keys() {
        let params = MasterKeyParams::insecure_for_tests();
        let a = derive_master_key(&Seed::from_bytes([1u8; 32]), &params).unwrap();
        let b = derive_master_key(&Seed::from_bytes([2u8; 32]), &params).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_params_change_output() {
        let seed = Seed::from_bytes([9u8; 32]);
        let cheap = MasterKeyParams::insecure_for_tests();
        let more_passes = MasterKeyParams {
            iterations: 4,
            ..cheap
        };

        let a = derive_master_key(&seed, &cheap).unwrap();
        let b = derive_master_key(&seed, &more_passes).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_salt_is_seed_dependent() {
        let a = master_salt(&Seed::from_bytes([1u8; 32]));
        let b = master_salt(&Seed::from_bytes([2u8; 32]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_param_validation() {
        assert!(MasterKeyParams::default().validate().is_ok());
        assert!(MasterKeyParams::insecure_for_tests().validate().is_err());

        let few_passes = MasterKeyParams {
            iterations: 2,
            ..Default::default()
        };
        assert!(few_passes.validate().is_err());

        let wide = MasterKeyParams {
            parallelism: 8,
            ..Default::default()
        };
        assert!(wide.validate().is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let key = MasterKey::from_bytes([0xAB; 32]);
        assert_eq!(format!("{:?}", key), "MasterKey(..)");
    }
}
