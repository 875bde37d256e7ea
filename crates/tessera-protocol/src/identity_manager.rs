//! Identity & Pre-Key Manager
//!
//! Turns die rolls into stored key material and answers questions about
//! the local identity. The memory-hard derivation runs on the blocking
//! pool; once started it always runs to completion, and nothing is cached
//! until the whole key material exists.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeroize::Zeroize;

use tessera_core::{KeyBundle, Vault};
use tessera_crypto::entropy::{ensure_min_entropy, validate_rolls, Seed};
use tessera_crypto::identity::{KeyMaterial, StoredKeyMaterial};
use tessera_crypto::master::derive_master_key;

use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, Result};

/// Vault key holding the serialized key material
pub const IDENTITY_VAULT_KEY: &str = "identity";

/// Identity & Pre-Key Manager
pub struct IdentityManager {
    vault: Arc<dyn Vault>,
    config: ProtocolConfig,
    cached: RwLock<Option<Arc<KeyMaterial>>>,
    /// Serializes read-modify-write cycles on the stored material
    write_lock: Mutex<()>,
}

impl IdentityManager {
    /// Create a manager over the given vault
    pub fn new(vault: Arc<dyn Vault>, config: ProtocolConfig) -> Self {
        Self {
            vault,
            config,
            cached: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Derive key material from die rolls, stamping the signed pre-key
    /// with the current time. Nothing is stored.
    pub async fn generate(&self, rolls: &[u8]) -> Result<KeyMaterial> {
        self.generate_at(rolls, Utc::now().timestamp()).await
    }

    /// Derive key material with a fixed signed pre-key timestamp.
    ///
    /// The same rolls and `issued_at` always produce byte-identical
    /// material.
    #[instrument(skip(self, rolls))]
    pub async fn generate_at(&self, rolls: &[u8], issued_at: i64) -> Result<KeyMaterial> {
        validate_rolls(rolls)?;
        ensure_min_entropy(rolls, self.config.min_entropy_bits)?;

        let mut owned_rolls = rolls.to_vec();
        let params = self.config.master_key;
        let count = self.config.one_time_prekey_count;

        let handle = tokio::task::spawn_blocking(move || {
            let seed = Seed::from_dice_rolls(&owned_rolls);
            owned_rolls.zeroize();
            let master = derive_master_key(&seed?, &params)?;
            KeyMaterial::derive(&master, count, issued_at)
        });

        let material = handle
            .await
            .map_err(|e| ProtocolError::Internal(format!("key derivation task failed: {}", e)))??;

        info!(
            fingerprint = %material.identity().fingerprint(),
            one_time_prekeys = material.one_time_prekeys().len(),
            "Derived identity key material"
        );
        Ok(material)
    }

    /// Persist key material, replacing what is stored
    pub async fn store(&self, material: &KeyMaterial) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store_locked(material).await
    }

    async fn store_locked(&self, material: &KeyMaterial) -> Result<()> {
        let mut json = serde_json::to_string(&material.to_stored())
            .map_err(|e| ProtocolError::Internal(e.to_string()))?;
        let result = self.vault.store_data(IDENTITY_VAULT_KEY, &json).await;
        json.zeroize();
        result?;

        *self.cached.write() = Some(Arc::new(material.clone()));
        debug!("Stored identity key material");
        Ok(())
    }

    /// Load the stored key material, if any
    pub async fn retrieve(&self) -> Result<Option<Arc<KeyMaterial>>> {
        let cached = self.cached.read().clone();
        if cached.is_some() {
            return Ok(cached);
        }

        let Some(mut json) = self.vault.get_data(IDENTITY_VAULT_KEY).await? else {
            return Ok(None);
        };
        let parsed: std::result::Result<StoredKeyMaterial, _> = serde_json::from_str(&json);
        json.zeroize();

        let stored = parsed.map_err(tessera_core::Error::from)?;
        let material = Arc::new(KeyMaterial::from_stored(&stored)?);
        *self.cached.write() = Some(material.clone());
        Ok(Some(material))
    }

    /// Load the stored key material or fail with [`ProtocolError::NoIdentity`]
    pub async fn require(&self) -> Result<Arc<KeyMaterial>> {
        self.retrieve().await?.ok_or(ProtocolError::NoIdentity)
    }

    /// Return the stored identity, deriving and storing one from `rolls`
    /// only if none exists. Never overwrites stored keys.
    #[instrument(skip(self, rolls))]
    pub async fn get_or_create(&self, rolls: &[u8]) -> Result<Arc<KeyMaterial>> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.retrieve().await? {
            debug!("Using existing identity");
            return Ok(existing);
        }

        let material = self.generate(rolls).await?;
        self.store_locked(&material).await?;
        info!("Created new identity");
        self.require().await
    }

    /// The publishable bundle of the stored identity
    pub async fn create_public_bundle(&self) -> Result<KeyBundle> {
        Ok(self.require().await?.public_bundle())
    }

    /// Destroy the private half of a one-time pre-key and persist the rest.
    ///
    /// Returns `false` if the key was already gone.
    pub async fn consume_one_time_prekey(&self, key_id: u32) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let current = self.require().await?;
        if current.one_time_prekey(key_id).is_none() {
            return Ok(false);
        }

        let mut updated = KeyMaterial::clone(&current);
        updated.consume_one_time_prekey(key_id);
        self.store_locked(&updated).await?;

        debug!(key_id, remaining = updated.one_time_prekeys().len(), "Consumed one-time pre-key");
        Ok(true)
    }

    /// Replace the signed pre-key with the next one and return the bundle
    /// to republish. The replaced key keeps answering handshakes already
    /// in flight until the following rotation.
    pub async fn rotate_signed_prekey(&self) -> Result<KeyBundle> {
        self.rotate_signed_prekey_at(Utc::now().timestamp()).await
    }

    /// Rotate with a fixed issue time
    #[instrument(skip(self))]
    pub async fn rotate_signed_prekey_at(&self, issued_at: i64) -> Result<KeyBundle> {
        let _guard = self.write_lock.lock().await;

        let mut updated = KeyMaterial::clone(&*self.require().await?);
        let key_id = updated.rotate_signed_prekey(issued_at)?.key_id();
        self.store_locked(&updated).await?;

        info!(key_id, "Rotated signed pre-key");
        Ok(updated.public_bundle())
    }

    /// Rotate if the signed pre-key is older than the configured maximum
    /// age. Returns the bundle to republish when a rotation happened.
    pub async fn rotate_signed_prekey_if_due(&self) -> Result<Option<KeyBundle>> {
        let now = Utc::now().timestamp();
        let issued_at = self.require().await?.signed_prekey().timestamp();
        let max_age = i64::try_from(self.config.signed_prekey_max_age_secs).unwrap_or(i64::MAX);

        if now.saturating_sub(issued_at) < max_age {
            debug!(issued_at, "Signed pre-key not due for rotation");
            return Ok(None);
        }
        self.rotate_signed_prekey_at(now).await.map(Some)
    }

    /// Number of one-time pre-keys not yet consumed
    pub async fn remaining_one_time_prekeys(&self) -> Result<usize> {
        Ok(self.require().await?.one_time_prekeys().len())
    }

    /// Forget the cached copy so the next access reads the vault
    pub fn clear_cache(&self) {
        *self.cached.write() = None;
    }
}
