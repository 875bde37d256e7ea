//! Protocol configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_crypto::identity::{DEFAULT_ONE_TIME_PREKEYS, MIN_ONE_TIME_PREKEYS};
use tessera_crypto::master::MasterKeyParams;
use tessera_crypto::ratchet::DEFAULT_MAX_SKIPPED_KEYS;
use tessera_crypto::MAX_MESSAGE_SIZE;

/// How outgoing messages are encrypted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Double Ratchet sessions, stateless only as a fallback
    #[default]
    Ratchet,
    /// Always use the stateless box
    Stateless,
}

/// Protocol configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Argon2id cost parameters
    pub master_key: MasterKeyParams,
    /// Allow master key parameters below the production floor (tests only)
    pub allow_weak_master_params: bool,
    /// Number of one-time pre-keys derived per identity
    pub one_time_prekey_count: u32,
    /// Minimum estimated entropy of the die rolls, in bits
    pub min_entropy_bits: u32,
    /// Bound on cached skipped message keys per session
    pub max_skipped_keys: usize,
    /// Maximum plaintext size
    pub max_message_size: usize,
    /// Per-call peer directory timeout (milliseconds)
    pub directory_timeout_ms: u64,
    /// Outgoing encryption mode
    pub encryption_mode: EncryptionMode,
    /// Age after which the signed pre-key is due for rotation (seconds)
    pub signed_prekey_max_age_secs: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            master_key: MasterKeyParams::default(),
            allow_weak_master_params: false,
            one_time_prekey_count: DEFAULT_ONE_TIME_PREKEYS,
            min_entropy_bits: 128,
            max_skipped_keys: DEFAULT_MAX_SKIPPED_KEYS,
            max_message_size: MAX_MESSAGE_SIZE,
            directory_timeout_ms: 5_000,
            encryption_mode: EncryptionMode::Ratchet,
            signed_prekey_max_age_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl ProtocolConfig {
    /// Cheap Argon2 parameters and a short directory timeout, for tests
    pub fn insecure_for_tests() -> Self {
        Self {
            master_key: MasterKeyParams::insecure_for_tests(),
            allow_weak_master_params: true,
            directory_timeout_ms: 500,
            ..Default::default()
        }
    }

    /// Directory timeout as a [`Duration`]
    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.allow_weak_master_params {
            self.master_key.validate().map_err(|e| e.to_string())?;
        }
        if self.one_time_prekey_count < MIN_ONE_TIME_PREKEYS {
            return Err(format!(
                "one_time_prekey_count must be at least {}",
                MIN_ONE_TIME_PREKEYS
            ));
        }
        if self.min_entropy_bits < 128 {
            return Err("min_entropy_bits must be at least 128".to_string());
        }
        if self.max_skipped_keys == 0 {
            return Err("max_skipped_keys must be greater than 0".to_string());
        }
        if self.max_message_size == 0 || self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(format!(
                "max_message_size must be between 1 and {}",
                MAX_MESSAGE_SIZE
            ));
        }
        if self.directory_timeout_ms == 0 {
            return Err("directory_timeout_ms must be greater than 0".to_string());
        }
        if self.signed_prekey_max_age_secs == 0 {
            return Err("signed_prekey_max_age_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}
