//! Collaborator contracts
//!
//! The core never persists or fetches anything itself. It talks to an
//! opaque key-value [`Vault`] and an opaque [`PeerDirectory`]; the
//! [`memory`] module carries reference implementations for tests and
//! embedding.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::PeerId;
use crate::wire::KeyBundle;

/// Key-value storage for local secrets and session state
#[async_trait]
pub trait Vault: Send + Sync {
    /// Store a value, replacing any previous one
    async fn store_data(&self, key: &str, value: &str) -> Result<()>;

    /// Get a value
    async fn get_data(&self, key: &str) -> Result<Option<String>>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn delete_data(&self, key: &str) -> Result<()>;
}

/// Directory of published key bundles
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// Fetch a peer's current bundle. `Ok(None)` means the peer is unknown;
    /// unreachability is reported as [`crate::Error::DirectoryUnavailable`].
    async fn get_key_bundle(&self, peer: &PeerId) -> Result<Option<KeyBundle>>;

    /// Tell the directory a one-time pre-key has been used
    async fn mark_one_time_prekey_used(&self, peer: &PeerId, key_id: u32) -> Result<()>;
}

/// In-memory implementations
pub mod memory {
    use super::*;
    use crate::error::Error;
    use parking_lot::RwLock;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// In-memory vault
    #[derive(Default)]
    pub struct MemoryVault {
        data: RwLock<HashMap<String, String>>,
        failing: AtomicBool,
    }

    impl MemoryVault {
        /// Create an empty vault
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every operation fail, simulating a broken backend
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Whether a key is present
        pub fn contains_key(&self, key: &str) -> bool {
            self.data.read().contains_key(key)
        }

        /// Number of stored entries
        pub fn len(&self) -> usize {
            self.data.read().len()
        }

        /// Whether the vault is empty
        pub fn is_empty(&self) -> bool {
            self.data.read().is_empty()
        }

        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Vault("vault offline".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Vault for MemoryVault {
        async fn store_data(&self, key: &str, value: &str) -> Result<()> {
            self.check()?;
            self.data.write().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get_data(&self, key: &str) -> Result<Option<String>> {
            self.check()?;
            Ok(self.data.read().get(key).cloned())
        }

        async fn delete_data(&self, key: &str) -> Result<()> {
            self.check()?;
            self.data.write().remove(key);
            Ok(())
        }
    }

    /// In-memory peer directory
    #[derive(Default)]
    pub struct MemoryDirectory {
        bundles: RwLock<HashMap<PeerId, KeyBundle>>,
        used_one_time_prekeys: RwLock<HashMap<PeerId, Vec<u32>>>,
        offline: AtomicBool,
        latency: RwLock<Option<Duration>>,
    }

    impl MemoryDirectory {
        /// Create an empty directory
        pub fn new() -> Self {
            Self::default()
        }

        /// Publish or replace a peer's bundle
        pub fn publish(&self, peer: PeerId, bundle: KeyBundle) {
            self.bundles.write().insert(peer, bundle);
        }

        /// Remove a peer
        pub fn remove(&self, peer: &PeerId) {
            self.bundles.write().remove(peer);
        }

        /// Simulate an outage
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        /// Delay every response
        pub fn set_latency(&self, latency: Option<Duration>) {
            *self.latency.write() = latency;
        }

        /// One-time pre-key IDs reported as used for a peer
        pub fn used_one_time_prekeys(&self, peer: &PeerId) -> Vec<u32> {
            self.used_one_time_prekeys
                .read()
                .get(peer)
                .cloned()
                .unwrap_or_default()
        }

        async fn simulate_network(&self) -> Result<()> {
            let latency = *self.latency.read();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::DirectoryUnavailable("directory offline".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PeerDirectory for MemoryDirectory {
        async fn get_key_bundle(&self, peer: &PeerId) -> Result<Option<KeyBundle>> {
            self.simulate_network().await?;
            Ok(self.bundles.read().get(peer).cloned())
        }

        async fn mark_one_time_prekey_used(&self, peer: &PeerId, key_id: u32) -> Result<()> {
            self.simulate_network().await?;

            if let Some(bundle) = self.bundles.write().get_mut(peer) {
                bundle.one_time_pre_keys.retain(|k| k.key_id != key_id);
            }
            self.used_one_time_prekeys
                .write()
                .entry(peer.clone())
                .or_default()
                .push(key_id);
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tessera_crypto::identity::KeyMaterial;
        use tessera_crypto::master::MasterKey;

        fn bundle() -> KeyBundle {
            KeyMaterial::derive(&MasterKey::from_bytes([3; 32]), 50, 0)
                .unwrap()
                .public_bundle()
        }

        #[tokio::test]
        async fn test_vault_roundtrip() {
            let vault = MemoryVault::new();
            vault.store_data("k", "v1").await.unwrap();
            vault.store_data("k", "v2").await.unwrap();
            assert_eq!(vault.get_data("k").await.unwrap().as_deref(), Some("v2"));

            vault.delete_data("k").await.unwrap();
            vault.delete_data("k").await.unwrap();
            assert!(vault.get_data("k").await.unwrap().is_none());
            assert!(vault.is_empty());
        }

        #[tokio::test]
        async fn test_vault_failure() {
            let vault = MemoryVault::new();
            vault.set_failing(true);
            assert!(matches!(
                vault.store_data("k", "v").await,
                Err(Error::Vault(_))
            ));
        }

        #[tokio::test]
        async fn test_directory_publish_and_fetch() {
            let directory = MemoryDirectory::new();
            let bob = PeerId::from("bob");
            assert!(directory.get_key_bundle(&bob).await.unwrap().is_none());

            directory.publish(bob.clone(), bundle());
            let fetched = directory.get_key_bundle(&bob).await.unwrap().unwrap();
            assert_eq!(fetched.one_time_pre_keys.len(), 50);
        }

        #[tokio::test]
        async fn test_directory_marks_prekey_used() {
            let directory = MemoryDirectory::new();
            let bob = PeerId::from("bob");
            directory.publish(bob.clone(), bundle());

            directory.mark_one_time_prekey_used(&bob, 1).await.unwrap();

            let fetched = directory.get_key_bundle(&bob).await.unwrap().unwrap();
            assert_eq!(fetched.one_time_pre_keys.len(), 49);
            assert_eq!(fetched.one_time_pre_keys[0].key_id, 2);
            assert_eq!(directory.used_one_time_prekeys(&bob), vec![1]);
        }

        #[tokio::test]
        async fn test_directory_outage() {
            let directory = MemoryDirectory::new();
            directory.set_offline(true);
            assert!(matches!(
                directory.get_key_bundle(&PeerId::from("bob")).await,
                Err(Error::DirectoryUnavailable(_))
            ));
        }
    }
}
