//! Peer Key Registry
//!
//! Keeps one [`PeerKeyRecord`] per peer and is the only code that writes
//! them. Every call re-checks the directory; a changed fingerprint, or a
//! cached record that no longer hashes to its own fingerprint, discards the
//! peer's session before the new key is trusted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use tessera_core::{Fingerprint, KeyBundle, PeerDirectory, PeerId, PeerKeyRecord, Vault};

use crate::error::{ProtocolError, Result};
use crate::session_store::SessionStore;

const PEER_KEY_PREFIX: &str = "peer:";

fn peer_key(peer: &PeerId) -> String {
    format!("{}{}", PEER_KEY_PREFIX, peer)
}

/// Security-relevant change to a peer's identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SecurityEvent {
    /// The directory now advertises a different identity key
    #[serde(rename_all = "camelCase")]
    KeyChanged {
        /// The peer
        peer: PeerId,
        /// Previously trusted fingerprint
        old_fingerprint: Fingerprint,
        /// Newly advertised fingerprint
        new_fingerprint: Fingerprint,
    },
    /// The local record was unreadable or inconsistent and was replaced
    #[serde(rename_all = "camelCase")]
    LocalRecordRepaired {
        /// The peer
        peer: PeerId,
        /// Newly advertised fingerprint
        new_fingerprint: Fingerprint,
    },
}

/// How fresh the returned record is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Confirmed against the directory during this call
    Verified,
    /// Directory unreachable; served from cache
    UnverifiedThisRound,
}

/// Result of [`PeerRegistry::ensure_peer_key`]
#[derive(Clone, Debug)]
pub struct PeerKeyStatus {
    /// The record now cached for the peer
    pub record: PeerKeyRecord,
    /// Bundle fetched this round, if the directory answered
    pub bundle: Option<KeyBundle>,
    /// Freshness of `record`
    pub verification: Verification,
    /// Set when the key changed or the local record was repaired
    pub security_event: Option<SecurityEvent>,
}

impl PeerKeyStatus {
    /// Whether the key was confirmed this round
    pub fn is_verified(&self) -> bool {
        self.verification == Verification::Verified
    }
}

enum Fetch {
    Bundle(KeyBundle),
    Missing,
    Unreachable(String),
}

/// Peer Key Registry
pub struct PeerRegistry {
    vault: Arc<dyn Vault>,
    directory: Arc<dyn PeerDirectory>,
    sessions: Arc<SessionStore>,
    timeout: Duration,
}

impl PeerRegistry {
    /// Create a registry
    pub fn new(
        vault: Arc<dyn Vault>,
        directory: Arc<dyn PeerDirectory>,
        sessions: Arc<SessionStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            vault,
            directory,
            sessions,
            timeout,
        }
    }

    /// Confirm the peer's identity key against the directory.
    ///
    /// Must not be called while holding the peer's session guard: a key
    /// change deletes the session under that guard.
    #[instrument(skip(self, peer), fields(peer = %peer))]
    pub async fn ensure_peer_key(&self, peer: &PeerId) -> Result<PeerKeyStatus> {
        let bundle = match self.fetch(peer).await? {
            Fetch::Bundle(bundle) => bundle,
            Fetch::Missing => return Err(ProtocolError::PeerNotFound(peer.clone())),
            Fetch::Unreachable(reason) => return self.degrade(peer, reason).await,
        };

        bundle
            .verify_fingerprint()
            .map_err(|e| ProtocolError::InvalidBundle {
                peer: peer.clone(),
                reason: e.to_string(),
            })?;

        let now = Utc::now();
        let fresh = PeerKeyRecord::new(peer.clone(), bundle.identity_key, now);

        let security_event = match self.load_record(peer).await {
            Ok(None) => {
                info!(fingerprint = %fresh.cached_fingerprint, "First key seen for peer");
                None
            }
            Ok(Some(cached)) if cached.cached_fingerprint != bundle.fingerprint => {
                Some(SecurityEvent::KeyChanged {
                    peer: peer.clone(),
                    old_fingerprint: cached.cached_fingerprint,
                    new_fingerprint: bundle.fingerprint.clone(),
                })
            }
            Ok(Some(cached)) if !cached.is_consistent() => {
                Some(SecurityEvent::LocalRecordRepaired {
                    peer: peer.clone(),
                    new_fingerprint: bundle.fingerprint.clone(),
                })
            }
            Ok(Some(_)) => {
                debug!("Peer key unchanged");
                None
            }
            Err(e) => {
                warn!(error = %e, "Cached peer record unreadable");
                Some(SecurityEvent::LocalRecordRepaired {
                    peer: peer.clone(),
                    new_fingerprint: bundle.fingerprint.clone(),
                })
            }
        };

        if let Some(event) = &security_event {
            self.sessions.delete(peer).await?;
            warn!(
                target: "tessera::security",
                event = ?event,
                "Peer identity changed; session discarded"
            );
        }

        self.store_record(&fresh).await?;

        Ok(PeerKeyStatus {
            record: fresh,
            bundle: Some(bundle),
            verification: Verification::Verified,
            security_event,
        })
    }

    /// The cached record for a peer, without contacting the directory
    pub async fn cached_record(&self, peer: &PeerId) -> Result<Option<PeerKeyRecord>> {
        self.load_record(peer).await
    }

    /// Drop the cached record and the session for a peer
    pub async fn forget_peer(&self, peer: &PeerId) -> Result<()> {
        self.sessions.delete(peer).await?;
        self.vault.delete_data(&peer_key(peer)).await?;
        info!(peer = %peer, "Forgot peer");
        Ok(())
    }

    async fn fetch(&self, peer: &PeerId) -> Result<Fetch> {
        match tokio::time::timeout(self.timeout, self.directory.get_key_bundle(peer)).await {
            Err(_) => Ok(Fetch::Unreachable(format!(
                "timed out after {:?}",
                self.timeout
            ))),
            Ok(Err(tessera_core::Error::DirectoryUnavailable(reason))) => {
                Ok(Fetch::Unreachable(reason))
            }
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(Some(bundle))) => Ok(Fetch::Bundle(bundle)),
            Ok(Ok(None)) => Ok(Fetch::Missing),
        }
    }

    async fn degrade(&self, peer: &PeerId, reason: String) -> Result<PeerKeyStatus> {
        match self.load_record(peer).await {
            Ok(Some(record)) if record.is_consistent() => {
                warn!(%reason, "Directory unreachable; using cached peer key");
                Ok(PeerKeyStatus {
                    record,
                    bundle: None,
                    verification: Verification::UnverifiedThisRound,
                    security_event: None,
                })
            }
            _ => Err(ProtocolError::DirectoryUnavailable {
                peer: peer.clone(),
                reason,
            }),
        }
    }

    async fn load_record(&self, peer: &PeerId) -> Result<Option<PeerKeyRecord>> {
        match self.vault.get_data(&peer_key(peer)).await? {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).map_err(tessera_core::Error::from)?,
            )),
            None => Ok(None),
        }
    }

    async fn store_record(&self, record: &PeerKeyRecord) -> Result<()> {
        let json = serde_json::to_string(record).map_err(tessera_core::Error::from)?;
        self.vault.store_data(&peer_key(&record.peer_id), &json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{MemoryDirectory, MemoryVault};
    use tessera_crypto::identity::KeyMaterial;
    use tessera_crypto::keys::PublicKeyBytes;
    use tessera_crypto::master::MasterKey;
    use tessera_crypto::x3dh::X3DHKeyAgreement;
    use tessera_crypto::ratchet::RatchetState;

    struct Fixture {
        vault: Arc<MemoryVault>,
        directory: Arc<MemoryDirectory>,
        sessions: Arc<SessionStore>,
        registry: PeerRegistry,
    }

    fn fixture() -> Fixture {
        let vault = Arc::new(MemoryVault::new());
        let directory = Arc::new(MemoryDirectory::new());
        let sessions = Arc::new(SessionStore::new(vault.clone()));
        let registry = PeerRegistry::new(
            vault.clone(),
            directory.clone(),
            sessions.clone(),
            Duration::from_millis(100),
        );
        Fixture {
            vault,
            directory,
            sessions,
            registry,
        }
    }

    fn bundle(byte: u8) -> KeyBundle {
        KeyMaterial::derive(&MasterKey::from_bytes([byte; 32]), 50, 0)
            .unwrap()
            .public_bundle()
    }

    async fn seed_session(sessions: &SessionStore, peer: &PeerId) {
        let alice = KeyMaterial::derive(&MasterKey::from_bytes([9; 32]), 50, 0).unwrap();
        let init = X3DHKeyAgreement::initiate(alice.identity(), &bundle(1)).unwrap();
        let state =
            RatchetState::init_initiator(&init.shared, init.header, init.remote_ratchet_key, 1000)
                .unwrap();
        sessions.lock(peer).await.save(&state).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_contact_caches_record() {
        let f = fixture();
        let bob = PeerId::from("bob");
        f.directory.publish(bob.clone(), bundle(1));

        let status = f.registry.ensure_peer_key(&bob).await.unwrap();
        assert!(status.is_verified());
        assert!(status.security_event.is_none());
        assert!(status.bundle.is_some());

        let cached = f.registry.cached_record(&bob).await.unwrap().unwrap();
        assert_eq!(cached.cached_fingerprint, bundle(1).fingerprint);
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let f = fixture();
        let err = f.registry.ensure_peer_key(&PeerId::from("nobody")).await.unwrap_err();
        assert!(matches!(err, ProtocolError::PeerNotFound(_)));
    }

    #[tokio::test]
    async fn test_inconsistent_bundle_rejected() {
        let f = fixture();
        let bob = PeerId::from("bob");
        let mut forged = bundle(1);
        forged.identity_key = PublicKeyBytes::from([0x77; 32]);
        f.directory.publish(bob.clone(), forged);

        let err = f.registry.ensure_peer_key(&bob).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Authentication);
        assert!(f.registry.cached_record(&bob).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_key_change_discards_session() {
        let f = fixture();
        let bob = PeerId::from("bob");
        f.directory.publish(bob.clone(), bundle(1));
        f.registry.ensure_peer_key(&bob).await.unwrap();
        seed_session(&f.sessions, &bob).await;

        f.directory.publish(bob.clone(), bundle(2));
        let status = f.registry.ensure_peer_key(&bob).await.unwrap();

        assert!(matches!(
            status.security_event,
            Some(SecurityEvent::KeyChanged { .. })
        ));
        assert!(!f.sessions.exists(&bob).await.unwrap());
        assert_eq!(status.record.cached_fingerprint, bundle(2).fingerprint);
    }

    #[tokio::test]
    async fn test_corrupted_record_is_repaired() {
        let f = fixture();
        let bob = PeerId::from("bob");
        f.directory.publish(bob.clone(), bundle(1));
        f.registry.ensure_peer_key(&bob).await.unwrap();
        seed_session(&f.sessions, &bob).await;

        // Same fingerprint string, different key bytes
        let mut record = f.registry.cached_record(&bob).await.unwrap().unwrap();
        record.cached_public_key = PublicKeyBytes::from([0x55; 32]);
        f.vault
            .store_data("peer:bob", &serde_json::to_string(&record).unwrap())
            .await
            .unwrap();

        let status = f.registry.ensure_peer_key(&bob).await.unwrap();
        assert!(matches!(
            status.security_event,
            Some(SecurityEvent::LocalRecordRepaired { .. })
        ));
        assert!(!f.sessions.exists(&bob).await.unwrap());
        assert!(f.registry.cached_record(&bob).await.unwrap().unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_unparseable_record_is_repaired() {
        let f = fixture();
        let bob = PeerId::from("bob");
        f.directory.publish(bob.clone(), bundle(1));
        f.vault.store_data("peer:bob", "garbage").await.unwrap();

        let status = f.registry.ensure_peer_key(&bob).await.unwrap();
        assert!(matches!(
            status.security_event,
            Some(SecurityEvent::LocalRecordRepaired { .. })
        ));
    }

    #[tokio::test]
    async fn test_outage_with_cache_degrades() {
        let f = fixture();
        let bob = PeerId::from("bob");
        f.directory.publish(bob.clone(), bundle(1));
        f.registry.ensure_peer_key(&bob).await.unwrap();

        f.directory.set_offline(true);
        let status = f.registry.ensure_peer_key(&bob).await.unwrap();
        assert_eq!(status.verification, Verification::UnverifiedThisRound);
        assert!(status.bundle.is_none());
    }

    #[tokio::test]
    async fn test_outage_without_cache_fails() {
        let f = fixture();
        f.directory.set_offline(true);

        let err = f.registry.ensure_peer_key(&PeerId::from("bob")).await.unwrap_err();
        assert!(matches!(err, ProtocolError::DirectoryUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_outage() {
        let f = fixture();
        let bob = PeerId::from("bob");
        f.directory.publish(bob.clone(), bundle(1));
        f.registry.ensure_peer_key(&bob).await.unwrap();

        f.directory.set_latency(Some(Duration::from_secs(5)));
        let status = f.registry.ensure_peer_key(&bob).await.unwrap();
        assert_eq!(status.verification, Verification::UnverifiedThisRound);
    }

    #[tokio::test]
    async fn test_forget_peer() {
        let f = fixture();
        let bob = PeerId::from("bob");
        f.directory.publish(bob.clone(), bundle(1));
        f.registry.ensure_peer_key(&bob).await.unwrap();
        seed_session(&f.sessions, &bob).await;

        f.registry.forget_peer(&bob).await.unwrap();
        assert!(f.registry.cached_record(&bob).await.unwrap().is_none());
        assert!(!f.sessions.exists(&bob).await.unwrap());
    }
}
