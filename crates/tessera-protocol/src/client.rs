//! E2EE client - main entry point
//!
//! Wires the identity manager, peer registry, session store and codec over
//! one vault and one peer directory.

use std::sync::Arc;

use tracing::{info, instrument};

use tessera_core::{Envelope, Fingerprint, KeyBundle, PeerDirectory, PeerId, Vault};

use crate::codec::{EnvelopeCodec, OutgoingMessage};
use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, Result};
use crate::identity_manager::IdentityManager;
use crate::peer_registry::{PeerKeyStatus, PeerRegistry};
use crate::session_store::SessionStore;

/// E2EE client
pub struct E2eeClient {
    identity: Arc<IdentityManager>,
    registry: Arc<PeerRegistry>,
    sessions: Arc<SessionStore>,
    codec: EnvelopeCodec,
}

impl E2eeClient {
    /// Create a client. Fails if the configuration is invalid.
    pub fn new(
        config: ProtocolConfig,
        vault: Arc<dyn Vault>,
        directory: Arc<dyn PeerDirectory>,
    ) -> Result<Self> {
        config.validate().map_err(ProtocolError::Configuration)?;

        let identity = Arc::new(IdentityManager::new(vault.clone(), config.clone()));
        let sessions = Arc::new(SessionStore::new(vault.clone()));
        let registry = Arc::new(PeerRegistry::new(
            vault,
            directory.clone(),
            sessions.clone(),
            config.directory_timeout(),
        ));
        let codec = EnvelopeCodec::new(
            identity.clone(),
            registry.clone(),
            sessions.clone(),
            directory,
            config,
        );

        Ok(Self {
            identity,
            registry,
            sessions,
            codec,
        })
    }

    /// Load the stored identity or create one from die rolls, and return
    /// the bundle to publish
    #[instrument(skip(self, rolls))]
    pub async fn initialize(&self, rolls: &[u8]) -> Result<KeyBundle> {
        let material = self.identity.get_or_create(rolls).await?;
        info!(fingerprint = %material.identity().fingerprint(), "Client initialized");
        Ok(material.public_bundle())
    }

    /// The bundle to publish
    pub async fn public_bundle(&self) -> Result<KeyBundle> {
        self.identity.create_public_bundle().await
    }

    /// Rotate the signed pre-key; publish the returned bundle
    pub async fn rotate_signed_prekey(&self) -> Result<KeyBundle> {
        self.identity.rotate_signed_prekey().await
    }

    /// Our identity fingerprint
    pub async fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(self.identity.require().await?.identity().fingerprint())
    }

    /// Encrypt a message for a peer
    pub async fn encrypt(&self, peer: &PeerId, plaintext: &[u8]) -> Result<OutgoingMessage> {
        self.codec.encrypt(peer, plaintext).await
    }

    /// Decrypt a message from a peer
    pub async fn decrypt(&self, peer: &PeerId, envelope: &Envelope) -> Result<Vec<u8>> {
        self.codec.decrypt(peer, envelope).await
    }

    /// Read back a message we sent
    pub async fn decrypt_sender_copy(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.codec.decrypt_sender_copy(envelope).await
    }

    /// Confirm a peer's identity key against the directory
    pub async fn ensure_peer_key(&self, peer: &PeerId) -> Result<PeerKeyStatus> {
        self.registry.ensure_peer_key(peer).await
    }

    /// Drop the session with a peer; the next message re-handshakes
    #[instrument(skip(self, peer), fields(peer = %peer))]
    pub async fn reset_session(&self, peer: &PeerId) -> Result<()> {
        self.sessions.delete(peer).await?;
        info!("Session reset");
        Ok(())
    }

    /// Delete every session and forget the cached identity. Stored key
    /// material is kept.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let count = self.sessions.delete_all().await?;
        self.identity.clear_cache();
        info!(sessions = count, "Logged out");
        Ok(())
    }

    /// Identity manager
    pub fn identity(&self) -> &IdentityManager {
        &self.identity
    }

    /// Peer registry
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Session store
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}
