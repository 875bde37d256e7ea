//! Hybrid Envelope Codec
//!
//! Builds and opens [`Envelope`]s. Outgoing messages use the peer's ratchet
//! session when one exists, establish one when the directory supplied a
//! fresh bundle, and fall back to the stateless box otherwise. Every
//! envelope carries a stateless sender copy sealed to the local identity.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use tessera_core::{
    EncryptedPayload, Envelope, PeerDirectory, PeerId, RatchetPayload, StatelessPayload,
    ENVELOPE_VERSION,
};
use tessera_crypto::identity::KeyMaterial;
use tessera_crypto::keys::PublicKeyBytes;
use tessera_crypto::ratchet::{RatchetMessage, RatchetState};
use tessera_crypto::stateless;
use tessera_crypto::x3dh::{HandshakeHeader, X3DHKeyAgreement};
use tessera_crypto::CryptoError;

use crate::config::{EncryptionMode, ProtocolConfig};
use crate::error::{ProtocolError, Result};
use crate::identity_manager::IdentityManager;
use crate::peer_registry::{PeerKeyStatus, PeerRegistry, SecurityEvent, Verification};
use crate::session_store::{SessionGuard, SessionStore};

/// An envelope ready to send, with what was learned about the peer
#[derive(Clone, Debug)]
pub struct OutgoingMessage {
    /// The envelope
    pub envelope: Envelope,
    /// Whether the peer key was confirmed against the directory
    pub verification: Verification,
    /// Key change or repair detected while encrypting
    pub security_event: Option<SecurityEvent>,
}

/// Hybrid Envelope Codec
pub struct EnvelopeCodec {
    identity: Arc<IdentityManager>,
    registry: Arc<PeerRegistry>,
    sessions: Arc<SessionStore>,
    directory: Arc<dyn PeerDirectory>,
    config: ProtocolConfig,
}

impl EnvelopeCodec {
    /// Create a codec
    pub fn new(
        identity: Arc<IdentityManager>,
        registry: Arc<PeerRegistry>,
        sessions: Arc<SessionStore>,
        directory: Arc<dyn PeerDirectory>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            identity,
            registry,
            sessions,
            directory,
            config,
        }
    }

    /// Encrypt a message for a peer
    #[instrument(skip(self, peer, plaintext), fields(peer = %peer, len = plaintext.len()))]
    pub async fn encrypt(&self, peer: &PeerId, plaintext: &[u8]) -> Result<OutgoingMessage> {
        if plaintext.len() > self.config.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: plaintext.len(),
                max: self.config.max_message_size,
            });
        }

        let material = self.identity.require().await?;

        // Before taking the session guard: a key change deletes the session
        let status = self.registry.ensure_peer_key(peer).await?;

        let encrypted = match self.config.encryption_mode {
            EncryptionMode::Stateless => {
                self.seal_stateless(&material, &status.record.cached_public_key, plaintext)?
            }
            EncryptionMode::Ratchet => {
                self.encrypt_ratchet(peer, &material, &status, plaintext)
                    .await?
            }
        };

        let own_key = material.identity().public_key();
        let sender_copy = self.seal_stateless(&material, &own_key, plaintext)?;

        debug!(format = encrypted.format_name(), "Encrypted message");
        Ok(OutgoingMessage {
            envelope: Envelope::new(encrypted, Some(sender_copy)),
            verification: status.verification,
            security_event: status.security_event,
        })
    }

    /// Decrypt an envelope received from a peer
    #[instrument(skip(self, peer, envelope), fields(peer = %peer, format = envelope.encrypted.format_name()))]
    pub async fn decrypt(&self, peer: &PeerId, envelope: &Envelope) -> Result<Vec<u8>> {
        check_version(envelope)?;

        match &envelope.encrypted {
            EncryptedPayload::Stateless(payload) => self.decrypt_stateless(peer, payload).await,
            EncryptedPayload::Ratchet(payload) => match &payload.handshake {
                Some(handshake) => self.decrypt_handshake(peer, handshake, payload).await,
                None => self.decrypt_ratchet(peer, payload).await,
            },
            EncryptedPayload::Unknown => Err(ProtocolError::UnsupportedFormat(
                EncryptedPayload::Unknown.format_name().to_string(),
            )),
        }
    }

    /// Decrypt the sender copy of an envelope this identity produced
    pub async fn decrypt_sender_copy(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        check_version(envelope)?;

        let copy = envelope
            .sender_copy
            .as_ref()
            .ok_or(ProtocolError::MissingSenderCopy)?;

        let EncryptedPayload::Stateless(payload) = copy else {
            return Err(ProtocolError::UnsupportedFormat(
                copy.format_name().to_string(),
            ));
        };

        let material = self.identity.require().await?;
        let own_key = material.identity().public_key();
        Ok(stateless::open(
            material.identity(),
            &own_key,
            &payload.nonce,
            &payload.ciphertext,
        )?)
    }

    fn seal_stateless(
        &self,
        material: &KeyMaterial,
        recipient: &PublicKeyBytes,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload> {
        let sealed = stateless::seal(
            material.identity(),
            recipient,
            plaintext,
            self.config.max_message_size,
        )?;
        Ok(EncryptedPayload::Stateless(StatelessPayload {
            nonce: sealed.nonce.to_vec(),
            ciphertext: sealed.ciphertext,
        }))
    }

    async fn encrypt_ratchet(
        &self,
        peer: &PeerId,
        material: &KeyMaterial,
        status: &PeerKeyStatus,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload> {
        let guard = self.sessions.lock(peer).await;

        if let Some(mut state) = load_or_discard(&guard).await?.filter(RatchetState::can_send) {
            let message = state.encrypt(plaintext, self.config.max_message_size)?;
            let handshake = state.pending_handshake().cloned();
            guard.save(&state).await?;
            return Ok(EncryptedPayload::Ratchet(RatchetPayload::from_message(
                message, handshake,
            )));
        }

        let Some(bundle) = &status.bundle else {
            warn!("No fresh bundle for handshake; falling back to stateless box");
            return self.seal_stateless(material, &status.record.cached_public_key, plaintext);
        };

        let initiated = X3DHKeyAgreement::initiate(material.identity(), bundle)?;
        let one_time_pre_key_id = initiated.header.one_time_pre_key_id;

        let mut state = RatchetState::init_initiator(
            &initiated.shared,
            initiated.header,
            initiated.remote_ratchet_key,
            self.config.max_skipped_keys,
        )?;
        let message = state.encrypt(plaintext, self.config.max_message_size)?;
        let handshake = state.pending_handshake().cloned();
        guard.save(&state).await?;
        drop(guard);

        info!(?one_time_pre_key_id, "Established session");

        if let Some(key_id) = one_time_pre_key_id {
            self.report_used_prekey(peer, key_id).await;
        }

        Ok(EncryptedPayload::Ratchet(RatchetPayload::from_message(
            message, handshake,
        )))
    }

    async fn report_used_prekey(&self, peer: &PeerId, key_id: u32) {
        let timeout = self.directory_timeout();
        match tokio::time::timeout(
            timeout,
            self.directory.mark_one_time_prekey_used(peer, key_id),
        )
        .await
        {
            Ok(Ok(())) => debug!(key_id, "Reported one-time pre-key as used"),
            Ok(Err(e)) => warn!(key_id, error = %e, "Failed to report used one-time pre-key"),
            Err(_) => warn!(key_id, "Timed out reporting used one-time pre-key"),
        }
    }

    async fn decrypt_stateless(&self, peer: &PeerId, payload: &StatelessPayload) -> Result<Vec<u8>> {
        let material = self.identity.require().await?;
        let status = self.registry.ensure_peer_key(peer).await?;

        Ok(stateless::open(
            material.identity(),
            &status.record.cached_public_key,
            &payload.nonce,
            &payload.ciphertext,
        )?)
    }

    async fn decrypt_handshake(
        &self,
        peer: &PeerId,
        handshake: &HandshakeHeader,
        payload: &RatchetPayload,
    ) -> Result<Vec<u8>> {
        let message = payload.to_message()?;
        let material = self.identity.require().await?;

        let status = self.registry.ensure_peer_key(peer).await?;
        if handshake.identity_key != status.record.cached_public_key {
            warn!(
                target: "tessera::security",
                peer = %peer,
                "Handshake identity does not match the peer's key"
            );
            return Err(ProtocolError::IdentityMismatch(peer.clone()));
        }

        let guard = self.sessions.lock(peer).await;

        if let Some(mut state) = load_or_discard(&guard).await? {
            // Later messages of a session we already accepted
            if state.origin_ephemeral() == Some(&handshake.ephemeral_key) {
                let plaintext = state.decrypt(&message).map_err(|e| stale(peer, e))?;
                guard.save(&state).await?;
                return Ok(plaintext);
            }

            // Both sides initiated: the lower handshake wins on both ends
            if let Some(ours) = state.pending_handshake() {
                if !outranks(handshake, ours) {
                    info!(peer = %peer, "Simultaneous handshake; keeping ours");
                    return Err(ProtocolError::StaleSession {
                        peer: peer.clone(),
                        reason: "simultaneous handshake lost the tie-break".to_string(),
                    });
                }
                info!(peer = %peer, "Simultaneous handshake; yielding to the peer's");
            }
        }

        if guard.handshake_seen(&handshake.ephemeral_key).await? {
            warn!(target: "tessera::security", peer = %peer, "Handshake replay");
            return Err(ProtocolError::HandshakeReplay {
                peer: peer.clone(),
                reason: "handshake already accepted".to_string(),
            });
        }

        let shared = X3DHKeyAgreement::respond(&material, handshake).map_err(|e| match e {
            CryptoError::OneTimePreKeyUnavailable(id) => {
                warn!(target: "tessera::security", peer = %peer, key_id = id, "Handshake replay");
                ProtocolError::HandshakeReplay {
                    peer: peer.clone(),
                    reason: format!("one-time pre-key {} already consumed", id),
                }
            }
            other => stale(peer, other),
        })?;
        let signed_prekey = material
            .signed_prekey_by_id(handshake.signed_pre_key_id)
            .ok_or_else(|| stale(peer, CryptoError::SignedPreKeyNotFound(handshake.signed_pre_key_id)))?;

        let mut state = RatchetState::init_responder(
            &shared,
            signed_prekey.keypair(),
            handshake.ephemeral_key,
            self.config.max_skipped_keys,
        );
        let plaintext = state.decrypt(&message)?;

        if let Some(key_id) = handshake.one_time_pre_key_id {
            if !self.identity.consume_one_time_prekey(key_id).await? {
                return Err(ProtocolError::HandshakeReplay {
                    peer: peer.clone(),
                    reason: format!("one-time pre-key {} consumed concurrently", key_id),
                });
            }
        }

        guard.remember_handshake(handshake.ephemeral_key).await?;
        guard.save(&state).await?;
        info!(
            peer = %peer,
            signed_pre_key_id = handshake.signed_pre_key_id,
            one_time_pre_key_id = ?handshake.one_time_pre_key_id,
            "Accepted session"
        );
        Ok(plaintext)
    }

    async fn decrypt_ratchet(&self, peer: &PeerId, payload: &RatchetPayload) -> Result<Vec<u8>> {
        let message: RatchetMessage = payload.to_message()?;
        let guard = self.sessions.lock(peer).await;

        let Some(mut state) = load_or_discard(&guard).await? else {
            return Err(ProtocolError::StaleSession {
                peer: peer.clone(),
                reason: "no session".to_string(),
            });
        };

        let plaintext = state.decrypt(&message).map_err(|e| stale(peer, e))?;
        guard.save(&state).await?;
        Ok(plaintext)
    }

    fn directory_timeout(&self) -> Duration {
        self.config.directory_timeout()
    }
}

fn check_version(envelope: &Envelope) -> Result<()> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(ProtocolError::UnsupportedVersion(envelope.version.clone()));
    }
    Ok(())
}

/// Load the guarded session, deleting it if it no longer parses
async fn load_or_discard(guard: &SessionGuard<'_>) -> Result<Option<RatchetState>> {
    match guard.load().await {
        Ok(state) => Ok(state),
        Err(ProtocolError::Core(tessera_core::Error::Serialization(reason))) => {
            warn!(peer = %guard.peer(), %reason, "Discarding unreadable session");
            guard.delete().await?;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Whether an incoming handshake beats our own unanswered one.
///
/// Both ends compare the same two headers, so exactly one side yields.
fn outranks(incoming: &HandshakeHeader, ours: &HandshakeHeader) -> bool {
    (incoming.identity_key.as_bytes(), incoming.ephemeral_key.as_bytes())
        < (ours.identity_key.as_bytes(), ours.ephemeral_key.as_bytes())
}

/// Ratchet failures caused by lost or exhausted state
fn stale(peer: &PeerId, err: CryptoError) -> ProtocolError {
    match err {
        CryptoError::MessageGapTooLarge { .. }
        | CryptoError::MessageKeyUnavailable { .. }
        | CryptoError::RatchetCorrupted(_)
        | CryptoError::SignedPreKeyNotFound(_) => ProtocolError::StaleSession {
            peer: peer.clone(),
            reason: err.to_string(),
        },
        other => other.into(),
    }
}
