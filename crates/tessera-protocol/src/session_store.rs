//! Per-peer ratchet state storage
//!
//! Every load, mutation and write of a peer's [`RatchetState`] happens
//! through a [`SessionGuard`], which holds that peer's lock. Different
//! peers never block each other.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use zeroize::Zeroize;

use tessera_core::{PeerId, Vault};
use tessera_crypto::keys::PublicKeyBytes;
use tessera_crypto::ratchet::RatchetState;

use crate::error::Result;

const SESSION_KEY_PREFIX: &str = "session:";
const SESSION_INDEX_KEY: &str = "session-index";
const HANDSHAKE_KEY_PREFIX: &str = "handshakes:";

/// Accepted handshake ephemerals remembered per peer
const MAX_REMEMBERED_HANDSHAKES: usize = 64;

fn session_key(peer: &PeerId) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, peer)
}

fn handshake_key(peer: &PeerId) -> String {
    format!("{}{}", HANDSHAKE_KEY_PREFIX, peer)
}

/// Ratchet state store with per-peer serialization
pub struct SessionStore {
    vault: Arc<dyn Vault>,
    locks: DashMap<PeerId, Arc<Mutex<()>>>,
    index_lock: Mutex<()>,
}

impl SessionStore {
    /// Create a store over the given vault
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self {
            vault,
            locks: DashMap::new(),
            index_lock: Mutex::new(()),
        }
    }

    /// Acquire exclusive access to a peer's session
    pub async fn lock(&self, peer: &PeerId) -> SessionGuard<'_> {
        let lock = self
            .locks
            .entry(peer.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        SessionGuard {
            store: self,
            peer: peer.clone(),
            lock: lock.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Delete a peer's session, waiting for any operation in flight
    pub async fn delete(&self, peer: &PeerId) -> Result<()> {
        self.lock(peer).await.delete().await
    }

    /// Whether a session exists for the peer
    pub async fn exists(&self, peer: &PeerId) -> Result<bool> {
        Ok(self.lock(peer).await.load().await?.is_some())
    }

    /// Peers with a stored session
    pub async fn peers(&self) -> Result<Vec<PeerId>> {
        let _guard = self.index_lock.lock().await;
        self.read_index().await
    }

    /// Delete every stored session
    pub async fn delete_all(&self) -> Result<usize> {
        let peers = self.peers().await?;
        for peer in &peers {
            self.delete(peer).await?;
        }
        let _guard = self.index_lock.lock().await;
        self.vault.delete_data(SESSION_INDEX_KEY).await?;
        info!(count = peers.len(), "Deleted all sessions");
        Ok(peers.len())
    }

    async fn read_index(&self) -> Result<Vec<PeerId>> {
        match self.vault.get_data(SESSION_INDEX_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json).map_err(tessera_core::Error::from)?),
            None => Ok(Vec::new()),
        }
    }

    async fn update_index(&self, peer: &PeerId, present: bool) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut peers = self.read_index().await?;

        let changed = match (present, peers.iter().position(|p| p == peer)) {
            (true, None) => {
                peers.push(peer.clone());
                true
            }
            (false, Some(pos)) => {
                peers.remove(pos);
                true
            }
            _ => false,
        };

        if changed {
            let json = serde_json::to_string(&peers).map_err(tessera_core::Error::from)?;
            self.vault.store_data(SESSION_INDEX_KEY, &json).await?;
        }
        Ok(())
    }
}

/// Exclusive access to one peer's session
pub struct SessionGuard<'a> {
    store: &'a SessionStore,
    peer: PeerId,
    lock: Arc<Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl SessionGuard<'_> {
    /// The peer this guard covers
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Load the session. Unparseable state is reported as a serialization
    /// error and left in place for the caller to discard.
    pub async fn load(&self) -> Result<Option<RatchetState>> {
        let Some(mut json) = self.store.vault.get_data(&session_key(&self.peer)).await? else {
            return Ok(None);
        };
        let parsed = serde_json::from_str(&json);
        json.zeroize();
        Ok(Some(parsed.map_err(tessera_core::Error::from)?))
    }

    /// Persist the session in a single vault write.
    ///
    /// The peer is indexed first, so a state that reached the vault is
    /// always found by [`SessionStore::delete_all`].
    pub async fn save(&self, state: &RatchetState) -> Result<()> {
        self.store.update_index(&self.peer, true).await?;

        let mut json = serde_json::to_string(state).map_err(tessera_core::Error::from)?;
        let result = self.store.vault.store_data(&session_key(&self.peer), &json).await;
        json.zeroize();
        result?;

        debug!(peer = %self.peer, "Saved session");
        Ok(())
    }

    /// Delete the session
    pub async fn delete(&self) -> Result<()> {
        self.store.vault.delete_data(&session_key(&self.peer)).await?;
        self.store.update_index(&self.peer, false).await?;
        debug!(peer = %self.peer, "Deleted session");
        Ok(())
    }

    /// Whether a handshake with this ephemeral key was already accepted.
    /// Survives session resets.
    pub async fn handshake_seen(&self, ephemeral: &PublicKeyBytes) -> Result<bool> {
        Ok(self.remembered_handshakes().await?.contains(ephemeral))
    }

    /// Record an accepted handshake, forgetting the oldest beyond the bound
    pub async fn remember_handshake(&self, ephemeral: PublicKeyBytes) -> Result<()> {
        let mut seen = self.remembered_handshakes().await?;
        if seen.contains(&ephemeral) {
            return Ok(());
        }
        seen.push(ephemeral);
        if seen.len() > MAX_REMEMBERED_HANDSHAKES {
            seen.remove(0);
        }

        let json = serde_json::to_string(&seen).map_err(tessera_core::Error::from)?;
        self.store.vault.store_data(&handshake_key(&self.peer), &json).await?;
        Ok(())
    }

    async fn remembered_handshakes(&self) -> Result<Vec<PublicKeyBytes>> {
        match self.store.vault.get_data(&handshake_key(&self.peer)).await? {
            Some(json) => Ok(serde_json::from_str(&json).map_err(tessera_core::Error::from)?),
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        // Map entry, `self.lock` and the held guard: nobody else is waiting
        let ours = &self.lock;
        self.store.locks.remove_if(&self.peer, |_, lock| {
            Arc::ptr_eq(lock, ours) && Arc::strong_count(lock) <= 3
        });
    }
}
