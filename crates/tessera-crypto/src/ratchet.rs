//! Double Ratchet Algorithm
//!
//! Forward secrecy and break-in recovery for an established session.
//!
//! # Overview
//!
//! The Double Ratchet combines:
//! - **DH Ratchet**: a fresh X25519 exchange whenever the peer's ratchet
//!   key changes, feeding the root KDF
//! - **Symmetric Ratchet**: one HMAC chain step per message; the old chain
//!   key is overwritten immediately
//!
//! Out-of-order delivery is handled with a bounded cache of skipped
//! message keys, evicted oldest-first. Decryption is transactional: it
//! works on a copy of the state and only commits when the message
//! authenticates.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::{self, AeadKey, NONCE_SIZE};
use crate::error::{CryptoError, Result};
use crate::kdf::{derive_message_keys, derive_root_and_chain_keys};
use crate::keys::{AgreementKeyPair, PublicKeyBytes, SecretKeyBytes};
use crate::x3dh::{HandshakeHeader, X3DHSharedSecret};

/// Default bound on cached skipped message keys
pub const DEFAULT_MAX_SKIPPED_KEYS: usize = 1000;

/// Number of previous remote ratchet keys remembered for replay detection
const MAX_RETIRED_RATCHET_KEYS: usize = 32;

fn default_max_skipped_keys() -> usize {
    DEFAULT_MAX_SKIPPED_KEYS
}

/// Root or chain key
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct ChainKey(#[serde(with = "hex::serde")] [u8; 32]);

impl ChainKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Advance one symmetric step, returning the message key
    fn step(&mut self) -> Result<MessageKey> {
        let (next, message_key) = derive_message_keys(&self.0)?;
        self.0 = next;
        Ok(MessageKey(message_key))
    }
}

/// Single-use message key
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct MessageKey(#[serde(with = "hex::serde")] [u8; 32]);

impl MessageKey {
    fn aead_key(&self) -> AeadKey {
        AeadKey::from_bytes(self.0)
    }
}

/// Message header, authenticated as associated data
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatchetHeader {
    /// Sender's current ratchet public key
    pub ratchet_key: PublicKeyBytes,
    /// Message number in the sending chain
    pub counter: u32,
    /// Number of messages in the sender's previous chain
    pub previous_chain_length: u32,
}

impl RatchetHeader {
    /// Canonical bytes for the AEAD associated data
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// Encrypted message with header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RatchetMessage {
    /// Message header
    pub header: RatchetHeader,
    /// AEAD nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with tag
    pub ciphertext: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkippedKey {
    ratchet_key: PublicKeyBytes,
    counter: u32,
    message_key: MessageKey,
}

/// State of the Double Ratchet for one peer
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatchetState {
    root_key: ChainKey,
    sending_chain_key: Option<ChainKey>,
    receiving_chain_key: Option<ChainKey>,
    local_ratchet_key: SecretKeyBytes,
    remote_ratchet_key: Option<PublicKeyBytes>,
    send_counter: u32,
    receive_counter: u32,
    previous_chain_length: u32,
    skipped_message_keys: VecDeque<SkippedKey>,
    #[serde(default)]
    retired_ratchet_keys: VecDeque<PublicKeyBytes>,
    #[serde(default = "default_max_skipped_keys")]
    max_skipped_keys: usize,
    #[serde(with = "hex::serde")]
    associated_data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_handshake: Option<HandshakeHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin_ephemeral: Option<PublicKeyBytes>,
}

impl RatchetState {
    /// Initialize as the initiator after X3DH.
    ///
    /// The handshake header is attached to every outgoing message until
    /// the first reply decrypts.
    pub fn init_initiator(
        shared: &X3DHSharedSecret,
        header: HandshakeHeader,
        remote_ratchet_key: PublicKeyBytes,
        max_skipped_keys: usize,
    ) -> Result<Self> {
        let local = AgreementKeyPair::generate();
        let dh_output = local.diffie_hellman(&remote_ratchet_key);
        let (root_key, sending_chain_key) =
            derive_root_and_chain_keys(shared.secret(), dh_output.as_bytes())?;

        Ok(Self {
            root_key: ChainKey(root_key),
            sending_chain_key: Some(ChainKey(sending_chain_key)),
            receiving_chain_key: None,
            local_ratchet_key: local.secret_bytes(),
            remote_ratchet_key: Some(remote_ratchet_key),
            send_counter: 0,
            receive_counter: 0,
            previous_chain_length: 0,
            skipped_message_keys: VecDeque::new(),
            retired_ratchet_keys: VecDeque::new(),
            max_skipped_keys,
            associated_data: shared.associated_data().to_vec(),
            pending_handshake: Some(header),
            origin_ephemeral: None,
        })
    }

    /// Initialize as the responder after X3DH.
    ///
    /// `local_ratchet_key` is the signed pre-key pair the initiator used as
    /// its first remote ratchet key.
    pub fn init_responder(
        shared: &X3DHSharedSecret,
        local_ratchet_key: &AgreementKeyPair,
        origin_ephemeral: PublicKeyBytes,
        max_skipped_keys: usize,
    ) -> Self {
        Self {
            root_key: ChainKey(*shared.secret()),
            sending_chain_key: None,
            receiving_chain_key: None,
            local_ratchet_key: local_ratchet_key.secret_bytes(),
            remote_ratchet_key: None,
            send_counter: 0,
            receive_counter: 0,
            previous_chain_length: 0,
            skipped_message_keys: VecDeque::new(),
            retired_ratchet_keys: VecDeque::new(),
            max_skipped_keys,
            associated_data: shared.associated_data().to_vec(),
            pending_handshake: None,
            origin_ephemeral: Some(origin_ephemeral),
        }
    }

    /// Our current ratchet public key
    pub fn local_ratchet_key(&self) -> PublicKeyBytes {
        AgreementKeyPair::from(&self.local_ratchet_key).public_key()
    }

    /// The peer's current ratchet public key
    pub fn remote_ratchet_key(&self) -> Option<PublicKeyBytes> {
        self.remote_ratchet_key
    }

    /// Next sending counter
    pub fn send_counter(&self) -> u32 {
        self.send_counter
    }

    /// Next expected receiving counter
    pub fn receive_counter(&self) -> u32 {
        self.receive_counter
    }

    /// Number of cached skipped message keys
    pub fn skipped_key_count(&self) -> usize {
        self.skipped_message_keys.len()
    }

    /// Session associated data (initiator identity || responder identity)
    pub fn associated_data(&self) -> &[u8] {
        &self.associated_data
    }

    /// Handshake header still owed to the peer (initiator only)
    pub fn pending_handshake(&self) -> Option<&HandshakeHeader> {
        self.pending_handshake.as_ref()
    }

    /// Ephemeral key of the handshake that created this session (responder only)
    pub fn origin_ephemeral(&self) -> Option<&PublicKeyBytes> {
        self.origin_ephemeral.as_ref()
    }

    /// Whether a message can be sent without receiving first
    pub fn can_send(&self) -> bool {
        self.sending_chain_key.is_some()
    }

    /// Encrypt a message
    pub fn encrypt(&mut self, plaintext: &[u8], max_size: usize) -> Result<RatchetMessage> {
        let chain = self
            .sending_chain_key
            .as_mut()
            .ok_or_else(|| CryptoError::RatchetCorrupted("No sending chain key".to_string()))?;

        if plaintext.len() > max_size {
            return Err(CryptoError::MessageTooLarge {
                size: plaintext.len(),
                max: max_size,
            });
        }

        let message_key = chain.step()?;

        let header = RatchetHeader {
            ratchet_key: self.local_ratchet_key(),
            counter: self.send_counter,
            previous_chain_length: self.previous_chain_length,
        };

        let ad = self.message_ad(&header)?;
        let sealed = aead::seal_with_limit(&message_key.aead_key(), plaintext, &ad, max_size)?;

        self.send_counter += 1;

        Ok(RatchetMessage {
            header,
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
        })
    }

    /// Decrypt a message.
    ///
    /// The state is left untouched unless the message authenticates.
    pub fn decrypt(&mut self, message: &RatchetMessage) -> Result<Vec<u8>> {
        let mut next = self.clone();
        let plaintext = next.decrypt_in_place(message)?;
        *self = next;
        Ok(plaintext)
    }

    fn decrypt_in_place(&mut self, message: &RatchetMessage) -> Result<Vec<u8>> {
        let header = &message.header;

        if let Some(message_key) = self.take_skipped_key(&header.ratchet_key, header.counter) {
            let plaintext = self.open(&message_key, message)?;
            self.pending_handshake = None;
            return Ok(plaintext);
        }

        let is_current_chain = self.remote_ratchet_key == Some(header.ratchet_key);

        if is_current_chain && header.counter < self.receive_counter {
            return Err(CryptoError::MessageKeyUnavailable {
                counter: header.counter,
            });
        }
        if !is_current_chain && self.retired_ratchet_keys.contains(&header.ratchet_key) {
            return Err(CryptoError::MessageKeyUnavailable {
                counter: header.counter,
            });
        }

        if !is_current_chain {
            self.skip_message_keys(header.previous_chain_length)?;
            self.dh_ratchet(&header.ratchet_key)?;
        }

        self.skip_message_keys(header.counter)?;

        let chain = self
            .receiving_chain_key
            .as_mut()
            .ok_or_else(|| CryptoError::RatchetCorrupted("No receiving chain key".to_string()))?;
        let message_key = chain.step()?;
        self.receive_counter += 1;

        let plaintext = self.open(&message_key, message)?;
        self.pending_handshake = None;
        Ok(plaintext)
    }

    fn open(&self, message_key: &MessageKey, message: &RatchetMessage) -> Result<Vec<u8>> {
        let ad = self.message_ad(&message.header)?;
        aead::open(&message_key.aead_key(), &message.nonce, &message.ciphertext, &ad)
    }

    fn message_ad(&self, header: &RatchetHeader) -> Result<Vec<u8>> {
        let mut ad = header.to_bytes()?;
        ad.extend_from_slice(&self.associated_data);
        Ok(ad)
    }

    fn take_skipped_key(&mut self, ratchet_key: &PublicKeyBytes, counter: u32) -> Option<MessageKey> {
        let pos = self
            .skipped_message_keys
            .iter()
            .position(|k| &k.ratchet_key == ratchet_key && k.counter == counter)?;
        self.skipped_message_keys.remove(pos).map(|k| k.message_key)
    }

    /// DH ratchet step on a new remote ratchet key
    fn dh_ratchet(&mut self, their_public: &PublicKeyBytes) -> Result<()> {
        if let Some(old) = self.remote_ratchet_key.replace(*their_public) {
            self.retired_ratchet_keys.push_back(old);
            if self.retired_ratchet_keys.len() > MAX_RETIRED_RATCHET_KEYS {
                self.retired_ratchet_keys.pop_front();
            }
        }

        self.previous_chain_length = self.send_counter;
        self.send_counter = 0;
        self.receive_counter = 0;

        // Receiving chain from our current key
        let local = AgreementKeyPair::from(&self.local_ratchet_key);
        let dh_output = local.diffie_hellman(their_public);
        let (root_key, receiving_chain_key) =
            derive_root_and_chain_keys(self.root_key.as_bytes(), dh_output.as_bytes())?;
        self.root_key = ChainKey(root_key);
        self.receiving_chain_key = Some(ChainKey(receiving_chain_key));

        // Sending chain from a fresh key
        let fresh = AgreementKeyPair::generate();
        let dh_output = fresh.diffie_hellman(their_public);
        let (root_key, sending_chain_key) =
            derive_root_and_chain_keys(self.root_key.as_bytes(), dh_output.as_bytes())?;
        self.root_key = ChainKey(root_key);
        self.sending_chain_key = Some(ChainKey(sending_chain_key));
        self.local_ratchet_key = fresh.secret_bytes();

        Ok(())
    }

    /// Cache keys for messages `receive_counter..until` on the current chain
    fn skip_message_keys(&mut self, until: u32) -> Result<()> {
        let Some(chain) = self.receiving_chain_key.as_mut() else {
            return Ok(());
        };
        if until <= self.receive_counter {
            return Ok(());
        }

        let gap = until - self.receive_counter;
        if gap as usize > self.max_skipped_keys {
            return Err(CryptoError::MessageGapTooLarge {
                gap,
                max: u32::try_from(self.max_skipped_keys).unwrap_or(u32::MAX),
            });
        }

        let ratchet_key = self
            .remote_ratchet_key
            .ok_or_else(|| CryptoError::RatchetCorrupted("No remote ratchet key".to_string()))?;

        while self.receive_counter < until {
            let message_key = chain.step()?;
            self.skipped_message_keys.push_back(SkippedKey {
                ratchet_key,
                counter: self.receive_counter,
                message_key,
            });
            if self.skipped_message_keys.len() > self.max_skipped_keys {
                self.skipped_message_keys.pop_front();
            }
            self.receive_counter += 1;
        }

        Ok(())
    }
}

impl std::fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetState")
            .field("remote_ratchet_key", &self.remote_ratchet_key)
            .field("send_counter", &self.send_counter)
            .field("receive_counter", &self.receive_counter)
            .field("previous_chain_length", &self.previous_chain_length)
            .field("skipped_keys", &self.skipped_message_keys.len())
            .finish_non_exhaustive()
    }
}
