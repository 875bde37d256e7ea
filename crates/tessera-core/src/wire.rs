//! Wire format
//!
//! JSON shapes exchanged with other clients: the encrypted envelope and the
//! published key bundle. Key bytes are hex, nonces and ciphertext base64.
//!
//! ```json
//! { "version": "e2ee-v1",
//!   "encrypted": { "format": "ratchet", "ratchetKey": "..", "counter": 0, .. },
//!   "senderCopy": { "format": "stateless", "nonce": "..", "ciphertext": ".." } }
//! ```

use serde::{Deserialize, Serialize};
use tessera_crypto::aead::NONCE_SIZE;
use tessera_crypto::keys::PublicKeyBytes;
use tessera_crypto::ratchet::{RatchetHeader, RatchetMessage};
use tessera_crypto::x3dh::HandshakeHeader;

use crate::error::{Error, Result};

/// Published key bundle
pub use tessera_crypto::keys::PreKeyBundle as KeyBundle;

/// Envelope version tag
pub const ENVELOPE_VERSION: &str = "e2ee-v1";

/// Encrypted message envelope. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Format version, always [`ENVELOPE_VERSION`] when produced here
    pub version: String,
    /// Payload for the recipient
    pub encrypted: EncryptedPayload,
    /// Stateless copy readable by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_copy: Option<EncryptedPayload>,
}

impl Envelope {
    /// Build a current-version envelope
    pub fn new(encrypted: EncryptedPayload, sender_copy: Option<EncryptedPayload>) -> Self {
        Self {
            version: ENVELOPE_VERSION.to_string(),
            encrypted,
            sender_copy,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidEnvelope(e.to_string()))
    }
}

/// Payload formats. Unrecognized formats parse as [`EncryptedPayload::Unknown`]
/// so they can be rejected explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum EncryptedPayload {
    /// Static-static box
    Stateless(StatelessPayload),
    /// Double Ratchet message
    Ratchet(RatchetPayload),
    /// Anything else
    #[serde(other)]
    Unknown,
}

impl EncryptedPayload {
    /// Format name for diagnostics
    pub fn format_name(&self) -> &'static str {
        match self {
            EncryptedPayload::Stateless(_) => "stateless",
            EncryptedPayload::Ratchet(_) => "ratchet",
            EncryptedPayload::Unknown => "unknown",
        }
    }
}

/// Stateless box payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatelessPayload {
    /// 24-byte nonce
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Ciphertext with tag
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

/// Double Ratchet payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatchetPayload {
    /// Sender's ratchet public key
    pub ratchet_key: PublicKeyBytes,
    /// Message number in the sending chain
    pub counter: u32,
    /// Length of the sender's previous chain
    pub previous_chain_length: u32,
    /// 24-byte nonce
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Ciphertext with tag
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Session handshake, present until the responder has replied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake: Option<HandshakeHeader>,
}

impl RatchetPayload {
    /// Wrap a ratchet message
    pub fn from_message(message: RatchetMessage, handshake: Option<HandshakeHeader>) -> Self {
        Self {
            ratchet_key: message.header.ratchet_key,
            counter: message.header.counter,
            previous_chain_length: message.header.previous_chain_length,
            nonce: message.nonce.to_vec(),
            ciphertext: message.ciphertext,
            handshake,
        }
    }

    /// Unwrap into a ratchet message, checking the nonce size
    pub fn to_message(&self) -> Result<RatchetMessage> {
        let nonce: [u8; NONCE_SIZE] = self.nonce.as_slice().try_into().map_err(|_| {
            Error::InvalidEnvelope(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                self.nonce.len()
            ))
        })?;

        Ok(RatchetMessage {
            header: RatchetHeader {
                ratchet_key: self.ratchet_key,
                counter: self.counter,
                previous_chain_length: self.previous_chain_length,
            },
            nonce,
            ciphertext: self.ciphertext.clone(),
        })
    }
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stateless() -> EncryptedPayload {
        EncryptedPayload::Stateless(StatelessPayload {
            nonce: vec![1u8; 24],
            ciphertext: vec![2u8; 40],
        })
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = Envelope::new(stateless(), Some(stateless()));
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(value["version"], "e2ee-v1");
        assert_eq!(value["encrypted"]["format"], "stateless");
        assert!(value["encrypted"]["nonce"].is_string());
        assert_eq!(value["senderCopy"]["format"], "stateless");
    }

    #[test]
    fn test_ratchet_payload_shape() {
        let payload = EncryptedPayload::Ratchet(RatchetPayload {
            ratchet_key: PublicKeyBytes::from([7u8; 32]),
            counter: 3,
            previous_chain_length: 2,
            nonce: vec![0u8; 24],
            ciphertext: vec![1u8; 20],
            handshake: None,
        });
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["format"], "ratchet");
        assert_eq!(value["ratchetKey"], hex::encode([7u8; 32]));
        assert_eq!(value["counter"], 3);
        assert_eq!(value["previousChainLength"], 2);
        assert!(value.get("handshake").is_none());
    }

    #[test]
    fn test_unknown_format_parses_as_unknown() {
        let json = r#"{"version":"e2ee-v1","encrypted":{"format":"pgp","blob":"x"}}"#;
        let envelope = Envelope::from_json(json).unwrap();
        assert_eq!(envelope.encrypted, EncryptedPayload::Unknown);
        assert!(envelope.sender_copy.is_none());
    }

    #[test]
    fn test_bad_base64_rejected() {
        let json = r#"{"version":"e2ee-v1","encrypted":{"format":"stateless","nonce":"!!","ciphertext":""}}"#;
        assert!(matches!(
            Envelope::from_json(json),
            Err(Error::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_short_nonce_rejected() {
        let payload = RatchetPayload {
            ratchet_key: PublicKeyBytes::from([7u8; 32]),
            counter: 0,
            previous_chain_length: 0,
            nonce: vec![0u8; 12],
            ciphertext: vec![],
            handshake: None,
        };
        assert!(matches!(payload.to_message(), Err(Error::InvalidEnvelope(_))));
    }
}
