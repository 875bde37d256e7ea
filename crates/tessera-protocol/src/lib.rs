//! # Tessera Protocol
//!
//! The stateful half of the Tessera E2EE core: identity lifecycle, peer key
//! verification, per-peer ratchet sessions and the envelope codec.
//!
//! ## Overview
//!
//! - **Identity**: die rolls to stored key material and a publishable bundle
//! - **Peer Registry**: trust-on-first-use key records, re-checked against
//!   the directory on every call
//! - **Sessions**: one ratchet state per peer, mutated under that peer's lock
//! - **Codec**: ratchet or stateless envelopes, always with a sender copy
//!
//! ## Usage
//!
//! ```ignore
//! use tessera_protocol::{E2eeClient, ProtocolConfig};
//!
//! let client = E2eeClient::new(ProtocolConfig::default(), vault, directory)?;
//! let bundle = client.initialize(&rolls).await?;
//! directory.publish(me, bundle);
//!
//! let outgoing = client.encrypt(&peer, b"hello").await?;
//! let plaintext = client.decrypt(&peer, &incoming).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod identity_manager;
pub mod peer_registry;
pub mod session_store;

pub use client::E2eeClient;
pub use codec::{EnvelopeCodec, OutgoingMessage};
pub use config::{EncryptionMode, ProtocolConfig};
pub use error::{ErrorKind, ProtocolError, Result};
pub use identity_manager::IdentityManager;
pub use peer_registry::{PeerKeyStatus, PeerRegistry, SecurityEvent, Verification};
pub use session_store::{SessionGuard, SessionStore};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::client::E2eeClient;
    pub use crate::config::{EncryptionMode, ProtocolConfig};
    pub use crate::error::{ErrorKind, ProtocolError, Result};
    pub use crate::peer_registry::{SecurityEvent, Verification};
    pub use tessera_core::{Envelope, KeyBundle, PeerId};
}

#[cfg(test)]
pub(crate) mod test_support {
    use tessera_crypto::entropy::DICE_ROLL_COUNT;

    /// 300 well-mixed rolls; different variants give different identities
    pub fn sample_rolls(variant: u8) -> Vec<u8> {
        let mut state = 0x2545_f491_4f6c_dd1d_u64 ^ u64::from(variant).wrapping_mul(0x9e37_79b9);
        (0..DICE_ROLL_COUNT)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                ((state >> 33) % 6) as u8 + 1
            })
            .collect()
    }
}
