//! # Tessera Core
//!
//! Shared types for the Tessera E2EE core.
//!
//! This crate provides:
//! - Peer identifiers and cached peer key records
//! - The wire envelope and published bundle shapes
//! - The [`Vault`] and [`PeerDirectory`] collaborator traits, with
//!   in-memory implementations
//! - Common error types

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod storage;
pub mod types;
pub mod wire;

pub use error::{Error, Result};
pub use storage::memory::{MemoryDirectory, MemoryVault};
pub use storage::{PeerDirectory, Vault};
pub use types::{Fingerprint, PeerId, PeerKeyRecord};
pub use wire::{EncryptedPayload, Envelope, KeyBundle, RatchetPayload, StatelessPayload, ENVELOPE_VERSION};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::storage::{PeerDirectory, Vault};
    pub use crate::types::{PeerId, PeerKeyRecord};
    pub use crate::wire::{EncryptedPayload, Envelope, KeyBundle};
}
