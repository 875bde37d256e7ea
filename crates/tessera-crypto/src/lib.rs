//! # Tessera Cryptographic Library
//!
//! Synchronous primitives for the Tessera end-to-end encryption core. No
//! I/O happens here; storage, directory access and concurrency live in
//! `tessera-protocol`.
//!
//! ## Key hierarchy
//!
//! 300 die rolls → [`entropy::Seed`] (SHA-512) → [`master::MasterKey`]
//! (Argon2id) → sub-keys (HKDF-SHA-512) → [`identity::KeyMaterial`].
//! The whole hierarchy is deterministic: the same rolls regenerate the
//! same identity.
//!
//! ## Core Components
//!
//! - [`entropy`]: Die-roll normalization
//! - [`master`]: Memory-hard master key derivation
//! - [`kdf`]: Sub-key hierarchy and ratchet KDFs
//! - [`keys`]: Key types and the publishable pre-key bundle
//! - [`identity`]: Identity, signing and pre-key material
//! - [`aead`]: XChaCha20-Poly1305
//! - [`stateless`]: One-shot static-static box
//! - [`x3dh`]: Session establishment
//! - [`ratchet`]: Double Ratchet

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod aead;
pub mod entropy;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod master;
pub mod ratchet;
pub mod stateless;
pub mod x3dh;

pub use error::{CryptoError, Result};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum message size in bytes (64 KB)
pub const MAX_MESSAGE_SIZE: usize = 65536;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aead::{AeadKey, Sealed};
    pub use crate::entropy::Seed;
    pub use crate::error::{CryptoError, Result};
    pub use crate::identity::{IdentityKeyPair, KeyMaterial, StoredKeyMaterial};
    pub use crate::keys::{OneTimePreKey, PreKeyBundle, PublicKeyBytes, SignedPreKey};
    pub use crate::master::{MasterKey, MasterKeyParams};
    pub use crate::ratchet::{RatchetHeader, RatchetMessage, RatchetState};
    pub use crate::x3dh::{HandshakeHeader, X3DHKeyAgreement, X3DHSharedSecret};
}
