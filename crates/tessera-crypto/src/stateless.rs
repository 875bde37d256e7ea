//! Stateless box
//!
//! One-shot encryption between two long-term identity keys: static-static
//! X25519, HKDF, XChaCha20-Poly1305. No session state and no forward
//! secrecy; used when no session can be established and for the sender's
//! own copy of each message.

use crate::aead::{self, AeadKey, Sealed};
use crate::error::Result;
use crate::identity::IdentityKeyPair;
use crate::kdf::{domain, DerivedKey, KeyDerivationContext};
use crate::keys::PublicKeyBytes;

/// Associated data binding direction: sender identity || recipient identity
pub fn associated_data(sender: &PublicKeyBytes, recipient: &PublicKeyBytes) -> [u8; 64] {
    let mut ad = [0u8; 64];
    ad[..32].copy_from_slice(sender.as_bytes());
    ad[32..].copy_from_slice(recipient.as_bytes());
    ad
}

fn box_key(local: &IdentityKeyPair, remote: &PublicKeyBytes) -> Result<AeadKey> {
    let shared = local.diffie_hellman(remote);
    let kdf = KeyDerivationContext::new(None, shared.as_bytes());
    let key: DerivedKey<32> = kdf.derive(domain::STATELESS_BOX)?;
    Ok(AeadKey::from_bytes(key.to_bytes()))
}

/// Encrypt from `sender` to `recipient`
pub fn seal(
    sender: &IdentityKeyPair,
    recipient: &PublicKeyBytes,
    plaintext: &[u8],
    max_size: usize,
) -> Result<Sealed> {
    let key = box_key(sender, recipient)?;
    let ad = associated_data(&sender.public_key(), recipient);
    aead::seal_with_limit(&key, plaintext, &ad, max_size)
}

/// Decrypt a box sent by `sender` to the local identity
pub fn open(
    recipient: &IdentityKeyPair,
    sender: &PublicKeyBytes,
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let key = box_key(recipient, sender)?;
    let ad = associated_data(sender, &recipient.public_key());
    aead::open(&key, nonce, ciphertext, &ad)
}
