//! Authenticated Encryption with Associated Data (AEAD)
//!
//! XChaCha20-Poly1305 for every message in both envelope formats. The
//! 192-bit nonce is drawn at random per message, which is safe at this
//! size without any nonce bookkeeping.

use chacha20poly1305::{
    aead::{Aead as AeadTrait, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};
use crate::MAX_MESSAGE_SIZE;

/// Nonce size for XChaCha20-Poly1305 (192 bits)
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (128 bits)
pub const TAG_SIZE: usize = 16;

/// Key size (256 bits)
pub const KEY_SIZE: usize = 32;

/// AEAD key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Nonce plus ciphertext (tag appended)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    /// Random nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with authentication tag
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Get the plaintext length (without tag)
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }
}

/// Generate a random nonce
pub fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Encrypt plaintext with associated data under a fresh random nonce
pub fn seal(key: &AeadKey, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
    seal_with_limit(key, plaintext, aad, MAX_MESSAGE_SIZE)
}

/// Like [`seal`] with a caller-chosen plaintext limit
pub fn seal_with_limit(
    key: &AeadKey,
    plaintext: &[u8],
    aad: &[u8],
    max_size: usize,
) -> Result<Sealed> {
    if plaintext.len() > max_size {
        return Err(CryptoError::MessageTooLarge {
            size: plaintext.len(),
            max: max_size,
        });
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = random_nonce();

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed("XChaCha20-Poly1305 failed".to_string()))?;

    Ok(Sealed { nonce, ciphertext })
}

/// Decrypt and authenticate. Any mismatch in key, nonce, ciphertext or
/// associated data yields [`CryptoError::AuthenticationFailed`].
pub fn open(key: &AeadKey, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xchacha20_roundtrip() {
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);
        let plaintext = b"Hello, Tessera!";
        let aad = b"associated data";

        let sealed = seal(&key, plaintext, aad).unwrap();
        let opened = open(&key, &sealed.nonce, &sealed.ciphertext, aad).unwrap();

        assert_eq!(plaintext.as_slice(), opened.as_slice());
        assert_eq!(sealed.plaintext_len(), plaintext.len());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = AeadKey::from_bytes([0x42; KEY_SIZE]);
        let key2 = AeadKey::from_bytes([0x43; KEY_SIZE]);

        let sealed = seal(&key1, b"Secret message", b"aad").unwrap();
        let result = open(&key2, &sealed.nonce, &sealed.ciphertext, b"aad");

        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);

        let sealed = seal(&key, b"Secret message", b"aad1").unwrap();
        let result = open(&key, &sealed.nonce, &sealed.ciphertext, b"aad2");

        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);

        let mut sealed = seal(&key, b"Secret message", b"aad").unwrap();
        sealed.ciphertext[0] ^= 0xFF;

        let result = open(&key, &sealed.nonce, &sealed.ciphertext, b"aad");
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);

        let mut sealed = seal(&key, b"Secret message", b"aad").unwrap();
        sealed.nonce[3] ^= 0x01;

        assert!(open(&key, &sealed.nonce, &sealed.ciphertext, b"aad").is_err());
    }

    #[test]
    fn test_truncated_input_fails() {
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);
        let sealed = seal(&key, b"hi", b"").unwrap();

        assert!(open(&key, &sealed.nonce[..12], &sealed.ciphertext, b"").is_err());
        assert!(open(&key, &sealed.nonce, &sealed.ciphertext[..4], b"").is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);

        let sealed = seal(&key, b"", b"aad").unwrap();
        let opened = open(&key, &sealed.nonce, &sealed.ciphertext, b"aad").unwrap();

        assert!(opened.is_empty());
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);
        let a = seal(&key, b"same", b"").unwrap();
        let b = seal(&key, b"same", b"").unwrap();

        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_message_too_large() {
        let key = AeadKey::from_bytes([0x42; KEY_SIZE]);
        let plaintext = vec![0x42u8; MAX_MESSAGE_SIZE + 1];

        let result = seal(&key, &plaintext, b"");
        assert!(matches!(result, Err(CryptoError::MessageTooLarge { .. })));

        let result = seal_with_limit(&key, &[0u8; 11], b"", 10);
        assert!(matches!(result, Err(CryptoError::MessageTooLarge { size: 11, max: 10 })));
    }
}
