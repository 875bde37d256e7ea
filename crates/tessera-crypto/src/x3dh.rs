//! X3DH (Extended Triple Diffie-Hellman) Key Agreement
//!
//! Asynchronous session establishment against a published pre-key bundle.
//!
//! # Protocol Overview
//!
//! Alice (initiator) and Bob (responder) establish a shared secret:
//!
//! 1. Bob publishes his identity key (IK), signing key, signed pre-key (SPK)
//!    and one-time pre-keys (OPK) to the directory
//! 2. Alice fetches Bob's bundle and verifies the SPK signature
//! 3. Alice generates an ephemeral key (EK) and computes:
//!    - DH1 = DH(IK_A, SPK_B)
//!    - DH2 = DH(EK_A, IK_B)
//!    - DH3 = DH(EK_A, SPK_B)
//!    - DH4 = DH(EK_A, OPK_B) (if OPK present)
//! 4. Shared secret = HKDF(0xFF*32 || DH1 || DH2 || DH3 [|| DH4])
//!
//! Bob's signed pre-key doubles as his first ratchet key.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};
use crate::identity::{IdentityKeyPair, KeyMaterial};
use crate::kdf::{domain, KeyDerivationContext};
use crate::keys::{AgreementKeyPair, PreKeyBundle, PublicKeyBytes, SharedSecret};

/// X3DH shared secret
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct X3DHSharedSecret {
    /// The derived shared secret
    secret: [u8; 32],
    /// Associated data: initiator identity || responder identity
    ad: Vec<u8>,
}

impl X3DHSharedSecret {
    /// Get the shared secret bytes
    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    /// Get the associated data
    pub fn associated_data(&self) -> &[u8] {
        &self.ad
    }
}

/// Handshake header carried by the initiator's messages until the
/// responder replies
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeHeader {
    /// Initiator's identity public key
    pub identity_key: PublicKeyBytes,
    /// Ephemeral public key used in X3DH
    pub ephemeral_key: PublicKeyBytes,
    /// ID of the responder's signed pre-key
    pub signed_pre_key_id: u32,
    /// ID of the one-time pre-key used (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key_id: Option<u32>,
}

/// Everything the initiator needs to start ratcheting
pub struct InitiatedHandshake {
    /// Shared secret and associated data
    pub shared: X3DHSharedSecret,
    /// Header for the first messages
    pub header: HandshakeHeader,
    /// Responder's first ratchet key (its signed pre-key)
    pub remote_ratchet_key: PublicKeyBytes,
}

/// X3DH key agreement
pub struct X3DHKeyAgreement;

impl X3DHKeyAgreement {
    /// Initiator computes the shared secret from the peer's bundle.
    ///
    /// Fails hard if the signed pre-key signature does not verify. Uses the
    /// first advertised one-time pre-key, if any.
    pub fn initiate(
        our_identity: &IdentityKeyPair,
        their_bundle: &PreKeyBundle,
    ) -> Result<InitiatedHandshake> {
        their_bundle.verify_signed_prekey()?;

        let ephemeral = AgreementKeyPair::generate();
        let spk_public = their_bundle.signed_pre_key.public_key;

        // DH1 = DH(IK_A, SPK_B)
        let dh1 = our_identity.diffie_hellman(&spk_public);

        // DH2 = DH(EK_A, IK_B)
        let dh2 = ephemeral.diffie_hellman(&their_bundle.identity_key);

        // DH3 = DH(EK_A, SPK_B)
        let dh3 = ephemeral.diffie_hellman(&spk_public);

        // DH4 = DH(EK_A, OPK_B) if OPK present
        let opk = their_bundle.one_time_pre_keys.first();
        let dh4 = opk.map(|k| ephemeral.diffie_hellman(&k.public_key));

        let shared = Self::derive_shared_secret(
            &dh1,
            &dh2,
            &dh3,
            dh4.as_ref(),
            &our_identity.public_key(),
            &their_bundle.identity_key,
        )?;

        Ok(InitiatedHandshake {
            shared,
            header: HandshakeHeader {
                identity_key: our_identity.public_key(),
                ephemeral_key: ephemeral.public_key(),
                signed_pre_key_id: their_bundle.signed_pre_key.key_id,
                one_time_pre_key_id: opk.map(|k| k.key_id),
            },
            remote_ratchet_key: spk_public,
        })
    }

    /// Responder recomputes the shared secret from the initiator's header.
    ///
    /// Does not consume anything; the caller removes the one-time pre-key
    /// once the first message has authenticated. The signed pre-key may be
    /// the current one or the one replaced by the last rotation. A header
    /// naming an unknown or already consumed one-time pre-key is rejected.
    pub fn respond(ours: &KeyMaterial, header: &HandshakeHeader) -> Result<X3DHSharedSecret> {
        let spk = ours
            .signed_prekey_by_id(header.signed_pre_key_id)
            .ok_or(CryptoError::SignedPreKeyNotFound(header.signed_pre_key_id))?;

        // DH1 = DH(SPK_B, IK_A)
        let dh1 = spk.keypair().diffie_hellman(&header.identity_key);

        // DH2 = DH(IK_B, EK_A)
        let dh2 = ours.identity().diffie_hellman(&header.ephemeral_key);

        // DH3 = DH(SPK_B, EK_A)
        let dh3 = spk.keypair().diffie_hellman(&header.ephemeral_key);

        // DH4 = DH(OPK_B, EK_A) if OPK was used
        let dh4 = match header.one_time_pre_key_id {
            Some(id) => {
                let opk = ours
                    .one_time_prekey(id)
                    .ok_or(CryptoError::OneTimePreKeyUnavailable(id))?;
                Some(opk.keypair().diffie_hellman(&header.ephemeral_key))
            }
            None => None,
        };

        Self::derive_shared_secret(
            &dh1,
            &dh2,
            &dh3,
            dh4.as_ref(),
            &header.identity_key,
            &ours.identity().public_key(),
        )
    }

    fn derive_shared_secret(
        dh1: &SharedSecret,
        dh2: &SharedSecret,
        dh3: &SharedSecret,
        dh4: Option<&SharedSecret>,
        initiator_identity: &PublicKeyBytes,
        responder_identity: &PublicKeyBytes,
    ) -> Result<X3DHSharedSecret> {
        let mut dh_concat = Vec::with_capacity(160);

        // 32 bytes of 0xFF as a domain separator
        dh_concat.extend_from_slice(&[0xFF; 32]);
        dh_concat.extend_from_slice(dh1.as_bytes());
        dh_concat.extend_from_slice(dh2.as_bytes());
        dh_concat.extend_from_slice(dh3.as_bytes());

        if let Some(dh4) = dh4 {
            dh_concat.extend_from_slice(dh4.as_bytes());
        }

        let kdf = KeyDerivationContext::new(None, &dh_concat);
        dh_concat.zeroize();
        let secret = kdf.derive::<32>(domain::HANDSHAKE_SECRET)?;

        let mut ad = Vec::with_capacity(64);
        ad.extend_from_slice(initiator_identity.as_bytes());
        ad.extend_from_slice(responder_identity.as_bytes());

        Ok(X3DHSharedSecret {
            secret: secret.to_bytes(),
            ad,
        })
    }
}
