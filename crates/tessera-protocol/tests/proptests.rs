//! Property-based tests over the envelope codec
//!
//! - Any plaintext within the size limit round-trips in both formats
//! - Any single-bit flip in the ciphertext is rejected as an
//!   authentication failure and leaves the session usable

mod common;

use std::sync::{Arc, OnceLock};

use proptest::prelude::*;
use tokio::runtime::Runtime;

use common::{config, Network, Party};
use tessera_core::{EncryptedPayload, MemoryVault};
use tessera_protocol::{EncryptionMode, ErrorKind, ProtocolConfig};

struct Fixture {
    runtime: Runtime,
    alice: Party,
    bob: Party,
    stateless_alice: Party,
    dave: Party,
    erin: Party,
}

fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        // Each property gets its own pair so handshakes never cross
        let (alice, bob, stateless_alice, dave, erin) = runtime.block_on(async {
            let net = Network::new();
            let alice = net.join("alice", 1).await;
            let bob = net.join("bob", 2).await;
            let stateless = ProtocolConfig {
                encryption_mode: EncryptionMode::Stateless,
                ..config()
            };
            let stateless_alice = net
                .join_with("carol", 3, stateless, Arc::new(MemoryVault::new()))
                .await;
            let dave = net.join("dave", 4).await;
            let erin = net.join("erin", 5).await;
            (alice, bob, stateless_alice, dave, erin)
        });

        Fixture {
            runtime,
            alice,
            bob,
            stateless_alice,
            dave,
            erin,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Ratchet envelopes round-trip, in order, for arbitrary plaintexts.
    #[test]
    fn ratchet_roundtrip(plaintext in prop::collection::vec(any::<u8>(), 0..2048)) {
        let f = fixture();
        let decrypted = f.runtime.block_on(async {
            let out = f.alice.client.encrypt(&f.bob.id, &plaintext).await.unwrap();
            f.bob.client.decrypt(&f.alice.id, &out.envelope).await.unwrap()
        });
        prop_assert_eq!(decrypted, plaintext);
    }

    /// Stateless envelopes round-trip and the sender copy matches.
    #[test]
    fn stateless_roundtrip(plaintext in prop::collection::vec(any::<u8>(), 0..2048)) {
        let f = fixture();
        let (decrypted, copy) = f.runtime.block_on(async {
            let sender = &f.stateless_alice;
            let out = sender.client.encrypt(&f.bob.id, &plaintext).await.unwrap();
            let decrypted = f.bob.client.decrypt(&sender.id, &out.envelope).await.unwrap();
            let copy = sender.client.decrypt_sender_copy(&out.envelope).await.unwrap();
            (decrypted, copy)
        });
        prop_assert_eq!(&decrypted, &plaintext);
        prop_assert_eq!(copy, plaintext);
    }

    /// A flipped ciphertext bit never decrypts and does not poison the session.
    #[test]
    fn ratchet_tamper_detected(
        plaintext in prop::collection::vec(any::<u8>(), 1..512),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let f = fixture();
        let (kind, retry) = f.runtime.block_on(async {
            let out = f.dave.client.encrypt(&f.erin.id, &plaintext).await.unwrap();

            let mut tampered = out.envelope.clone();
            if let EncryptedPayload::Ratchet(payload) = &mut tampered.encrypted {
                let i = position.index(payload.ciphertext.len());
                payload.ciphertext[i] ^= 1 << bit;
            }

            let kind = f.erin.client.decrypt(&f.dave.id, &tampered).await.unwrap_err().kind();
            let retry = f.erin.client.decrypt(&f.dave.id, &out.envelope).await.unwrap();
            (kind, retry)
        });
        prop_assert_eq!(kind, ErrorKind::Authentication);
        prop_assert_eq!(retry, plaintext);
    }
}
