//! End-to-end messaging between clients sharing a directory

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{config, Network};
use tessera_core::{EncryptedPayload, MemoryVault};
use tessera_protocol::{EncryptionMode, ErrorKind, ProtocolConfig};

#[test_log::test(tokio::test)]
async fn test_ratchet_conversation() {
    let net = Network::new();
    let alice = net.join("alice", 1).await;
    let bob = net.join("bob", 2).await;

    for round in 0..5u8 {
        let text = format!("alice says {}", round);
        let out = alice.client.encrypt(&bob.id, text.as_bytes()).await.unwrap();
        assert_eq!(out.envelope.encrypted.format_name(), "ratchet");
        assert_eq!(
            bob.client.decrypt(&alice.id, &out.envelope).await.unwrap(),
            text.as_bytes()
        );

        let text = format!("bob says {}", round);
        let out = bob.client.encrypt(&alice.id, text.as_bytes()).await.unwrap();
        assert_eq!(
            alice.client.decrypt(&bob.id, &out.envelope).await.unwrap(),
            text.as_bytes()
        );
    }
}

#[tokio::test]
async fn test_stateless_mode_roundtrip() {
    let net = Network::new();
    let stateless = ProtocolConfig {
        encryption_mode: EncryptionMode::Stateless,
        ..config()
    };
    let alice = net
        .join_with("alice", 1, stateless, Arc::new(MemoryVault::new()))
        .await;
    let bob = net.join("bob", 2).await;

    let out = alice.client.encrypt(&bob.id, b"no session needed").await.unwrap();
    assert!(matches!(out.envelope.encrypted, EncryptedPayload::Stateless(_)));
    assert!(!alice.client.sessions().exists(&bob.id).await.unwrap());

    assert_eq!(
        bob.client.decrypt(&alice.id, &out.envelope).await.unwrap(),
        b"no session needed"
    );
}

#[tokio::test]
async fn test_envelope_survives_json() {
    let net = Network::new();
    let alice = net.join("alice", 1).await;
    let bob = net.join("bob", 2).await;

    let out = alice.client.encrypt(&bob.id, b"over the wire").await.unwrap();
    let json = out.envelope.to_json().unwrap();
    let received = tessera_core::Envelope::from_json(&json).unwrap();

    assert_eq!(
        bob.client.decrypt(&alice.id, &received).await.unwrap(),
        b"over the wire"
    );
}

#[tokio::test]
async fn test_empty_and_maximum_messages() {
    let net = Network::new();
    let alice = net.join("alice", 1).await;
    let bob = net.join("bob", 2).await;

    let max = vec![0xabu8; tessera_crypto::MAX_MESSAGE_SIZE];
    for plaintext in [Vec::new(), max] {
        let out = alice.client.encrypt(&bob.id, &plaintext).await.unwrap();
        assert_eq!(bob.client.decrypt(&alice.id, &out.envelope).await.unwrap(), plaintext);
    }
}

#[tokio::test]
async fn test_out_of_order_delivery() {
    let net = Network::new();
    let alice = net.join("alice", 1).await;
    let bob = net.join("bob", 2).await;

    let mut envelopes = Vec::new();
    for i in 0..5u8 {
        let out = alice.client.encrypt(&bob.id, &[i]).await.unwrap();
        envelopes.push(out.envelope);
    }

    for i in [4usize, 1, 0, 3, 2] {
        assert_eq!(
            bob.client.decrypt(&alice.id, &envelopes[i]).await.unwrap(),
            vec![i as u8]
        );
    }
}

#[tokio::test]
async fn test_reordering_across_ratchet_steps() {
    let net = Network::new();
    let alice = net.join("alice", 1).await;
    let bob = net.join("bob", 2).await;

    let first = alice.client.encrypt(&bob.id, b"a0").await.unwrap();
    let delayed = alice.client.encrypt(&bob.id, b"a1").await.unwrap();
    bob.client.decrypt(&alice.id, &first.envelope).await.unwrap();

    let reply = bob.client.encrypt(&alice.id, b"b0").await.unwrap();
    alice.client.decrypt(&bob.id, &reply.envelope).await.unwrap();

    // New sending chain on alice's side; the old chain's message arrives late
    let next = alice.client.encrypt(&bob.id, b"a2").await.unwrap();
    assert_eq!(bob.client.decrypt(&alice.id, &next.envelope).await.unwrap(), b"a2");
    assert_eq!(bob.client.decrypt(&alice.id, &delayed.envelope).await.unwrap(), b"a1");
}

#[tokio::test]
async fn test_gap_beyond_bound_is_stale() {
    let net = Network::new();
    let tight = ProtocolConfig {
        max_skipped_keys: 5,
        ..config()
    };
    let alice = net.join("alice", 1).await;
    let bob = net
        .join_with("bob", 2, tight, Arc::new(MemoryVault::new()))
        .await;

    let mut envelopes = Vec::new();
    for i in 0..8u8 {
        envelopes.push(alice.client.encrypt(&bob.id, &[i]).await.unwrap().envelope);
    }

    bob.client.decrypt(&alice.id, &envelopes[0]).await.unwrap();

    // Counter 7 needs 6 skipped keys
    let err = bob.client.decrypt(&alice.id, &envelopes[7]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleSession);

    // Within the bound still works, and the failed attempt changed nothing
    assert_eq!(bob.client.decrypt(&alice.id, &envelopes[6]).await.unwrap(), vec![6]);
    assert_eq!(bob.client.decrypt(&alice.id, &envelopes[2]).await.unwrap(), vec![2]);
}

#[tokio::test]
async fn test_sessions_persist_across_restarts() {
    let net = Network::new();
    let alice_vault = Arc::new(MemoryVault::new());
    let alice = net.join_with("alice", 1, config(), alice_vault.clone()).await;
    let bob = net.join("bob", 2).await;

    let out = alice.client.encrypt(&bob.id, b"before").await.unwrap();
    bob.client.decrypt(&alice.id, &out.envelope).await.unwrap();
    let reply = bob.client.encrypt(&alice.id, b"reply").await.unwrap();
    drop(alice);

    // Same vault, same rolls: the stored identity and session are reused
    let alice = net.join_with("alice", 1, config(), alice_vault).await;
    assert_eq!(alice.client.decrypt(&bob.id, &reply.envelope).await.unwrap(), b"reply");

    let out = alice.client.encrypt(&bob.id, b"after").await.unwrap();
    let EncryptedPayload::Ratchet(payload) = &out.envelope.encrypted else {
        panic!("expected ratchet payload");
    };
    assert!(payload.handshake.is_none());
    assert_eq!(bob.client.decrypt(&alice.id, &out.envelope).await.unwrap(), b"after");
}

#[tokio::test]
async fn test_logout_forces_new_handshake() {
    let net = Network::new();
    let alice = net.join("alice", 1).await;
    let bob = net.join("bob", 2).await;
    let carol = net.join("carol", 3).await;

    for peer in [&bob, &carol] {
        let out = alice.client.encrypt(&peer.id, b"hi").await.unwrap();
        peer.client.decrypt(&alice.id, &out.envelope).await.unwrap();
    }
    assert_eq!(alice.client.sessions().peers().await.unwrap().len(), 2);

    alice.client.logout().await.unwrap();
    assert!(alice.client.sessions().peers().await.unwrap().is_empty());

    let out = alice.client.encrypt(&bob.id, b"again").await.unwrap();
    let EncryptedPayload::Ratchet(payload) = &out.envelope.encrypted else {
        panic!("expected ratchet payload");
    };
    assert!(payload.handshake.is_some());
    assert_eq!(bob.client.decrypt(&alice.id, &out.envelope).await.unwrap(), b"again");
}

#[tokio::test]
async fn test_simultaneous_first_messages() {
    let net = Network::new();
    let alice = net.join("alice", 1).await;
    let bob = net.join("bob", 2).await;

    // Both sides open a session before seeing the other's handshake
    let a1 = alice.client.encrypt(&bob.id, b"a1").await.unwrap();
    let b1 = bob.client.encrypt(&alice.id, b"b1").await.unwrap();

    let at_bob = bob.client.decrypt(&alice.id, &a1.envelope).await;
    let at_alice = alice.client.decrypt(&bob.id, &b1.envelope).await;

    // Exactly one handshake wins; the losing one is stale, not forged
    match (&at_bob, &at_alice) {
        (Ok(text), Err(err)) => {
            assert_eq!(text, b"a1");
            assert_eq!(err.kind(), ErrorKind::StaleSession);
        }
        (Err(err), Ok(text)) => {
            assert_eq!(text, b"b1");
            assert_eq!(err.kind(), ErrorKind::StaleSession);
        }
        other => panic!("expected exactly one accepted handshake, got {:?}", other),
    }

    // Both ends converged on the same session
    for round in 0..3u8 {
        let text = format!("alice {}", round);
        let out = alice.client.encrypt(&bob.id, text.as_bytes()).await.unwrap();
        assert_eq!(
            bob.client.decrypt(&alice.id, &out.envelope).await.unwrap(),
            text.as_bytes()
        );

        let text = format!("bob {}", round);
        let out = bob.client.encrypt(&alice.id, text.as_bytes()).await.unwrap();
        assert_eq!(
            alice.client.decrypt(&bob.id, &out.envelope).await.unwrap(),
            text.as_bytes()
        );
    }
}

#[tokio::test]
async fn test_sender_copy_history() {
    let net = Network::new();
    let alice = net.join("alice", 1).await;
    let bob = net.join("bob", 2).await;

    let sent: Vec<_> = send_all(&alice, &bob, &["one", "two", "three"]).await;
    for (text, envelope) in sent {
        assert_eq!(
            alice.client.decrypt_sender_copy(&envelope).await.unwrap(),
            text.as_bytes()
        );
    }
}

async fn send_all(
    from: &common::Party,
    to: &common::Party,
    texts: &[&'static str],
) -> Vec<(&'static str, tessera_core::Envelope)> {
    let mut out = Vec::new();
    for text in texts {
        let message = from.client.encrypt(&to.id, text.as_bytes()).await.unwrap();
        out.push((*text, message.envelope));
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_encrypts_to_one_peer() {
    let net = Network::new();
    let alice = net.join("alice", 1).await;
    let bob = net.join("bob", 2).await;

    let mut tasks = Vec::new();
    for i in 0..20u8 {
        let client = alice.client.clone();
        let peer = bob.id.clone();
        tasks.push(tokio::spawn(async move {
            client.encrypt(&peer, &[i]).await.unwrap().envelope
        }));
    }

    let mut envelopes = Vec::new();
    for task in tasks {
        envelopes.push(task.await.unwrap());
    }

    // One session, twenty distinct counters
    let counters: HashSet<u32> = envelopes
        .iter()
        .map(|e| match &e.encrypted {
            EncryptedPayload::Ratchet(p) => p.counter,
            other => panic!("unexpected format {}", other.format_name()),
        })
        .collect();
    assert_eq!(counters, (0..20).collect());

    let mut decrypts = Vec::new();
    for envelope in envelopes {
        let client = bob.client.clone();
        let peer = alice.id.clone();
        decrypts.push(tokio::spawn(async move {
            client.decrypt(&peer, &envelope).await
        }));
    }

    let mut received = Vec::new();
    for task in decrypts {
        received.push(task.await.unwrap().unwrap()[0]);
    }
    received.sort_unstable();
    assert_eq!(received, (0..20).collect::<Vec<u8>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_peer_does_not_block_others() {
    let net = Network::new();
    let alice = net.join("alice", 1).await;
    let bob = net.join("bob", 2).await;

    // Hold bob's session guard for the whole test
    let guard = alice.client.sessions().lock(&bob.id).await;

    let carol = net.join("carol", 3).await;
    let out = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        alice.client.encrypt(&carol.id, b"not blocked"),
    )
    .await
    .expect("encrypt to carol blocked on bob's session")
    .unwrap();
    drop(guard);

    assert_eq!(
        carol.client.decrypt(&alice.id, &out.envelope).await.unwrap(),
        b"not blocked"
    );
}
