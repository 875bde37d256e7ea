//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use tessera_core::{MemoryDirectory, MemoryVault, PeerId};
use tessera_protocol::{E2eeClient, ProtocolConfig};

/// 300 well-mixed rolls; different variants give different identities
pub fn rolls(variant: u8) -> Vec<u8> {
    let mut state = 0x9e37_79b9_7f4a_7c15_u64 ^ u64::from(variant).wrapping_mul(0x2545_f491);
    (0..300)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) % 6) as u8 + 1
        })
        .collect()
}

/// Fast configuration with the minimum pre-key count
pub fn config() -> ProtocolConfig {
    ProtocolConfig {
        one_time_prekey_count: 50,
        ..ProtocolConfig::insecure_for_tests()
    }
}

/// One participant
pub struct Party {
    pub id: PeerId,
    pub client: Arc<E2eeClient>,
    pub vault: Arc<MemoryVault>,
}

/// Participants sharing one directory
pub struct Network {
    pub directory: Arc<MemoryDirectory>,
}

impl Network {
    pub fn new() -> Self {
        Self {
            directory: Arc::new(MemoryDirectory::new()),
        }
    }

    /// Create a party with a fresh vault and publish its bundle
    pub async fn join(&self, name: &str, variant: u8) -> Party {
        self.join_with(name, variant, config(), Arc::new(MemoryVault::new()))
            .await
    }

    /// Create a party over the given vault and configuration
    pub async fn join_with(
        &self,
        name: &str,
        variant: u8,
        config: ProtocolConfig,
        vault: Arc<MemoryVault>,
    ) -> Party {
        let client = E2eeClient::new(config, vault.clone(), self.directory.clone()).unwrap();
        let bundle = client.initialize(&rolls(variant)).await.unwrap();
        let id = PeerId::from(name);
        self.directory.publish(id.clone(), bundle);

        Party {
            id,
            client: Arc::new(client),
            vault,
        }
    }
}
