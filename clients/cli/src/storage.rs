//! Local sled-backed vault for the CLI

use async_trait::async_trait;
use sled::Db;
use std::path::Path;

use tessera_core::{Error, Result, Vault};

/// Vault stored in a sled database
pub struct SledVault {
    db: Db,
}

impl SledVault {
    /// Open storage at path
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&path)?;
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

fn vault_error(e: sled::Error) -> Error {
    Error::Vault(e.to_string())
}

#[async_trait]
impl Vault for SledVault {
    async fn store_data(&self, key: &str, value: &str) -> Result<()> {
        self.db.insert(key, value.as_bytes()).map_err(vault_error)?;
        self.db.flush_async().await.map_err(vault_error)?;
        Ok(())
    }

    async fn get_data(&self, key: &str) -> Result<Option<String>> {
        match self.db.get(key).map_err(vault_error)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| Error::Vault(format!("value for {} is not UTF-8: {}", key, e))),
            None => Ok(None),
        }
    }

    async fn delete_data(&self, key: &str) -> Result<()> {
        self.db.remove(key).map_err(vault_error)?;
        self.db.flush_async().await.map_err(vault_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_reopen() {
        let dir = std::env::temp_dir().join(format!("tessera-vault-{}", std::process::id()));
        {
            let vault = SledVault::open(&dir).unwrap();
            vault.store_data("identity", "{\"k\":1}").await.unwrap();
            vault.store_data("gone", "x").await.unwrap();
            vault.delete_data("gone").await.unwrap();
            vault.delete_data("never-there").await.unwrap();
        }

        let vault = SledVault::open(&dir).unwrap();
        assert_eq!(
            vault.get_data("identity").await.unwrap().as_deref(),
            Some("{\"k\":1}")
        );
        assert!(vault.get_data("gone").await.unwrap().is_none());

        drop(vault);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
