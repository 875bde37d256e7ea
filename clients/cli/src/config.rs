//! CLI configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tessera_protocol::ProtocolConfig;

/// CLI configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Vault directory
    pub storage_path: PathBuf,
    /// Protocol settings
    pub protocol: ProtocolConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        let storage_path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tessera");

        Self {
            storage_path,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl CliConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tessera")
            .join("config.toml")
    }

    /// Load config from file or create default
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: CliConfig = toml::from_str(&content)?;
            config
                .protocol
                .validate()
                .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
            Ok(config)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            config.save(path)?;

            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
