//! Node configuration.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::Result;

/// Subdirectory of the node home holding persisted key shares.
const KEY_SHARE_DIR: &str = "data/frost_keys";

/// Configuration for a coordinator node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node home directory.
    pub home: PathBuf,

    /// This node's validator consensus address, lowercase hex.
    ///
    /// Set at startup from the validator key; an empty address means
    /// the node never participates in ceremonies.
    pub validator_address: String,

    /// Session timeout settings.
    pub session: SessionConfig,
}

/// Height-based session timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Blocks a DKG ceremony may run before it fails.
    pub dkg_timeout_blocks: u64,

    /// Blocks a signing session may run before it fails.
    pub signing_timeout_blocks: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dkg_timeout_blocks: 100,
            signing_timeout_blocks: 50,
        }
    }
}

impl NodeConfig {
    /// Load a node config from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&contents)?)
    }

    /// Directory where persisted key shares live.
    pub fn key_share_dir(&self) -> PathBuf {
        self.home.join(KEY_SHARE_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = NodeConfig::default();
        assert_eq!(config.session.dkg_timeout_blocks, 100);
        assert_eq!(config.session.signing_timeout_blocks, 50);
        assert!(config.validator_address.is_empty());
    }

    #[test]
    fn loads_partial_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            "home = \"/tmp/frostbft\"\nvalidator_address = \"aabb\"\n",
        )?;
        let config = NodeConfig::load(&path)?;
        assert_eq!(config.validator_address, "aabb");
        assert_eq!(config.session.dkg_timeout_blocks, 100);
        assert!(config
            .key_share_dir()
            .ends_with("data/frost_keys"));
        Ok(())
    }
}
