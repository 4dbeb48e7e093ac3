//! Configuration for the wallet client.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    rpc::DEFAULT_RPC_URL,
    session::{default_required_namespaces, is_valid_chain_id, Metadata, RequiredNamespaces, DEFAULT_CHAIN_ID},
    submitter::TRANSFER_GAS_LIMIT,
};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Project id registered with the pairing relay
    #[serde(default)]
    pub project_id: String,

    /// Metadata shown to the wallet when pairing
    #[serde(default = "default_metadata")]
    pub metadata: Metadata,

    /// Chain JSON-RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// CAIP-2 chain that transactions target
    #[serde(default = "default_chain_id")]
    pub chain_id: String,

    /// Namespaces requested in every pairing proposal
    #[serde(default = "default_required_namespaces")]
    pub required_namespaces: RequiredNamespaces,

    /// How long to wait for the wallet to approve a proposal
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,

    /// Timeout for chain RPC requests
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Gas limit sent with transfers
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

fn default_metadata() -> Metadata {
    Metadata {
        name: "Pairing Wallet".to_string(),
        description: "Remote-signer wallet client".to_string(),
        url: "https://walletconnect.com".to_string(),
        icons: vec!["https://walletconnect.com/walletconnect-logo.png".to_string()],
    }
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.to_string()
}

fn default_chain_id() -> String {
    DEFAULT_CHAIN_ID.to_string()
}

fn default_approval_timeout() -> u64 {
    300
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_gas_limit() -> u64 {
    TRANSFER_GAS_LIMIT
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            metadata: default_metadata(),
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
            required_namespaces: default_required_namespaces(),
            approval_timeout_secs: default_approval_timeout(),
            rpc_timeout_secs: default_rpc_timeout(),
            gas_limit: default_gas_limit(),
        }
    }
}

impl AppConfig {
    /// Default config location (`~/.pairing-wallet/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pairing-wallet")
            .join("config.toml")
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if it
    /// exists, else defaults. Not validated; commands check what they use.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::read(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project_id.trim().is_empty() {
            anyhow::bail!("project_id must be set");
        }

        let url = url::Url::parse(&self.rpc_url)
            .map_err(|e| anyhow::anyhow!("rpc_url is not a valid URL: {}", e))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("rpc_url must use http or https, got {}", url.scheme());
        }

        if !is_valid_chain_id(&self.chain_id) {
            anyhow::bail!("chain_id must be a CAIP-2 id like eip155:1, got {}", self.chain_id);
        }

        if self.required_namespaces.is_empty() {
            anyhow::bail!("At least one required namespace must be specified");
        }
        for (name, requirement) in &self.required_namespaces {
            if requirement.chains.is_empty() {
                anyhow::bail!("required namespace {} lists no chains", name);
            }
            if let Some(chain) = requirement.chains.iter().find(|c| !is_valid_chain_id(c)) {
                anyhow::bail!("required namespace {} has invalid chain {}", name, chain);
            }
        }

        if self.approval_timeout_secs == 0 {
            anyhow::bail!("approval_timeout_secs must be greater than zero");
        }
        if self.rpc_timeout_secs == 0 {
            anyhow::bail!("rpc_timeout_secs must be greater than zero");
        }

        if self.gas_limit < TRANSFER_GAS_LIMIT {
            anyhow::bail!(
                "gas_limit must be at least {}, got {}",
                TRANSFER_GAS_LIMIT,
                self.gas_limit
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> AppConfig {
        AppConfig {
            project_id: "abc123".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.rpc_url, "https://cloudflare-eth.com");
        assert_eq!(config.chain_id, "eip155:1");
        assert_eq!(config.approval_timeout_secs, 300);
        assert_eq!(config.gas_limit, 21_000);
        assert!(config.required_namespaces.contains_key("eip155"));
        // No project id yet
        assert!(config.validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let bad = [
            AppConfig { rpc_url: "not a url".to_string(), ..valid() },
            AppConfig { rpc_url: "ftp://node.example".to_string(), ..valid() },
            AppConfig { chain_id: "mainnet".to_string(), ..valid() },
            AppConfig { required_namespaces: RequiredNamespaces::new(), ..valid() },
            AppConfig { approval_timeout_secs: 0, ..valid() },
            AppConfig { rpc_timeout_secs: 0, ..valid() },
            AppConfig { gas_limit: 20_999, ..valid() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
project_id = "demo-project"
rpc_url = "http://localhost:8545"
approval_timeout_secs = 60

[metadata]
name = "CLI"

[required_namespaces.eip155]
chains = ["eip155:1", "eip155:10"]
methods = ["eth_sendTransaction"]
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.project_id, "demo-project");
        assert_eq!(config.rpc_url, "http://localhost:8545");
        assert_eq!(config.approval_timeout_secs, 60);
        assert_eq!(config.rpc_timeout_secs, 30);
        assert_eq!(config.metadata.name, "CLI");
        assert!(config.metadata.icons.is_empty());
        assert_eq!(config.required_namespaces["eip155"].chains.len(), 2);
        assert!(config.required_namespaces["eip155"].events.is_empty());
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "project_id = \"\"").unwrap();
        assert!(AppConfig::from_file(file.path()).is_err());
        // Loading alone does not validate
        assert!(AppConfig::load(Some(file.path())).is_ok());

        assert!(AppConfig::load(Some(Path::new("/nonexistent/config.toml"))).is_err());
    }
}
