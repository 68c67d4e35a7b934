//! Configuration management for the pool orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub local_chain: LocalChainConfig,
    pub wallet: WalletConfig,
    /// Remote ledgers, keyed by a human-readable name
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub local_chain_id: u64,
    /// Label passed to the AMM when creating the local pool
    pub chain_label: String,
    /// Only this caller may register peers and selectors
    pub admin: Address,
    /// Quote currency carried by deposit messages
    pub quote_token: Address,
    #[serde(default = "default_create_pool_gas_limit")]
    pub create_pool_gas_limit: u64,
    #[serde(default = "default_deposit_gas_limit")]
    pub deposit_gas_limit: u64,
    #[serde(default = "default_receipt_gas_limit")]
    pub receipt_gas_limit: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_tx_timeout_secs")]
    pub tx_timeout_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

fn default_create_pool_gas_limit() -> u64 {
    3_000_000
}

fn default_deposit_gas_limit() -> u64 {
    2_000_000
}

fn default_receipt_gas_limit() -> u64 {
    500_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_tx_timeout_secs() -> u64 {
    120
}

fn default_health_check_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Expected `x-admin-token` header on admin routes
    pub admin_token: Option<String>,
    /// Expected `x-operator-token` header on pool and deposit requests
    pub operator_token: Option<String>,
    /// Expected `x-relay-token` header on relay deliveries
    pub relay_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// The ledger this orchestrator runs on
#[derive(Debug, Clone, Deserialize)]
pub struct LocalChainConfig {
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    pub amm_address: Address,
    pub swap_router_address: Address,
    pub relay_router_address: Address,
    /// Issuance contract notified on pool creation and completed deposits
    pub issuance_address: Option<Address>,
}

/// A remote ledger the orchestrator coordinates with
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    /// Either an integer or, for values above `i64::MAX`, a decimal string
    #[serde(deserialize_with = "deserialize_selector")]
    pub selector: u64,
    pub peer: Option<Address>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
    Arbitrum,
    Optimism,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
}

impl Settings {
    /// Load settings from the file named by `ORCHESTRATOR_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("ORCHESTRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str)?;

        let settings: Settings = toml::from_str(&config_str)
            .with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let local = self.orchestrator.local_chain_id;
        if local == 0 {
            anyhow::bail!("orchestrator.local_chain_id must be set");
        }
        if self.local_chain.rpc_urls.is_empty() {
            anyhow::bail!("Local chain {} has no RPC URLs configured", self.local_chain.name);
        }

        let mut seen = HashSet::new();
        for (name, chain) in &self.chains {
            if chain.chain_id == local {
                anyhow::bail!("Chain {} reuses the local chain id {}", name, local);
            }
            if !seen.insert(chain.chain_id) {
                anyhow::bail!("Duplicate chain id {} (chain {})", chain.chain_id, name);
            }
            if chain.enabled && chain.selector == 0 {
                anyhow::bail!("Chain {} has no messaging selector", name);
            }
            if chain.enabled && chain.peer.is_none() {
                tracing::warn!("Chain {} has no peer configured - register it through the API", name);
            }
        }

        Ok(())
    }

    /// Enabled remote chains, ordered by chain id
    pub fn remote_chains(&self) -> Vec<(&String, &ChainConfig)> {
        let mut chains: Vec<_> = self.chains.iter().filter(|(_, c)| c.enabled).collect();
        chains.sort_by_key(|(_, c)| c.chain_id);
        chains
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// TOML integers are signed 64-bit, so large selectors arrive as strings
fn deserialize_selector<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Selector {
        Int(u64),
        Str(String),
    }

    match Selector::deserialize(deserializer)? {
        Selector::Int(value) => Ok(value),
        Selector::Str(value) => value.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BASE: &str = r#"
[orchestrator]
local_chain_id = 1
chain_label = "ethereum"
admin = "0x00000000000000000000000000000000000000a1"
quote_token = "0x00000000000000000000000000000000000000c0"

[database]
url = "postgres://${TEST_ORCH_DB_USER}@localhost/orchestrator"
max_connections = 5
min_connections = 1

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[local_chain]
name = "ethereum"
rpc_urls = ["http://localhost:8545"]
gas_price_strategy = "eip1559"
max_gas_price_gwei = 200
amm_address = "0x0000000000000000000000000000000000000a00"
swap_router_address = "0x0000000000000000000000000000000000000b00"
relay_router_address = "0x0000000000000000000000000000000000000c00"

[wallet]
private_key_env = "ORCHESTRATOR_PRIVATE_KEY"
"#;

    fn write_config(extra: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}{}", BASE, extra).unwrap();
        file
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_with_defaults_and_remote_chains() {
        env::set_var("TEST_ORCH_DB_USER", "orchestrator");
        let file = write_config(
            r#"
[chains.arbitrum]
chain_id = 42161
name = "arbitrum"
selector = 4949039107694359620
peer = "0x00000000000000000000000000000000000000b2"
enabled = true

[chains.base]
chain_id = 8453
name = "base"
selector = "15971525489660198786"
enabled = false
"#,
        );

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.orchestrator.local_chain_id, 1);
        assert_eq!(settings.orchestrator.deposit_gas_limit, 2_000_000);
        assert_eq!(settings.database.url, "postgres://orchestrator@localhost/orchestrator");
        assert_eq!(settings.local_chain.gas_price_strategy, GasPriceStrategy::Eip1559);
        assert!(settings.local_chain.issuance_address.is_none());

        let remote = settings.remote_chains();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].1.chain_id, 42161);
        assert_eq!(
            settings.get_chain_by_id(8453).map(|c| c.selector),
            Some(15971525489660198786)
        );
    }

    #[test]
    fn test_remote_chain_reusing_local_id_is_rejected() {
        let file = write_config(
            r#"
[chains.mirror]
chain_id = 1
name = "mirror"
selector = 7
enabled = true
"#,
        );
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("reuses the local chain id"));
    }

    #[test]
    fn test_duplicate_chain_ids_are_rejected() {
        let file = write_config(
            r#"
[chains.a]
chain_id = 10
name = "a"
selector = 7
enabled = true

[chains.b]
chain_id = 10
name = "b"
selector = 8
enabled = true
"#,
        );
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Duplicate chain id 10"));
    }

    #[test]
    fn test_missing_local_chain_is_rejected() {
        let file = write_config("").into_temp_path();
        let content = std::fs::read_to_string(&file)
            .unwrap()
            .replace("local_chain_id = 1", "local_chain_id = 0");
        std::fs::write(&file, content).unwrap();

        let err = Settings::load_from(&file).unwrap_err();
        assert!(err.to_string().contains("local_chain_id"));
    }
}
