//! CCTP chain registry.
//!
//! Maps bridge domains to chain metadata: which domains can carry USDC, which of them
//! are EVM chains with a deposit-wallet flow, and where to reach their RPC nodes.

use crate::config::SettlementConfig;
use crate::errors::{Result, SettlementError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// CCTP domain of the destination chain.
pub const SOLANA_DOMAIN: u32 = 5;

/// TokenMessengerV2 is deployed at the same address on every EVM chain.
pub const TOKEN_MESSENGER_V2_ADDRESS: &str = "0x28b5a0e9C621a5BadaA536219b3a228C8168cf5d";

/// Execution environment of a CCTP chain.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// EVM-compatible chain.
    Evm,
    /// Solana.
    Solana,
}

/// A chain reachable through CCTP.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CctpChain {
    /// CCTP domain identifier.
    pub domain: u32,
    /// Display name.
    pub name: &'static str,
    /// Execution environment.
    #[serde(rename = "type")]
    pub kind: ChainKind,
    /// Whether native USDC can be burned and minted here.
    #[serde(rename = "usdcSupported")]
    pub usdc_supported: bool,
    /// Mainnet deployment.
    pub mainnet: bool,
}

const fn chain(domain: u32, name: &'static str, kind: ChainKind) -> CctpChain {
    CctpChain {
        domain,
        name,
        kind,
        usdc_supported: true,
        mainnet: true,
    }
}

/// Every CCTP domain that carries USDC.
pub const CCTP_USDC_CHAINS: &[CctpChain] = &[
    chain(0, "Ethereum", ChainKind::Evm),
    chain(1, "Avalanche", ChainKind::Evm),
    chain(2, "OP Mainnet", ChainKind::Evm),
    chain(3, "Arbitrum", ChainKind::Evm),
    chain(5, "Solana", ChainKind::Solana),
    chain(6, "Base", ChainKind::Evm),
    chain(7, "Polygon PoS", ChainKind::Evm),
    chain(10, "Unichain", ChainKind::Evm),
    chain(11, "Linea", ChainKind::Evm),
    chain(12, "Codex", ChainKind::Evm),
    chain(13, "Sonic", ChainKind::Evm),
    chain(14, "World Chain", ChainKind::Evm),
    chain(15, "Monad", ChainKind::Evm),
    chain(16, "Sei", ChainKind::Evm),
    chain(18, "XDC", ChainKind::Evm),
    chain(19, "HyperEVM", ChainKind::Evm),
    chain(21, "Ink", ChainKind::Evm),
    chain(22, "Plume", ChainKind::Evm),
];

/// Looks up a CCTP chain by domain.
pub fn cctp_chain(domain: u32) -> Option<&'static CctpChain> {
    CCTP_USDC_CHAINS.iter().find(|c| c.domain == domain)
}

/// An EVM source chain with a deposit-wallet flow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvmChain {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// CCTP domain identifier.
    pub domain: u32,
    /// Display name.
    pub name: String,
    /// USDC token contract.
    pub usdc_address: String,
    /// TokenMessengerV2 contract.
    #[serde(rename = "tokenMessengerV2")]
    pub token_messenger: String,
}

impl EvmChain {
    fn builtin(chain_id: u64, domain: u32, name: &str, usdc_address: &str) -> Self {
        Self {
            chain_id,
            domain,
            name: name.to_string(),
            usdc_address: usdc_address.to_string(),
            token_messenger: TOKEN_MESSENGER_V2_ADDRESS.to_string(),
        }
    }
}

/// Built-in EVM source chains.
pub fn default_evm_chains() -> Vec<EvmChain> {
    vec![
        EvmChain::builtin(1, 0, "Ethereum", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        EvmChain::builtin(43114, 1, "Avalanche", "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
        EvmChain::builtin(10, 2, "OP Mainnet", "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
        EvmChain::builtin(42161, 3, "Arbitrum", "0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
        EvmChain::builtin(8453, 6, "Base", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        EvmChain::builtin(137, 7, "Polygon PoS", "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
    ]
}

/// Public RPC endpoints used when no override is configured.
fn public_node_rpc_url(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        1 => Some("https://ethereum-rpc.publicnode.com"),
        10 => Some("https://optimism-rpc.publicnode.com"),
        56 => Some("https://bsc-rpc.publicnode.com"),
        137 => Some("https://polygon-bor-rpc.publicnode.com"),
        42161 => Some("https://arbitrum-one-rpc.publicnode.com"),
        43114 => Some("https://avalanche-c-chain-rpc.publicnode.com"),
        8453 => Some("https://base-rpc.publicnode.com"),
        2222 => Some("https://kava-evm-rpc.publicnode.com"),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomChainEntry {
    chain_id: Option<u64>,
    domain: Option<u32>,
    name: Option<String>,
    usdc_address: Option<String>,
    #[serde(rename = "tokenMessengerV2")]
    token_messenger: Option<String>,
}

/// Parses the custom chain list; incomplete entries are skipped.
pub fn parse_custom_chains(raw: &str) -> Result<Vec<EvmChain>> {
    let entries: Vec<CustomChainEntry> = serde_json::from_str(raw)?;
    let chains = entries
        .into_iter()
        .filter_map(|entry| match entry {
            CustomChainEntry {
                chain_id: Some(chain_id),
                domain: Some(domain),
                name: Some(name),
                usdc_address: Some(usdc_address),
                token_messenger,
            } => Some(EvmChain {
                chain_id,
                domain,
                name,
                usdc_address,
                token_messenger: token_messenger
                    .unwrap_or_else(|| TOKEN_MESSENGER_V2_ADDRESS.to_string()),
            }),
            _ => {
                warn!("Skipping incomplete custom CCTP chain entry");
                None
            }
        })
        .collect();
    Ok(chains)
}

/// Resolves bridge domains to EVM chains and RPC endpoints.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    evm_chains: Vec<EvmChain>,
    rpc_overrides: HashMap<u64, String>,
}

impl ChainRegistry {
    /// Builds a registry from built-ins followed by `custom`; the first chain per domain wins.
    pub fn new(custom: Vec<EvmChain>, rpc_overrides: HashMap<u64, String>) -> Self {
        let mut evm_chains: Vec<EvmChain> = Vec::new();
        for chain in default_evm_chains().into_iter().chain(custom) {
            if !evm_chains.iter().any(|c| c.domain == chain.domain) {
                evm_chains.push(chain);
            }
        }
        Self {
            evm_chains,
            rpc_overrides,
        }
    }

    /// Builds the registry described by `config`.
    pub fn from_config(config: &SettlementConfig) -> Result<Self> {
        let custom = match &config.custom_chains_json {
            Some(raw) => parse_custom_chains(raw)?,
            None => Vec::new(),
        };
        Ok(Self::new(custom, config.rpc_overrides.clone()))
    }

    /// All EVM source chains.
    pub fn evm_chains(&self) -> &[EvmChain] {
        &self.evm_chains
    }

    /// The EVM chain behind a bridge domain.
    pub fn evm_by_domain(&self, domain: u32) -> Result<&EvmChain> {
        self.evm_chains
            .iter()
            .find(|c| c.domain == domain)
            .ok_or(SettlementError::UnsupportedDomain(domain))
    }

    /// RPC endpoint of an EVM chain: override first, then the public node.
    pub fn rpc_url(&self, chain_id: u64) -> Result<String> {
        if let Some(url) = self.rpc_overrides.get(&chain_id) {
            return Ok(url.clone());
        }
        public_node_rpc_url(chain_id)
            .map(str::to_string)
            .ok_or_else(|| {
                SettlementError::ConfigError(format!("No RPC URL available for chain {}.", chain_id))
            })
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new(Vec::new(), HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cctp_chain_lookup() {
        assert_eq!(cctp_chain(3).map(|c| c.name), Some("Arbitrum"));
        assert_eq!(cctp_chain(SOLANA_DOMAIN).map(|c| c.kind), Some(ChainKind::Solana));
        assert!(cctp_chain(4).is_none());
    }

    #[test]
    fn test_evm_by_domain() {
        let registry = ChainRegistry::default();
        let arbitrum = registry.evm_by_domain(3).unwrap();
        assert_eq!(arbitrum.chain_id, 42161);
        assert_eq!(arbitrum.token_messenger, TOKEN_MESSENGER_V2_ADDRESS);

        // Solana is a CCTP chain but not an EVM source
        assert!(matches!(
            registry.evm_by_domain(SOLANA_DOMAIN),
            Err(SettlementError::UnsupportedDomain(5))
        ));
    }

    #[test]
    fn test_custom_chains_merge() {
        let raw = r#"[
            {"chainId": 130, "domain": 10, "name": "Unichain", "usdcAddress": "0x078D782b760474a361dDA0AF3839290b0EF57AD6"},
            {"chainId": 999, "domain": 3, "name": "Shadowed Arbitrum", "usdcAddress": "0x0000000000000000000000000000000000000001"},
            {"chainId": 1, "name": "missing domain", "usdcAddress": "0x0"}
        ]"#;

        let custom = parse_custom_chains(raw).unwrap();
        assert_eq!(custom.len(), 2);

        let registry = ChainRegistry::new(custom, HashMap::new());
        assert_eq!(registry.evm_by_domain(10).unwrap().name, "Unichain");
        assert_eq!(registry.evm_by_domain(3).unwrap().chain_id, 42161);
        assert_eq!(registry.evm_chains().len(), 7);
    }

    #[test]
    fn test_rpc_url_resolution() {
        let mut overrides = HashMap::new();
        overrides.insert(42161, "https://my-arbitrum.test".to_string());
        let registry = ChainRegistry::new(Vec::new(), overrides);

        assert_eq!(registry.rpc_url(42161).unwrap(), "https://my-arbitrum.test");
        assert_eq!(registry.rpc_url(8453).unwrap(), "https://base-rpc.publicnode.com");
        assert!(matches!(
            registry.rpc_url(130),
            Err(SettlementError::ConfigError(_))
        ));
    }

    #[test]
    fn test_invalid_custom_json() {
        assert!(parse_custom_chains("not json").is_err());
    }
}
