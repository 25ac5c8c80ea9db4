//! On-chain balance reads for deposit addresses.

use crate::chains::ChainRegistry;
use crate::errors::{Result, SettlementError};
use crate::utils::parse_address;
use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::U256;
use std::sync::Arc;

abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function allowance(address owner, address spender) external view returns (uint256)
    ]"#
);

/// Reads token and native-gas balances on a source chain.
#[async_trait]
pub trait ChainObserver: Send + Sync {
    /// USDC balance of `address`, in 6-decimal units.
    async fn usdc_balance(&self, domain: u32, address: &str) -> Result<U256>;

    /// Native gas balance of `address`, in wei.
    async fn native_balance(&self, domain: u32, address: &str) -> Result<U256>;
}

/// [`ChainObserver`] over EVM JSON-RPC.
#[derive(Debug, Clone)]
pub struct EvmObserver {
    chains: Arc<ChainRegistry>,
}

impl EvmObserver {
    /// Creates an observer resolving domains through `chains`.
    pub fn new(chains: Arc<ChainRegistry>) -> Self {
        Self { chains }
    }

    fn provider(&self, chain_id: u64) -> Result<Provider<Http>> {
        let rpc_url = self.chains.rpc_url(chain_id)?;
        Ok(Provider::<Http>::try_from(rpc_url.as_str())?)
    }
}

#[async_trait]
impl ChainObserver for EvmObserver {
    async fn usdc_balance(&self, domain: u32, address: &str) -> Result<U256> {
        let chain = self.chains.evm_by_domain(domain)?;
        let owner = parse_address(address)?;
        let usdc = parse_address(&chain.usdc_address)?;

        let token = Erc20::new(usdc, Arc::new(self.provider(chain.chain_id)?));
        token
            .balance_of(owner)
            .call()
            .await
            .map_err(|e| SettlementError::BlockchainError(format!("balanceOf failed: {}", e)))
    }

    async fn native_balance(&self, domain: u32, address: &str) -> Result<U256> {
        let chain = self.chains.evm_by_domain(domain)?;
        let owner = parse_address(address)?;

        let provider = self.provider(chain.chain_id)?;
        Ok(provider.get_balance(owner, None).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_domain() {
        let observer = EvmObserver::new(Arc::new(ChainRegistry::default()));
        let err = observer
            .usdc_balance(5, "0x0000000000000000000000000000000000000001")
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::UnsupportedDomain(5)));
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let observer = EvmObserver::new(Arc::new(ChainRegistry::default()));
        let err = observer.native_balance(3, "not-an-address").await.unwrap_err();
        assert!(matches!(err, SettlementError::InvalidAddress(_)));
    }
}
