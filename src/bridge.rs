//! CCTP bridge client.
//!
//! Burns USDC on the source chain through TokenMessengerV2, polls the attestation
//! authority for the signed message, and hands the attested message to the destination
//! chain forwarder.

use crate::chains::{ChainRegistry, SOLANA_DOMAIN};
use crate::config::{SettlementConfig, FORWARDER_URL_ENV};
use crate::errors::{Result, SettlementError};
use crate::observer::Erc20;
use crate::types::{AttestationMessage, AttestationResponse, ForwardRequest, ForwardResponse};
use crate::utils::parse_address;
use crate::wallet::KeyCipher;
use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::{TransactionReceipt, U256, U64};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

abigen!(
    TokenMessengerV2,
    r#"[
        function depositForBurn(uint256 amount, uint32 destinationDomain, bytes32 mintRecipient, address burnToken, bytes32 destinationCaller, uint256 maxFee, uint32 minFinalityThreshold) external
    ]"#
);

/// Parameters of a source-chain burn.
#[derive(Debug, Clone)]
pub struct BurnRequest {
    /// CCTP domain of the source chain
    pub source_domain: u32,
    /// Sealed private key of the deposit wallet
    pub encrypted_key: String,
    /// Amount in USDC units
    pub amount: U256,
    /// Mint recipient on the destination chain
    pub destination_recipient: [u8; 32],
}

/// Cross-chain transfer operations.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Approves and burns on the source chain; returns the burn transaction hash.
    async fn burn(&self, request: BurnRequest) -> Result<String>;

    /// Polls the attestation authority until the burn is attested.
    async fn wait_for_attestation(&self, source_domain: u32, tx_hash: &str)
        -> Result<AttestationMessage>;

    /// Relays an attested message to the destination chain; returns the forwarding id.
    async fn forward(&self, message: &AttestationMessage, recipient: &str) -> Result<String>;
}

/// [`Bridge`] speaking CCTP v2 on EVM source chains.
#[derive(Debug, Clone)]
pub struct CctpBridge {
    chains: Arc<ChainRegistry>,
    cipher: Arc<KeyCipher>,
    http_client: Client,
    iris_base_url: Url,
    forwarder_url: Url,
    max_fee: U256,
    min_finality_threshold: u32,
    poll_interval: Duration,
    max_attempts: u32,
}

impl CctpBridge {
    /// Creates the bridge client. Fails if the forwarder endpoint is not configured.
    pub fn new(
        config: &SettlementConfig,
        chains: Arc<ChainRegistry>,
        cipher: Arc<KeyCipher>,
    ) -> Result<Self> {
        let forwarder_url = SettlementConfig::require(&config.forwarder_url, FORWARDER_URL_ENV)?;
        Ok(Self {
            chains,
            cipher,
            http_client: Client::new(),
            iris_base_url: Url::parse(&config.iris_base_url)?,
            forwarder_url: Url::parse(forwarder_url)?,
            max_fee: U256::from(config.max_fee),
            min_finality_threshold: config.min_finality_threshold,
            poll_interval: config.attestation_poll_interval,
            max_attempts: config.attestation_max_attempts,
        })
    }

    /// Sets a custom HTTP client.
    pub fn with_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    /// `GET {iris}/v2/messages/{domain}?transactionHash={hash}`
    fn attestation_url(&self, source_domain: u32, tx_hash: &str) -> Result<Url> {
        let mut url = self
            .iris_base_url
            .join(&format!("v2/messages/{}", source_domain))?;
        url.query_pairs_mut().append_pair("transactionHash", tx_hash);
        Ok(url)
    }

    /// One poll of the attestation authority; `None` while not yet complete.
    async fn poll_attestation(&self, url: &Url) -> Result<Option<AttestationMessage>> {
        let response = self.http_client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "Attestation not available yet");
            return Ok(None);
        }

        let body: AttestationResponse = response.json().await?;
        Ok(body.messages.into_iter().next().filter(AttestationMessage::is_complete))
    }
}

/// Fails unless the receipt reports success.
fn ensure_success(receipt: Option<TransactionReceipt>, what: &str) -> Result<TransactionReceipt> {
    let receipt = receipt
        .ok_or_else(|| SettlementError::BlockchainError(format!("No receipt for {}", what)))?;
    if receipt.status != Some(U64::from(1)) {
        return Err(SettlementError::BlockchainError(format!(
            "{} reverted in transaction {:?}",
            what, receipt.transaction_hash
        )));
    }
    Ok(receipt)
}

#[async_trait]
impl Bridge for CctpBridge {
    async fn burn(&self, request: BurnRequest) -> Result<String> {
        let chain = self.chains.evm_by_domain(request.source_domain)?;
        let usdc_address = parse_address(&chain.usdc_address)?;
        let messenger_address = parse_address(&chain.token_messenger)?;

        let wallet = self.cipher.decrypt_wallet(&request.encrypted_key)?;
        let owner = wallet.address();
        let provider = Provider::<Http>::try_from(self.chains.rpc_url(chain.chain_id)?.as_str())?;
        let client = Arc::new(SignerMiddleware::new(
            provider,
            wallet.with_chain_id(chain.chain_id),
        ));

        let usdc = Erc20::new(usdc_address, client.clone());
        let allowance = usdc
            .allowance(owner, messenger_address)
            .call()
            .await
            .map_err(|e| SettlementError::BlockchainError(format!("allowance failed: {}", e)))?;

        // The burn spends the allowance, so the approval must be mined first.
        if allowance < request.amount {
            let call = usdc.approve(messenger_address, request.amount);
            let pending_tx = call
                .send()
                .await
                .map_err(|e| SettlementError::BlockchainError(format!("approve failed: {}", e)))?;
            let receipt = pending_tx
                .await
                .map_err(|e| SettlementError::BlockchainError(format!("approve receipt error: {}", e)))?;
            let receipt = ensure_success(receipt, "approve")?;
            debug!(tx = ?receipt.transaction_hash, "Approval mined");
        }

        let messenger = TokenMessengerV2::new(messenger_address, client);
        let call = messenger.deposit_for_burn(
            request.amount,
            SOLANA_DOMAIN,
            request.destination_recipient,
            usdc_address,
            [0u8; 32],
            self.max_fee,
            self.min_finality_threshold,
        );
        let pending_tx = call
            .send()
            .await
            .map_err(|e| SettlementError::BlockchainError(format!("depositForBurn failed: {}", e)))?;
        let receipt = pending_tx
            .await
            .map_err(|e| SettlementError::BlockchainError(format!("depositForBurn receipt error: {}", e)))?;
        let receipt = ensure_success(receipt, "depositForBurn")?;

        let tx_hash = format!("{:?}", receipt.transaction_hash);
        info!(chain = %chain.name, %tx_hash, "Burn confirmed");
        Ok(tx_hash)
    }

    async fn wait_for_attestation(
        &self,
        source_domain: u32,
        tx_hash: &str,
    ) -> Result<AttestationMessage> {
        let url = self.attestation_url(source_domain, tx_hash)?;

        for attempt in 1..=self.max_attempts {
            if let Some(message) = self.poll_attestation(&url).await? {
                info!(attempt, "Attestation complete");
                return Ok(message);
            }
            debug!(attempt, max_attempts = self.max_attempts, "Attestation pending");
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(SettlementError::AttestationTimeout {
            attempts: self.max_attempts,
        })
    }

    async fn forward(&self, message: &AttestationMessage, recipient: &str) -> Result<String> {
        let request = ForwardRequest {
            message: message.message.clone(),
            attestation: message.attestation.clone(),
            recipient: recipient.to_string(),
        };

        let response = self
            .http_client
            .post(self.forwarder_url.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SettlementError::ForwarderError(format!("{}: {}", status, text)));
        }

        let forwarded: ForwardResponse = response.json().await?;
        forwarded.id().map(str::to_string).ok_or_else(|| {
            SettlementError::ForwarderError("response carries no signature or transaction".to_string())
        })
    }
}
