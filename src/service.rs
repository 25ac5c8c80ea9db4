//! Request handlers for the payment API.
//!
//! [`SettlementService`] validates caller input, provisions deposit wallets, and triggers
//! the [`Orchestrator`]. It is transport agnostic; the demo server maps it onto HTTP routes.

use crate::bridge::CctpBridge;
use crate::chains::ChainRegistry;
use crate::config::SettlementConfig;
use crate::errors::{Result, SettlementError};
use crate::observer::EvmObserver;
use crate::orchestrator::Orchestrator;
use crate::pool::ShadowPool;
use crate::store::{FileStore, PaymentStore};
use crate::types::{
    CreatePaymentRequest, PaymentDraft, PaymentPatch, PaymentRequest, PaymentStatus,
    SubmitTxRequest,
};
use crate::utils::{is_tx_hash, solana_address_to_bytes32, validate_amount};
use crate::wallet::{DepositWalletProvisioner, KeyCipher};
use std::sync::Arc;
use tracing::{info, warn};

/// Entry points behind the payment routes.
#[derive(Debug, Clone)]
pub struct SettlementService {
    store: Arc<dyn PaymentStore>,
    orchestrator: Arc<Orchestrator>,
    provisioner: DepositWalletProvisioner,
    chains: Arc<ChainRegistry>,
}

impl SettlementService {
    /// Creates a service; the store is the orchestrator's.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        provisioner: DepositWalletProvisioner,
        chains: Arc<ChainRegistry>,
    ) -> Self {
        Self {
            store: orchestrator.store().clone(),
            orchestrator,
            provisioner,
            chains,
        }
    }

    /// Wires the production components from configuration.
    ///
    /// Fails immediately if any required secret or endpoint is missing.
    pub fn from_config(config: &SettlementConfig) -> Result<Self> {
        let chains = Arc::new(ChainRegistry::from_config(config)?);
        let cipher = Arc::new(KeyCipher::from_config(config)?);

        let store: Arc<dyn PaymentStore> = Arc::new(FileStore::new(&config.store_dir));
        let observer = Arc::new(EvmObserver::new(chains.clone()));
        let bridge = Arc::new(CctpBridge::new(config, chains.clone(), cipher.clone())?);
        let pool = Arc::new(ShadowPool::new(config)?);

        let orchestrator = Arc::new(Orchestrator::new(store, observer, bridge, pool));
        Ok(Self::new(
            orchestrator,
            DepositWalletProvisioner::new(cipher),
            chains,
        ))
    }

    /// The orchestrator behind this service.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Validates a new payment, provisions its deposit wallet and stores it as `created`.
    pub async fn handle_create(&self, request: CreatePaymentRequest) -> Result<PaymentRequest> {
        let amount_usdc = request
            .amount_usdc
            .ok_or_else(|| SettlementError::ValidationError("amountUsdc is required.".to_string()))?;
        validate_amount(amount_usdc)?;

        let source_domain = request
            .source_domain
            .ok_or_else(|| SettlementError::ValidationError("sourceDomain is required.".to_string()))?;
        let chain = self.chains.evm_by_domain(source_domain)?;

        let destination_wallet = request
            .destination_wallet
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .ok_or_else(|| {
                SettlementError::ValidationError("destinationWallet is required.".to_string())
            })?;
        solana_address_to_bytes32(&destination_wallet).map_err(|_| {
            SettlementError::ValidationError("destinationWallet is not a valid Solana address.".to_string())
        })?;

        if request.auto_deposit_approved != Some(true) {
            return Err(SettlementError::ValidationError(
                "Auto deposit approval is required.".to_string(),
            ));
        }

        let wallet = self.provisioner.create_deposit_wallet()?;
        let payment = self
            .store
            .create(PaymentDraft {
                amount_usdc,
                source_domain,
                source_chain: chain.name.clone(),
                source_wallet_address: Some(wallet.address),
                source_wallet_private_key_enc: Some(wallet.private_key_enc),
                destination_wallet,
                label: request.label,
                reference: request.reference,
                note: request.note,
                auto_deposit_approved: true,
            })
            .await?;

        info!(payment_id = %payment.id, chain = %payment.source_chain, amount = amount_usdc, "Payment created");
        Ok(payment.redacted())
    }

    /// Reads a payment. Payments still waiting on the payer are advanced in the background.
    pub async fn handle_get(&self, id: &str) -> Result<PaymentRequest> {
        let payment = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| SettlementError::PaymentNotFound(id.to_string()))?;

        if payment.status.is_waiting_on_payer() {
            self.spawn_advance(&payment.id);
        }
        Ok(payment.redacted())
    }

    /// Records a burn hash supplied by the payer and resumes the payment from it.
    ///
    /// The hash must be `0x` followed by 64 hex digits. A different hash than the one
    /// already stored is rejected. Re-submitting the same hash resumes a failed payment
    /// from its last checkpoint; while the payment is still in progress it is a
    /// [`SettlementError::StatusConflict`].
    pub async fn handle_submit(&self, request: SubmitTxRequest) -> Result<PaymentRequest> {
        let (Some(id), Some(hash)) = (request.id, request.source_tx_hash) else {
            return Err(SettlementError::ValidationError(
                "id and sourceTxHash are required.".to_string(),
            ));
        };
        let hash = hash.trim().to_string();
        if !is_tx_hash(&hash) {
            return Err(SettlementError::ValidationError(
                "sourceTxHash must be a 32-byte hex value.".to_string(),
            ));
        }

        let payment = self
            .store
            .get(&id)
            .await?
            .ok_or_else(|| SettlementError::PaymentNotFound(id.clone()))?;
        if payment.status == PaymentStatus::Completed {
            return Err(SettlementError::ValidationError(
                "Payment is already completed.".to_string(),
            ));
        }

        // Once the hash is set, only a failed payment may be moved back to `submitted`;
        // any other status may be a lease held by a running advance.
        if let Some(existing) = &payment.source_tx_hash {
            if *existing != hash {
                return Err(SettlementError::SourceTxHashImmutable(existing.clone()));
            }
            if payment.status != PaymentStatus::Failed {
                return Err(SettlementError::StatusConflict {
                    expected: PaymentStatus::Failed,
                    actual: payment.status,
                });
            }
        }

        let updated = self
            .store
            .update_if_status(&id, payment.status, PaymentPatch::submitted(hash))
            .await?
            .ok_or_else(|| SettlementError::PaymentNotFound(id.clone()))?;
        info!(payment_id = %id, previous = %payment.status, "Burn hash submitted");

        self.spawn_advance(&id);
        Ok(updated.redacted())
    }

    /// Advances a payment and waits for the call to stop.
    pub async fn handle_advance(&self, id: &str) -> Result<PaymentRequest> {
        self.orchestrator
            .advance(id)
            .await?
            .map(|payment| payment.redacted())
            .ok_or_else(|| SettlementError::PaymentNotFound(id.to_string()))
    }

    fn spawn_advance(&self, id: &str) {
        let orchestrator = self.orchestrator.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.advance(&id).await {
                warn!(payment_id = %id, error = %e, "Background advance failed");
            }
        });
    }
}
