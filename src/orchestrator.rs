//! Settlement orchestrator.
//!
//! [`Orchestrator::advance`] drives one payment as far along the settlement graph as the
//! current on-chain and off-chain state allows, then stops. It has no timers of its own:
//! status reads and manual submissions call it again.
//!
//! Every write is a compare-and-swap against the status this call last observed, so two
//! concurrent calls for the same payment can never both claim an irreversible step. The
//! statuses `burning`, `forwarding` and `depositing` are persisted *before* the side
//! effect they name and act as leases: a later call that finds one halts instead of
//! repeating the broadcast.

use crate::bridge::{Bridge, BurnRequest};
use crate::errors::{Result, SettlementError};
use crate::observer::ChainObserver;
use crate::pool::{PoolSettlement, USDC_MINT};
use crate::store::PaymentStore;
use crate::types::{AttestationMessage, PaymentPatch, PaymentRequest, PaymentStatus};
use crate::utils::{solana_address_to_bytes32, usdc_to_units};
use ethers::types::U256;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Upper bound on phases executed by one `advance` call.
///
/// A healthy payment needs at most four (fund, attest, forward, deposit).
pub const MAX_ADVANCE_STEPS: usize = 8;

/// Why an `advance` call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// `completed`, `failed`, or a deposit transaction is already recorded
    Settled,
    /// No approval or no provisioned deposit wallet
    NotReady,
    /// Another call holds the `burning` lease
    BurnInFlight,
    /// Another call holds the `forwarding` lease
    ForwardInFlight,
    /// Another call holds the `depositing` lease
    DepositInFlight,
    /// Deposit address is short of USDC
    AwaitingFunds,
    /// Deposit address has no native gas
    AwaitingGas,
    /// A concurrent writer moved the status first
    Contended,
}

/// Next unit of work for a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Check balances and burn on the source chain
    Fund,
    /// Wait for the attestation of a known burn
    Attest,
    /// Relay the attested message to the destination chain
    Forward,
    /// Deposit into the destination pool
    Deposit,
    /// Stop this call
    Halt(Halt),
}

impl Phase {
    /// Where a freshly loaded record resumes.
    pub fn resume(payment: &PaymentRequest) -> Self {
        if payment.status.is_terminal() || payment.deposit_tx.is_some() {
            return Phase::Halt(Halt::Settled);
        }

        if payment.source_tx_hash.is_none() {
            if !payment.auto_deposit_approved || !payment.has_deposit_wallet() {
                return Phase::Halt(Halt::NotReady);
            }
            if payment.status == PaymentStatus::Burning {
                return Phase::Halt(Halt::BurnInFlight);
            }
            return Phase::Fund;
        }

        if payment.forward_tx.is_none() {
            if payment.status == PaymentStatus::Forwarding {
                return Phase::Halt(Halt::ForwardInFlight);
            }
            if payment.attestation.is_some() && payment.attestation_message.is_some() {
                return Phase::Forward;
            }
            return Phase::Attest;
        }

        if payment.status == PaymentStatus::Depositing {
            return Phase::Halt(Halt::DepositInFlight);
        }
        Phase::Deposit
    }
}

/// Drives payments through burn, attestation, forwarding and pool deposit.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn PaymentStore>,
    observer: Arc<dyn ChainObserver>,
    bridge: Arc<dyn Bridge>,
    pool: Arc<dyn PoolSettlement>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over the given collaborators.
    pub fn new(
        store: Arc<dyn PaymentStore>,
        observer: Arc<dyn ChainObserver>,
        bridge: Arc<dyn Bridge>,
        pool: Arc<dyn PoolSettlement>,
    ) -> Self {
        Self {
            store,
            observer,
            bridge,
            pool,
        }
    }

    /// The store this orchestrator writes to.
    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    /// Advances a payment to its next stopping point and returns the stored record.
    ///
    /// Returns `Ok(None)` for an unknown id. Failures of the settlement itself are not
    /// returned: they are persisted as `status = failed` with the error message, keeping
    /// every transaction hash written so far. Only a store that cannot record the failure
    /// surfaces an error.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn advance(&self, payment_id: &str) -> Result<Option<PaymentRequest>> {
        let Some(mut payment) = self.store.get(payment_id).await? else {
            return Ok(None);
        };

        let mut phase = Phase::resume(&payment);
        if phase == Phase::Halt(Halt::NotReady) {
            warn!(status = %payment.status, "Payment is not approved or has no deposit wallet");
        }

        let mut steps = 0;
        while !matches!(phase, Phase::Halt(_)) {
            if steps == MAX_ADVANCE_STEPS {
                warn!(?phase, "Step limit reached");
                break;
            }
            steps += 1;
            debug!(?phase, status = %payment.status, "Running phase");

            phase = match self.run(phase, &mut payment).await {
                Ok(next) => next,
                Err(e) if e.is_conflict() => {
                    debug!(error = %e, "Lost a status race");
                    Phase::Halt(Halt::Contended)
                }
                Err(e) => {
                    warn!(error = %e, status = %payment.status, "Settlement failed");
                    self.fail(&mut payment, &e).await?;
                    Phase::Halt(Halt::Settled)
                }
            };
        }

        if let Phase::Halt(halt) = phase {
            debug!(?halt, status = %payment.status, "Advance halted");
        }
        if phase == Phase::Halt(Halt::Contended) {
            // the winner's record, not our stale copy
            return self.store.get(payment_id).await;
        }
        Ok(Some(payment))
    }

    async fn run(&self, phase: Phase, payment: &mut PaymentRequest) -> Result<Phase> {
        match phase {
            Phase::Fund => self.fund(payment).await,
            Phase::Attest => self.attest(payment).await,
            Phase::Forward => self.forward(payment).await,
            Phase::Deposit => self.deposit(payment).await,
            Phase::Halt(halt) => Ok(Phase::Halt(halt)),
        }
    }

    /// Moves the payment on from the status it was last read with.
    async fn transition(&self, payment: &mut PaymentRequest, patch: PaymentPatch) -> Result<()> {
        let updated = self
            .store
            .update_if_status(&payment.id, payment.status, patch)
            .await?
            .ok_or_else(|| SettlementError::PaymentNotFound(payment.id.clone()))?;
        *payment = updated;
        Ok(())
    }

    async fn fail(&self, payment: &mut PaymentRequest, error: &SettlementError) -> Result<()> {
        match self
            .transition(payment, PaymentPatch::failed(error.to_string()))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                // another call moved on; leave its state alone
                debug!(error = %e, "Not recording failure over a newer status");
                if let Some(current) = self.store.get(&payment.id).await? {
                    *payment = current;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fund(&self, payment: &mut PaymentRequest) -> Result<Phase> {
        let (Some(address), Some(encrypted_key)) = (
            payment.source_wallet_address.clone(),
            payment.source_wallet_private_key_enc.clone(),
        ) else {
            return Ok(Phase::Halt(Halt::NotReady));
        };

        let required = usdc_to_units(payment.amount_usdc)?;
        let balance = self.observer.usdc_balance(payment.source_domain, &address).await?;
        if balance < required {
            debug!(%balance, %required, "Deposit address is short of USDC");
            return self
                .wait_on_payer(payment, PaymentStatus::AwaitingFunds, Halt::AwaitingFunds)
                .await;
        }

        let gas = self.observer.native_balance(payment.source_domain, &address).await?;
        if gas == U256::zero() {
            return self
                .wait_on_payer(payment, PaymentStatus::AwaitingGas, Halt::AwaitingGas)
                .await;
        }

        let destination_recipient = solana_address_to_bytes32(&payment.destination_wallet)?;
        self.transition(payment, PaymentPatch::status(PaymentStatus::Burning))
            .await?;
        info!(amount = payment.amount_usdc, "Burning on source chain");

        let tx_hash = self
            .bridge
            .burn(BurnRequest {
                source_domain: payment.source_domain,
                encrypted_key,
                amount: required,
                destination_recipient,
            })
            .await?;

        self.transition(payment, PaymentPatch::submitted(tx_hash)).await?;
        Ok(Phase::Attest)
    }

    async fn wait_on_payer(
        &self,
        payment: &mut PaymentRequest,
        status: PaymentStatus,
        halt: Halt,
    ) -> Result<Phase> {
        if payment.status != status {
            self.transition(payment, PaymentPatch::status(status)).await?;
            info!(%status, "Waiting on payer");
        }
        Ok(Phase::Halt(halt))
    }

    async fn attest(&self, payment: &mut PaymentRequest) -> Result<Phase> {
        let tx_hash = payment
            .source_tx_hash
            .clone()
            .ok_or_else(|| SettlementError::Other("Attest phase without a burn hash".to_string()))?;

        if payment.status != PaymentStatus::AttestationPending {
            self.transition(payment, PaymentPatch::status(PaymentStatus::AttestationPending))
                .await?;
        }

        let message = self
            .bridge
            .wait_for_attestation(payment.source_domain, &tx_hash)
            .await?;
        if !message.is_complete() {
            return Err(SettlementError::AttestationError(
                "authority returned an incomplete message".to_string(),
            ));
        }

        self.transition(payment, PaymentPatch::attested(&message)).await?;
        info!(%tx_hash, "Burn attested");
        Ok(Phase::Forward)
    }

    async fn forward(&self, payment: &mut PaymentRequest) -> Result<Phase> {
        let (Some(attestation), Some(body)) =
            (payment.attestation.clone(), payment.attestation_message.clone())
        else {
            return Ok(Phase::Attest);
        };
        let message = AttestationMessage {
            message: body,
            attestation,
            status: Some("complete".to_string()),
            ..Default::default()
        };

        self.transition(payment, PaymentPatch::status(PaymentStatus::Forwarding))
            .await?;
        let forward_tx = self
            .bridge
            .forward(&message, &payment.destination_wallet)
            .await?;

        self.transition(payment, PaymentPatch::forwarded(forward_tx))
            .await?;
        info!(forward_tx = payment.forward_tx.as_deref().unwrap_or_default(), "Message forwarded");
        Ok(Phase::Deposit)
    }

    async fn deposit(&self, payment: &mut PaymentRequest) -> Result<Phase> {
        // arriving from Forward, this call already holds the lease
        if payment.status != PaymentStatus::Depositing {
            self.transition(payment, PaymentPatch::status(PaymentStatus::Depositing))
                .await?;
        }

        let deposit_tx = self
            .pool
            .deposit(&payment.destination_wallet, payment.amount_usdc, USDC_MINT)
            .await?;

        self.transition(payment, PaymentPatch::completed(deposit_tx))
            .await?;
        info!(deposit_tx = payment.deposit_tx.as_deref().unwrap_or_default(), "Payment completed");
        Ok(Phase::Halt(Halt::Settled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> PaymentRequest {
        PaymentRequest {
            id: "p1".into(),
            amount_usdc: 100.0,
            source_domain: 3,
            source_chain: "Arbitrum".into(),
            source_wallet_address: Some("0x0000000000000000000000000000000000000001".into()),
            source_wallet_private_key_enc: Some("iv:tag:data".into()),
            destination_wallet: "W".into(),
            label: None,
            reference: None,
            note: None,
            auto_deposit_approved: true,
            created_at: 0,
            updated_at: 0,
            status: PaymentStatus::Created,
            source_tx_hash: None,
            attestation: None,
            attestation_message: None,
            forward_tx: None,
            deposit_tx: None,
            error: None,
        }
    }

    #[test]
    fn test_resume_terminal() {
        let mut p = payment();
        p.status = PaymentStatus::Completed;
        assert_eq!(Phase::resume(&p), Phase::Halt(Halt::Settled));

        p.status = PaymentStatus::Failed;
        assert_eq!(Phase::resume(&p), Phase::Halt(Halt::Settled));

        let mut p = payment();
        p.source_tx_hash = Some("0xabc".into());
        p.deposit_tx = Some("D".into());
        p.status = PaymentStatus::Depositing;
        assert_eq!(Phase::resume(&p), Phase::Halt(Halt::Settled));
    }

    #[test]
    fn test_resume_before_burn() {
        let mut p = payment();
        assert_eq!(Phase::resume(&p), Phase::Fund);

        p.status = PaymentStatus::AwaitingGas;
        assert_eq!(Phase::resume(&p), Phase::Fund);

        p.status = PaymentStatus::Burning;
        assert_eq!(Phase::resume(&p), Phase::Halt(Halt::BurnInFlight));

        let mut p = payment();
        p.source_wallet_private_key_enc = None;
        assert_eq!(Phase::resume(&p), Phase::Halt(Halt::NotReady));

        let mut p = payment();
        p.auto_deposit_approved = false;
        assert_eq!(Phase::resume(&p), Phase::Halt(Halt::NotReady));
    }

    #[test]
    fn test_resume_after_burn() {
        let mut p = payment();
        p.source_tx_hash = Some("0xabc".into());
        p.status = PaymentStatus::Submitted;
        assert_eq!(Phase::resume(&p), Phase::Attest);

        // an unwalleted record with a manual hash still proceeds
        p.source_wallet_address = None;
        p.status = PaymentStatus::AttestationPending;
        assert_eq!(Phase::resume(&p), Phase::Attest);

        p.attestation = Some("A".into());
        p.attestation_message = Some("M".into());
        p.status = PaymentStatus::Attested;
        assert_eq!(Phase::resume(&p), Phase::Forward);

        p.status = PaymentStatus::Forwarding;
        assert_eq!(Phase::resume(&p), Phase::Halt(Halt::ForwardInFlight));

        p.forward_tx = Some("F".into());
        p.status = PaymentStatus::Depositing;
        assert_eq!(Phase::resume(&p), Phase::Halt(Halt::DepositInFlight));

        p.status = PaymentStatus::Submitted;
        assert_eq!(Phase::resume(&p), Phase::Deposit);
    }

    #[test]
    fn test_attestation_without_body_reattests() {
        let mut p = payment();
        p.source_tx_hash = Some("0xabc".into());
        p.attestation = Some("A".into());
        p.status = PaymentStatus::Attested;
        assert_eq!(Phase::resume(&p), Phase::Attest);
    }
}
