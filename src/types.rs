//! Core type definitions for payment settlement.
//!
//! This module contains the persisted [`PaymentRequest`] record, its status graph,
//! the patches the store merges into it, and the wire types exchanged with the
//! attestation authority, the forwarding relayer, and HTTP callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimals of USDC on every supported chain.
pub const USDC_DECIMALS: u32 = 6;

/// Workflow state of a payment.
///
/// Forward order is `created → awaiting_funds → awaiting_gas → burning → submitted →
/// attestation_pending → attested → forwarding → depositing → completed`; `failed` is
/// reachable from any non-terminal state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Record exists, nothing observed on-chain yet
    Created,
    /// Deposit address holds less USDC than requested
    AwaitingFunds,
    /// Deposit address holds no native gas
    AwaitingGas,
    /// Approve and burn are being broadcast
    Burning,
    /// Burn hash known
    Submitted,
    /// Polling the attestation authority
    AttestationPending,
    /// Attestation received
    Attested,
    /// Attested message is being relayed to the destination chain
    Forwarding,
    /// Funds are being deposited into the pool
    Depositing,
    /// Pool deposit confirmed
    Completed,
    /// Last attempt raised an error; see `error`
    Failed,
}

impl PaymentStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::AwaitingFunds => "awaiting_funds",
            PaymentStatus::AwaitingGas => "awaiting_gas",
            PaymentStatus::Burning => "burning",
            PaymentStatus::Submitted => "submitted",
            PaymentStatus::AttestationPending => "attestation_pending",
            PaymentStatus::Attested => "attested",
            PaymentStatus::Forwarding => "forwarding",
            PaymentStatus::Depositing => "depositing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` end automatic advancement.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    /// Statuses a status read opportunistically advances from.
    pub fn is_waiting_on_payer(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Created | PaymentStatus::AwaitingFunds | PaymentStatus::AwaitingGas
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment collected on a source chain and settled into the destination pool.
///
/// Field names on the wire match the records written by earlier deployments, and every
/// optional field may be missing: absence means the phase that sets it was not reached.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Unique id
    pub id: String,

    /// Requested amount in whole USDC (decimal)
    pub amount_usdc: f64,

    /// CCTP domain of the source chain
    pub source_domain: u32,

    /// Human readable source chain name
    pub source_chain: String,

    /// Custodial deposit address on the source chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_wallet_address: Option<String>,

    /// Encrypted private key of the deposit address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_wallet_private_key_enc: Option<String>,

    /// Owner of the destination pool balance (base58 Solana address)
    pub destination_wallet: String,

    /// Opaque caller metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Opaque caller metadata, e.g. an invoice number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Opaque caller metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Payer approved the automatic pool deposit
    #[serde(default)]
    pub auto_deposit_approved: bool,

    /// Creation time, milliseconds since the Unix epoch
    pub created_at: i64,

    /// Last update time, milliseconds since the Unix epoch
    pub updated_at: i64,

    /// Current workflow state
    pub status: PaymentStatus,

    /// Burn transaction hash on the source chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tx_hash: Option<String>,

    /// Attestation signature returned by the authority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<String>,

    /// Attested message body, kept so forwarding can resume without re-polling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_message: Option<String>,

    /// Destination-chain forwarding transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_tx: Option<String>,

    /// Pool deposit transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_tx: Option<String>,

    /// Message of the last fatal error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentRequest {
    /// Returns a copy safe to hand to callers: the encrypted key never leaves the service.
    pub fn redacted(&self) -> Self {
        Self {
            source_wallet_private_key_enc: None,
            ..self.clone()
        }
    }

    /// True when a deposit wallet was provisioned for this payment.
    pub fn has_deposit_wallet(&self) -> bool {
        self.source_wallet_address.is_some() && self.source_wallet_private_key_enc.is_some()
    }
}

/// Input to [`crate::store::PaymentStore::create`]: everything except id, timestamps and status.
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct PaymentDraft {
    pub amount_usdc: f64,
    pub source_domain: u32,
    pub source_chain: String,
    pub source_wallet_address: Option<String>,
    pub source_wallet_private_key_enc: Option<String>,
    pub destination_wallet: String,
    pub label: Option<String>,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub auto_deposit_approved: bool,
}

/// Partial update merged into a stored record.
///
/// `None` leaves a field untouched. `error` is doubly optional so a patch can clear it;
/// when left as `None`, a transition to any status other than `failed` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(missing_docs)]
pub struct PaymentPatch {
    pub status: Option<PaymentStatus>,
    pub source_tx_hash: Option<String>,
    pub attestation: Option<String>,
    pub attestation_message: Option<String>,
    pub forward_tx: Option<String>,
    pub deposit_tx: Option<String>,
    pub error: Option<Option<String>>,
}

impl PaymentPatch {
    /// Patch that only moves the status.
    pub fn status(status: PaymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// `submitted` with the burn hash that anchors the rest of the flow.
    pub fn submitted(source_tx_hash: impl Into<String>) -> Self {
        Self {
            status: Some(PaymentStatus::Submitted),
            source_tx_hash: Some(source_tx_hash.into()),
            ..Self::default()
        }
    }

    /// `attested` with the attestation and its message body.
    pub fn attested(message: &AttestationMessage) -> Self {
        Self {
            status: Some(PaymentStatus::Attested),
            attestation: Some(message.attestation.clone()),
            attestation_message: Some(message.message.clone()),
            ..Self::default()
        }
    }

    /// `depositing` with the forwarding transaction.
    pub fn forwarded(forward_tx: impl Into<String>) -> Self {
        Self {
            status: Some(PaymentStatus::Depositing),
            forward_tx: Some(forward_tx.into()),
            ..Self::default()
        }
    }

    /// `completed` with the pool deposit transaction.
    pub fn completed(deposit_tx: impl Into<String>) -> Self {
        Self {
            status: Some(PaymentStatus::Completed),
            deposit_tx: Some(deposit_tx.into()),
            ..Self::default()
        }
    }

    /// `failed` with the error message; checkpoints already written are kept.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(PaymentStatus::Failed),
            error: Some(Some(error.into())),
            ..Self::default()
        }
    }
}

/// A message returned by the attestation authority.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttestationMessage {
    /// Hex encoded CCTP message
    #[serde(default)]
    pub message: String,

    /// Hex encoded attestation signature(s)
    #[serde(default)]
    pub attestation: String,

    /// "complete" once the attestation is final
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Decoded message fields, as returned by the authority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_message: Option<serde_json::Value>,

    /// Decoded burn message body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_message_body: Option<serde_json::Value>,
}

impl AttestationMessage {
    /// Complete, with both a message body and a signature.
    pub fn is_complete(&self) -> bool {
        self.status.as_deref() == Some("complete")
            && !self.message.is_empty()
            && !self.attestation.is_empty()
    }
}

/// Response of `GET /v2/messages/{domain}`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AttestationResponse {
    /// Messages emitted by the burn transaction
    #[serde(default)]
    pub messages: Vec<AttestationMessage>,
}

/// Body posted to the forwarding relayer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ForwardRequest {
    /// Attested CCTP message
    pub message: String,

    /// Attestation over `message`
    pub attestation: String,

    /// Destination wallet (base58)
    pub recipient: String,
}

/// Response of the forwarding relayer.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ForwardResponse {
    /// Destination transaction signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Alternative transaction identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

impl ForwardResponse {
    /// Identifier of the forwarding transaction.
    pub fn id(&self) -> Option<&str> {
        self.signature
            .as_deref()
            .or(self.transaction.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// Body of a payment creation request.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct CreatePaymentRequest {
    pub amount_usdc: Option<f64>,
    pub source_domain: Option<u32>,
    pub destination_wallet: Option<String>,
    pub label: Option<String>,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub auto_deposit_approved: Option<bool>,
}

/// Body of a manual burn-hash submission.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTxRequest {
    /// Payment id
    pub id: Option<String>,

    /// Burn transaction hash, `0x` + 64 hex digits
    pub source_tx_hash: Option<String>,
}

/// Envelope returned by the payment endpoints.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentResponse {
    /// The payment, without its sealed key
    pub payment: PaymentRequest,
}
