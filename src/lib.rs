//! # cctp-settlement
//!
//! Crash-resumable settlement of cross-chain USDC payments.
//!
//! A payer funds a single-use deposit address on an EVM chain. The crate then burns the
//! USDC through Circle's Cross-Chain Transfer Protocol (CCTP v2), waits for the burn to be
//! attested, forwards the attested message to Solana, and deposits the minted funds into
//! a destination pool on behalf of the payee.
//!
//! ## Features
//!
//! - **Deposit wallets**: One fresh secp256k1 key per payment, sealed with AES-256-GCM
//! - **Durable workflow**: Every step is checkpointed on the payment record
//! - **Re-entrancy safe**: In-flight steps are claimed with compare-and-swap status updates
//! - **Resumable**: A failed payment keeps its hashes and resumes from the last checkpoint
//! - **Pluggable**: Store, chain observer, bridge and pool are traits with mock-friendly seams
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cctp_settlement::{config::SettlementConfig, service::SettlementService};
//! use cctp_settlement::types::CreatePaymentRequest;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SettlementConfig::from_env()?;
//! let service = SettlementService::from_config(&config)?;
//!
//! let payment = service
//!     .handle_create(CreatePaymentRequest {
//!         amount_usdc: Some(100.0),
//!         source_domain: Some(3), // Arbitrum
//!         destination_wallet: Some("So11111111111111111111111111111111111111112".into()),
//!         auto_deposit_approved: Some(true),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! println!("Send USDC and gas to {:?}", payment.source_wallet_address);
//! # Ok(())
//! # }
//! ```
//!
//! ## Settlement Flow
//!
//! 1. **created**: Deposit address provisioned
//! 2. **awaiting_funds / awaiting_gas**: Balance checks hold the payment until it is funded
//! 3. **burning → submitted**: Approve and `depositForBurn` on the source chain
//! 4. **attestation_pending → attested**: Poll the attestation authority
//! 5. **forwarding → depositing**: Relay the attested message to Solana
//! 6. **completed**: Pool deposit confirmed
//!
//! Any error moves the payment to **failed** with the message attached.
//!
//! ## Supported Source Chains
//!
//! - Ethereum (domain 0), Avalanche (1), OP Mainnet (2), Arbitrum (3), Base (6), Polygon (7)
//! - Additional EVM chains from `CCTP_EVM_CHAINS_JSON`
//!
//! ## References
//!
//! - [CCTP documentation](https://developers.circle.com/cctp)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bridge;
pub mod chains;
pub mod config;
pub mod errors;
pub mod observer;
pub mod orchestrator;
pub mod pool;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
pub mod wallet;

// Re-export commonly used items
pub use config::SettlementConfig;
pub use errors::{Result, SettlementError};
pub use orchestrator::{Halt, Orchestrator, Phase};
pub use service::SettlementService;
pub use store::{FileStore, MemoryStore, PaymentStore};
pub use types::{
    AttestationMessage, CreatePaymentRequest, PaymentPatch, PaymentRequest, PaymentStatus,
    SubmitTxRequest, USDC_DECIMALS,
};
