//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use cctp_settlement::bridge::{Bridge, BurnRequest};
use cctp_settlement::errors::{Result, SettlementError};
use cctp_settlement::observer::ChainObserver;
use cctp_settlement::orchestrator::Orchestrator;
use cctp_settlement::pool::PoolSettlement;
use cctp_settlement::store::{MemoryStore, PaymentStore};
use cctp_settlement::types::{
    AttestationMessage, PaymentDraft, PaymentPatch, PaymentRequest, PaymentStatus,
};
use ethers::types::U256;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A valid base58 Solana address (wrapped SOL mint).
pub const DESTINATION: &str = "So11111111111111111111111111111111111111112";
pub const DEPOSIT_ADDRESS: &str = "0x00000000000000000000000000000000000000aa";

pub fn burn_hash() -> String {
    format!("0x{}", "11".repeat(32))
}

/// The complete attestation the mock authority returns.
pub fn attested() -> AttestationMessage {
    AttestationMessage {
        message: "M".to_string(),
        attestation: "A".to_string(),
        status: Some("complete".to_string()),
        ..Default::default()
    }
}

pub fn draft() -> PaymentDraft {
    PaymentDraft {
        amount_usdc: 100.0,
        source_domain: 3,
        source_chain: "Arbitrum".to_string(),
        source_wallet_address: Some(DEPOSIT_ADDRESS.to_string()),
        source_wallet_private_key_enc: Some("iv:tag:data".to_string()),
        destination_wallet: DESTINATION.to_string(),
        auto_deposit_approved: true,
        ..Default::default()
    }
}

/// Balances controlled by the test.
#[derive(Debug, Default)]
pub struct MockObserver {
    pub usdc: AtomicU64,
    pub native: AtomicU64,
    pub usdc_reads: AtomicUsize,
    pub native_reads: AtomicUsize,
}

impl MockObserver {
    pub fn funded() -> Self {
        let observer = Self::default();
        observer.usdc.store(100_000_000, Ordering::SeqCst);
        observer.native.store(1, Ordering::SeqCst);
        observer
    }
}

#[async_trait]
impl ChainObserver for MockObserver {
    async fn usdc_balance(&self, _domain: u32, _address: &str) -> Result<U256> {
        self.usdc_reads.fetch_add(1, Ordering::SeqCst);
        Ok(U256::from(self.usdc.load(Ordering::SeqCst)))
    }

    async fn native_balance(&self, _domain: u32, _address: &str) -> Result<U256> {
        self.native_reads.fetch_add(1, Ordering::SeqCst);
        Ok(U256::from(self.native.load(Ordering::SeqCst)))
    }
}

/// Bridge that records calls; attestation is `None` to simulate a timeout.
#[derive(Debug)]
pub struct MockBridge {
    pub burns: AtomicUsize,
    pub attestation_polls: AtomicUsize,
    pub forwards: AtomicUsize,
    pub burn_delay: Duration,
    pub fail_burn: AtomicBool,
    pub attestation: Mutex<Option<AttestationMessage>>,
    pub last_burn: Mutex<Option<BurnRequest>>,
    pub last_forward_recipient: Mutex<Option<String>>,
}

impl Default for MockBridge {
    fn default() -> Self {
        Self {
            burns: AtomicUsize::new(0),
            attestation_polls: AtomicUsize::new(0),
            forwards: AtomicUsize::new(0),
            burn_delay: Duration::ZERO,
            fail_burn: AtomicBool::new(false),
            attestation: Mutex::new(Some(attested())),
            last_burn: Mutex::new(None),
            last_forward_recipient: Mutex::new(None),
        }
    }
}

impl MockBridge {
    pub fn slow(delay: Duration) -> Self {
        Self {
            burn_delay: delay,
            ..Self::default()
        }
    }

    pub fn never_attested() -> Self {
        let bridge = Self::default();
        *bridge.attestation.lock().unwrap() = None;
        bridge
    }
}

#[async_trait]
impl Bridge for MockBridge {
    async fn burn(&self, request: BurnRequest) -> Result<String> {
        self.burns.fetch_add(1, Ordering::SeqCst);
        *self.last_burn.lock().unwrap() = Some(request);
        if !self.burn_delay.is_zero() {
            tokio::time::sleep(self.burn_delay).await;
        }
        if self.fail_burn.load(Ordering::SeqCst) {
            return Err(SettlementError::BlockchainError("insufficient gas".to_string()));
        }
        Ok(burn_hash())
    }

    async fn wait_for_attestation(
        &self,
        _source_domain: u32,
        _tx_hash: &str,
    ) -> Result<AttestationMessage> {
        self.attestation_polls.fetch_add(1, Ordering::SeqCst);
        let attestation = self.attestation.lock().unwrap().clone();
        attestation.ok_or(SettlementError::AttestationTimeout { attempts: 3 })
    }

    async fn forward(&self, _message: &AttestationMessage, recipient: &str) -> Result<String> {
        self.forwards.fetch_add(1, Ordering::SeqCst);
        *self.last_forward_recipient.lock().unwrap() = Some(recipient.to_string());
        Ok("F".to_string())
    }
}

/// Pool that confirms deposits with id `D` unless told to fail.
#[derive(Debug, Default)]
pub struct MockPool {
    pub deposits: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl PoolSettlement for MockPool {
    async fn deposit(&self, _wallet: &str, _amount_usdc: f64, _token_mint: &str) -> Result<String> {
        self.deposits.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SettlementError::PoolDepositError("pool unavailable".to_string()));
        }
        Ok("D".to_string())
    }
}

/// Wraps a [`MemoryStore`] and records every status written.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    pub statuses: Mutex<Vec<PaymentStatus>>,
}

impl RecordingStore {
    pub async fn insert(&self, payment: PaymentRequest) {
        self.inner.insert(payment).await;
    }

    pub fn history(&self) -> Vec<PaymentStatus> {
        self.statuses.lock().unwrap().clone()
    }

    fn record(&self, result: &Result<Option<PaymentRequest>>, patch_status: Option<PaymentStatus>) {
        if let (Ok(Some(_)), Some(status)) = (result, patch_status) {
            self.statuses.lock().unwrap().push(status);
        }
    }
}

#[async_trait]
impl PaymentStore for RecordingStore {
    async fn create(&self, draft: PaymentDraft) -> Result<PaymentRequest> {
        self.inner.create(draft).await
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentRequest>> {
        self.inner.get(id).await
    }

    async fn update(&self, id: &str, patch: PaymentPatch) -> Result<Option<PaymentRequest>> {
        let status = patch.status;
        let result = self.inner.update(id, patch).await;
        self.record(&result, status);
        result
    }

    async fn update_if_status(
        &self,
        id: &str,
        expected: PaymentStatus,
        patch: PaymentPatch,
    ) -> Result<Option<PaymentRequest>> {
        let status = patch.status;
        let result = self.inner.update_if_status(id, expected, patch).await;
        self.record(&result, status);
        result
    }
}

/// An orchestrator over mocks, with handles to each of them.
pub struct Harness {
    pub store: Arc<RecordingStore>,
    pub observer: Arc<MockObserver>,
    pub bridge: Arc<MockBridge>,
    pub pool: Arc<MockPool>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(observer: MockObserver, bridge: MockBridge) -> Self {
        let store = Arc::new(RecordingStore::default());
        let observer = Arc::new(observer);
        let bridge = Arc::new(bridge);
        let pool = Arc::new(MockPool::default());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            observer.clone(),
            bridge.clone(),
            pool.clone(),
        ));
        Self {
            store,
            observer,
            bridge,
            pool,
            orchestrator,
        }
    }

    pub async fn create(&self) -> String {
        self.store.create(draft()).await.unwrap().id
    }

    pub async fn advance(&self, id: &str) -> PaymentRequest {
        self.orchestrator.advance(id).await.unwrap().unwrap()
    }

    pub async fn get(&self, id: &str) -> PaymentRequest {
        self.store.get(id).await.unwrap().unwrap()
    }

    pub fn burns(&self) -> usize {
        self.bridge.burns.load(Ordering::SeqCst)
    }

    pub fn forwards(&self) -> usize {
        self.bridge.forwards.load(Ordering::SeqCst)
    }

    pub fn deposits(&self) -> usize {
        self.pool.deposits.load(Ordering::SeqCst)
    }
}
