//! Payment record storage.
//!
//! The store is the single source of truth for workflow state. [`FileStore`] keeps every
//! record in one JSON file and hydrates lazily on first access; [`MemoryStore`] has the
//! same semantics without persistence. Both enforce the record merge rules in
//! [`apply_patch`] so no caller can break them.

use crate::errors::{Result, SettlementError};
use crate::types::{PaymentDraft, PaymentPatch, PaymentRequest, PaymentStatus};
use crate::utils::{current_timestamp_ms, generate_id};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

/// File holding the records inside the store directory.
pub const STORE_FILE_NAME: &str = "payments.json";

/// Durable key-value persistence of payment records.
#[async_trait]
pub trait PaymentStore: Debug + Send + Sync {
    /// Assigns an id and timestamps, persists, and returns the full record.
    async fn create(&self, draft: PaymentDraft) -> Result<PaymentRequest>;

    /// Reads a record.
    async fn get(&self, id: &str) -> Result<Option<PaymentRequest>>;

    /// Merges `patch` into a record and refreshes `updatedAt`. `None` if the id is unknown.
    async fn update(&self, id: &str, patch: PaymentPatch) -> Result<Option<PaymentRequest>>;

    /// Like [`PaymentStore::update`], but only if the stored status is still `expected`.
    ///
    /// Returns [`SettlementError::StatusConflict`] when another writer moved the status.
    async fn update_if_status(
        &self,
        id: &str,
        expected: PaymentStatus,
        patch: PaymentPatch,
    ) -> Result<Option<PaymentRequest>>;
}

/// Merges `patch` into `payment`.
///
/// - `updatedAt` is always refreshed.
/// - A transition to any status but `failed` clears `error` unless the patch sets it.
/// - `sourceTxHash` only goes from unset to set; rewriting the same value is allowed.
pub fn apply_patch(payment: &mut PaymentRequest, patch: PaymentPatch) -> Result<()> {
    if let (Some(existing), Some(incoming)) = (&payment.source_tx_hash, &patch.source_tx_hash) {
        if !existing.eq_ignore_ascii_case(incoming) {
            return Err(SettlementError::SourceTxHashImmutable(existing.clone()));
        }
    }

    if let Some(status) = patch.status {
        payment.status = status;
        if status != PaymentStatus::Failed && patch.error.is_none() {
            payment.error = None;
        }
    }
    if let Some(hash) = patch.source_tx_hash {
        if payment.source_tx_hash.is_none() {
            payment.source_tx_hash = Some(hash);
        }
    }
    if let Some(attestation) = patch.attestation {
        payment.attestation = Some(attestation);
    }
    if let Some(message) = patch.attestation_message {
        payment.attestation_message = Some(message);
    }
    if let Some(forward_tx) = patch.forward_tx {
        payment.forward_tx = Some(forward_tx);
    }
    if let Some(deposit_tx) = patch.deposit_tx {
        payment.deposit_tx = Some(deposit_tx);
    }
    if let Some(error) = patch.error {
        payment.error = error;
    }
    payment.updated_at = current_timestamp_ms();
    Ok(())
}

fn new_record(draft: PaymentDraft) -> PaymentRequest {
    let now = current_timestamp_ms();
    PaymentRequest {
        id: generate_id(),
        amount_usdc: draft.amount_usdc,
        source_domain: draft.source_domain,
        source_chain: draft.source_chain,
        source_wallet_address: draft.source_wallet_address,
        source_wallet_private_key_enc: draft.source_wallet_private_key_enc,
        destination_wallet: draft.destination_wallet,
        label: draft.label,
        reference: draft.reference,
        note: draft.note,
        auto_deposit_approved: draft.auto_deposit_approved,
        created_at: now,
        updated_at: now,
        status: PaymentStatus::Created,
        source_tx_hash: None,
        attestation: None,
        attestation_message: None,
        forward_tx: None,
        deposit_tx: None,
        error: None,
    }
}

/// Applies a (conditional) patch to the record map in place.
fn update_in(
    records: &mut HashMap<String, PaymentRequest>,
    id: &str,
    expected: Option<PaymentStatus>,
    patch: PaymentPatch,
) -> Result<Option<PaymentRequest>> {
    let Some(existing) = records.get(id) else {
        return Ok(None);
    };
    if let Some(expected) = expected {
        if existing.status != expected {
            return Err(SettlementError::StatusConflict {
                expected,
                actual: existing.status,
            });
        }
    }

    let mut updated = existing.clone();
    apply_patch(&mut updated, patch)?;
    records.insert(id.to_string(), updated.clone());
    Ok(Some(updated))
}

/// In-memory [`PaymentStore`]. Records are lost on restart; used for testing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, PaymentRequest>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is, bypassing the merge rules.
    pub async fn insert(&self, payment: PaymentRequest) {
        self.records.lock().await.insert(payment.id.clone(), payment);
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn create(&self, draft: PaymentDraft) -> Result<PaymentRequest> {
        let payment = new_record(draft);
        self.records.lock().await.insert(payment.id.clone(), payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentRequest>> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn update(&self, id: &str, patch: PaymentPatch) -> Result<Option<PaymentRequest>> {
        update_in(&mut *self.records.lock().await, id, None, patch)
    }

    async fn update_if_status(
        &self,
        id: &str,
        expected: PaymentStatus,
        patch: PaymentPatch,
    ) -> Result<Option<PaymentRequest>> {
        update_in(&mut *self.records.lock().await, id, Some(expected), patch)
    }
}

/// [`PaymentStore`] backed by a JSON array in `<dir>/payments.json`.
///
/// The file is read once, on first access. Every mutation rewrites the whole file through
/// a temporary file and a rename, while holding the map lock, so updates to the same id
/// never interleave and a crash never leaves a half-written file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    records: OnceCell<Mutex<HashMap<String, PaymentRequest>>>,
}

impl FileStore {
    /// Creates a store rooted at `dir`. Nothing is read until first access.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STORE_FILE_NAME),
            records: OnceCell::new(),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn records(&self) -> Result<&Mutex<HashMap<String, PaymentRequest>>> {
        self.records
            .get_or_try_init(|| async {
                let records = hydrate(&self.path).await?;
                debug!(path = %self.path.display(), count = records.len(), "Hydrated payment store");
                Ok::<_, SettlementError>(Mutex::new(records))
            })
            .await
    }

    async fn persist(&self, records: &HashMap<String, PaymentRequest>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut all: Vec<&PaymentRequest> = records.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let data = serde_json::to_vec_pretty(&all)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn write(
        &self,
        id: &str,
        expected: Option<PaymentStatus>,
        patch: PaymentPatch,
    ) -> Result<Option<PaymentRequest>> {
        let mut records = self.records().await?.lock().await;
        let mut staged = records.clone();
        let updated = update_in(&mut staged, id, expected, patch)?;
        if updated.is_some() {
            self.persist(&staged).await?;
            *records = staged;
        }
        Ok(updated)
    }
}

async fn hydrate(path: &Path) -> Result<HashMap<String, PaymentRequest>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let payments: Vec<PaymentRequest> = serde_json::from_slice(&raw)?;
    Ok(payments.into_iter().map(|p| (p.id.clone(), p)).collect())
}

#[async_trait]
impl PaymentStore for FileStore {
    async fn create(&self, draft: PaymentDraft) -> Result<PaymentRequest> {
        let mut records = self.records().await?.lock().await;
        let payment = new_record(draft);
        let mut staged = records.clone();
        staged.insert(payment.id.clone(), payment.clone());
        self.persist(&staged).await?;
        *records = staged;
        Ok(payment)
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentRequest>> {
        Ok(self.records().await?.lock().await.get(id).cloned())
    }

    async fn update(&self, id: &str, patch: PaymentPatch) -> Result<Option<PaymentRequest>> {
        self.write(id, None, patch).await
    }

    async fn update_if_status(
        &self,
        id: &str,
        expected: PaymentStatus,
        patch: PaymentPatch,
    ) -> Result<Option<PaymentRequest>> {
        self.write(id, Some(expected), patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn draft() -> PaymentDraft {
        PaymentDraft {
            amount_usdc: 100.0,
            source_domain: 3,
            source_chain: "Arbitrum".to_string(),
            source_wallet_address: Some("0x0000000000000000000000000000000000000001".to_string()),
            source_wallet_private_key_enc: Some("iv:tag:data".to_string()),
            destination_wallet: "W".to_string(),
            auto_deposit_approved: true,
            ..Default::default()
        }
    }

    fn hash(byte: &str) -> String {
        format!("0x{}", byte.repeat(32))
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let store = MemoryStore::new();
        let created = store.create(draft()).await.unwrap();
        assert_eq!(created.status, PaymentStatus::Created);
        assert_eq!(created.created_at, created.updated_at);

        let fetched = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);

        let updated = store
            .update(&created.id, PaymentPatch::status(PaymentStatus::AwaitingFunds))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, PaymentStatus::AwaitingFunds);
        assert!(updated.updated_at >= created.updated_at);

        assert!(store.get("missing").await.unwrap().is_none());
        assert!(store
            .update("missing", PaymentPatch::status(PaymentStatus::Burning))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_error_cleared_on_progress() {
        let store = MemoryStore::new();
        let id = store.create(draft()).await.unwrap().id;

        let failed = store.update(&id, PaymentPatch::failed("rpc down")).await.unwrap().unwrap();
        assert_eq!(failed.error.as_deref(), Some("rpc down"));

        let resumed = store
            .update(&id, PaymentPatch::submitted(hash("ab")))
            .await
            .unwrap()
            .unwrap();
        assert!(resumed.error.is_none());
    }

    #[tokio::test]
    async fn test_source_tx_hash_is_immutable() {
        let store = MemoryStore::new();
        let id = store.create(draft()).await.unwrap().id;

        store.update(&id, PaymentPatch::submitted(hash("ab"))).await.unwrap();
        // the identical value is accepted
        store.update(&id, PaymentPatch::submitted(hash("AB"))).await.unwrap();

        let err = store
            .update(&id, PaymentPatch::submitted(hash("cd")))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::SourceTxHashImmutable(_)));

        let payment = store.get(&id).await.unwrap().unwrap();
        assert_eq!(payment.source_tx_hash, Some(hash("ab")));
    }

    #[tokio::test]
    async fn test_failure_keeps_checkpoints() {
        let store = MemoryStore::new();
        let id = store.create(draft()).await.unwrap().id;
        store.update(&id, PaymentPatch::submitted(hash("ab"))).await.unwrap();

        let failed = store.update(&id, PaymentPatch::failed("timeout")).await.unwrap().unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);
        assert_eq!(failed.source_tx_hash, Some(hash("ab")));
    }

    #[tokio::test]
    async fn test_update_if_status() {
        let store = MemoryStore::new();
        let id = store.create(draft()).await.unwrap().id;

        let claimed = store
            .update_if_status(&id, PaymentStatus::Created, PaymentPatch::status(PaymentStatus::Burning))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, PaymentStatus::Burning);

        let err = store
            .update_if_status(&id, PaymentStatus::Created, PaymentPatch::status(PaymentStatus::Burning))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::StatusConflict {
                expected: PaymentStatus::Created,
                actual: PaymentStatus::Burning
            }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let id = store.create(draft()).await.unwrap().id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_if_status(&id, PaymentStatus::Created, PaymentPatch::status(PaymentStatus::Burning))
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_file_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        let id = {
            let store = FileStore::new(dir.path());
            let id = store.create(draft()).await.unwrap().id;
            store.update(&id, PaymentPatch::submitted(hash("ab"))).await.unwrap();
            id
        };

        let reopened = FileStore::new(dir.path());
        let payment = reopened.get(&id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Submitted);
        assert_eq!(payment.source_tx_hash, Some(hash("ab")));
        assert!(reopened.path().exists());
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        assert!(store.get("anything").await.unwrap().is_none());

        store.create(draft()).await.unwrap();
        assert!(dir.path().join("nested").join(STORE_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORE_FILE_NAME), "{ not json").unwrap();

        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.get("x").await,
            Err(SettlementError::JsonError(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_conflict_does_not_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let id = store.create(draft()).await.unwrap().id;

        let err = store
            .update_if_status(&id, PaymentStatus::Burning, PaymentPatch::status(PaymentStatus::Submitted))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let reopened = FileStore::new(dir.path());
        assert_eq!(
            reopened.get(&id).await.unwrap().unwrap().status,
            PaymentStatus::Created
        );
    }
}
