//! Destination pool settlement.
//!
//! The pool service builds an unsigned Solana deposit transaction on behalf of the
//! destination wallet. [`ShadowPool`] refreshes its blockhash, signs it with the pool's
//! operating key, broadcasts it over JSON-RPC and waits for confirmation.

use crate::config::{SettlementConfig, POOL_SECRET_KEY_ENV, SOLANA_RPC_URL_ENV};
use crate::errors::{Result, SettlementError};
use crate::utils::usdc_to_u64_units;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// USDC mint on Solana mainnet.
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

const DEPOSIT_PATH: &str = "pool/deposit";
const SIGNATURE_LEN: usize = 64;
const PUBKEY_LEN: usize = 32;
const BLOCKHASH_LEN: usize = 32;

/// Deposits settled funds into the destination pool.
#[async_trait]
pub trait PoolSettlement: Send + Sync {
    /// Deposits `amount_usdc` of `token_mint` for `wallet`; returns the confirmed signature.
    async fn deposit(&self, wallet: &str, amount_usdc: f64, token_mint: &str) -> Result<String>;
}

#[derive(Serialize, Debug)]
struct DepositRequest<'a> {
    wallet: &'a str,
    amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_mint: Option<&'a str>,
}

#[derive(Deserialize, Debug, Default)]
struct DepositResponse {
    #[serde(default)]
    unsigned_tx_base64: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize, Debug)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct LatestBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    #[serde(default)]
    confirmation_status: Option<String>,
    #[serde(default)]
    err: Option<Value>,
}

/// [`PoolSettlement`] against the ShadowWire pool service on Solana.
pub struct ShadowPool {
    http_client: Client,
    api_base_url: Url,
    api_key: Option<String>,
    rpc_url: Url,
    keypair: SigningKey,
    // one deposit at a time: the operating key is shared by every payment
    signing: Mutex<()>,
    confirm_interval: Duration,
    confirm_attempts: u32,
}

impl ShadowPool {
    /// Creates the pool client. Fails if the operating key or RPC endpoint is missing.
    pub fn new(config: &SettlementConfig) -> Result<Self> {
        let secret = SettlementConfig::require(&config.pool_secret_key, POOL_SECRET_KEY_ENV)?;
        let rpc_url = SettlementConfig::require(&config.solana_rpc_url, SOLANA_RPC_URL_ENV)?;

        let mut api_base_url = config.pool_api_base_url.clone();
        if !api_base_url.ends_with('/') {
            api_base_url.push('/');
        }

        Ok(Self {
            http_client: Client::new(),
            api_base_url: Url::parse(&api_base_url)?,
            api_key: config.pool_api_key.clone(),
            rpc_url: Url::parse(rpc_url)?,
            keypair: parse_pool_secret_key(secret)?,
            signing: Mutex::new(()),
            confirm_interval: Duration::from_secs(1),
            confirm_attempts: 60,
        })
    }

    /// Sets the confirmation polling budget.
    pub fn with_confirmation(mut self, interval: Duration, attempts: u32) -> Self {
        self.confirm_interval = interval;
        self.confirm_attempts = attempts;
        self
    }

    /// Base58 address of the pool operating key.
    pub fn pool_address(&self) -> String {
        bs58::encode(self.keypair.verifying_key().as_bytes()).into_string()
    }

    async fn request_unsigned_deposit(
        &self,
        wallet: &str,
        amount: u64,
        token_mint: &str,
    ) -> Result<Vec<u8>> {
        let request = DepositRequest {
            wallet,
            amount,
            token_mint: (token_mint != "Native").then_some(token_mint),
        };

        let mut builder = self
            .http_client
            .post(self.api_base_url.join(DEPOSIT_PATH)?)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-Key", key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body: DepositResponse = if status.is_success() {
            response.json().await?
        } else {
            let text = response.text().await.unwrap_or_default();
            return Err(SettlementError::PoolDepositError(format!("{}: {}", status, text)));
        };

        match body.unsigned_tx_base64 {
            Some(tx) if !tx.is_empty() => Ok(BASE64.decode(tx)?),
            _ => Err(SettlementError::PoolDepositError(
                body.error
                    .unwrap_or_else(|| "pool service returned no transaction".to_string()),
            )),
        }
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse<T> = self
            .http_client
            .post(self.rpc_url.clone())
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(SettlementError::BlockchainError(format!(
                "{} failed ({}): {}",
                method, error.code, error.message
            )));
        }
        response.result.ok_or_else(|| {
            SettlementError::BlockchainError(format!("{} returned no result", method))
        })
    }

    async fn confirm(&self, signature: &str, last_valid_block_height: u64) -> Result<()> {
        for attempt in 1..=self.confirm_attempts {
            let statuses: WithContext<Vec<Option<SignatureStatus>>> = self
                .rpc("getSignatureStatuses", json!([[signature]]))
                .await?;

            if let Some(Some(status)) = statuses.value.into_iter().next() {
                if let Some(err) = status.err {
                    return Err(SettlementError::PoolDepositError(format!(
                        "transaction {} failed: {}",
                        signature, err
                    )));
                }
                if matches!(
                    status.confirmation_status.as_deref(),
                    Some("confirmed") | Some("finalized")
                ) {
                    return Ok(());
                }
            } else {
                let height: u64 = self
                    .rpc("getBlockHeight", json!([{ "commitment": "confirmed" }]))
                    .await?;
                if height > last_valid_block_height {
                    return Err(SettlementError::PoolDepositError(format!(
                        "transaction {} expired before confirmation",
                        signature
                    )));
                }
            }

            debug!(attempt, %signature, "Waiting for pool deposit confirmation");
            tokio::time::sleep(self.confirm_interval).await;
        }

        Err(SettlementError::PoolDepositError(format!(
            "transaction {} not confirmed after {} attempts",
            signature, self.confirm_attempts
        )))
    }
}

impl std::fmt::Debug for ShadowPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowPool")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("rpc_url", &self.rpc_url.as_str())
            .field("pool_address", &self.pool_address())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PoolSettlement for ShadowPool {
    async fn deposit(&self, wallet: &str, amount_usdc: f64, token_mint: &str) -> Result<String> {
        if self.pool_address() != wallet {
            return Err(SettlementError::PoolDepositError(
                "Pool secret key does not match the destination wallet.".to_string(),
            ));
        }
        let amount = usdc_to_u64_units(amount_usdc)?;
        let unsigned = self.request_unsigned_deposit(wallet, amount, token_mint).await?;

        let _guard = self.signing.lock().await;

        let latest: WithContext<LatestBlockhash> = self
            .rpc("getLatestBlockhash", json!([{ "commitment": "confirmed" }]))
            .await?;
        let blockhash = decode_blockhash(&latest.value.blockhash)?;

        let (signed, signature) = sign_transaction(&unsigned, &blockhash, &self.keypair)?;
        let sent: String = self
            .rpc(
                "sendTransaction",
                json!([
                    BASE64.encode(&signed),
                    { "encoding": "base64", "preflightCommitment": "confirmed" }
                ]),
            )
            .await?;
        if sent != signature {
            warn!(%sent, %signature, "RPC returned an unexpected signature");
        }

        self.confirm(&signature, latest.value.last_valid_block_height).await?;
        info!(%signature, amount, "Pool deposit confirmed");
        Ok(signature)
    }
}

/// Parses the pool keypair: a JSON array of 64 (keypair) or 32 (seed) bytes, possibly
/// wrapped in a JSON string.
pub fn parse_pool_secret_key(raw: &str) -> Result<SigningKey> {
    let invalid = || SettlementError::ConfigError(format!("Invalid {} format.", POOL_SECRET_KEY_ENV));

    let value: Value = serde_json::from_str(raw.trim()).map_err(|_| invalid())?;
    let value = match value {
        Value::String(inner) => serde_json::from_str(&inner).map_err(|_| invalid())?,
        other => other,
    };
    let bytes: Vec<u8> = serde_json::from_value(value).map_err(|_| invalid())?;

    match bytes.len() {
        64 => {
            let mut keypair = [0u8; 64];
            keypair.copy_from_slice(&bytes);
            SigningKey::from_keypair_bytes(&keypair).map_err(|_| invalid())
        }
        32 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            Ok(SigningKey::from_bytes(&seed))
        }
        _ => Err(invalid()),
    }
}

fn decode_blockhash(blockhash: &str) -> Result<[u8; BLOCKHASH_LEN]> {
    let bytes = bs58::decode(blockhash)
        .into_vec()
        .map_err(|e| SettlementError::BlockchainError(format!("invalid blockhash: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| SettlementError::BlockchainError("invalid blockhash length".to_string()))
}

fn read_compact_u16(bytes: &[u8], offset: &mut usize) -> Result<usize> {
    let mut value = 0usize;
    for shift in 0..3 {
        let byte = *bytes
            .get(*offset)
            .ok_or_else(|| malformed("truncated length prefix"))?;
        *offset += 1;
        value |= ((byte & 0x7f) as usize) << (shift * 7);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(malformed("length prefix too long"))
}

fn write_compact_u16(mut value: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

fn malformed(reason: &str) -> SettlementError {
    SettlementError::PoolDepositError(format!("malformed pool transaction: {}", reason))
}

/// Replaces the recent blockhash of a serialized transaction and signs it as fee payer.
///
/// The pool key must be the fee payer (first account) and the only required signer.
/// Returns the signed wire bytes and the base58 signature.
pub fn sign_transaction(
    raw: &[u8],
    recent_blockhash: &[u8; BLOCKHASH_LEN],
    key: &SigningKey,
) -> Result<(Vec<u8>, String)> {
    let mut offset = 0;
    let num_signatures = read_compact_u16(raw, &mut offset)?;
    offset += num_signatures * SIGNATURE_LEN;
    let message = raw
        .get(offset..)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| malformed("missing message"))?;

    // versioned messages carry a 0x80 | version prefix
    let mut cursor = usize::from(message[0] & 0x80 != 0);
    let num_required_signatures = *message.get(cursor).ok_or_else(|| malformed("missing header"))?;
    cursor += 3;
    let num_keys = read_compact_u16(message, &mut cursor)?;
    let keys_start = cursor;
    let blockhash_start = keys_start + num_keys * PUBKEY_LEN;
    if message.len() < blockhash_start + BLOCKHASH_LEN {
        return Err(malformed("truncated account keys"));
    }
    if num_required_signatures != 1 {
        return Err(malformed("requires signers other than the pool"));
    }
    if num_keys == 0 || message[keys_start..keys_start + PUBKEY_LEN] != key.verifying_key().to_bytes() {
        return Err(malformed("fee payer is not the pool key"));
    }

    let mut message = message.to_vec();
    message[blockhash_start..blockhash_start + BLOCKHASH_LEN].copy_from_slice(recent_blockhash);
    let signature = key.sign(&message).to_bytes();

    let mut signed = Vec::with_capacity(1 + SIGNATURE_LEN + message.len());
    write_compact_u16(1, &mut signed);
    signed.extend_from_slice(&signature);
    signed.extend_from_slice(&message);

    Ok((signed, bs58::encode(signature).into_string()))
}
