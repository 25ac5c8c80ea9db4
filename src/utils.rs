//! Utility functions for settlement operations.
//!
//! Conversions between decimal USDC amounts and on-chain units, address and hash
//! validation, and id/timestamp helpers shared by the other modules.

use crate::errors::{Result, SettlementError};
use crate::types::USDC_DECIMALS;
use ethers::types::{Address, U256};
use rand::Rng;
use std::str::FromStr;

/// Converts a decimal USDC amount into its smallest on-chain unit.
///
/// # Examples
///
/// ```
/// use cctp_settlement::utils::usdc_to_units;
/// use ethers::types::U256;
///
/// assert_eq!(usdc_to_units(100.0).unwrap(), U256::from(100_000_000u64));
/// assert_eq!(usdc_to_units(0.01).unwrap(), U256::from(10_000u64));
/// ```
pub fn usdc_to_units(amount_usdc: f64) -> Result<U256> {
    validate_amount(amount_usdc)?;
    // `f64` Display is the shortest string that round-trips, so no binary noise leaks in.
    let units = ethers::utils::parse_units(amount_usdc.to_string(), USDC_DECIMALS)?;
    Ok(units.into())
}

/// Same as [`usdc_to_units`] but as `u64`, the width used by Solana token programs.
pub fn usdc_to_u64_units(amount_usdc: f64) -> Result<u64> {
    let units = usdc_to_units(amount_usdc)?;
    if units > U256::from(u64::MAX) {
        return Err(SettlementError::InvalidAmount(format!(
            "{} USDC does not fit in u64 units",
            amount_usdc
        )));
    }
    Ok(units.as_u64())
}

/// Rejects amounts that are not finite and strictly positive, or that are finer than
/// one on-chain unit (more than [`USDC_DECIMALS`] fractional digits).
pub fn validate_amount(amount_usdc: f64) -> Result<()> {
    if !amount_usdc.is_finite() || amount_usdc <= 0.0 {
        return Err(SettlementError::InvalidAmount(format!(
            "{} is not a positive amount",
            amount_usdc
        )));
    }
    // `f64` Display never switches to exponent notation.
    let fraction_digits = amount_usdc
        .to_string()
        .split_once('.')
        .map_or(0, |(_, fraction)| fraction.len());
    if fraction_digits > USDC_DECIMALS as usize {
        return Err(SettlementError::InvalidAmount(format!(
            "{} has more than {} decimal places",
            amount_usdc, USDC_DECIMALS
        )));
    }
    Ok(())
}

/// Validates and parses an EVM address.
///
/// # Examples
///
/// ```
/// use cctp_settlement::utils::parse_address;
///
/// assert!(parse_address("0xaf88d065e77c8cC2239327C5EDb3A432268e5831").is_ok());
/// assert!(parse_address("invalid").is_err());
/// ```
pub fn parse_address(addr: &str) -> Result<Address> {
    Address::from_str(addr).map_err(|e| SettlementError::InvalidAddress(format!("{}: {}", addr, e)))
}

/// Decodes a base58 Solana address into its 32 raw bytes.
///
/// # Examples
///
/// ```
/// use cctp_settlement::utils::solana_address_to_bytes32;
///
/// let bytes = solana_address_to_bytes32("11111111111111111111111111111111").unwrap();
/// assert_eq!(bytes, [0u8; 32]);
/// ```
pub fn solana_address_to_bytes32(address: &str) -> Result<[u8; 32]> {
    let decoded = bs58::decode(address.trim())
        .into_vec()
        .map_err(|e| SettlementError::InvalidAddress(format!("{}: {}", address, e)))?;
    decoded.try_into().map_err(|bytes: Vec<u8>| {
        SettlementError::InvalidAddress(format!(
            "{}: expected 32 bytes, got {}",
            address,
            bytes.len()
        ))
    })
}

/// Checks that `hash` is a `0x`-prefixed 32-byte hex string.
///
/// # Examples
///
/// ```
/// use cctp_settlement::utils::is_tx_hash;
///
/// assert!(is_tx_hash(&format!("0x{}", "ab".repeat(32))));
/// assert!(!is_tx_hash("0x1234"));
/// ```
pub fn is_tx_hash(hash: &str) -> bool {
    match hash.strip_prefix("0x").or_else(|| hash.strip_prefix("0X")) {
        Some(hex_part) => hex_part.len() == 64 && hex_part.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Generates a random payment id (16 hex chars).
pub fn generate_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Current Unix time in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
