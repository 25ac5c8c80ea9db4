//! Deposit wallet provisioning.
//!
//! Every payment gets its own secp256k1 keypair on the source chain. The raw private key
//! is sealed with AES-256-GCM under a key derived from the operator secret, and stored as
//! `base64(iv):base64(tag):base64(ciphertext)` on the payment record.

use crate::config::{SettlementConfig, WALLET_ENCRYPTION_KEY_ENV};
use crate::errors::{Result, SettlementError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ethers::signers::{LocalWallet, Signer};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Authenticated cipher for deposit-wallet private keys.
pub struct KeyCipher {
    cipher: Aes256Gcm,
}

impl KeyCipher {
    /// Derives the cipher key from the operator secret (SHA-256).
    ///
    /// An empty secret is a configuration error; there is no weaker fallback.
    pub fn from_secret(secret: &str) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(SettlementError::ConfigError(format!(
                "{} is not configured.",
                WALLET_ENCRYPTION_KEY_ENV
            )));
        }
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SettlementError::CryptoError(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Builds the cipher from `PAYMENT_WALLET_ENCRYPTION_KEY`.
    pub fn from_config(config: &SettlementConfig) -> Result<Self> {
        let secret = SettlementConfig::require(&config.wallet_encryption_key, WALLET_ENCRYPTION_KEY_ENV)?;
        Self::from_secret(secret)
    }

    /// Seals `plaintext` under a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| SettlementError::CryptoError("Encryption failed".to_string()))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            BASE64.encode(iv),
            BASE64.encode(tag),
            BASE64.encode(ciphertext)
        ))
    }

    /// Opens a value produced by [`KeyCipher::encrypt`].
    ///
    /// Fails on malformed input, a modified ciphertext, or a different operator secret.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let mut parts = encoded.split(':');
        let (iv, tag, data) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(iv), Some(tag), Some(data), None)
                if !iv.is_empty() && !tag.is_empty() && !data.is_empty() =>
            {
                (iv, tag, data)
            }
            _ => {
                return Err(SettlementError::CryptoError(
                    "Invalid encrypted private key format.".to_string(),
                ))
            }
        };

        let iv = BASE64.decode(iv)?;
        let tag = BASE64.decode(tag)?;
        let mut sealed = BASE64.decode(data)?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(SettlementError::CryptoError(
                "Invalid encrypted private key format.".to_string(),
            ));
        }
        sealed.extend_from_slice(&tag);

        self.cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| {
                SettlementError::CryptoError("Private key authentication failed".to_string())
            })
    }

    /// Decrypts a deposit-wallet key into a signer.
    pub fn decrypt_wallet(&self, encoded: &str) -> Result<LocalWallet> {
        let key = self.decrypt(encoded)?;
        Ok(LocalWallet::from_bytes(&key)?)
    }
}

impl std::fmt::Debug for KeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyCipher(<redacted>)")
    }
}

/// A freshly provisioned deposit wallet.
#[derive(Debug, Clone)]
pub struct DepositWallet {
    /// Checksummed EVM address
    pub address: String,
    /// Sealed private key
    pub private_key_enc: String,
}

/// Generates single-use custodial deposit wallets.
#[derive(Debug, Clone)]
pub struct DepositWalletProvisioner {
    cipher: Arc<KeyCipher>,
}

impl DepositWalletProvisioner {
    /// Creates a provisioner sealing keys with `cipher`.
    pub fn new(cipher: Arc<KeyCipher>) -> Self {
        Self { cipher }
    }

    /// Generates a new keypair unrelated to any other and seals its private key.
    pub fn create_deposit_wallet(&self) -> Result<DepositWallet> {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let private_key = wallet.signer().to_bytes();
        let private_key_enc = self.cipher.encrypt(private_key.as_slice())?;

        Ok(DepositWallet {
            address: ethers::utils::to_checksum(&wallet.address(), None),
            private_key_enc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cipher = KeyCipher::from_secret("operator secret").unwrap();
        let key = [7u8; 32];

        let sealed = cipher.encrypt(&key).unwrap();
        assert_eq!(sealed.split(':').count(), 3);
        assert_eq!(cipher.decrypt(&sealed).unwrap(), key.to_vec());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let sealed = KeyCipher::from_secret("same").unwrap().encrypt(b"k").unwrap();
        // a second process with the same secret can still open it
        let reopened = KeyCipher::from_secret("same").unwrap().decrypt(&sealed).unwrap();
        assert_eq!(reopened, b"k");
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let cipher = KeyCipher::from_secret("secret").unwrap();
        assert_ne!(cipher.encrypt(b"k").unwrap(), cipher.encrypt(b"k").unwrap());
    }

    #[test]
    fn test_wrong_secret_fails() {
        let sealed = KeyCipher::from_secret("right").unwrap().encrypt(&[1u8; 32]).unwrap();
        let err = KeyCipher::from_secret("wrong").unwrap().decrypt(&sealed).unwrap_err();
        assert!(matches!(err, SettlementError::CryptoError(_)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = KeyCipher::from_secret("secret").unwrap();
        let sealed = cipher.encrypt(&[9u8; 32]).unwrap();

        let parts: Vec<&str> = sealed.split(':').collect();
        let mut data = BASE64.decode(parts[2]).unwrap();
        data[0] ^= 0x01;
        let tampered = format!("{}:{}:{}", parts[0], parts[1], BASE64.encode(data));

        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_malformed_input_fails() {
        let cipher = KeyCipher::from_secret("secret").unwrap();
        assert!(cipher.decrypt("").is_err());
        assert!(cipher.decrypt("a:b").is_err());
        assert!(cipher.decrypt("a:b:c:d").is_err());
        assert!(cipher.decrypt("!!:!!:!!").is_err());
    }

    #[test]
    fn test_missing_secret_fails_closed() {
        assert!(matches!(
            KeyCipher::from_secret("  "),
            Err(SettlementError::ConfigError(_))
        ));
        assert!(matches!(
            KeyCipher::from_config(&SettlementConfig::new()),
            Err(SettlementError::ConfigError(_))
        ));
    }

    #[test]
    fn test_create_deposit_wallet() {
        let cipher = Arc::new(KeyCipher::from_secret("secret").unwrap());
        let provisioner = DepositWalletProvisioner::new(cipher.clone());

        let first = provisioner.create_deposit_wallet().unwrap();
        let second = provisioner.create_deposit_wallet().unwrap();
        assert_ne!(first.address, second.address);

        let signer = cipher.decrypt_wallet(&first.private_key_enc).unwrap();
        assert_eq!(ethers::utils::to_checksum(&signer.address(), None), first.address);
    }
}
