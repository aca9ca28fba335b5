//! Gateway signing key and its process-wide slot.
//!
//! The key is loaded once at start-up, installed into a global slot and
//! shared by reference for the life of the process. It never appears in
//! `Debug` output or error messages.

use std::env;
use std::fmt;
use std::sync::Arc;

use claimgate_common::{Address, ClaimGateError, ResolutionSignature};
use ethers_core::types::H256;
use ethers_signers::{LocalWallet, Signer};
use once_cell::sync::OnceCell;
use zeroize::Zeroizing;

/// Environment variable holding the hex-encoded secp256k1 signing key.
pub const SIGNER_PRIVATE_KEY_ENV: &str = "CLAIMGATE_SIGNER_PRIVATE_KEY";

static SIGNER_KEY: OnceCell<Arc<SignerKey>> = OnceCell::new();

pub struct SignerKey {
    wallet: LocalWallet,
}

impl SignerKey {
    /// Parse a 32-byte hex secret (with or without `0x`).
    pub fn from_hex(secret: &str) -> Result<Self, ClaimGateError> {
        let trimmed = secret.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);

        let bytes = Zeroizing::new(
            hex::decode(trimmed)
                .map_err(|_| ClaimGateError::SigningKey("signing key is not valid hex".into()))?,
        );
        if bytes.len() != 32 {
            return Err(ClaimGateError::SigningKey(format!(
                "signing key must be 32 bytes, got {}",
                bytes.len()
            )));
        }

        let wallet = LocalWallet::from_bytes(bytes.as_slice()).map_err(|_| {
            ClaimGateError::SigningKey("signing key is not a valid secp256k1 scalar".into())
        })?;

        Ok(Self { wallet })
    }

    /// Read the key from `var`.
    pub fn from_env(var: &str) -> Result<Self, ClaimGateError> {
        let secret = Zeroizing::new(
            env::var(var).map_err(|_| ClaimGateError::SigningKey(format!("{var} is not set")))?,
        );
        Self::from_hex(&secret)
    }

    /// Fresh random key, for tests and local experiments.
    pub fn random() -> Self {
        Self {
            wallet: LocalWallet::new(&mut rand::thread_rng()),
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Sign a 32-byte digest directly (no EIP-191 wrapping).
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<ResolutionSignature, ClaimGateError> {
        let signature = self
            .wallet
            .sign_hash(H256::from(*digest))
            .map_err(|e| ClaimGateError::SigningKey(format!("signing failed: {e}")))?;

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        signature.r.to_big_endian(&mut r);
        signature.s.to_big_endian(&mut s);
        let v = u8::try_from(signature.v)
            .map_err(|_| ClaimGateError::SigningKey(format!("unexpected v {}", signature.v)))?;

        Ok(ResolutionSignature { r, s, v })
    }

    /// Install `self` as the process-wide key. Only the first call wins.
    pub fn install(self) -> Result<Arc<SignerKey>, ClaimGateError> {
        let key = Arc::new(self);
        SIGNER_KEY
            .set(Arc::clone(&key))
            .map_err(|_| ClaimGateError::SigningKey("signing key already installed".into()))?;
        tracing::info!(signer = ?key.address(), "gateway signing key installed");
        Ok(key)
    }

    /// The installed process-wide key.
    pub fn global() -> Result<Arc<SignerKey>, ClaimGateError> {
        SIGNER_KEY
            .get()
            .cloned()
            .ok_or_else(|| ClaimGateError::SigningKey("signing key not loaded".into()))
    }
}

impl fmt::Debug for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
