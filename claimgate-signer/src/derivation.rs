//! Payload derivation.
//!
//! What a claim resolves to is business-specific; the protocol only needs a
//! deterministic function from identifier to payload bytes.

use claimgate_common::{encoding, ClaimGateError, ClaimId, U256};

pub trait ClaimDerivation: Send + Sync {
    fn derive(&self, claim_id: &ClaimId) -> Result<Vec<u8>, ClaimGateError>;
}

impl<F> ClaimDerivation for F
where
    F: Fn(&ClaimId) -> Result<Vec<u8>, ClaimGateError> + Send + Sync,
{
    fn derive(&self, claim_id: &ClaimId) -> Result<Vec<u8>, ClaimGateError> {
        self(claim_id)
    }
}

/// Reads the identifier as a big-endian integer and resolves it to twice
/// that value, encoded as a `uint256` token id.
///
/// Identifiers must be minimal: `0x0001` is rejected rather than treated as
/// `0x01`, so distinct identifiers never share a token id.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoublingDerivation;

impl ClaimDerivation for DoublingDerivation {
    fn derive(&self, claim_id: &ClaimId) -> Result<Vec<u8>, ClaimGateError> {
        let bytes = claim_id.as_bytes();
        if bytes.is_empty() {
            return Err(ClaimGateError::InvalidRequest("empty claim identifier".into()));
        }
        if bytes.len() > 1 && bytes[0] == 0 {
            return Err(ClaimGateError::InvalidRequest(format!(
                "claim identifier {claim_id} has leading zero bytes"
            )));
        }
        if bytes.len() > 32 {
            return Err(ClaimGateError::InvalidRequest(format!(
                "claim identifier wider than 32 bytes: {}",
                bytes.len()
            )));
        }

        let token_id = U256::from_big_endian(bytes)
            .checked_mul(U256::from(2u8))
            .ok_or_else(|| ClaimGateError::InvalidRequest("derived token id overflows".into()))?;

        Ok(encoding::encode_token_id(token_id))
    }
}

/// Always resolves to the same token id.
#[derive(Debug, Clone, Copy)]
pub struct FixedTokenDerivation(pub U256);

impl ClaimDerivation for FixedTokenDerivation {
    fn derive(&self, _claim_id: &ClaimId) -> Result<Vec<u8>, ClaimGateError> {
        Ok(encoding::encode_token_id(self.0))
    }
}
