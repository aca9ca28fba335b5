//! Resolution digest construction and signer recovery.
//!
//! The digest is the binding contract between gateway and verifier:
//!
//! ```text
//! keccak256(0x1900 || requester (20) || valid_until (8, big-endian)
//!           || keccak256(extra_data) || keccak256(payload))
//! ```

use ethers_core::types::{Signature, H256, U256};
use sha3::{Digest, Keccak256};

use crate::{Address, ClaimGateError, ResolutionSignature, DOMAIN_PREFIX};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Compute the digest a gateway signs and a verifier recomputes.
pub fn resolution_digest(
    requester: &Address,
    valid_until: u64,
    extra_data: &[u8],
    payload: &[u8],
) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(DOMAIN_PREFIX);
    hasher.update(requester.as_bytes());
    hasher.update(valid_until.to_be_bytes());
    hasher.update(keccak256(extra_data));
    hasher.update(keccak256(payload));
    hasher.finalize().into()
}

/// Recover the address that produced `signature` over `digest`.
///
/// Only `v` of 27 or 28 is accepted. Any signature that cannot be turned
/// into a public key is reported as a malformed response; a well-formed
/// signature over the wrong digest recovers to some unrelated address
/// instead.
pub fn recover_signer(
    digest: &[u8; 32],
    signature: &ResolutionSignature,
) -> Result<Address, ClaimGateError> {
    if !matches!(signature.v, 27 | 28) {
        return Err(ClaimGateError::MalformedResponse(format!(
            "signature v must be 27 or 28, got {}",
            signature.v
        )));
    }

    let signature = Signature {
        r: U256::from_big_endian(&signature.r),
        s: U256::from_big_endian(&signature.s),
        v: u64::from(signature.v),
    };

    signature
        .recover(H256::from(*digest))
        .map_err(|e| ClaimGateError::MalformedResponse(format!("signature recovery failed: {e}")))
}
