//! claimgate-signer
//!
//! Gateway side of the claimgate protocol: holds the process-wide signing
//! key, derives the payload a claim resolves to and signs it bound to the
//! requester, the request's extra data and an expiry.

pub mod derivation;
pub mod key;
pub mod signer;

pub use derivation::{ClaimDerivation, DoublingDerivation, FixedTokenDerivation};
pub use key::{SignerKey, SIGNER_PRIVATE_KEY_ENV};
pub use signer::GatewaySigner;
