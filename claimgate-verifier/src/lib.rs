//! claimgate-verifier
//!
//! Verifier side of the claimgate protocol. `ClaimVerifier::resolve` emits
//! an off-chain lookup signal; `finalize` and `claim` accept a gateway's
//! signed answer only if it is unexpired, bound to this verifier and the
//! claim it names, and signed by an authorized signer, then consume the
//! claim exactly once.

pub mod collection;
pub mod ledger;
pub mod registry;
pub mod verifier;

pub use collection::ClaimCollection;
pub use ledger::{ClaimLedger, ClaimRecord, DEFAULT_LEDGER_DB_PATH, LEDGER_DB_ENV};
pub use registry::SignerRegistry;
pub use verifier::{ClaimVerifier, VerifiedResolution, VerifierConfig};
