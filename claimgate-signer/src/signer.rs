//! Gateway signing operation.

use std::sync::Arc;

use claimgate_common::{
    digest, encoding, Address, ClaimGateError, ClaimId, Clock, RequestContext, Selector,
    SignedResolution, MAX_VALIDITY_TTL_SECS, MIN_VALIDITY_TTL_SECS,
};

use crate::derivation::ClaimDerivation;
use crate::key::SignerKey;

/// Derives a payload for a claim and signs it bound to the requesting
/// context.
pub struct GatewaySigner {
    key: Arc<SignerKey>,
    derivation: Box<dyn ClaimDerivation>,
    ttl_secs: u64,
    clock: Clock,
}

impl GatewaySigner {
    pub fn new(
        key: Arc<SignerKey>,
        derivation: impl ClaimDerivation + 'static,
        ttl_secs: u64,
        clock: Clock,
    ) -> Result<Self, ClaimGateError> {
        if !(MIN_VALIDITY_TTL_SECS..=MAX_VALIDITY_TTL_SECS).contains(&ttl_secs) {
            return Err(ClaimGateError::Config(format!(
                "validity ttl must be between {MIN_VALIDITY_TTL_SECS} and \
                 {MAX_VALIDITY_TTL_SECS} seconds, got {ttl_secs}"
            )));
        }

        Ok(Self {
            key,
            derivation: Box::new(derivation),
            ttl_secs,
            clock,
        })
    }

    pub fn address(&self) -> Address {
        self.key.address()
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Produce a signed resolution for `claim_id` under `context`.
    ///
    /// The context's extra data must bind this same claim identifier.
    pub fn sign(
        &self,
        claim_id: &ClaimId,
        context: &RequestContext,
    ) -> Result<SignedResolution, ClaimGateError> {
        if context.requester.is_zero() {
            return Err(ClaimGateError::InvalidRequest("requester identity is empty".into()));
        }

        let bound = encoding::decode_extra_data(&context.extra_data).map_err(|_| {
            ClaimGateError::InvalidRequest("extra data does not bind a claim".into())
        })?;
        if &bound != claim_id {
            return Err(ClaimGateError::InvalidRequest(format!(
                "extra data binds claim {bound}, not {claim_id}"
            )));
        }

        let payload = self.derivation.derive(claim_id)?;

        let valid_until = self
            .clock
            .now()
            .checked_add(self.ttl_secs)
            .ok_or_else(|| ClaimGateError::InvalidRequest("expiry overflows".into()))?;

        let digest = digest::resolution_digest(
            &context.requester,
            valid_until,
            &context.extra_data,
            &payload,
        );
        let signature = self.key.sign_digest(&digest)?;

        tracing::info!(
            requester = ?context.requester,
            claim = %claim_id,
            valid_until,
            "signed resolution"
        );

        Ok(SignedResolution {
            payload,
            valid_until,
            signature,
        })
    }

    /// Sign for a plain `(sender, claim_id)` pair, rebuilding the binding
    /// context the verifier issues for it.
    pub fn sign_request(
        &self,
        sender: Address,
        claim_id: &ClaimId,
    ) -> Result<SignedResolution, ClaimGateError> {
        let context = RequestContext::for_claim(sender, claim_id, Selector::resolve_callback());
        self.sign(claim_id, &context)
    }
}

impl std::fmt::Debug for GatewaySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySigner")
            .field("key", &self.key)
            .field("ttl_secs", &self.ttl_secs)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
