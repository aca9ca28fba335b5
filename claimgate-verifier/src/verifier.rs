//! Verifier and request binding.

use std::sync::Arc;

use claimgate_common::{
    digest, encoding, Address, ClaimGateError, ClaimId, Clock, OffchainLookup, Resolution,
    Selector, SignedResolution, U256,
};

use crate::collection::ClaimCollection;
use crate::ledger::{ClaimLedger, ClaimRecord};
use crate::registry::SignerRegistry;

/// Identity and lookup routing of a verifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Requester identity every accepted signature must be bound to.
    pub identity: Address,
    pub gateway_urls: Vec<String>,
    pub callback: Selector,
}

impl VerifierConfig {
    pub fn new(identity: Address, gateway_urls: Vec<String>) -> Self {
        Self {
            identity,
            gateway_urls,
            callback: Selector::resolve_callback(),
        }
    }
}

/// A response that passed every check short of consumption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedResolution {
    pub claim_id: ClaimId,
    pub payload: Vec<u8>,
    pub valid_until: u64,
    pub signer: Address,
}

pub struct ClaimVerifier {
    config: VerifierConfig,
    registry: Arc<SignerRegistry>,
    ledger: ClaimLedger,
    collection: ClaimCollection,
    clock: Clock,
}

impl ClaimVerifier {
    /// The token collection lives in the same backend as `ledger`, so a
    /// persistent ledger keeps minted tokens across restarts too.
    pub fn new(
        config: VerifierConfig,
        registry: Arc<SignerRegistry>,
        ledger: ClaimLedger,
    ) -> Result<Self, ClaimGateError> {
        let collection = ledger.collection()?;
        Ok(Self {
            config,
            registry,
            ledger,
            collection,
            clock: Clock::system(),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn registry(&self) -> &SignerRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &ClaimLedger {
        &self.ledger
    }

    pub fn collection(&self) -> &ClaimCollection {
        &self.collection
    }

    /// Answer locally if the claim was already resolved, otherwise signal
    /// that an off-chain lookup is needed.
    pub fn resolve(&self, claim_id: &ClaimId) -> Result<Resolution, ClaimGateError> {
        if let Some(record) = self.ledger.record(claim_id)? {
            return Ok(Resolution::Resolved(record.payload));
        }

        tracing::debug!(claim = %claim_id, "off-chain lookup required");
        Ok(Resolution::LookupRequired(OffchainLookup {
            sender: self.config.identity,
            urls: self.config.gateway_urls.clone(),
            call_data: claim_id.as_bytes().to_vec(),
            callback_function: self.config.callback,
            extra_data: encoding::encode_extra_data(claim_id),
        }))
    }

    /// Check a gateway response against `extra_data` without consuming
    /// anything.
    ///
    /// The requester half of the binding is always this verifier's own
    /// identity; only `extra_data` comes from the caller, and the signature
    /// covers it.
    pub fn verify_response(
        &self,
        response: &[u8],
        extra_data: &[u8],
    ) -> Result<VerifiedResolution, ClaimGateError> {
        let resolution = SignedResolution::decode(response)?;
        let claim_id = encoding::decode_extra_data(extra_data)?;

        let now = self.clock.now();
        if resolution.is_expired(now) {
            return Err(ClaimGateError::ExpiredSignature {
                valid_until: resolution.valid_until,
                now,
            });
        }

        let digest = digest::resolution_digest(
            &self.config.identity,
            resolution.valid_until,
            extra_data,
            &resolution.payload,
        );
        let signer = digest::recover_signer(&digest, &resolution.signature)?;
        if !self.registry.is_authorized(&signer) {
            return Err(ClaimGateError::UnauthorizedSigner(signer));
        }

        Ok(VerifiedResolution {
            claim_id,
            payload: resolution.payload,
            valid_until: resolution.valid_until,
            signer,
        })
    }

    /// Verify `response` and consume its claim for `claimant`, releasing the
    /// payload. The ledger is untouched unless every check passes.
    pub fn finalize(
        &self,
        response: &[u8],
        extra_data: &[u8],
        claimant: Address,
    ) -> Result<Vec<u8>, ClaimGateError> {
        let verified = self.verify_response(response, extra_data)?;
        self.consume(&verified, claimant)?;

        tracing::info!(
            claim = %verified.claim_id,
            signer = ?verified.signer,
            claimant = ?claimant,
            "claim finalized"
        );
        Ok(verified.payload)
    }

    /// Verify `response`, consume its claim and mint the derived token to
    /// `claimant`. Consumption and minting happen together or not at all.
    pub fn claim(
        &self,
        response: &[u8],
        extra_data: &[u8],
        claimant: Address,
    ) -> Result<U256, ClaimGateError> {
        let verified = self.verify_response(response, extra_data)?;
        if self.ledger.is_consumed(&verified.claim_id)? {
            return Err(ClaimGateError::AlreadyClaimed(verified.claim_id));
        }

        let token_id = encoding::decode_token_id(&verified.payload)?;
        self.collection
            .mint_with(token_id, claimant, || self.consume(&verified, claimant))?;

        tracing::info!(
            claim = %verified.claim_id,
            %token_id,
            claimant = ?claimant,
            "claim minted"
        );
        Ok(token_id)
    }

    fn consume(
        &self,
        verified: &VerifiedResolution,
        claimant: Address,
    ) -> Result<(), ClaimGateError> {
        self.ledger.try_consume(
            &verified.claim_id,
            ClaimRecord {
                owner: claimant,
                payload: verified.payload.clone(),
                consumed_at: self.clock.now(),
            },
        )
    }
}

impl std::fmt::Debug for ClaimVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimVerifier")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimgate_common::RequestContext;
    use claimgate_signer::{DoublingDerivation, FixedTokenDerivation, GatewaySigner, SignerKey};

    const NOW: u64 = 1_700_000_000;

    struct Harness {
        signer: GatewaySigner,
        verifier: ClaimVerifier,
        clock: Clock,
        controller: Address,
    }

    fn harness() -> Harness {
        let clock = Clock::fixed(NOW);
        let key = Arc::new(SignerKey::random());
        let controller = Address::repeat_byte(0xc0);
        let registry = Arc::new(SignerRegistry::with_signers(controller, [key.address()]));
        let verifier = ClaimVerifier::new(
            VerifierConfig::new(
                Address::repeat_byte(0x42),
                vec!["http://localhost:3003".into()],
            ),
            registry,
            ClaimLedger::in_memory(),
        )
        .unwrap()
        .with_clock(clock.clone());
        let signer = GatewaySigner::new(key, DoublingDerivation, 900, clock.clone()).unwrap();

        Harness {
            signer,
            verifier,
            clock,
            controller,
        }
    }

    fn lookup(verifier: &ClaimVerifier, claim_id: &ClaimId) -> OffchainLookup {
        match verifier.resolve(claim_id).unwrap() {
            Resolution::LookupRequired(lookup) => lookup,
            other => panic!("expected lookup, got {other:?}"),
        }
    }

    fn respond(h: &Harness, claim_id: &ClaimId) -> (Vec<u8>, Vec<u8>) {
        let lookup = lookup(&h.verifier, claim_id);
        let resolution = h.signer.sign(claim_id, &lookup.context()).unwrap();
        (resolution.encode(), lookup.extra_data)
    }

    #[test]
    fn test_resolve_signals_lookup() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0xff]);
        let lookup = lookup(&h.verifier, &claim_id);

        assert_eq!(lookup.sender, Address::repeat_byte(0x42));
        assert_eq!(lookup.call_data, vec![0xff]);
        assert_eq!(lookup.callback_function, Selector::resolve_callback());
        assert_eq!(lookup.urls, vec!["http://localhost:3003".to_string()]);
        assert_eq!(
            lookup.context(),
            RequestContext::for_claim(
                Address::repeat_byte(0x42),
                &claim_id,
                Selector::resolve_callback()
            )
        );
    }

    #[test]
    fn test_finalize_once_then_already_claimed() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0xff]);
        let (response, extra) = respond(&h, &claim_id);
        let claimant = Address::repeat_byte(0xa1);

        let payload = h.verifier.finalize(&response, &extra, claimant).unwrap();
        assert_eq!(encoding::decode_token_id(&payload).unwrap(), U256::from(510u64));

        assert_eq!(
            h.verifier.finalize(&response, &extra, claimant),
            Err(ClaimGateError::AlreadyClaimed(claim_id.clone()))
        );
        // A fresh signature does not reopen a consumed claim.
        let (fresh, extra) = respond_direct(&h, &claim_id);
        assert!(matches!(
            h.verifier.finalize(&fresh, &extra, claimant),
            Err(ClaimGateError::AlreadyClaimed(_))
        ));
    }

    fn respond_direct(h: &Harness, claim_id: &ClaimId) -> (Vec<u8>, Vec<u8>) {
        let resolution = h
            .signer
            .sign_request(h.verifier.config().identity, claim_id)
            .unwrap();
        (resolution.encode(), encoding::encode_extra_data(claim_id))
    }

    #[test]
    fn test_consumed_claim_resolves_locally() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0x07]);
        let (response, extra) = respond(&h, &claim_id);
        let payload = h
            .verifier
            .finalize(&response, &extra, Address::repeat_byte(1))
            .unwrap();

        assert_eq!(
            h.verifier.resolve(&claim_id).unwrap(),
            Resolution::Resolved(payload)
        );
    }

    #[test]
    fn test_expiry_boundary() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0x01]);
        let (response, extra) = respond(&h, &claim_id);

        h.clock.advance(899);
        assert!(h.verifier.verify_response(&response, &extra).is_ok());

        h.clock.advance(1);
        assert_eq!(
            h.verifier.finalize(&response, &extra, Address::repeat_byte(1)),
            Err(ClaimGateError::ExpiredSignature {
                valid_until: NOW + 900,
                now: NOW + 900
            })
        );
        assert!(!h.verifier.ledger().is_consumed(&claim_id).unwrap());
    }

    #[test]
    fn test_tampered_extra_data() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0xff]);
        let (response, _) = respond(&h, &claim_id);

        assert!(matches!(
            h.verifier.finalize(&response, &[0x11], Address::repeat_byte(1)),
            Err(ClaimGateError::BindingMismatch(_))
        ));

        // Well-formed but for another claim: the signature no longer matches.
        let other = encoding::encode_extra_data(&ClaimId::new(vec![0xfe]));
        assert!(matches!(
            h.verifier.finalize(&response, &other, Address::repeat_byte(1)),
            Err(ClaimGateError::UnauthorizedSigner(_))
        ));
        assert!(h.verifier.ledger().is_empty());
    }

    #[test]
    fn test_unauthorized_and_revoked_signers() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0x02]);

        let rogue = GatewaySigner::new(
            Arc::new(SignerKey::random()),
            DoublingDerivation,
            900,
            h.clock.clone(),
        )
        .unwrap();
        let forged = rogue
            .sign_request(h.verifier.config().identity, &claim_id)
            .unwrap()
            .encode();
        let extra = encoding::encode_extra_data(&claim_id);
        assert_eq!(
            h.verifier.finalize(&forged, &extra, Address::repeat_byte(1)),
            Err(ClaimGateError::UnauthorizedSigner(rogue.address()))
        );

        let (response, extra) = respond(&h, &claim_id);
        h.verifier
            .registry()
            .set_authorized(h.controller, h.signer.address(), false)
            .unwrap();
        assert!(matches!(
            h.verifier.finalize(&response, &extra, Address::repeat_byte(1)),
            Err(ClaimGateError::UnauthorizedSigner(_))
        ));
    }

    #[test]
    fn test_response_for_other_requester_is_rejected() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0x03]);
        let response = h
            .signer
            .sign_request(Address::repeat_byte(0x99), &claim_id)
            .unwrap()
            .encode();
        let extra = encoding::encode_extra_data(&claim_id);

        assert!(matches!(
            h.verifier.finalize(&response, &extra, Address::repeat_byte(1)),
            Err(ClaimGateError::UnauthorizedSigner(_))
        ));
    }

    #[test]
    fn test_non_canonical_v_is_malformed() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0x04]);
        let lookup = lookup(&h.verifier, &claim_id);
        let mut resolution = h.signer.sign(&claim_id, &lookup.context()).unwrap();

        // 27..=34 all map onto a recovery id in ethers; only 27 and 28 are valid.
        resolution.signature.v += 4;
        assert!(matches!(
            h.verifier
                .finalize(&resolution.encode(), &lookup.extra_data, Address::repeat_byte(1)),
            Err(ClaimGateError::MalformedResponse(_))
        ));
        assert!(h.verifier.ledger().is_empty());
    }

    #[test]
    fn test_malformed_response() {
        let h = harness();
        let extra = encoding::encode_extra_data(&ClaimId::new(vec![1]));
        assert!(matches!(
            h.verifier.finalize(&[0u8; 10], &extra, Address::repeat_byte(1)),
            Err(ClaimGateError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_claim_mints_and_burn_does_not_reopen() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0xff]);
        let alice = Address::repeat_byte(0xa1);
        let (response, extra) = respond(&h, &claim_id);

        let token_id = h.verifier.claim(&response, &extra, alice).unwrap();
        assert_eq!(token_id, U256::from(510u64));
        assert_eq!(h.verifier.collection().owner_of(token_id).unwrap(), alice);
        assert_eq!(h.verifier.collection().balance_of(&alice), 1);

        h.verifier.collection().burn(alice, token_id).unwrap();
        assert!(!h.verifier.collection().exists(token_id));

        let (fresh, extra) = respond_direct(&h, &claim_id);
        assert!(matches!(
            h.verifier.claim(&fresh, &extra, alice),
            Err(ClaimGateError::AlreadyClaimed(_))
        ));
        assert!(!h.verifier.collection().exists(token_id));
    }

    #[test]
    fn test_burned_token_is_not_reminted_by_another_claim() {
        let clock = Clock::fixed(NOW);
        let key = Arc::new(SignerKey::random());
        let registry = Arc::new(SignerRegistry::with_signers(
            Address::repeat_byte(0xc0),
            [key.address()],
        ));
        let verifier = ClaimVerifier::new(
            VerifierConfig::new(Address::repeat_byte(0x42), vec![]),
            registry,
            ClaimLedger::in_memory(),
        )
        .unwrap()
        .with_clock(clock.clone());
        let signer = GatewaySigner::new(key, FixedTokenDerivation(U256::from(2u64)), 900, clock)
            .unwrap();
        let alice = Address::repeat_byte(0xa1);

        let first = ClaimId::new(vec![0x01]);
        let response = signer.sign_request(verifier.config().identity, &first).unwrap();
        let token_id = verifier
            .claim(&response.encode(), &encoding::encode_extra_data(&first), alice)
            .unwrap();
        verifier.collection().burn(alice, token_id).unwrap();

        let second = ClaimId::new(vec![0x00, 0x01]);
        let response = signer.sign_request(verifier.config().identity, &second).unwrap();
        assert_eq!(
            verifier.claim(&response.encode(), &encoding::encode_extra_data(&second), alice),
            Err(ClaimGateError::TokenAlreadyMinted(token_id))
        );
        assert!(!verifier.collection().exists(token_id));
        assert!(!verifier.ledger().is_consumed(&second).unwrap());
    }

    #[test]
    fn test_claim_to_zero_address_consumes_nothing() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0x05]);
        let (response, extra) = respond(&h, &claim_id);

        assert!(matches!(
            h.verifier.claim(&response, &extra, Address::zero()),
            Err(ClaimGateError::InvalidRequest(_))
        ));
        assert!(!h.verifier.ledger().is_consumed(&claim_id).unwrap());
    }

    #[test]
    fn test_concurrent_finalize_single_winner() {
        let h = harness();
        let claim_id = ClaimId::new(vec![0x42]);
        let (response, extra) = respond(&h, &claim_id);
        let verifier = Arc::new(h.verifier);

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let verifier = Arc::clone(&verifier);
                let response = response.clone();
                let extra = extra.clone();
                std::thread::spawn(move || {
                    verifier.finalize(&response, &extra, Address::repeat_byte(i + 1))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ClaimGateError::AlreadyClaimed(_))));
    }
}
