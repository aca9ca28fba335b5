//! claimgate-common
//!
//! Types shared by the gateway signer and the verifier of the claimgate
//! signed-resolution protocol: claim identifiers, request-binding context,
//! signed resolutions, the lookup signal, and the error taxonomy both sides
//! report.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ethers_core::types::{Address, U256};

pub mod clock;
pub mod digest;
pub mod encoding;

pub use clock::Clock;

/// Domain-separation prefix hashed in front of every resolution digest.
pub const DOMAIN_PREFIX: [u8; 2] = [0x19, 0x00];

/// Shortest signature lifetime a gateway may be configured with.
pub const MIN_VALIDITY_TTL_SECS: u64 = 60;

/// Longest signature lifetime a gateway may be configured with.
pub const MAX_VALIDITY_TTL_SECS: u64 = 900;

/// Default signature lifetime (15 minutes)
pub const DEFAULT_VALIDITY_TTL_SECS: u64 = 900;

/// Function signature of the verifier callback named in lookup signals.
pub const RESOLVE_CALLBACK_SIGNATURE: &str = "resolveClaimRemote(bytes,bytes)";

/// Length of an `r || s || v` signature on the wire.
pub const SIGNATURE_LEN: usize = 65;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimGateError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("signature expired: valid until {valid_until}, now {now}")]
    ExpiredSignature { valid_until: u64, now: u64 },

    #[error("unauthorized signer: {0:?}")]
    UnauthorizedSigner(Address),

    #[error("binding mismatch: {0}")]
    BindingMismatch(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("claim {0} already claimed")]
    AlreadyClaimed(ClaimId),

    #[error("caller {0:?} is not the registry controller")]
    NotController(Address),

    #[error("token {0} does not exist")]
    TokenNotFound(U256),

    #[error("caller {caller:?} does not own token {token_id}")]
    NotTokenOwner { caller: Address, token_id: U256 },

    #[error("token {0} already minted")]
    TokenAlreadyMinted(U256),

    #[error("signing key unavailable: {0}")]
    SigningKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ClaimGateError {
    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::ExpiredSignature { .. } => "EXPIRED_SIGNATURE",
            Self::UnauthorizedSigner(_) => "UNAUTHORIZED_SIGNER",
            Self::BindingMismatch(_) => "BINDING_MISMATCH",
            Self::MalformedResponse(_) => "MALFORMED_RESPONSE",
            Self::AlreadyClaimed(_) => "ALREADY_CLAIMED",
            Self::NotController(_) => "NOT_CONTROLLER",
            Self::TokenNotFound(_) => "TOKEN_NOT_FOUND",
            Self::NotTokenOwner { .. } => "NOT_TOKEN_OWNER",
            Self::TokenAlreadyMinted(_) => "TOKEN_ALREADY_MINTED",
            Self::SigningKey(_) => "SIGNING_KEY_UNAVAILABLE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Opaque claim identifier supplied by the caller.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimId(Vec<u8>);

impl ClaimId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a `0x`-prefixed (or bare) hex identifier.
    pub fn from_hex(hex: &str) -> Result<Self, ClaimGateError> {
        encoding::parse_hex_bytes(hex)
            .map(Self)
            .map_err(|e| ClaimGateError::InvalidRequest(format!("claim identifier: {e}")))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        encoding::to_hex(&self.0)
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClaimId({})", self.to_hex())
    }
}

impl From<&[u8]> for ClaimId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Four-byte function selector naming the callback a caller must invoke.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector(pub [u8; 4]);

impl Selector {
    /// Selector of a Solidity-style function signature, e.g. `foo(bytes)`.
    pub fn from_signature(signature: &str) -> Self {
        let hash = digest::keccak256(signature.as_bytes());
        Self([hash[0], hash[1], hash[2], hash[3]])
    }

    pub fn resolve_callback() -> Self {
        Self::from_signature(RESOLVE_CALLBACK_SIGNATURE)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", encoding::to_hex(&self.0))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Request-binding context issued by the verifier and reproduced by the
/// gateway.
///
/// `extra_data` is the ABI encoding of `(bytes claim_id)`, so the signature
/// binds the claim identifier that the verifier will consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub requester: Address,
    pub extra_data: Vec<u8>,
    pub callback: Selector,
}

impl RequestContext {
    pub fn for_claim(requester: Address, claim_id: &ClaimId, callback: Selector) -> Self {
        Self {
            requester,
            extra_data: encoding::encode_extra_data(claim_id),
            callback,
        }
    }

    /// Recover the claim identifier bound into `extra_data`.
    pub fn claim_id(&self) -> Result<ClaimId, ClaimGateError> {
        encoding::decode_extra_data(&self.extra_data)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIGNED RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Recoverable secp256k1 signature in `r || s || v` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl ResolutionSignature {
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ClaimGateError> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(ClaimGateError::MalformedResponse(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LEN,
                bytes.len()
            )));
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);

        Ok(Self { r, s, v: bytes[64] })
    }
}

/// A derived payload together with its expiry and the gateway's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedResolution {
    pub payload: Vec<u8>,
    pub valid_until: u64,
    pub signature: ResolutionSignature,
}

impl SignedResolution {
    /// A resolution is only usable while `now < valid_until`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.valid_until
    }

    pub fn encode(&self) -> Vec<u8> {
        encoding::encode_signed_resolution(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ClaimGateError> {
        encoding::decode_signed_resolution(bytes)
    }

    pub fn to_hex(&self) -> String {
        encoding::to_hex(&self.encode())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOOKUP SIGNAL
// ═══════════════════════════════════════════════════════════════════════════════

/// Structured "off-chain lookup needed" signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffchainLookup {
    /// The verifying entity; signatures must be bound to this identity.
    pub sender: Address,
    /// Gateways able to answer the lookup.
    pub urls: Vec<String>,
    /// Call data that triggered the lookup (the claim identifier).
    pub call_data: Vec<u8>,
    /// Callback to resubmit the signed response to.
    pub callback_function: Selector,
    pub extra_data: Vec<u8>,
}

impl OffchainLookup {
    pub fn context(&self) -> RequestContext {
        RequestContext {
            requester: self.sender,
            extra_data: self.extra_data.clone(),
            callback: self.callback_function,
        }
    }

    /// JSON body a fetcher posts to one of `urls`.
    pub fn gateway_request(&self) -> LookupRequest {
        LookupRequest {
            sender: format!("{:?}", self.sender),
            data: encoding::to_hex(&self.call_data),
        }
    }
}

/// Outcome of asking the verifier to resolve a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The verifier already knows the answer.
    Resolved(Vec<u8>),
    /// The answer must be fetched from a gateway and resubmitted.
    LookupRequired(OffchainLookup),
}

// ═══════════════════════════════════════════════════════════════════════════════
// GATEWAY WIRE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Off-chain lookup request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    /// Requester identity, hex.
    pub sender: String,
    /// Claim identifier, hex.
    pub data: String,
}

/// Off-chain lookup response body: the hex-encoded signed resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub data: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
