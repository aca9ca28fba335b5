//! ABI encoding/decoding for the gateway wire format.
//!
//! Signed resolutions travel as the Solidity ABI encoding of
//! `(bytes payload, uint64 validUntil, bytes signature)`; request-binding
//! extra data is the ABI encoding of `(bytes claimId)`.

use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::U256;

use crate::{Address, ClaimGateError, ClaimId, ResolutionSignature, SignedResolution};

/// Encode a signed resolution for transport.
pub fn encode_signed_resolution(resolution: &SignedResolution) -> Vec<u8> {
    abi::encode(&[
        Token::Bytes(resolution.payload.clone()),
        Token::Uint(U256::from(resolution.valid_until)),
        Token::Bytes(resolution.signature.to_bytes().to_vec()),
    ])
}

/// Decode a signed resolution received from a gateway.
pub fn decode_signed_resolution(bytes: &[u8]) -> Result<SignedResolution, ClaimGateError> {
    let tokens = abi::decode(
        &[ParamType::Bytes, ParamType::Uint(64), ParamType::Bytes],
        bytes,
    )
    .map_err(|e| ClaimGateError::MalformedResponse(format!("response encoding: {e}")))?;

    let mut tokens = tokens.into_iter();

    let payload = tokens
        .next()
        .and_then(Token::into_bytes)
        .ok_or_else(|| ClaimGateError::MalformedResponse("missing payload".into()))?;

    let valid_until = tokens
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| ClaimGateError::MalformedResponse("missing validUntil".into()))?;
    if valid_until > U256::from(u64::MAX) {
        return Err(ClaimGateError::MalformedResponse(
            "validUntil does not fit in uint64".into(),
        ));
    }

    let signature = tokens
        .next()
        .and_then(Token::into_bytes)
        .ok_or_else(|| ClaimGateError::MalformedResponse("missing signature".into()))?;

    Ok(SignedResolution {
        payload,
        valid_until: valid_until.as_u64(),
        signature: ResolutionSignature::from_slice(&signature)?,
    })
}

/// Encode the request-binding extra data for a claim.
pub fn encode_extra_data(claim_id: &ClaimId) -> Vec<u8> {
    abi::encode(&[Token::Bytes(claim_id.as_bytes().to_vec())])
}

/// Decode request-binding extra data back into the claim it binds.
pub fn decode_extra_data(bytes: &[u8]) -> Result<ClaimId, ClaimGateError> {
    abi::decode(&[ParamType::Bytes], bytes)
        .ok()
        .and_then(|tokens| tokens.into_iter().next())
        .and_then(Token::into_bytes)
        .map(ClaimId::new)
        .ok_or_else(|| {
            ClaimGateError::BindingMismatch(format!(
                "extra data {} does not encode a claim identifier",
                to_hex(bytes)
            ))
        })
}

/// Encode a numeric token id as a 32-byte big-endian `uint256` payload.
pub fn encode_token_id(token_id: U256) -> Vec<u8> {
    let mut out = vec![0u8; 32];
    token_id.to_big_endian(&mut out);
    out
}

/// Decode a `uint256` payload.
pub fn decode_token_id(payload: &[u8]) -> Result<U256, ClaimGateError> {
    if payload.len() != 32 {
        return Err(ClaimGateError::MalformedResponse(format!(
            "token payload must be 32 bytes, got {}",
            payload.len()
        )));
    }
    Ok(U256::from_big_endian(payload))
}

/// Decode `0x`-prefixed or bare hex.
pub fn parse_hex_bytes(hex: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    hex::decode(hex)
}

/// Parse a 20-byte address from hex.
pub fn parse_address(hex: &str) -> Result<Address, ClaimGateError> {
    let bytes = parse_hex_bytes(hex)
        .map_err(|e| ClaimGateError::InvalidRequest(format!("invalid address hex: {e}")))?;

    if bytes.len() != 20 {
        return Err(ClaimGateError::InvalidRequest(format!(
            "expected 20 address bytes, got {}",
            bytes.len()
        )));
    }

    Ok(Address::from_slice(&bytes))
}

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
