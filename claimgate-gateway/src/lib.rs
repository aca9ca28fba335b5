//! claimgate-gateway
//!
//! Axum-based HTTP service answering off-chain lookups. A fetcher posts the
//! `{sender, data}` pair from a verifier's lookup signal and receives the
//! hex-encoded signed resolution to resubmit to the verifier.

pub mod config;
pub mod policy;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Json, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use claimgate_common::{encoding, ClaimGateError, ClaimId, LookupRequest, LookupResponse};
use claimgate_signer::GatewaySigner;

use crate::policy::{AccessPolicy, PolicyError};

pub const SERVICE_ID: &str = "claimgate-gateway";
pub const API_KEY_HEADER: &str = "x-api-key";

const CODE_UNAUTHORIZED: &str = "UNAUTHORIZED";
const CODE_RATE_LIMITED: &str = "RATE_LIMITED";
const CODE_INVALID_REQUEST: &str = "INVALID_REQUEST";

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AppState {
    signer: Arc<GatewaySigner>,
    policy: Arc<AccessPolicy>,
}

impl AppState {
    pub fn new(signer: GatewaySigner, policy: AccessPolicy) -> Self {
        Self {
            signer: Arc::new(signer),
            policy: Arc::new(policy),
        }
    }

    pub fn signer(&self) -> &GatewaySigner {
        &self.signer
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTER
// ═══════════════════════════════════════════════════════════════════════════════

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(lookup))
        .route("/lookup", post(lookup))
        .route("/health", get(health))
        .route("/info", get(info))
        .layer(cors)
        .with_state(state)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ═══════════════════════════════════════════════════════════════════════════════

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_ID
    }))
}

async fn info(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "service": SERVICE_ID,
        "signer": format!("{:?}", state.signer.address()),
        "validity_ttl_secs": state.signer.ttl_secs(),
        "api_key_required": state.policy.requires_api_key(),
        "rate_limit_per_minute": state.policy.rate_limit_per_minute(),
    }))
}

/// Sign the resolution for `data` bound to `sender`.
///
/// Quotas are charged to the API key, or to the peer address when keys are
/// not enforced. `sender` is caller-chosen and never used for accounting.
async fn lookup(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<LookupRequest>, JsonRejection>,
) -> Result<Json<LookupResponse>, ApiError> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    state.policy.check_api_key(api_key)?;

    let client = state
        .policy
        .client_key(api_key, peer.map(|ConnectInfo(addr)| addr.ip()));
    state.policy.check_rate(&client)?;

    let Json(request) = payload?;
    let sender = encoding::parse_address(&request.sender)?;
    let claim_id = ClaimId::from_hex(&request.data)?;

    let resolution = state.signer.sign_request(sender, &claim_id)?;

    Ok(Json(LookupResponse {
        data: resolution.to_hex(),
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR HANDLING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: String,
}

impl From<ClaimGateError> for ApiError {
    fn from(err: ClaimGateError) -> Self {
        let status = match &err {
            ClaimGateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "lookup failed");
        } else {
            tracing::debug!(error = %err, "lookup rejected");
        }
        Self {
            status,
            message: err.to_string(),
            code: err.code().into(),
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        let (status, code) = match &err {
            PolicyError::Unauthorized => (StatusCode::UNAUTHORIZED, CODE_UNAUTHORIZED),
            PolicyError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, CODE_RATE_LIMITED),
        };
        tracing::warn!(error = %err, "lookup refused by access policy");
        Self {
            status,
            message: err.to_string(),
            code: code.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection, "malformed lookup body");
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
            code: CODE_INVALID_REQUEST.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.message,
            "error_code": self.code,
        });
        (self.status, Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

pub mod main_entry {
    use super::*;

    use anyhow::Context;
    use claimgate_common::Clock;
    use claimgate_signer::{DoublingDerivation, SignerKey, SIGNER_PRIVATE_KEY_ENV};

    use crate::config::GatewayConfig;

    pub async fn run_server() -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "claimgate_gateway=info,claimgate_signer=info".into()),
            )
            .init();

        dotenvy::dotenv().ok();
        let config = GatewayConfig::from_env()?;

        let key = SignerKey::from_env(SIGNER_PRIVATE_KEY_ENV)
            .and_then(SignerKey::install)
            .context("failed to load gateway signing key")?;

        let clock = Clock::system();
        let signer = GatewaySigner::new(
            key,
            DoublingDerivation,
            config.validity_ttl_secs,
            clock.clone(),
        )?;
        let policy = AccessPolicy::new(
            config.api_keys.clone(),
            config.rate_limit_per_minute,
            clock,
        );

        let addr = config.socket_addr();
        tracing::info!(
            signer = ?signer.address(),
            ttl_secs = config.validity_ttl_secs,
            api_key_required = policy.requires_api_key(),
            "claimgate gateway listening on {}",
            addr
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let app = app_router(AppState::new(signer, policy))
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("claimgate gateway stopped");
        Ok(())
    }

    async fn shutdown_signal() {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {}", err);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
