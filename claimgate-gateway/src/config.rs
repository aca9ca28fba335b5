//! Gateway configuration.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{bail, Context, Result};
use claimgate_common::{DEFAULT_VALIDITY_TTL_SECS, MAX_VALIDITY_TTL_SECS, MIN_VALIDITY_TTL_SECS};

pub const BIND_ADDR_ENV: &str = "CLAIMGATE_BIND_ADDR";
pub const PORT_ENV: &str = "PORT";
pub const VALIDITY_TTL_ENV: &str = "CLAIMGATE_VALIDITY_TTL_SECS";
pub const API_KEYS_ENV: &str = "CLAIMGATE_API_KEYS";
pub const RATE_LIMIT_ENV: &str = "CLAIMGATE_RATE_LIMIT_PER_MINUTE";

pub const DEFAULT_PORT: u16 = 3003;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Lifetime of each signed resolution.
    pub validity_ttl_secs: u64,
    /// Accepted `x-api-key` values. Empty means the endpoint is open.
    pub api_keys: Vec<String>,
    /// Signing requests allowed per sender per minute.
    pub rate_limit_per_minute: Option<u32>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            validity_ttl_secs: DEFAULT_VALIDITY_TTL_SECS,
            api_keys: Vec::new(),
            rate_limit_per_minute: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = match lookup(BIND_ADDR_ENV) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("{BIND_ADDR_ENV} is not an IP address: {raw}"))?,
            None => defaults.bind_addr,
        };

        let port = match lookup(PORT_ENV) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("{PORT_ENV} is not a port: {raw}"))?,
            None => defaults.port,
        };

        let validity_ttl_secs = match lookup(VALIDITY_TTL_ENV) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("{VALIDITY_TTL_ENV} is not a number: {raw}"))?,
            None => defaults.validity_ttl_secs,
        };
        if !(MIN_VALIDITY_TTL_SECS..=MAX_VALIDITY_TTL_SECS).contains(&validity_ttl_secs) {
            bail!(
                "{VALIDITY_TTL_ENV} must be between {MIN_VALIDITY_TTL_SECS} and \
                 {MAX_VALIDITY_TTL_SECS}, got {validity_ttl_secs}"
            );
        }

        let api_keys = lookup(API_KEYS_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let rate_limit_per_minute = match lookup(RATE_LIMIT_ENV) {
            Some(raw) => {
                let limit: u32 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{RATE_LIMIT_ENV} is not a number: {raw}"))?;
                (limit > 0).then_some(limit)
            }
            None => None,
        };

        Ok(Self {
            bind_addr,
            port,
            validity_ttl_secs,
            api_keys,
            rate_limit_per_minute,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}
