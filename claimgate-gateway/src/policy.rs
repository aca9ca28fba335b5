//! Access policy for the signing endpoint.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;

use claimgate_common::Clock;
use thiserror::Error;

/// Length of one rate-limit window.
pub const RATE_WINDOW_SECS: u64 = 60;

// Windows are swept once the table grows past this many clients.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("missing or unknown API key")]
    Unauthorized,

    #[error("rate limit exceeded; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Who a request is counted against for rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    ApiKey(String),
    Peer(IpAddr),
    /// No API key in force and no peer address available.
    Unidentified,
}

#[derive(Debug, Default)]
pub struct AccessPolicy {
    api_keys: HashSet<String>,
    rate_limit: Option<RateLimiter>,
}

impl AccessPolicy {
    /// No API keys, no rate limit.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn new(
        api_keys: impl IntoIterator<Item = String>,
        rate_limit_per_minute: Option<u32>,
        clock: Clock,
    ) -> Self {
        Self {
            api_keys: api_keys.into_iter().collect(),
            rate_limit: rate_limit_per_minute.map(|limit| RateLimiter::new(limit, clock)),
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !self.api_keys.is_empty()
    }

    pub fn rate_limit_per_minute(&self) -> Option<u32> {
        self.rate_limit.as_ref().map(|limiter| limiter.limit)
    }

    pub fn check_api_key(&self, presented: Option<&str>) -> Result<(), PolicyError> {
        if !self.requires_api_key() {
            return Ok(());
        }
        match presented {
            Some(key) if self.api_keys.contains(key) => Ok(()),
            _ => Err(PolicyError::Unauthorized),
        }
    }

    /// Rate-limit identity of a request that already passed
    /// [`check_api_key`](Self::check_api_key).
    ///
    /// A presented key only counts when keys are enforced; otherwise callers
    /// could mint fresh buckets by sending arbitrary keys.
    pub fn client_key(&self, presented: Option<&str>, peer: Option<IpAddr>) -> ClientKey {
        match (presented, peer) {
            (Some(key), _) if self.requires_api_key() => ClientKey::ApiKey(key.to_string()),
            (_, Some(ip)) => ClientKey::Peer(ip),
            _ => ClientKey::Unidentified,
        }
    }

    pub fn check_rate(&self, client: &ClientKey) -> Result<(), PolicyError> {
        match &self.rate_limit {
            Some(limiter) => limiter.hit(client),
            None => Ok(()),
        }
    }
}

/// Fixed-window request counter keyed by client.
#[derive(Debug)]
struct RateLimiter {
    limit: u32,
    clock: Clock,
    windows: Mutex<HashMap<ClientKey, Window>>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: u64,
    count: u32,
}

impl RateLimiter {
    fn new(limit: u32, clock: Clock) -> Self {
        Self {
            limit,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn hit(&self, client: &ClientKey) -> Result<(), PolicyError> {
        let now = self.clock.now();
        let mut windows = self.windows.lock().expect("rate limiter poisoned");

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, window| now < window.started_at + RATE_WINDOW_SECS);
        }

        let window = windows.entry(client.clone()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if now >= window.started_at + RATE_WINDOW_SECS {
            *window = Window {
                started_at: now,
                count: 0,
            };
        }

        if window.count >= self.limit {
            return Err(PolicyError::RateLimited {
                retry_after_secs: window.started_at + RATE_WINDOW_SECS - now,
            });
        }
        window.count += 1;
        Ok(())
    }
}
