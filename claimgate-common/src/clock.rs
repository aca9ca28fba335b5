//! Wall-clock source for expiry checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix-seconds clock. Defaults to system time; a fixed clock can be shared
/// and moved forward explicitly.
#[derive(Clone, Debug, Default)]
pub struct Clock {
    fixed: Option<Arc<AtomicU64>>,
}

impl Clock {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn fixed(now: u64) -> Self {
        Self {
            fixed: Some(Arc::new(AtomicU64::new(now))),
        }
    }

    pub fn now(&self) -> u64 {
        match &self.fixed {
            Some(now) => now.load(Ordering::SeqCst),
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// Move a fixed clock forward. No effect on the system clock.
    pub fn advance(&self, secs: u64) {
        if let Some(now) = &self.fixed {
            now.fetch_add(secs, Ordering::SeqCst);
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }
}
