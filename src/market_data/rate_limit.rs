use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// Per-source pause flag raised when a source answers 429.
///
/// While gated, quote lookups against the source wait instead of issuing
/// requests. The gate lifts itself once the cooldown has elapsed; there is
/// no background timer, expiry is checked on read.
#[derive(Debug)]
pub struct RateLimitGate {
    source_name: String,
    gated_until: Mutex<Option<Instant>>,
    trips: AtomicU32,
    cooldown: Duration,
    poll_interval: Duration,
}

impl RateLimitGate {
    pub fn new(source_name: impl Into<String>, cooldown: Duration, poll_interval: Duration) -> Self {
        Self {
            source_name: source_name.into(),
            gated_until: Mutex::new(None),
            trips: AtomicU32::new(0),
            cooldown,
            poll_interval,
        }
    }

    pub fn from_config(source_name: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self::new(source_name, config.cooldown, config.poll_interval)
    }

    pub fn is_gated(&self) -> bool {
        let mut guard = self
            .gated_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *guard {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *guard = None;
                debug!(source = %self.source_name, "rate limit gate lifted");
                false
            }
            None => false,
        }
    }

    /// Raise the gate for one cooldown period.
    ///
    /// Returns true for the caller that actually raised it; concurrent
    /// callers hitting 429 while the gate is already up get false and do not
    /// extend the cooldown.
    pub fn trip(&self) -> bool {
        let mut guard = self
            .gated_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        if matches!(*guard, Some(until) if now < until) {
            return false;
        }
        *guard = Some(now + self.cooldown);
        self.trips.fetch_add(1, Ordering::Relaxed);
        warn!(
            source = %self.source_name,
            cooldown_ms = self.cooldown.as_millis() as u64,
            "rate limited, pausing source"
        );
        true
    }

    /// Wait until the gate is down.
    pub async fn wait(&self) {
        while self.is_gated() {
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Number of times the gate has been raised.
    pub fn trips(&self) -> u32 {
        self.trips.load(Ordering::Relaxed)
    }
}
