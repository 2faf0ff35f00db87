use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, warn};

use crate::config::RetryConfig;
use crate::error::{SourceError, UNSUPPORTED_CURRENCY_MARKER};

/// How a failed fetch should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth another attempt after the backoff.
    Transient,
    /// Retrying cannot help; skip the item.
    Permanent,
    /// Unexpected failure; skip the item without retrying.
    Fatal,
}

pub fn classify(err: &anyhow::Error) -> FailureClass {
    if err
        .chain()
        .any(|cause| cause.to_string().contains(UNSUPPORTED_CURRENCY_MARKER))
    {
        return FailureClass::Permanent;
    }

    match err.downcast_ref::<SourceError>() {
        Some(e) if e.is_transient() => FailureClass::Transient,
        Some(SourceError::NotSupported { .. }) => FailureClass::Permanent,
        _ => FailureClass::Fatal,
    }
}

/// Bounded retry with a fixed backoff for per-item bulk fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// Failures never propagate: the item is logged and `None` is returned so
    /// the surrounding batch can move on.
    pub async fn run<T, F, Fut>(&self, item: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Some(value),
                Err(err) => err,
            };

            match classify(&err) {
                FailureClass::Transient if attempt < self.max_attempts => {
                    warn!(item = %item, attempt, error = %err, "fetch failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                FailureClass::Transient => {
                    warn!(item = %item, attempts = attempt, error = %err, "giving up after retries");
                    return None;
                }
                FailureClass::Permanent => {
                    warn!(item = %item, error = %err, "skipping unsupported item");
                    return None;
                }
                FailureClass::Fatal => {
                    error!(item = %item, error = ?err, "fetch failed, skipping item");
                    return None;
                }
            }
        }
    }
}
