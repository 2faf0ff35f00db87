//! Upstream failure classes.
//!
//! Adapters wrap these into `anyhow::Error`; retry and fallback code recovers
//! the class with `downcast_ref::<SourceError>()`.

/// Message fragment exchanges use when a symbol is not listed on the venue.
/// Retrying cannot fix this, so it short-circuits the retry loop.
pub const UNSUPPORTED_CURRENCY_MARKER: &str = "does not have currency code";

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{source_name}: network error: {message}")]
    Network { source_name: String, message: String },

    #[error("{source_name}: exchange error: {message}")]
    Exchange { source_name: String, message: String },

    #[error("{source_name}: invalid nonce: {message}")]
    InvalidNonce { source_name: String, message: String },

    #[error("{source_name}: rate limited (429)")]
    RateLimited { source_name: String },

    #[error("{source_name} does not support {method}")]
    NotSupported { source_name: String, method: String },
}

impl SourceError {
    pub fn network(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn exchange(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exchange {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_nonce(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidNonce {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn rate_limited(source_name: impl Into<String>) -> Self {
        Self::RateLimited {
            source_name: source_name.into(),
        }
    }

    pub fn not_supported(source_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self::NotSupported {
            source_name: source_name.into(),
            method: method.into(),
        }
    }

    /// Network, exchange, nonce and rate-limit failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Exchange { .. }
                | Self::InvalidNonce { .. }
                | Self::RateLimited { .. }
        )
    }
}

/// Returns true when `err` (or anything in its chain) is a 429-class failure.
pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    if matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::RateLimited { .. })
    ) {
        return true;
    }
    err.chain().any(|cause| cause.to_string().contains("429"))
}

/// Map a reqwest transport error or HTTP status into a [`SourceError`].
pub(crate) fn from_status(
    source_name: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> SourceError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        SourceError::rate_limited(source_name)
    } else {
        SourceError::exchange(source_name, format!("{status} - {body}"))
    }
}
