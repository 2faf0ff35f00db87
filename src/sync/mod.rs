//! Exchange account activity: fetching, formatting and valuation.

mod connection;
mod format;
mod retry;

pub use connection::ExchangeConnection;
pub use format::{format_order, format_transaction, ExchangeOverrides, ExchangeProfile};
pub use retry::{classify, FailureClass, RetryPolicy};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{RawKind, RawRecord};

/// Authenticated access to an exchange account's raw history.
#[async_trait::async_trait]
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the exchange offers this bulk fetch.
    fn supports(&self, kind: RawKind) -> bool;

    /// Currencies with account activity, for exchanges queried per symbol.
    async fn symbols(&self) -> Result<Vec<String>>;

    async fn fetch_raw_transactions(
        &self,
        kind: RawKind,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<RawRecord>>;
}
