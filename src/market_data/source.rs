use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Candle interval used for point-in-time pricing.
pub const ONE_MINUTE: &str = "1m";

/// Candles requested per lookup; the first one at or after the anchor wins.
pub const CANDLE_LIMIT: usize = 2;

/// A tradable pair as listed by a market source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    /// `BASE/QUOTE`
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub active: bool,
}

impl Market {
    pub fn new(base: impl Into<String>, quote: impl Into<String>, active: bool) -> Self {
        let base = base.into().to_uppercase();
        let quote = quote.into().to_uppercase();
        Self {
            symbol: format!("{base}/{quote}"),
            base,
            quote,
            active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// A flat candle where every price equals `close`.
    pub fn flat(timestamp: DateTime<Utc>, close: Decimal) -> Self {
        Self {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
        }
    }
}

/// Public market data of one venue: its pair list and historical candles.
#[async_trait::async_trait]
pub trait MarketSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_markets(&self) -> Result<Vec<Market>>;

    /// Candles for `pair` (`BASE/QUOTE`) starting at `since`, oldest first,
    /// at most `limit` of them.
    async fn fetch_ohlcv(
        &self,
        pair: &str,
        interval: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}
