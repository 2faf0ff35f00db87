//! In-memory market source for offline use and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::SourceError;

use super::{Candle, Market, MarketSource};

/// Market source backed by fixed data.
///
/// Can also inject failures: a number of 429 responses before candles are
/// served, or a market listing that always errors.
pub struct StaticMarketSource {
    name: String,
    markets: Vec<Market>,
    candles: HashMap<String, Vec<Candle>>,
    rate_limited_responses: AtomicU32,
    fail_markets: bool,
    market_calls: AtomicU32,
    ohlcv_calls: AtomicU32,
    requested_pairs: Mutex<Vec<String>>,
}

impl StaticMarketSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            markets: Vec::new(),
            candles: HashMap::new(),
            rate_limited_responses: AtomicU32::new(0),
            fail_markets: false,
            market_calls: AtomicU32::new(0),
            ohlcv_calls: AtomicU32::new(0),
            requested_pairs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_market(mut self, base: &str, quote: &str) -> Self {
        self.markets.push(Market::new(base, quote, true));
        self
    }

    pub fn with_inactive_market(mut self, base: &str, quote: &str) -> Self {
        self.markets.push(Market::new(base, quote, false));
        self
    }

    /// List the pair as an active market and serve a flat candle with
    /// `close` at `at`.
    pub fn with_price(self, base: &str, quote: &str, at: DateTime<Utc>, close: Decimal) -> Self {
        let pair = format!("{base}/{quote}");
        let with_market = if self.markets.iter().any(|m| m.symbol == pair) {
            self
        } else {
            self.with_market(base, quote)
        };
        with_market.with_candle(&pair, Candle::flat(at, close))
    }

    /// Serve a candle without listing the pair.
    pub fn with_candle(mut self, pair: &str, candle: Candle) -> Self {
        let series = self.candles.entry(pair.to_string()).or_default();
        series.push(candle);
        series.sort_by_key(|c| c.timestamp);
        self
    }

    /// Answer the next `count` candle requests with a rate-limit error.
    pub fn with_rate_limited_responses(self, count: u32) -> Self {
        self.rate_limited_responses.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_failing_markets(mut self) -> Self {
        self.fail_markets = true;
        self
    }

    pub fn market_calls(&self) -> u32 {
        self.market_calls.load(Ordering::SeqCst)
    }

    pub fn ohlcv_calls(&self) -> u32 {
        self.ohlcv_calls.load(Ordering::SeqCst)
    }

    /// Pairs passed to `fetch_ohlcv`, in call order.
    pub fn requested_pairs(&self) -> Vec<String> {
        self.requested_pairs
            .lock()
            .map(|pairs| pairs.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl MarketSource for StaticMarketSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_markets(&self) -> Result<Vec<Market>> {
        self.market_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_markets {
            return Err(SourceError::network(&self.name, "market listing unavailable").into());
        }
        Ok(self.markets.clone())
    }

    async fn fetch_ohlcv(
        &self,
        pair: &str,
        _interval: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.ohlcv_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut pairs) = self.requested_pairs.lock() {
            pairs.push(pair.to_string());
        }

        let remaining = self.rate_limited_responses.load(Ordering::SeqCst);
        if remaining > 0 {
            self.rate_limited_responses
                .store(remaining - 1, Ordering::SeqCst);
            return Err(SourceError::rate_limited(&self.name).into());
        }

        Ok(self
            .candles
            .get(pair)
            .map(|series| {
                series
                    .iter()
                    .filter(|c| c.timestamp >= since)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
