use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::is_rate_limited;
use crate::models::{is_stable, Order, Record, Transaction};
use crate::valuation::{self, CommonPrices, PriceLookup};

use super::{MarketIndex, MarketSource, RateLimitGate, CANDLE_LIMIT, ONE_MINUTE};

/// Point-in-time USD quotes from a single market source.
///
/// The source's market listing is fetched once, on first use, and shared by
/// every later lookup.
pub struct QuoteResolver {
    source: Arc<dyn MarketSource>,
    markets: OnceCell<MarketIndex>,
    base_quote_override: Option<String>,
    gate: RateLimitGate,
    max_rate_limited_attempts: u32,
}

impl QuoteResolver {
    pub fn new(source: Arc<dyn MarketSource>) -> Self {
        let config = RateLimitConfig::default();
        let gate = RateLimitGate::from_config(source.name(), &config);
        Self {
            source,
            markets: OnceCell::new(),
            base_quote_override: None,
            gate,
            max_rate_limited_attempts: config.max_attempts,
        }
    }

    pub fn with_rate_limit(mut self, config: &RateLimitConfig) -> Self {
        self.gate = RateLimitGate::from_config(self.source.name(), config);
        self.max_rate_limited_attempts = config.max_attempts;
        self
    }

    /// Force the second-hop quote currency instead of detecting it from the
    /// market listing.
    pub fn with_base_quote(mut self, base_quote: impl Into<String>) -> Self {
        self.base_quote_override = Some(base_quote.into());
        self
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn gate(&self) -> &RateLimitGate {
        &self.gate
    }

    /// The market index, loading it on first call.
    pub async fn markets(&self) -> Result<&MarketIndex> {
        self.markets
            .get_or_try_init(|| async {
                let markets = self.source.fetch_markets().await?;
                let mut index = MarketIndex::from_markets(markets);
                if let Some(base_quote) = &self.base_quote_override {
                    index = index.with_base_quote(base_quote.clone());
                }
                debug!(
                    source = %self.name(),
                    pairs = index.len(),
                    base_quote = %index.base_quote(),
                    "loaded markets"
                );
                Ok::<_, anyhow::Error>(index)
            })
            .await
    }

    pub async fn quote_conversion(
        &self,
        symbol: &str,
        exclude: &HashSet<String>,
    ) -> Result<Vec<String>> {
        Ok(self.markets().await?.quote_conversion(symbol, exclude))
    }

    /// Whether this source can price `symbol` at all.
    ///
    /// Stable currencies are always priceable since they resolve to one.
    pub async fn has_market(&self, symbol: &str) -> Result<bool> {
        if is_stable(symbol) {
            return Ok(true);
        }
        Ok(!self.quote_conversion(symbol, &HashSet::new()).await?.is_empty())
    }

    /// Close of the first one-minute candle at or after `at`.
    async fn candle_close(&self, pair: &str, at: DateTime<Utc>) -> Result<Option<Decimal>> {
        let candles = self
            .source
            .fetch_ohlcv(pair, ONE_MINUTE, at, CANDLE_LIMIT)
            .await?;
        Ok(candles.first().map(|c| c.close))
    }

    async fn resolve_once(&self, symbol: &str, at: DateTime<Utc>) -> Result<Decimal> {
        let index = self.markets().await?;
        let mut exclude = HashSet::new();

        loop {
            let path = index.quote_conversion(symbol, &exclude);
            let Some(quote) = path.first().cloned() else {
                break;
            };

            let pair = format!("{symbol}/{quote}");
            match self.candle_close(&pair, at).await? {
                Some(close) => match path.get(1) {
                    None => return Ok(close),
                    Some(second) => {
                        let hop = format!("{quote}/{second}");
                        match self.candle_close(&hop, at).await? {
                            Some(rate) => return Ok(close * rate),
                            None => debug!(
                                source = %self.name(),
                                pair = %hop,
                                at = %at,
                                "no candle for conversion hop"
                            ),
                        }
                    }
                },
                None => debug!(source = %self.name(), pair = %pair, at = %at, "no candle"),
            }

            exclude.insert(quote);
        }

        warn!(source = %self.name(), symbol = %symbol, at = %at, "no market price found");
        Ok(Decimal::ZERO)
    }

    /// USD price of `symbol` at `at`, or zero when no path yields a candle.
    ///
    /// Rate-limited lookups raise the source's gate and are retried once it
    /// lifts; after the configured number of rate-limited attempts the last
    /// error is returned.
    pub async fn resolve_quote(&self, symbol: &str, at: DateTime<Utc>) -> Result<Decimal> {
        if is_stable(symbol) {
            return Ok(Decimal::ONE);
        }

        let mut attempts = 0;
        loop {
            self.gate.wait().await;
            match self.resolve_once(symbol, at).await {
                Ok(price) => return Ok(price),
                Err(err) if is_rate_limited(&err) => {
                    attempts += 1;
                    self.gate.trip();
                    if attempts >= self.max_rate_limited_attempts {
                        return Err(err.context(format!(
                            "{}: giving up on {symbol} after {attempts} rate-limited attempts",
                            self.name()
                        )));
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl QuoteResolver {
    /// Base, quote and fee prices for a record, from this source only.
    pub async fn common_prices(&self, record: &Record) -> Result<CommonPrices> {
        match record {
            Record::Order(order) => valuation::order_prices(self, order).await,
            Record::Transaction(tx) => valuation::transaction_prices(self, tx).await,
        }
    }

    pub async fn valuate_transaction(
        &self,
        tx: Transaction,
        prices: Option<CommonPrices>,
    ) -> Result<Transaction> {
        valuation::valuate_transaction(self, tx, prices).await
    }

    pub async fn valuate_order(&self, order: Order, prices: Option<CommonPrices>) -> Result<Order> {
        valuation::valuate_order(self, order, prices).await
    }
}

#[async_trait::async_trait]
impl PriceLookup for QuoteResolver {
    async fn usd_price(&self, symbol: &str, at: DateTime<Utc>) -> Result<Decimal> {
        self.resolve_quote(symbol, at).await
    }
}
