//! Coinbase Exchange public market data.
//!
//! Docs: https://docs.cdp.coinbase.com/exchange/reference/exchangerestapi_getproducts

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{from_status, SourceError};
use crate::market_data::providers::decimal_from_json;
use crate::market_data::{Candle, Market, MarketSource};

const COINBASE_EXCHANGE_API_BASE: &str = "https://api.exchange.coinbase.com";

#[derive(Debug, Deserialize)]
struct Product {
    id: String,
    base_currency: String,
    quote_currency: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    trading_disabled: bool,
}

impl Product {
    fn into_market(self) -> Market {
        let active = self.status == "online" && !self.trading_disabled;
        Market::new(self.base_currency, self.quote_currency, active)
    }
}

pub struct CoinbaseExchangeSource {
    client: Client,
    name: String,
    base_url: String,
}

impl CoinbaseExchangeSource {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            name: "coinbase".to_string(),
            base_url: COINBASE_EXCHANGE_API_BASE.to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn send_request(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            // Coinbase rejects requests without a user agent.
            .header("User-Agent", concat!("chainbook/", env!("CARGO_PKG_VERSION")))
            .send()
            .await
            .map_err(|e| SourceError::network(&self.name, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(from_status(&self.name, status, &body).into());
        }

        Ok(response)
    }
}

impl Default for CoinbaseExchangeSource {
    fn default() -> Self {
        Self::new()
    }
}

/// `[time, low, high, open, close, volume]`
fn parse_candle(row: &[serde_json::Value]) -> Option<Candle> {
    let [time, low, high, open, close, volume] = row else {
        return None;
    };
    let timestamp = Utc.timestamp_opt(time.as_i64()?, 0).single()?;
    Some(Candle {
        timestamp,
        open: decimal_from_json(open)?,
        high: decimal_from_json(high)?,
        low: decimal_from_json(low)?,
        close: decimal_from_json(close)?,
        volume: decimal_from_json(volume)?,
    })
}

fn granularity_seconds(interval: &str) -> Result<i64> {
    Ok(match interval {
        "1m" => 60,
        "5m" => 300,
        "15m" => 900,
        "1h" => 3600,
        "6h" => 21600,
        "1d" => 86400,
        other => anyhow::bail!("Unsupported Coinbase candle interval: {other}"),
    })
}

#[async_trait::async_trait]
impl MarketSource for CoinbaseExchangeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_markets(&self) -> Result<Vec<Market>> {
        let url = format!("{}/products", self.base_url);
        let products: Vec<Product> = self
            .send_request(&url, &[])
            .await?
            .json()
            .await
            .context("Failed to parse Coinbase products response")?;

        Ok(products.into_iter().map(Product::into_market).collect())
    }

    async fn fetch_ohlcv(
        &self,
        pair: &str,
        interval: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let granularity = granularity_seconds(interval)?;
        let product_id = pair.replace('/', "-");
        let end = since + Duration::seconds(granularity * limit.max(1) as i64);

        let url = format!("{}/products/{product_id}/candles", self.base_url);
        let rows: Vec<Vec<serde_json::Value>> = self
            .send_request(
                &url,
                &[
                    ("granularity", granularity.to_string()),
                    ("start", since.to_rfc3339()),
                    ("end", end.to_rfc3339()),
                ],
            )
            .await?
            .json()
            .await
            .context("Failed to parse Coinbase candles response")?;

        let mut candles: Vec<Candle> = rows.iter().filter_map(|row| parse_candle(row)).collect();
        // Newest first on the wire.
        candles.sort_by_key(|c| c.timestamp);
        candles.retain(|c| c.timestamp >= since);
        candles.truncate(limit);

        debug!(source = %self.name, pair = %pair, count = candles.len(), "fetched candles");
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn at() -> DateTime<Utc> {
        Utc.timestamp_opt(1_617_235_200, 0).unwrap()
    }

    #[tokio::test]
    async fn lists_products_as_markets() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "BTC-USD", "base_currency": "BTC", "quote_currency": "USD", "status": "online", "trading_disabled": false},
                {"id": "XYZ-USD", "base_currency": "XYZ", "quote_currency": "USD", "status": "delisted", "trading_disabled": true}
            ])))
            .mount(&server)
            .await;

        let source = CoinbaseExchangeSource::new().with_base_url(server.uri());
        let markets = source.fetch_markets().await?;
        assert_eq!(markets.len(), 2);
        assert_eq!(markets[0].symbol, "BTC/USD");
        assert!(markets[0].active);
        assert!(!markets[1].active);
        Ok(())
    }

    #[tokio::test]
    async fn candles_are_sorted_oldest_first() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/ETH-BTC/candles"))
            .and(query_param("granularity", "60"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                [1617235260, 0.031, 0.033, 0.032, 0.0325, 10.5],
                [1617235200, 0.030, 0.032, 0.031, 0.0315, 12.0]
            ])))
            .mount(&server)
            .await;

        let source = CoinbaseExchangeSource::new().with_base_url(server.uri());
        let candles = source.fetch_ohlcv("ETH/BTC", "1m", at(), 2).await?;
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, at());
        assert_eq!(candles[0].close, Decimal::from_str("0.0315").unwrap());
        Ok(())
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let source = CoinbaseExchangeSource::new().with_base_url(server.uri());
        let err = source.fetch_ohlcv("BTC/USD", "1m", at(), 2).await.unwrap_err();
        assert!(crate::error::is_rate_limited(&err));
    }

    #[tokio::test]
    async fn server_error_is_exchange_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let source = CoinbaseExchangeSource::new().with_base_url(server.uri());
        let err = source.fetch_markets().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::Exchange { .. })
        ));
    }
}
