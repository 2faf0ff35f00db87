//! Binance spot public market data.
//!
//! Docs: https://developers.binance.com/docs/binance-spot-api-docs/rest-api

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::{from_status, SourceError};
use crate::market_data::providers::decimal_from_json;
use crate::market_data::{Candle, Market, MarketSource};

const BINANCE_API_BASE: &str = "https://api.binance.com";

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    status: String,
    base_asset: String,
    quote_asset: String,
}

pub struct BinanceSource {
    client: Client,
    name: String,
    base_url: String,
}

impl BinanceSource {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            name: "binance".to_string(),
            base_url: BINANCE_API_BASE.to_string(),
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
            .send()
            .await
            .map_err(|e| SourceError::network(&self.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // 418 is Binance's escalation of ignored 429s (IP ban).
            if status == StatusCode::IM_A_TEAPOT {
                return Err(SourceError::rate_limited(&self.name).into());
            }
            let body = response.text().await.unwrap_or_default();
            return Err(from_status(&self.name, status, &body).into());
        }

        Ok(response)
    }
}

impl Default for BinanceSource {
    fn default() -> Self {
        Self::new()
    }
}

/// `[openTime, open, high, low, close, volume, closeTime, ...]`
fn parse_kline(row: &[serde_json::Value]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }
    let timestamp = Utc.timestamp_millis_opt(row[0].as_i64()?).single()?;
    Some(Candle {
        timestamp,
        open: decimal_from_json(&row[1])?,
        high: decimal_from_json(&row[2])?,
        low: decimal_from_json(&row[3])?,
        close: decimal_from_json(&row[4])?,
        volume: decimal_from_json(&row[5])?,
    })
}

#[async_trait::async_trait]
impl MarketSource for BinanceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_markets(&self) -> Result<Vec<Market>> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let info: ExchangeInfo = self
            .send_request(&url, &[])
            .await?
            .json()
            .await
            .context("Failed to parse Binance exchangeInfo response")?;

        Ok(info
            .symbols
            .into_iter()
            .map(|s| Market::new(s.base_asset, s.quote_asset, s.status == "TRADING"))
            .collect())
    }

    async fn fetch_ohlcv(
        &self,
        pair: &str,
        interval: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let symbol = pair.replace('/', "");
        let url = format!("{}/api/v3/klines", self.base_url);
        let rows: Vec<Vec<serde_json::Value>> = self
            .send_request(
                &url,
                &[
                    ("symbol", symbol),
                    ("interval", interval.to_string()),
                    ("startTime", since.timestamp_millis().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?
            .json()
            .await
            .context("Failed to parse Binance klines response")?;

        let candles: Vec<Candle> = rows.iter().filter_map(|row| parse_kline(row)).collect();
        debug!(source = %self.name, pair = %pair, count = candles.len(), "fetched candles");
        Ok(candles)
    }
}
