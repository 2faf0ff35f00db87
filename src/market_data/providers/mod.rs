//! HTTP market sources.

mod binance;
mod coinbase_exchange;

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::config::{PriceSourceConfig, PriceSourceType};

use super::MarketSource;

pub use binance::BinanceSource;
pub use coinbase_exchange::CoinbaseExchangeSource;

/// Instantiate the market source described by a registry entry.
pub fn build_source(config: &PriceSourceConfig) -> Arc<dyn MarketSource> {
    match config.source_type {
        PriceSourceType::CoinbaseExchange => {
            let mut source = CoinbaseExchangeSource::new().with_name(&config.name);
            if let Some(url) = &config.base_url {
                source = source.with_base_url(url);
            }
            Arc::new(source)
        }
        PriceSourceType::Binance => {
            let mut source = BinanceSource::new().with_name(&config.name);
            if let Some(url) = &config.base_url {
                source = source.with_base_url(url);
            }
            Arc::new(source)
        }
    }
}

/// Parse a price that an API may send as either a JSON number or a string.
pub(crate) fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .ok()
        }
        _ => None,
    }
}
