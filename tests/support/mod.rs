#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chainbook::error::SourceError;
use chainbook::ledger::{LedgerEntry, LedgerSource};
use chainbook::market_data::{QuoteResolver, SourceRouter, StaticMarketSource};
use chainbook::models::{RawFee, RawKind, RawOrder, RawRecord, RawTransaction};
use chainbook::sync::ExchangeClient;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal")
}

pub fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().expect("valid timestamp")
}

/// 2021-04-01T00:00:00Z
pub const T0: i64 = 1_617_235_200;

pub fn resolver(source: StaticMarketSource) -> Arc<QuoteResolver> {
    Arc::new(QuoteResolver::new(Arc::new(source)))
}

pub fn router(sources: Vec<StaticMarketSource>) -> SourceRouter {
    SourceRouter::new(sources.into_iter().map(resolver).collect())
}

pub fn raw_transfer(id: &str, at: i64, currency: &str, amount: &str) -> RawRecord {
    RawRecord::ExchangeTransaction(RawTransaction {
        id: id.to_string(),
        timestamp: ts(at),
        kind: None,
        currency: currency.to_string(),
        amount: dec(amount),
        fee: None,
        info: serde_json::Value::Null,
    })
}

pub fn raw_order(id: &str, at: i64, symbol: &str, side: &str, filled: &str, cost: &str) -> RawRecord {
    RawRecord::ExchangeOrder(RawOrder {
        id: id.to_string(),
        timestamp: ts(at),
        symbol: symbol.to_string(),
        side: side.to_string(),
        price: None,
        average: None,
        filled: dec(filled),
        cost: dec(cost),
        fee: Some(RawFee {
            cost: Decimal::ZERO,
            currency: "USD".to_string(),
        }),
    })
}

#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    Network,
    UnsupportedCurrency,
    Unexpected,
}

impl MockFailure {
    fn error(self, exchange: &str, symbol: &str) -> anyhow::Error {
        match self {
            Self::Network => SourceError::network(exchange, "connection reset").into(),
            Self::UnsupportedCurrency => SourceError::exchange(
                exchange,
                format!("{exchange} does not have currency code {symbol}"),
            )
            .into(),
            Self::Unexpected => anyhow::anyhow!("unexpected payload for {symbol}"),
        }
    }
}

/// Exchange client serving canned raw records, with scripted per-symbol failures.
pub struct MockExchangeClient {
    name: String,
    supported: HashSet<RawKind>,
    symbols: Vec<String>,
    records: HashMap<RawKind, Vec<RawRecord>>,
    failures: Mutex<HashMap<String, (u32, MockFailure)>>,
    calls: Mutex<Vec<(RawKind, Option<String>)>>,
}

impl MockExchangeClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            supported: [RawKind::Withdrawals, RawKind::Deposits, RawKind::ClosedOrders].into(),
            symbols: Vec::new(),
            records: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn without(mut self, kind: RawKind) -> Self {
        self.supported.remove(&kind);
        self
    }

    pub fn with_symbols(mut self, symbols: &[&str]) -> Self {
        self.symbols = symbols.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_records(mut self, kind: RawKind, records: Vec<RawRecord>) -> Self {
        self.records.entry(kind).or_default().extend(records);
        self
    }

    /// Fail the next `times` fetches for `symbol`.
    pub fn failing(self, symbol: &str, times: u32, failure: MockFailure) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(symbol.to_string(), (times, failure));
        self
    }

    pub fn calls(&self) -> Vec<(RawKind, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, kind: RawKind, symbol: Option<&str>) -> usize {
        self.calls()
            .iter()
            .filter(|(k, s)| *k == kind && s.as_deref() == symbol)
            .count()
    }
}

fn matches_symbol(record: &RawRecord, symbol: &str) -> bool {
    match record {
        RawRecord::ExchangeTransaction(tx) => tx.currency == symbol,
        RawRecord::ExchangeOrder(order) => order.pair().is_some_and(|(base, _)| base == symbol),
        RawRecord::LedgerGroup { .. } => false,
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, kind: RawKind) -> bool {
        self.supported.contains(&kind)
    }

    async fn symbols(&self) -> Result<Vec<String>> {
        Ok(self.symbols.clone())
    }

    async fn fetch_raw_transactions(
        &self,
        kind: RawKind,
        symbol: Option<&str>,
        _since: Option<DateTime<Utc>>,
        _limit: Option<usize>,
    ) -> Result<Vec<RawRecord>> {
        self.calls
            .lock()
            .unwrap()
            .push((kind, symbol.map(str::to_string)));

        if let Some(symbol) = symbol {
            let mut failures = self.failures.lock().unwrap();
            if let Some((remaining, failure)) = failures.get_mut(symbol) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(failure.error(&self.name, symbol));
                }
            }
        }

        Ok(self
            .records
            .get(&kind)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| symbol.map_or(true, |s| matches_symbol(r, s)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Ledger source returning fixed entries.
pub struct FixedLedgerSource(pub Vec<LedgerEntry>);

#[async_trait]
impl LedgerSource for FixedLedgerSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch_ledger_entries(&self, _address: &str) -> Result<Vec<LedgerEntry>> {
        Ok(self.0.clone())
    }
}

pub fn native_entry(hash: &str, at: i64, from: &str, to: &str, wei: &str) -> LedgerEntry {
    LedgerEntry {
        hash: hash.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        value: wei.to_string(),
        token_symbol: None,
        token_decimal: None,
        gas_used: "100000".to_string(),
        gas_price: "10000000000".to_string(),
        time_stamp: at.to_string(),
    }
}

pub fn token_entry(
    hash: &str,
    at: i64,
    from: &str,
    to: &str,
    symbol: &str,
    raw: &str,
    decimals: u32,
) -> LedgerEntry {
    LedgerEntry {
        token_symbol: Some(symbol.to_string()),
        token_decimal: Some(decimals.to_string()),
        ..native_entry(hash, at, from, to, raw)
    }
}
