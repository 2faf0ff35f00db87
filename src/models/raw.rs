//! Source-native record shapes handed to the core by upstream adapters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerEntry;

/// Kinds of bulk fetches an exchange client may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawKind {
    Withdrawals,
    Deposits,
    ClosedOrders,
}

impl RawKind {
    /// Unified method name, used in capability errors.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Withdrawals => "fetchWithdrawals",
            Self::Deposits => "fetchDeposits",
            Self::ClosedOrders => "fetchClosedOrders",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFee {
    pub cost: Decimal,
    pub currency: String,
}

/// A unified deposit/withdrawal as reported by an exchange client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Upstream type name, e.g. `deposit` or `withdrawal`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub currency: String,
    pub amount: Decimal,
    #[serde(default)]
    pub fee: Option<RawFee>,
    /// Untouched exchange payload, consulted by per-exchange overrides.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub info: serde_json::Value,
}

/// A unified closed order as reported by an exchange client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOrder {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Market symbol in `BASE/QUOTE` form.
    pub symbol: String,
    pub side: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub average: Option<Decimal>,
    pub filled: Decimal,
    pub cost: Decimal,
    #[serde(default)]
    pub fee: Option<RawFee>,
}

impl RawOrder {
    /// Split `symbol` into base and quote currencies.
    pub fn pair(&self) -> Option<(&str, &str)> {
        self.symbol.split_once('/')
    }

    /// Limit price, falling back to the average fill price.
    pub fn effective_price(&self) -> Decimal {
        self.price.or(self.average).unwrap_or(Decimal::ZERO)
    }
}

/// Raw upstream records, tagged by the kind of upstream that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RawRecord {
    ExchangeTransaction(RawTransaction),
    ExchangeOrder(RawOrder),
    LedgerGroup { entries: Vec<LedgerEntry> },
}
