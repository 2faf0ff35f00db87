use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::currency::FREE_FEE_CURRENCY;

/// `numerator / denominator`, or zero when the denominator is zero.
pub fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    numerator.checked_div(denominator).unwrap_or(Decimal::ZERO)
}

/// Economic event type of a canonical record.
///
/// Open set: upstream type names that are not recognized are kept verbatim
/// (kebab-cased) in [`TxType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TxType {
    Send,
    Receive,
    Deposit,
    Withdrawal,
    Buy,
    Sell,
    Swap,
    InterestInAccount,
    InterestInStake,
    Reward,
    Stake,
    Unstake,
    PostCollateral,
    UnpostCollateral,
    /// Left blank by a formatter that could not classify the event.
    Unclassified,
    Other(String),
}

impl TxType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Swap => "swap",
            Self::InterestInAccount => "interest-in-account",
            Self::InterestInStake => "interest-in-stake",
            Self::Reward => "reward",
            Self::Stake => "stake",
            Self::Unstake => "unstake",
            Self::PostCollateral => "post-collateral",
            Self::UnpostCollateral => "unpost-collateral",
            Self::Unclassified => "",
            Self::Other(name) => name,
        }
    }

    /// Parse an upstream type name, normalizing `snake_case`, `camelCase`
    /// and spaced names to kebab-case first.
    pub fn parse(raw: &str) -> Self {
        let name = kebab_case(raw);
        match name.as_str() {
            "send" => Self::Send,
            "receive" => Self::Receive,
            "deposit" => Self::Deposit,
            "withdrawal" => Self::Withdrawal,
            "buy" => Self::Buy,
            "sell" => Self::Sell,
            "swap" => Self::Swap,
            "interest-in-account" => Self::InterestInAccount,
            "interest-in-stake" => Self::InterestInStake,
            "reward" => Self::Reward,
            "stake" => Self::Stake,
            "unstake" => Self::Unstake,
            "post-collateral" => Self::PostCollateral,
            "unpost-collateral" => Self::UnpostCollateral,
            "" => Self::Unclassified,
            _ => Self::Other(name),
        }
    }

    pub fn is_trade(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell | Self::Swap)
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for TxType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<TxType> for String {
    fn from(value: TxType) -> Self {
        value.as_str().to_string()
    }
}

fn kebab_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.trim().chars() {
        if c == '_' || c == ' ' || c == '-' {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            prev_lower = false;
        } else if c.is_ascii_uppercase() {
            if prev_lower && !out.ends_with('-') {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out.trim_end_matches('-').to_string()
}

/// A non-trade value movement (send, receive, deposit, interest, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TxType,
    pub base_currency: String,
    pub base_quantity: Decimal,
    /// USD price per unit of base currency. Zero means unresolved.
    pub base_usd_price: Decimal,
    pub fee_currency: String,
    pub fee_quantity: Decimal,
    pub fee_price: Decimal,
    pub fee_total: Decimal,
    pub sub_total: Decimal,
    pub total: Decimal,
}

impl Transaction {
    /// Create an unpriced transaction. Quantity signs are stripped; the
    /// direction is carried by `kind`.
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        kind: TxType,
        base_currency: impl Into<String>,
        base_quantity: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            kind,
            base_currency: base_currency.into(),
            base_quantity: base_quantity.abs(),
            base_usd_price: Decimal::ZERO,
            fee_currency: FREE_FEE_CURRENCY.to_string(),
            fee_quantity: Decimal::ZERO,
            fee_price: Decimal::ZERO,
            fee_total: Decimal::ZERO,
            sub_total: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    pub fn with_fee(mut self, currency: impl Into<String>, quantity: Decimal) -> Self {
        self.fee_currency = currency.into();
        self.fee_quantity = quantity.abs();
        self
    }

    pub fn is_priced(&self) -> bool {
        !self.base_usd_price.is_zero()
    }
}

/// A trade between two assets (buy, sell or canonicalized swap).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TxType,
    pub base_currency: String,
    pub base_quantity: Decimal,
    pub base_usd_price: Decimal,
    pub quote_currency: String,
    pub quote_quantity: Decimal,
    /// Price of one unit of base, denominated in the quote currency.
    pub quote_price: Decimal,
    pub quote_usd_price: Decimal,
    pub fee_currency: String,
    pub fee_quantity: Decimal,
    pub fee_price: Decimal,
    pub fee_total: Decimal,
    pub sub_total: Decimal,
    pub total: Decimal,
}

impl Order {
    /// Create an unpriced order; `quote_price` is derived from the two quantities.
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        kind: TxType,
        base: (impl Into<String>, Decimal),
        quote: (impl Into<String>, Decimal),
    ) -> Self {
        let base_quantity = base.1.abs();
        let quote_quantity = quote.1.abs();
        Self {
            id: id.into(),
            timestamp,
            kind,
            base_currency: base.0.into(),
            base_quantity,
            base_usd_price: Decimal::ZERO,
            quote_currency: quote.0.into(),
            quote_quantity,
            quote_price: ratio(quote_quantity, base_quantity),
            quote_usd_price: Decimal::ZERO,
            fee_currency: FREE_FEE_CURRENCY.to_string(),
            fee_quantity: Decimal::ZERO,
            fee_price: Decimal::ZERO,
            fee_total: Decimal::ZERO,
            sub_total: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    pub fn with_quote_price(mut self, quote_price: Decimal) -> Self {
        self.quote_price = quote_price;
        self
    }

    pub fn with_fee(mut self, currency: impl Into<String>, quantity: Decimal) -> Self {
        self.fee_currency = currency.into();
        self.fee_quantity = quantity.abs();
        self
    }

    pub fn is_priced(&self) -> bool {
        !self.base_usd_price.is_zero()
    }
}

/// Canonical output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    // Order first: an order's JSON is a superset of a transaction's.
    Order(Order),
    Transaction(Transaction),
}

impl Record {
    pub fn id(&self) -> &str {
        match self {
            Self::Order(o) => &o.id,
            Self::Transaction(t) => &t.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Order(o) => o.timestamp,
            Self::Transaction(t) => t.timestamp,
        }
    }

    pub fn kind(&self) -> &TxType {
        match self {
            Self::Order(o) => &o.kind,
            Self::Transaction(t) => &t.kind,
        }
    }

    pub fn is_priced(&self) -> bool {
        match self {
            Self::Order(o) => o.is_priced(),
            Self::Transaction(t) => t.is_priced(),
        }
    }

    pub fn total(&self) -> Decimal {
        match self {
            Self::Order(o) => o.total,
            Self::Transaction(t) => t.total,
        }
    }
}

impl From<Transaction> for Record {
    fn from(value: Transaction) -> Self {
        Self::Transaction(value)
    }
}

impl From<Order> for Record {
    fn from(value: Order) -> Self {
        Self::Order(value)
    }
}

/// Stable sort by event time. Records with equal timestamps keep their
/// relative order.
pub fn sort_by_timestamp(records: &mut [Record]) {
    records.sort_by_key(Record::timestamp);
}
