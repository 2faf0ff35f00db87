use std::collections::HashMap;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{
    is_stable, ratio, Order, RawFee, RawOrder, RawTransaction, Transaction, TxType,
    FREE_FEE_CURRENCY,
};

/// Per-exchange quirks applied while formatting raw records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeOverrides {
    /// Upstream currency code -> canonical code.
    pub symbol_corrections: HashMap<String, String>,

    /// Field of the raw `info` payload that holds the id to use for
    /// receive-type records.
    pub receive_id_field: Option<String>,

    /// Fee currency assumed when the exchange reports none.
    pub default_fee_currency: String,

    /// Second-hop quote currency for the exchange's own price lookups.
    pub base_quote: Option<String>,
}

impl Default for ExchangeOverrides {
    fn default() -> Self {
        Self {
            symbol_corrections: HashMap::new(),
            receive_id_field: None,
            default_fee_currency: FREE_FEE_CURRENCY.to_string(),
            base_quote: None,
        }
    }
}

impl ExchangeOverrides {
    pub fn correct_symbol(&self, symbol: &str) -> String {
        self.symbol_corrections
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.to_string())
    }
}

/// How a connection to a named exchange behaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeProfile {
    /// Bulk fetches must be issued per symbol.
    pub require_symbols: bool,

    /// Records are valued through market lookups. When false, amounts are
    /// taken as already USD-denominated.
    pub require_usd_valuation: bool,

    pub overrides: ExchangeOverrides,
}

impl Default for ExchangeProfile {
    fn default() -> Self {
        Self {
            require_symbols: false,
            require_usd_valuation: true,
            overrides: ExchangeOverrides::default(),
        }
    }
}

impl ExchangeProfile {
    /// Built-in profile for a known exchange, or the default profile.
    pub fn for_exchange(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "coinbase" => Self {
                require_symbols: true,
                require_usd_valuation: false,
                ..Self::default()
            },
            "kucoin" => Self {
                overrides: ExchangeOverrides {
                    receive_id_field: Some("walletTxId".to_string()),
                    base_quote: Some("USDT".to_string()),
                    ..ExchangeOverrides::default()
                },
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

fn fee_parts(fee: Option<&RawFee>, overrides: &ExchangeOverrides) -> (String, Decimal) {
    match fee {
        Some(fee) if !fee.currency.is_empty() => (overrides.correct_symbol(&fee.currency), fee.cost),
        Some(fee) => (overrides.default_fee_currency.clone(), fee.cost),
        None => (overrides.default_fee_currency.clone(), Decimal::ZERO),
    }
}

fn stable_fee_price(fee_currency: &str) -> Decimal {
    if is_stable(fee_currency) {
        Decimal::ONE
    } else {
        Decimal::ZERO
    }
}

/// Canonicalize a raw deposit/withdrawal.
///
/// `force_type` replaces the upstream type (withdrawals are always sends,
/// deposits always receives). Without USD valuation the amount is taken at
/// face value and the totals are filled directly.
pub fn format_transaction(
    raw: &RawTransaction,
    force_type: Option<TxType>,
    require_usd_valuation: bool,
    overrides: &ExchangeOverrides,
) -> Transaction {
    let kind = force_type.unwrap_or_else(|| TxType::parse(raw.kind.as_deref().unwrap_or_default()));
    let (fee_currency, fee_quantity) = fee_parts(raw.fee.as_ref(), overrides);

    let id = match (&kind, &overrides.receive_id_field) {
        (TxType::Receive, Some(field)) => raw
            .info
            .get(field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&raw.id)
            .to_string(),
        _ => raw.id.clone(),
    };

    let mut tx = Transaction::new(
        id,
        raw.timestamp,
        kind,
        overrides.correct_symbol(&raw.currency),
        raw.amount,
    )
    .with_fee(fee_currency, fee_quantity);

    if !require_usd_valuation {
        tx.base_usd_price = Decimal::ONE;
        tx.fee_price = stable_fee_price(&tx.fee_currency);
        tx.fee_total = tx.fee_price * tx.fee_quantity;
        tx.sub_total = tx.base_quantity;
        tx.total = tx.sub_total + tx.fee_total;
    }
    tx
}

/// Canonicalize a raw closed order.
///
/// Orders quoted in a stable currency (or on exchanges that report USD
/// amounts) are filled from the order's own cost; other orders come out
/// unpriced for the valuation pipeline.
pub fn format_order(
    raw: &RawOrder,
    require_usd_valuation: bool,
    overrides: &ExchangeOverrides,
) -> Result<Order> {
    let (base, quote) = raw
        .pair()
        .with_context(|| format!("order {} has malformed symbol {:?}", raw.id, raw.symbol))?;
    let (fee_currency, fee_quantity) = fee_parts(raw.fee.as_ref(), overrides);
    let quote = overrides.correct_symbol(quote);

    let mut order = Order::new(
        raw.id.clone(),
        raw.timestamp,
        TxType::parse(&raw.side),
        (overrides.correct_symbol(base), raw.filled),
        (quote.clone(), raw.cost),
    )
    .with_fee(fee_currency, fee_quantity);

    // Keep the fill-derived price when the exchange reports none.
    let price = raw.effective_price();
    if !price.is_zero() {
        order = order.with_quote_price(price);
    }

    order.fee_price = stable_fee_price(&order.fee_currency);

    if !require_usd_valuation || is_stable(&quote) {
        order.quote_usd_price = Decimal::ONE;
        order.base_usd_price = ratio(order.quote_quantity, order.base_quantity);
        order.sub_total = order.quote_quantity;
        if order.fee_currency == quote {
            order.fee_total = order.fee_price * order.fee_quantity;
        }
        order.total = if order.kind == TxType::Buy {
            order.sub_total + order.fee_total
        } else {
            order.sub_total - order.fee_total
        };
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn raw_tx(kind: &str, currency: &str, amount: &str, fee: Option<(&str, &str)>) -> RawTransaction {
        RawTransaction {
            id: "raw-1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            kind: Some(kind.to_string()),
            currency: currency.to_string(),
            amount: dec(amount),
            fee: fee.map(|(c, q)| RawFee {
                cost: dec(q),
                currency: c.to_string(),
            }),
            info: serde_json::json!({"walletTxId": "0xchain"}),
        }
    }

    fn raw_order(symbol: &str, side: &str, filled: &str, cost: &str, fee: Option<(&str, &str)>) -> RawOrder {
        RawOrder {
            id: "ord-1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            symbol: symbol.to_string(),
            side: side.to_string(),
            price: None,
            average: None,
            filled: dec(filled),
            cost: dec(cost),
            fee: fee.map(|(c, q)| RawFee {
                cost: dec(q),
                currency: c.to_string(),
            }),
        }
    }

    #[test]
    fn forced_type_and_default_fee_currency() {
        let tx = format_transaction(
            &raw_tx("withdrawal", "BTC", "-0.5", None),
            Some(TxType::Send),
            true,
            &ExchangeOverrides::default(),
        );
        assert_eq!(tx.kind, TxType::Send);
        assert_eq!(tx.base_quantity, dec("0.5"));
        assert_eq!(tx.fee_currency, "USD");
        assert!(!tx.is_priced());
    }

    #[test]
    fn upstream_type_is_kept_when_not_forced() {
        let tx = format_transaction(
            &raw_tx("interest_in_stake", "ALGO", "1", None),
            None,
            true,
            &ExchangeOverrides::default(),
        );
        assert_eq!(tx.kind, TxType::InterestInStake);
    }

    #[test]
    fn face_value_fill_without_usd_valuation() {
        let tx = format_transaction(
            &raw_tx("deposit", "USD", "100", Some(("USD", "1.5"))),
            Some(TxType::Receive),
            false,
            &ExchangeOverrides::default(),
        );
        assert_eq!(tx.sub_total, dec("100"));
        assert_eq!(tx.fee_price, Decimal::ONE);
        assert_eq!(tx.total, dec("101.5"));
    }

    #[test]
    fn venue_profiles() {
        let coinbase = ExchangeProfile::for_exchange("Coinbase");
        assert!(coinbase.require_symbols);
        assert!(!coinbase.require_usd_valuation);

        let pro = ExchangeProfile::for_exchange("coinbasepro");
        assert!(!pro.require_symbols);
        assert!(pro.require_usd_valuation);

        let kucoin = ExchangeProfile::for_exchange("kucoin");
        assert!(!kucoin.require_symbols);
        assert_eq!(kucoin.overrides.base_quote.as_deref(), Some("USDT"));

        assert!(!ExchangeProfile::for_exchange("binance").require_symbols);
    }

    #[test]
    fn receive_id_override_uses_chain_id() {
        let profile = ExchangeProfile::for_exchange("kucoin");
        let raw = raw_tx("deposit", "ETH", "1", None);

        let received = format_transaction(&raw, Some(TxType::Receive), true, &profile.overrides);
        assert_eq!(received.id, "0xchain");

        let sent = format_transaction(&raw, Some(TxType::Send), true, &profile.overrides);
        assert_eq!(sent.id, "raw-1");
    }

    #[test]
    fn symbol_corrections_apply_to_all_legs() {
        let overrides = ExchangeOverrides {
            symbol_corrections: HashMap::from([("BCHSV".to_string(), "BSV".to_string())]),
            ..ExchangeOverrides::default()
        };
        let order = format_order(
            &raw_order("BCHSV/BTC", "buy", "2", "0.02", Some(("BCHSV", "0.001"))),
            true,
            &overrides,
        )
        .unwrap();
        assert_eq!(order.base_currency, "BSV");
        assert_eq!(order.fee_currency, "BSV");
    }

    #[test]
    fn stable_quoted_order_is_filled_directly() -> Result<()> {
        let order = format_order(
            &raw_order("SOL/USDT", "sell", "2", "40", Some(("USDT", "0.04"))),
            true,
            &ExchangeOverrides::default(),
        )?;
        assert_eq!(order.kind, TxType::Sell);
        assert_eq!(order.quote_usd_price, Decimal::ONE);
        assert_eq!(order.base_usd_price, dec("20"));
        assert_eq!(order.quote_price, dec("20"));
        assert_eq!(order.sub_total, dec("40"));
        assert_eq!(order.fee_total, dec("0.04"));
        assert_eq!(order.total, dec("39.96"));
        Ok(())
    }

    #[test]
    fn crypto_quoted_order_stays_unpriced() -> Result<()> {
        let mut raw = raw_order("ETH/BTC", "buy", "10", "0.5", None);
        raw.average = Some(dec("0.05"));
        let order = format_order(&raw, true, &ExchangeOverrides::default())?;
        assert!(!order.is_priced());
        assert_eq!(order.quote_price, dec("0.05"));
        Ok(())
    }

    #[test]
    fn malformed_symbol_is_error() {
        let raw = raw_order("ETHBTC", "buy", "1", "1", None);
        assert!(format_order(&raw, true, &ExchangeOverrides::default()).is_err());
    }
}
