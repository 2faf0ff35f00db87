//! USD valuation of canonical records.
//!
//! Prices are looked up once per record through a [`PriceLookup`], then
//! applied by the pure `apply_*` functions. Applying the same prices twice
//! yields the same record.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{is_fiat, is_stable, ratio, Order, Record, Transaction, TxType};

/// Point-in-time USD price of a currency.
///
/// Implementations return `Decimal::ZERO` when no price could be found and
/// reserve errors for failures the caller may want to retry.
#[async_trait::async_trait]
pub trait PriceLookup: Send + Sync {
    async fn usd_price(&self, symbol: &str, at: DateTime<Utc>) -> Result<Decimal>;
}

/// The USD prices needed to value one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonPrices {
    pub base_usd_price: Decimal,
    pub quote_usd_price: Decimal,
    pub fee_price: Decimal,
}

/// Price of the fee currency, reusing prices already known for the record.
async fn fee_price(
    lookup: &dyn PriceLookup,
    at: DateTime<Utc>,
    fee_currency: &str,
    fee_quantity: Decimal,
    known: &[(&str, Decimal)],
) -> Result<Decimal> {
    if fee_currency.is_empty() {
        return Ok(Decimal::ZERO);
    }
    if let Some((_, price)) = known.iter().find(|(symbol, _)| *symbol == fee_currency) {
        return Ok(*price);
    }
    if is_stable(fee_currency) {
        return Ok(Decimal::ONE);
    }
    if fee_quantity.is_zero() {
        return Ok(Decimal::ZERO);
    }
    lookup.usd_price(fee_currency, at).await
}

pub async fn transaction_prices(lookup: &dyn PriceLookup, tx: &Transaction) -> Result<CommonPrices> {
    let base_usd_price = lookup.usd_price(&tx.base_currency, tx.timestamp).await?;
    let fee_price = fee_price(
        lookup,
        tx.timestamp,
        &tx.fee_currency,
        tx.fee_quantity,
        &[(tx.base_currency.as_str(), base_usd_price)],
    )
    .await?;

    Ok(CommonPrices {
        base_usd_price,
        quote_usd_price: Decimal::ZERO,
        fee_price,
    })
}

/// Prices for an order, anchored on the quote currency.
///
/// The base price is derived as `quote_usd_price * quote_price` so the two
/// legs of the trade stay consistent with each other.
pub async fn order_prices(lookup: &dyn PriceLookup, order: &Order) -> Result<CommonPrices> {
    let (base_usd_price, quote_usd_price) = if order.quote_currency.is_empty() {
        let base = lookup.usd_price(&order.base_currency, order.timestamp).await?;
        (base, Decimal::ZERO)
    } else {
        let quote = lookup
            .usd_price(&order.quote_currency, order.timestamp)
            .await?;
        (quote * order.quote_price, quote)
    };

    let fee_price = fee_price(
        lookup,
        order.timestamp,
        &order.fee_currency,
        order.fee_quantity,
        &[
            (order.quote_currency.as_str(), quote_usd_price),
            (order.base_currency.as_str(), base_usd_price),
        ],
    )
    .await?;

    Ok(CommonPrices {
        base_usd_price,
        quote_usd_price,
        fee_price,
    })
}

/// Fill the priced fields of a transaction.
///
/// An unresolved base price (zero) leaves `sub_total` and `total` at zero.
pub fn apply_transaction_prices(mut tx: Transaction, prices: &CommonPrices) -> Transaction {
    tx.base_usd_price = prices.base_usd_price;
    tx.fee_price = prices.fee_price;
    tx.fee_total = prices.fee_price * tx.fee_quantity;

    if prices.base_usd_price.is_zero() {
        tx.sub_total = Decimal::ZERO;
        tx.total = Decimal::ZERO;
    } else {
        tx.sub_total = tx.base_quantity * prices.base_usd_price;
        tx.total = tx.sub_total + tx.fee_total;
    }
    tx
}

/// Fill the priced fields of an order. Buys add the fee to the total,
/// everything else subtracts it.
pub fn apply_order_prices(mut order: Order, prices: &CommonPrices) -> Order {
    order.base_usd_price = prices.base_usd_price;
    order.quote_usd_price = prices.quote_usd_price;
    order.fee_price = prices.fee_price;
    order.fee_total = prices.fee_price * order.fee_quantity;

    if prices.base_usd_price.is_zero() {
        order.sub_total = Decimal::ZERO;
        order.total = Decimal::ZERO;
    } else {
        order.sub_total = order.base_quantity * prices.base_usd_price;
        order.total = if order.kind == TxType::Buy {
            order.sub_total + order.fee_total
        } else {
            order.sub_total - order.fee_total
        };
    }
    order
}

pub async fn valuate_transaction(
    lookup: &dyn PriceLookup,
    tx: Transaction,
    prices: Option<CommonPrices>,
) -> Result<Transaction> {
    let prices = match prices {
        Some(prices) => prices,
        None => transaction_prices(lookup, &tx).await?,
    };
    Ok(apply_transaction_prices(tx, &prices))
}

pub async fn valuate_order(
    lookup: &dyn PriceLookup,
    order: Order,
    prices: Option<CommonPrices>,
) -> Result<Order> {
    let prices = match prices {
        Some(prices) => prices,
        None => order_prices(lookup, &order).await?,
    };
    Ok(apply_order_prices(order, &prices))
}

pub async fn valuate(lookup: &dyn PriceLookup, record: Record) -> Result<Record> {
    Ok(match record {
        Record::Order(order) => valuate_order(lookup, order, None).await?.into(),
        Record::Transaction(tx) => valuate_transaction(lookup, tx, None).await?.into(),
    })
}

/// Canonicalize a crypto-to-crypto trade as a swap.
///
/// Orders quoted in fiat are returned untouched. A non-fiat buy keeps its
/// sides and trade price. A non-fiat sell swaps base and quote (quantities
/// and USD prices with them) so the received asset becomes the base, and
/// its `quote_price` is recomputed from the swapped USD prices. Either way
/// the type becomes [`TxType::Swap`].
pub fn attempted_swap_conversion(mut order: Order) -> Order {
    if is_fiat(&order.quote_currency) {
        return order;
    }

    if order.kind == TxType::Sell {
        std::mem::swap(&mut order.base_currency, &mut order.quote_currency);
        std::mem::swap(&mut order.base_quantity, &mut order.quote_quantity);
        std::mem::swap(&mut order.base_usd_price, &mut order.quote_usd_price);
        order.quote_price = ratio(order.base_usd_price, order.quote_usd_price);
    }

    order.kind = TxType::Swap;
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Mutex;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap()
    }

    /// Fixed price table that records every symbol looked up.
    struct FixedPrices {
        prices: HashMap<&'static str, Decimal>,
        lookups: Mutex<Vec<String>>,
    }

    impl FixedPrices {
        fn new(prices: &[(&'static str, &str)]) -> Self {
            Self {
                prices: prices.iter().map(|(s, p)| (*s, dec(p))).collect(),
                lookups: Mutex::new(Vec::new()),
            }
        }

        fn lookups(&self) -> Vec<String> {
            self.lookups.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PriceLookup for FixedPrices {
        async fn usd_price(&self, symbol: &str, _at: DateTime<Utc>) -> Result<Decimal> {
            self.lookups.lock().unwrap().push(symbol.to_string());
            Ok(self.prices.get(symbol).copied().unwrap_or(Decimal::ZERO))
        }
    }

    fn order(kind: TxType, base: (&str, &str), quote: (&str, &str)) -> Order {
        Order::new("o1", at(), kind, (base.0, dec(base.1)), (quote.0, dec(quote.1)))
    }

    #[test]
    fn buy_adds_fee_and_sell_subtracts_it() {
        let prices = CommonPrices {
            base_usd_price: dec("100"),
            quote_usd_price: Decimal::ONE,
            fee_price: Decimal::ONE,
        };

        let buy = order(TxType::Buy, ("SOL", "1"), ("USD", "100")).with_fee("USD", dec("1"));
        let buy = apply_order_prices(buy, &prices);
        assert_eq!(buy.sub_total, dec("100"));
        assert_eq!(buy.fee_total, dec("1"));
        assert_eq!(buy.total, dec("101"));

        let sell = order(TxType::Sell, ("SOL", "1"), ("USD", "100")).with_fee("USD", dec("1"));
        let sell = apply_order_prices(sell, &prices);
        assert_eq!(sell.total, dec("99"));
    }

    #[test]
    fn applying_prices_twice_is_idempotent() {
        let prices = CommonPrices {
            base_usd_price: dec("2000"),
            quote_usd_price: Decimal::ZERO,
            fee_price: dec("2000"),
        };
        let tx = Transaction::new("t1", at(), TxType::Send, "ETH", dec("0.5"))
            .with_fee("ETH", dec("0.001"));

        let once = apply_transaction_prices(tx, &prices);
        let twice = apply_transaction_prices(once.clone(), &prices);
        assert_eq!(once, twice);
        assert_eq!(once.sub_total, dec("1000"));
        assert_eq!(once.fee_total, dec("2"));
        assert_eq!(once.total, dec("1002"));
    }

    #[test]
    fn unresolved_base_price_zeroes_totals() {
        let prices = CommonPrices {
            base_usd_price: Decimal::ZERO,
            quote_usd_price: Decimal::ZERO,
            fee_price: Decimal::ONE,
        };
        let tx = Transaction::new("t1", at(), TxType::Receive, "XYZ", dec("10"))
            .with_fee("USD", dec("3"));
        let tx = apply_transaction_prices(tx, &prices);
        assert!(!tx.is_priced());
        assert_eq!(tx.sub_total, Decimal::ZERO);
        assert_eq!(tx.total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn stable_fee_is_priced_at_one_without_lookup() -> Result<()> {
        let lookup = FixedPrices::new(&[("ETH", "2000")]);
        let tx = Transaction::new("t1", at(), TxType::Send, "ETH", dec("1"))
            .with_fee("USDT", dec("5"));

        let tx = valuate_transaction(&lookup, tx, None).await?;
        assert_eq!(tx.fee_price, Decimal::ONE);
        assert_eq!(tx.total, dec("2005"));
        assert_eq!(lookup.lookups(), vec!["ETH"]);
        Ok(())
    }

    #[tokio::test]
    async fn fee_in_base_currency_reuses_base_price() -> Result<()> {
        let lookup = FixedPrices::new(&[("ETH", "2000")]);
        let tx = Transaction::new("t1", at(), TxType::Send, "ETH", dec("1"))
            .with_fee("ETH", dec("0.01"));

        let tx = valuate_transaction(&lookup, tx, None).await?;
        assert_eq!(tx.fee_price, dec("2000"));
        assert_eq!(lookup.lookups(), vec!["ETH"]);
        Ok(())
    }

    #[tokio::test]
    async fn zero_non_stable_fee_skips_lookup() -> Result<()> {
        let lookup = FixedPrices::new(&[("SOL", "20"), ("BNB", "300")]);
        let tx = Transaction::new("t1", at(), TxType::Send, "SOL", dec("1"))
            .with_fee("BNB", Decimal::ZERO);

        let tx = valuate_transaction(&lookup, tx, None).await?;
        assert_eq!(tx.fee_price, Decimal::ZERO);
        assert_eq!(lookup.lookups(), vec!["SOL"]);
        Ok(())
    }

    #[tokio::test]
    async fn independent_fee_currency_is_looked_up() -> Result<()> {
        let lookup = FixedPrices::new(&[("SOL", "20"), ("BNB", "300")]);
        let tx = Transaction::new("t1", at(), TxType::Send, "SOL", dec("1"))
            .with_fee("BNB", dec("0.01"));

        let tx = valuate_transaction(&lookup, tx, None).await?;
        assert_eq!(tx.fee_price, dec("300"));
        assert_eq!(tx.total, dec("23"));
        Ok(())
    }

    #[tokio::test]
    async fn order_base_price_derives_from_quote() -> Result<()> {
        let lookup = FixedPrices::new(&[("ETH", "2000")]);
        let o = order(TxType::Buy, ("UNI", "50"), ("ETH", "2")).with_fee("ETH", dec("0.01"));

        let o = valuate_order(&lookup, o, None).await?;
        assert_eq!(o.quote_price, dec("0.04"));
        assert_eq!(o.quote_usd_price, dec("2000"));
        assert_eq!(o.base_usd_price, dec("80"));
        assert_eq!(o.fee_price, dec("2000"));
        assert_eq!(o.sub_total, dec("4000"));
        assert_eq!(o.total, dec("4020"));
        assert_eq!(lookup.lookups(), vec!["ETH"]);
        Ok(())
    }

    #[tokio::test]
    async fn precomputed_prices_skip_lookup() -> Result<()> {
        let lookup = FixedPrices::new(&[]);
        let prices = CommonPrices {
            base_usd_price: dec("3"),
            quote_usd_price: Decimal::ZERO,
            fee_price: Decimal::ZERO,
        };
        let tx = Transaction::new("t1", at(), TxType::Reward, "ALGO", dec("10"));
        let tx = valuate_transaction(&lookup, tx, Some(prices)).await?;
        assert_eq!(tx.total, dec("30"));
        assert!(lookup.lookups().is_empty());
        Ok(())
    }

    #[test]
    fn fiat_quoted_orders_are_not_swaps() {
        let o = order(TxType::Sell, ("BTC", "1"), ("USD", "50000"));
        let converted = attempted_swap_conversion(o.clone());
        assert_eq!(converted, o);
    }

    #[test]
    fn crypto_sell_becomes_swap_with_sides_exchanged() {
        let mut o = order(TxType::Sell, ("ETH", "2"), ("BTC", "0.1"));
        o.base_usd_price = dec("2000");
        o.quote_usd_price = dec("40000");

        let swapped = attempted_swap_conversion(o);
        assert_eq!(swapped.kind, TxType::Swap);
        assert_eq!(swapped.base_currency, "BTC");
        assert_eq!(swapped.base_quantity, dec("0.1"));
        assert_eq!(swapped.base_usd_price, dec("40000"));
        assert_eq!(swapped.quote_currency, "ETH");
        assert_eq!(swapped.quote_quantity, dec("2"));
        assert_eq!(swapped.quote_usd_price, dec("2000"));
        assert_eq!(swapped.quote_price, dec("20"));
    }

    #[test]
    fn crypto_buy_becomes_swap_in_place() {
        let mut o = order(TxType::Buy, ("ETH", "2"), ("USDC", "4000"));
        o.base_usd_price = dec("2000");
        o.quote_usd_price = Decimal::ONE;

        let swapped = attempted_swap_conversion(o);
        assert_eq!(swapped.kind, TxType::Swap);
        assert_eq!(swapped.base_currency, "ETH");
        assert_eq!(swapped.quote_price, dec("2000"));
    }

    #[test]
    fn crypto_buy_keeps_trade_price_when_quote_is_unpriced() {
        let mut o = order(TxType::Buy, ("ETH", "10"), ("BTC", "0.5")).with_quote_price(dec("0.05"));
        o.base_usd_price = dec("2000");

        let swapped = attempted_swap_conversion(o);
        assert_eq!(swapped.kind, TxType::Swap);
        assert_eq!(swapped.base_currency, "ETH");
        assert_eq!(swapped.quote_price, dec("0.05"));
    }

    #[test]
    fn stable_quoted_buy_keeps_reported_price() {
        let mut o = order(TxType::Buy, ("SOL", "2"), ("USDT", "40")).with_quote_price(dec("19.5"));
        o.base_usd_price = dec("20");
        o.quote_usd_price = Decimal::ONE;

        let swapped = attempted_swap_conversion(o);
        assert_eq!(swapped.kind, TxType::Swap);
        assert_eq!(swapped.quote_price, dec("19.5"));
    }

    #[test]
    fn crypto_sell_with_unpriced_quote_has_zero_quote_price() {
        let mut o = order(TxType::Sell, ("ABC", "1"), ("XYZ", "1"));
        o.base_usd_price = dec("5");
        let swapped = attempted_swap_conversion(o);
        assert_eq!(swapped.base_currency, "XYZ");
        assert_eq!(swapped.quote_price, Decimal::ZERO);
    }
}
