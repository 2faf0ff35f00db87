use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::models::{is_stable, Order, Record, Transaction};
use crate::valuation::{self, CommonPrices};

use super::QuoteResolver;

/// Outcome of [`SourceRouter::find_market_for_quote`].
pub struct MarketSearch {
    /// First source, in registry order, that lists a path for the symbol.
    pub resolver: Option<Arc<QuoteResolver>>,
    /// Every source consulted, including the one found.
    pub attempted: Vec<String>,
}

/// Ordered registry of price sources with fallback.
///
/// A source that cannot price a record is remembered for that record and
/// the next one in registry order is tried. Exhausting the registry leaves
/// the record unpriced; nothing here fails a batch.
pub struct SourceRouter {
    resolvers: Vec<Arc<QuoteResolver>>,
}

impl SourceRouter {
    pub fn new(resolvers: Vec<Arc<QuoteResolver>>) -> Self {
        Self { resolvers }
    }

    pub fn names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    pub async fn find_market_for_quote(
        &self,
        symbol: &str,
        exclude: &HashSet<String>,
    ) -> MarketSearch {
        let mut attempted = Vec::new();

        for resolver in &self.resolvers {
            if exclude.contains(resolver.name()) {
                continue;
            }
            attempted.push(resolver.name().to_string());

            match resolver.has_market(symbol).await {
                Ok(true) => {
                    return MarketSearch {
                        resolver: Some(resolver.clone()),
                        attempted,
                    }
                }
                Ok(false) => {
                    debug!(source = %resolver.name(), symbol = %symbol, "no market for symbol")
                }
                Err(err) => warn!(
                    source = %resolver.name(),
                    error = %err,
                    "failed to load markets, skipping source"
                ),
            }
        }

        MarketSearch {
            resolver: None,
            attempted,
        }
    }

    /// USD price of `symbol` at `at` from the first source that has one.
    /// Zero when every source is exhausted.
    pub async fn resolve_quote(&self, symbol: &str, at: DateTime<Utc>) -> Decimal {
        if is_stable(symbol) {
            return Decimal::ONE;
        }

        let mut attempted = HashSet::new();
        loop {
            let search = self.find_market_for_quote(symbol, &attempted).await;
            attempted.extend(search.attempted);
            let Some(resolver) = search.resolver else {
                break;
            };

            match resolver.resolve_quote(symbol, at).await {
                Ok(price) if !price.is_zero() => return price,
                Ok(_) => debug!(source = %resolver.name(), symbol = %symbol, "source has no price"),
                Err(err) => warn!(
                    source = %resolver.name(),
                    symbol = %symbol,
                    error = %err,
                    "price lookup failed"
                ),
            }
        }

        info!(symbol = %symbol, at = %at, "no source could price symbol");
        Decimal::ZERO
    }

    /// Value a transaction against the first source that prices its base
    /// currency. Returned unpriced when none does.
    pub async fn valuate_transaction(&self, tx: Transaction) -> Transaction {
        let prices = self
            .search_prices(&tx.id, &tx.base_currency, |resolver| {
                let tx = &tx;
                async move { valuation::transaction_prices(resolver.as_ref(), tx).await }
            })
            .await;

        match prices {
            Some(prices) => valuation::apply_transaction_prices(tx, &prices),
            None => tx,
        }
    }

    /// Value an order, searching sources by its quote currency.
    pub async fn valuate_order(&self, order: Order) -> Order {
        let anchor = if order.quote_currency.is_empty() {
            order.base_currency.clone()
        } else {
            order.quote_currency.clone()
        };

        let prices = self
            .search_prices(&order.id, &anchor, |resolver| {
                let order = &order;
                async move { valuation::order_prices(resolver.as_ref(), order).await }
            })
            .await;

        match prices {
            Some(prices) => valuation::apply_order_prices(order, &prices),
            None => order,
        }
    }

    pub async fn valuate(&self, record: Record) -> Record {
        match record {
            Record::Order(order) => self.valuate_order(order).await.into(),
            Record::Transaction(tx) => self.valuate_transaction(tx).await.into(),
        }
    }

    async fn search_prices<F, Fut>(&self, id: &str, symbol: &str, price: F) -> Option<CommonPrices>
    where
        F: Fn(Arc<QuoteResolver>) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<CommonPrices>>,
    {
        let mut attempted = HashSet::new();
        loop {
            let search = self.find_market_for_quote(symbol, &attempted).await;
            attempted.extend(search.attempted);
            let Some(resolver) = search.resolver else {
                info!(id = %id, symbol = %symbol, "no source could value record");
                return None;
            };
            let source = resolver.name().to_string();

            match price(resolver).await {
                Ok(prices) if !prices.base_usd_price.is_zero() => return Some(prices),
                Ok(_) => debug!(id = %id, source = %source, symbol = %symbol, "source left record unpriced"),
                Err(err) => warn!(
                    id = %id,
                    source = %source,
                    symbol = %symbol,
                    error = %err,
                    "valuation failed, trying next source"
                ),
            }
        }
    }
}
