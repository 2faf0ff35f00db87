use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::SourceError;
use crate::market_data::QuoteResolver;
use crate::models::{sort_by_timestamp, Order, RawKind, RawRecord, Record, Transaction, TxType};
use crate::valuation::attempted_swap_conversion;

use super::{format_order, format_transaction, ExchangeClient, ExchangeProfile, RetryPolicy};

/// Records requested per bulk fetch.
const DEFAULT_PAGE_LIMIT: usize = 100;

/// Account activity of one exchange, formatted and valued against the
/// exchange's own markets.
pub struct ExchangeConnection {
    client: Arc<dyn ExchangeClient>,
    resolver: Arc<QuoteResolver>,
    profile: ExchangeProfile,
    retry: RetryPolicy,
    page_limit: usize,
}

impl ExchangeConnection {
    pub fn new(client: Arc<dyn ExchangeClient>, resolver: Arc<QuoteResolver>) -> Self {
        let profile = ExchangeProfile::for_exchange(client.name());
        Self {
            client,
            resolver,
            profile,
            retry: RetryPolicy::default(),
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_profile(mut self, profile: ExchangeProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_config(self, config: &Config) -> Self {
        self.with_retry(RetryPolicy::from_config(&config.retry))
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit;
        self
    }

    pub fn name(&self) -> &str {
        self.client.name()
    }

    /// Fail before any network call when the client lacks `kind` or when a
    /// per-symbol exchange is queried without one.
    fn check_params(&self, kind: RawKind, symbol: Option<&str>) -> Result<()> {
        if !self.client.supports(kind) {
            return Err(SourceError::not_supported(self.name(), kind.method()).into());
        }
        if self.profile.require_symbols && symbol.is_none() {
            bail!("{}.{} requires a symbol", self.name(), kind.method());
        }
        Ok(())
    }

    async fn fetch(
        &self,
        kind: RawKind,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRecord>> {
        self.check_params(kind, symbol)?;
        let raw = self
            .client
            .fetch_raw_transactions(kind, symbol, since, Some(self.page_limit))
            .await?;
        debug!(
            exchange = %self.name(),
            method = kind.method(),
            symbol = ?symbol,
            count = raw.len(),
            "fetched raw records"
        );
        Ok(raw)
    }

    async fn value_transactions(&self, transactions: Vec<Transaction>) -> Result<Vec<Record>> {
        if !self.profile.require_usd_valuation {
            return Ok(transactions.into_iter().map(Record::from).collect());
        }
        let valued = join_all(
            transactions
                .into_iter()
                .map(|tx| self.resolver.valuate_transaction(tx, None)),
        )
        .await;
        valued
            .into_iter()
            .map(|tx| tx.map(Record::from))
            .collect()
    }

    async fn transfers(
        &self,
        kind: RawKind,
        force_type: TxType,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        let raw = self.fetch(kind, symbol, since).await?;
        let transactions: Vec<Transaction> = raw
            .into_iter()
            .filter_map(|record| match record {
                RawRecord::ExchangeTransaction(tx) => Some(tx),
                other => {
                    warn!(exchange = %self.name(), record = ?other, "ignoring non-transfer record");
                    None
                }
            })
            .map(|tx| {
                format_transaction(
                    &tx,
                    Some(force_type.clone()),
                    self.profile.require_usd_valuation,
                    &self.profile.overrides,
                )
            })
            .filter(|tx| since.map_or(true, |since| tx.timestamp > since))
            .collect();

        let records = self.value_transactions(transactions).await?;
        let unpriced = records.iter().filter(|r| !r.is_priced()).count();
        if unpriced > 0 {
            warn!(exchange = %self.name(), method = kind.method(), unpriced, "records left unpriced");
        }
        Ok(records)
    }

    pub async fn withdrawals(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        self.transfers(RawKind::Withdrawals, TxType::Send, symbol, since)
            .await
    }

    pub async fn deposits(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        self.transfers(RawKind::Deposits, TxType::Receive, symbol, since)
            .await
    }

    /// Filled closed orders, valued and canonicalized (crypto-to-crypto
    /// trades become swaps).
    pub async fn orders(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        let raw = self.fetch(RawKind::ClosedOrders, symbol, since).await?;

        let mut orders: Vec<Order> = Vec::new();
        for record in raw {
            let order = match record {
                RawRecord::ExchangeOrder(order) => order,
                other => {
                    warn!(exchange = %self.name(), record = ?other, "ignoring non-order record");
                    continue;
                }
            };
            if order.filled <= rust_decimal::Decimal::ZERO {
                continue;
            }
            let order = match format_order(
                &order,
                self.profile.require_usd_valuation,
                &self.profile.overrides,
            ) {
                Ok(order) => order,
                Err(err) => {
                    warn!(
                        exchange = %self.name(),
                        order_id = %order.id,
                        error = %err,
                        "skipping malformed order"
                    );
                    continue;
                }
            };
            if since.map_or(true, |since| order.timestamp > since) {
                orders.push(order);
            }
        }

        if !self.profile.require_usd_valuation {
            return Ok(orders.into_iter().map(Record::from).collect());
        }

        let valued = join_all(orders.into_iter().map(|order| async move {
            // Stable-quoted orders were already filled by the formatter.
            let order = if order.is_priced() {
                order
            } else {
                self.resolver.valuate_order(order, None).await?
            };
            Ok::<Record, anyhow::Error>(attempted_swap_conversion(order).into())
        }))
        .await;

        valued.into_iter().collect()
    }

    /// Withdrawals, deposits and orders fetched concurrently, merged and
    /// sorted by time.
    pub async fn transactions(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        let (withdrawals, deposits, orders) = tokio::try_join!(
            self.withdrawals(symbol, since),
            self.deposits(symbol, since),
            self.orders(symbol, since),
        )?;

        let mut records = withdrawals;
        records.extend(deposits);
        records.extend(orders);
        sort_by_timestamp(&mut records);
        Ok(records)
    }

    /// Full history. Per-symbol exchanges are walked one symbol at a time
    /// under the retry policy; a symbol that keeps failing is skipped.
    pub async fn all_transactions(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Record>> {
        let mut records = Vec::new();

        if self.profile.require_symbols {
            let symbols = self.client.symbols().await?;
            info!(exchange = %self.name(), symbols = symbols.len(), "fetching history by symbol");

            for symbol in &symbols {
                if let Some(batch) = self
                    .retry
                    .run(symbol, || self.transactions(Some(symbol.as_str()), since))
                    .await
                {
                    records.extend(batch);
                }
            }
        } else if let Some(batch) = self
            .retry
            .run(self.name(), || self.transactions(None, since))
            .await
        {
            records.extend(batch);
        }

        sort_by_timestamp(&mut records);
        info!(exchange = %self.name(), records = records.len(), "fetched history");
        Ok(records)
    }
}
