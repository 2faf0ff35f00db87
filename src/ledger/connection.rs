use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::EthereumConfig;
use crate::market_data::SourceRouter;
use crate::models::{sort_by_timestamp, RawRecord, Record, TxType};

use super::{group_by_hash, EtherscanClient, LedgerEntry, LedgerReconstructor, LedgerSource};

/// Groups valued at the same time.
const VALUATION_CONCURRENCY: usize = 4;

/// Priced activity of one Ethereum address.
///
/// Entries are fetched once and cached; records are reconstructed and valued
/// on first request and cached too, until the next forced reload.
pub struct EthereumLedger {
    source: Arc<dyn LedgerSource>,
    router: Arc<SourceRouter>,
    reconstructor: LedgerReconstructor,
    groups: Option<Vec<Vec<LedgerEntry>>>,
    records: Option<Vec<Record>>,
}

impl EthereumLedger {
    pub fn new(
        address: impl Into<String>,
        source: Arc<dyn LedgerSource>,
        router: Arc<SourceRouter>,
    ) -> Self {
        Self {
            source,
            router,
            reconstructor: LedgerReconstructor::new(address, "ETH"),
            groups: None,
            records: None,
        }
    }

    /// Ledger backed by Etherscan, as described by the `[ethereum]` config section.
    pub fn from_config(config: &EthereumConfig, router: Arc<SourceRouter>) -> Self {
        let mut client = EtherscanClient::new(config.api_key.clone());
        if let Some(url) = &config.base_url {
            client = client.with_base_url(url);
        }
        Self::new(config.address.clone(), Arc::new(client), router)
            .with_native_symbol(config.native_symbol.clone())
    }

    pub fn with_native_symbol(mut self, native_symbol: impl Into<String>) -> Self {
        self.reconstructor =
            LedgerReconstructor::new(self.reconstructor.address().to_string(), native_symbol);
        self
    }

    pub fn address(&self) -> &str {
        self.reconstructor.address()
    }

    /// Fetch and group the address's entries. Cached unless `force_reload`.
    pub async fn load(&mut self, force_reload: bool) -> Result<()> {
        if self.groups.is_some() && !force_reload {
            return Ok(());
        }

        let entries = self.source.fetch_ledger_entries(self.address()).await?;
        let groups = group_by_hash(entries);
        info!(
            source = %self.source.name(),
            address = %self.address(),
            groups = groups.len(),
            "loaded ledger"
        );
        self.groups = Some(groups);
        self.records = None;
        Ok(())
    }

    /// Loaded groups in their raw tagged form, in first-seen order.
    pub async fn raw_records(&mut self) -> Result<Vec<RawRecord>> {
        self.load(false).await?;
        Ok(self
            .groups
            .iter()
            .flatten()
            .map(|entries| RawRecord::LedgerGroup {
                entries: entries.clone(),
            })
            .collect())
    }

    /// Every reconstructed and valued record, oldest first.
    pub async fn transactions(&mut self) -> Result<&[Record]> {
        self.load(false).await?;

        if self.records.is_none() {
            let groups = self.groups.as_deref().unwrap_or_default();
            let reconstructor = &self.reconstructor;
            let router = &self.router;

            let mut records: Vec<Record> = stream::iter(groups)
                .map(|group| value_group(reconstructor, router, group))
                .buffered(VALUATION_CONCURRENCY)
                .filter_map(|record| async move { record })
                .collect()
                .await;
            sort_by_timestamp(&mut records);
            self.records = Some(records);
        }

        Ok(self.records.as_deref().unwrap_or_default())
    }

    /// Records of the given types (all types when `kinds` is empty) strictly
    /// after `since`.
    pub async fn filter_transactions(
        &mut self,
        kinds: &[TxType],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>> {
        let records = self.transactions().await?;
        Ok(records
            .iter()
            .filter(|r| kinds.is_empty() || kinds.contains(r.kind()))
            .filter(|r| since.map_or(true, |since| r.timestamp() > since))
            .cloned()
            .collect())
    }

    pub async fn withdrawals(&mut self, since: Option<DateTime<Utc>>) -> Result<Vec<Record>> {
        self.filter_transactions(&[TxType::Send], since).await
    }

    pub async fn deposits(&mut self, since: Option<DateTime<Utc>>) -> Result<Vec<Record>> {
        self.filter_transactions(&[TxType::Receive], since).await
    }

    pub async fn orders(&mut self, since: Option<DateTime<Utc>>) -> Result<Vec<Record>> {
        self.filter_transactions(&[TxType::Buy, TxType::Sell], since)
            .await
    }

    pub async fn all_transactions(&mut self, since: Option<DateTime<Utc>>) -> Result<Vec<Record>> {
        self.filter_transactions(&[], since).await
    }
}

/// Reconstruct one group and value it. Groups with malformed fields are
/// logged and skipped; stubs are kept unpriced.
async fn value_group(
    reconstructor: &LedgerReconstructor,
    router: &SourceRouter,
    group: &[LedgerEntry],
) -> Option<Record> {
    let record = match reconstructor.reconstruct_group(group) {
        Ok(record) => record,
        Err(err) => {
            let hash = group.first().map(|e| e.hash.as_str()).unwrap_or_default();
            warn!(hash = %hash, error = %err, "skipping malformed ledger group");
            return None;
        }
    };

    if record.kind() == &TxType::Unclassified {
        debug!(hash = %record.id(), "leaving unclassified record unpriced");
        return Some(record);
    }

    Some(router.valuate(record).await)
}
