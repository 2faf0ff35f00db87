//! Etherscan account API.
//!
//! Docs: https://docs.etherscan.io/api-endpoints/accounts

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{from_status, SourceError};

use super::LedgerEntry;

const ETHERSCAN_API_BASE: &str = "https://api.etherscan.io/api";

/// Etherscan caps `page * offset` at 10 000 records.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Source of raw on-chain entries for an address.
#[async_trait::async_trait]
pub trait LedgerSource: Send + Sync {
    fn name(&self) -> &str;

    /// Native and token transfers touching `address`, in source order.
    async fn fetch_ledger_entries(&self, address: &str) -> Result<Vec<LedgerEntry>>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

pub struct EtherscanClient {
    client: Client,
    api_key: String,
    base_url: String,
    page_size: usize,
}

impl EtherscanClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ETHERSCAN_API_BASE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn fetch_page(&self, action: &str, address: &str, page: usize) -> Result<Vec<LedgerEntry>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("module", "account"),
                ("action", action),
                ("address", address),
                ("startblock", "0"),
                ("endblock", "99999999"),
                ("sort", "asc"),
            ])
            .query(&[("page", page), ("offset", self.page_size)])
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| SourceError::network(self.name(), e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(from_status(self.name(), status, &body).into());
        }

        let body: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Etherscan {action} response"))?;

        if body.status != "1" {
            if body.message.starts_with("No transactions found") {
                return Ok(Vec::new());
            }
            let detail = body.result.as_str().unwrap_or_default();
            if detail.contains("rate limit") {
                return Err(SourceError::rate_limited(self.name()).into());
            }
            return Err(
                SourceError::exchange(self.name(), format!("{}: {detail}", body.message)).into(),
            );
        }

        serde_json::from_value(body.result)
            .with_context(|| format!("Failed to parse Etherscan {action} entries"))
    }

    /// Every page of one account action.
    async fn fetch_action(&self, action: &str, address: &str) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.fetch_page(action, address, page).await?;
            let done = batch.len() < self.page_size;
            entries.extend(batch);
            if done {
                break;
            }
            page += 1;
        }
        debug!(action, address, count = entries.len(), "fetched Etherscan entries");
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl LedgerSource for EtherscanClient {
    fn name(&self) -> &str {
        "etherscan"
    }

    async fn fetch_ledger_entries(&self, address: &str) -> Result<Vec<LedgerEntry>> {
        let (normal, tokens) = tokio::try_join!(
            self.fetch_action("txlist", address),
            self.fetch_action("tokentx", address),
        )?;

        let mut entries = normal;
        entries.extend(tokens);
        Ok(entries)
    }
}
