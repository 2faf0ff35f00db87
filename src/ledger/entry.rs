use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimals of the native coin (wei per ether).
pub const NATIVE_DECIMALS: u32 = 18;

/// Largest integer a `Decimal` can hold without scaling (2^96 - 1).
const MAX_MANTISSA: u128 = 79_228_162_514_264_337_593_543_950_335;

/// Largest scale a `Decimal` supports.
const MAX_SCALE: u32 = 28;

/// One value transfer from an address's on-chain history, in the shape the
/// Etherscan account endpoints return (numbers as decimal strings).
///
/// Native transfers leave `token_symbol` empty; token transfers carry the
/// token's symbol and decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_decimal: Option<String>,
    #[serde(default)]
    pub gas_used: String,
    #[serde(default)]
    pub gas_price: String,
    pub time_stamp: String,
}

/// Turn an integer amount in the smallest unit into a `Decimal` with
/// `scale` fractional digits.
///
/// Amounts wider than 96 bits lose their least significant digits.
pub(crate) fn scaled_decimal(raw: u128, scale: u32) -> Result<Decimal> {
    let mut raw = raw;
    let mut scale = scale;
    while scale > 0 && (raw > MAX_MANTISSA || scale > MAX_SCALE) {
        raw /= 10;
        scale -= 1;
    }
    let mut value = Decimal::from_u128(raw).context("value cannot be represented")?;
    value.set_scale(scale)?;
    Ok(value.normalize())
}

fn parse_u128(field: &str, raw: &str) -> Result<u128> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse()
        .with_context(|| format!("invalid {field}: {raw:?}"))
}

impl LedgerEntry {
    pub fn is_token(&self) -> bool {
        self.token_symbol.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Asset moved by this entry: the token symbol, or `native` otherwise.
    pub fn symbol<'a>(&'a self, native: &'a str) -> &'a str {
        match self.token_symbol.as_deref() {
            Some(symbol) if !symbol.is_empty() => symbol,
            _ => native,
        }
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        let seconds: i64 = self
            .time_stamp
            .trim()
            .parse()
            .with_context(|| format!("invalid timeStamp: {:?}", self.time_stamp))?;
        Utc.timestamp_opt(seconds, 0)
            .single()
            .context("timestamp out of range")
    }

    pub fn raw_value(&self) -> Result<u128> {
        parse_u128("value", &self.value)
    }

    /// Token decimals, defaulting to the native 18 when absent.
    pub fn decimals(&self) -> Result<u32> {
        match self.token_decimal.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d
                .parse()
                .with_context(|| format!("invalid tokenDecimal: {d:?}")),
            _ => Ok(NATIVE_DECIMALS),
        }
    }

    /// Transferred amount in whole units.
    pub fn amount(&self) -> Result<Decimal> {
        scaled_decimal(self.raw_value()?, self.decimals()?)
    }

    /// Gas cost of the transaction in native units.
    pub fn gas_fee(&self) -> Result<Decimal> {
        let used = parse_u128("gasUsed", &self.gas_used)?;
        let price = parse_u128("gasPrice", &self.gas_price)?;
        let wei = used.checked_mul(price).context("gas fee overflows")?;
        scaled_decimal(wei, NATIVE_DECIMALS)
    }

    pub fn is_from(&self, address: &str) -> bool {
        self.from.eq_ignore_ascii_case(address)
    }

    pub fn is_to(&self, address: &str) -> bool {
        self.to.eq_ignore_ascii_case(address)
    }
}

/// Group entries by transaction hash, keeping first-seen order for both the
/// groups and the entries inside each group.
pub fn group_by_hash(entries: impl IntoIterator<Item = LedgerEntry>) -> Vec<Vec<LedgerEntry>> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<LedgerEntry>> = Vec::new();

    for entry in entries {
        match positions.get(&entry.hash) {
            Some(&i) => groups[i].push(entry),
            None => {
                positions.insert(entry.hash.clone(), groups.len());
                groups.push(vec![entry]);
            }
        }
    }
    groups
}
