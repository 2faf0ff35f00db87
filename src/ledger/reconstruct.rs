use anyhow::{bail, Result};
use rust_decimal::Decimal;
use tracing::warn;

use crate::models::{is_ledger_quote_coin, Order, Record, Transaction, TxType, FREE_FEE_CURRENCY};

use super::LedgerEntry;

/// Rebuilds canonical records from groups of same-hash ledger entries, as
/// seen from one address.
///
/// Records come out unpriced. Groups whose shape cannot be interpreted
/// become an [`TxType::Unclassified`] stub rather than being dropped.
#[derive(Debug, Clone)]
pub struct LedgerReconstructor {
    address: String,
    native_symbol: String,
}

impl LedgerReconstructor {
    pub fn new(address: impl Into<String>, native_symbol: impl Into<String>) -> Self {
        Self {
            address: address.into().to_lowercase(),
            native_symbol: native_symbol.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn native_symbol(&self) -> &str {
        &self.native_symbol
    }

    /// Interpret one group. Errors only on an empty group or an unreadable
    /// timestamp; amounts that cannot be read or represented yield the stub.
    pub fn reconstruct_group(&self, group: &[LedgerEntry]) -> Result<Record> {
        let Some(first) = group.first() else {
            bail!("empty ledger group");
        };

        let record = match self.interpret(group) {
            Ok(record) => record,
            Err(err) => {
                warn!(hash = %first.hash, error = %err, "unreadable ledger amounts");
                None
            }
        };

        match record {
            Some(record) => Ok(record),
            None => {
                warn!(
                    hash = %first.hash,
                    entries = group.len(),
                    "unparsable ledger group, recording unclassified stub"
                );
                Ok(Transaction::new(
                    first.hash.clone(),
                    first.timestamp()?,
                    TxType::Unclassified,
                    self.native_symbol.clone(),
                    Decimal::ZERO,
                )
                .with_fee(
                    self.native_symbol.clone(),
                    first.gas_fee().unwrap_or(Decimal::ZERO),
                )
                .into())
            }
        }
    }

    fn interpret(&self, group: &[LedgerEntry]) -> Result<Option<Record>> {
        match group {
            [entry] => self.single_transfer(entry).map(Some),
            [a, b] => self.token_pair(a, b),
            [a, b, c] => self.token_swap(a, b, c),
            _ => Ok(None),
        }
    }

    /// Plain transfer, or a zero-value contract call paying only gas.
    fn single_transfer(&self, entry: &LedgerEntry) -> Result<Record> {
        let timestamp = entry.timestamp()?;
        let gas_fee = entry.gas_fee()?;

        if entry.raw_value()? == 0 {
            return Ok(Transaction::new(
                entry.hash.clone(),
                timestamp,
                TxType::Send,
                self.native_symbol.clone(),
                Decimal::ZERO,
            )
            .with_fee(self.native_symbol.clone(), gas_fee)
            .into());
        }

        let kind = if entry.is_from(&self.address) {
            TxType::Send
        } else {
            TxType::Receive
        };
        let tx = Transaction::new(
            entry.hash.clone(),
            timestamp,
            kind.clone(),
            entry.symbol(&self.native_symbol),
            entry.amount()?,
        );
        Ok(self.with_transfer_fee(tx, kind, gas_fee).into())
    }

    /// Token leg plus native leg. A valued native leg makes a buy or sell
    /// against the native coin; otherwise only the token movement counts.
    fn token_pair(&self, a: &LedgerEntry, b: &LedgerEntry) -> Result<Option<Record>> {
        let (token, native) = match (a.is_token(), b.is_token()) {
            (true, false) => (a, b),
            (false, true) => (b, a),
            _ => return Ok(None),
        };

        let timestamp = token.timestamp()?;
        let gas_fee = token.gas_fee()?;
        let token_amount = token.amount()?;

        if native.raw_value()? > 0 {
            let kind = if native.is_from(&self.address) {
                TxType::Buy
            } else {
                TxType::Sell
            };
            let order = Order::new(
                token.hash.clone(),
                timestamp,
                kind,
                (token.symbol(&self.native_symbol), token_amount),
                (self.native_symbol.clone(), native.amount()?),
            )
            .with_fee(self.native_symbol.clone(), gas_fee);
            return Ok(Some(order.into()));
        }

        let kind = if token.is_to(&self.address) {
            TxType::Receive
        } else {
            TxType::Send
        };
        let tx = Transaction::new(
            token.hash.clone(),
            timestamp,
            kind.clone(),
            token.symbol(&self.native_symbol),
            token_amount,
        );
        Ok(Some(self.with_transfer_fee(tx, kind, gas_fee).into()))
    }

    /// Token-for-token trade routed through a contract. The native entry is
    /// ignored; the token leaving the address is the quote, the one arriving
    /// is the base, unless the arriving one is a quote coin.
    fn token_swap(
        &self,
        a: &LedgerEntry,
        b: &LedgerEntry,
        c: &LedgerEntry,
    ) -> Result<Option<Record>> {
        let tokens: Vec<&LedgerEntry> = [a, b, c].into_iter().filter(|e| e.is_token()).collect();
        let [first, second] = tokens.as_slice() else {
            return Ok(None);
        };

        let (outgoing, incoming) = if first.is_from(&self.address) && second.is_to(&self.address) {
            (*first, *second)
        } else if second.is_from(&self.address) && first.is_to(&self.address) {
            (*second, *first)
        } else {
            return Ok(None);
        };

        let incoming_symbol = incoming.symbol(&self.native_symbol);
        let outgoing_symbol = outgoing.symbol(&self.native_symbol);
        let incoming_leg = (incoming_symbol, incoming.amount()?);
        let outgoing_leg = (outgoing_symbol, outgoing.amount()?);

        let (kind, base, quote) = if is_ledger_quote_coin(incoming_symbol) {
            (TxType::Sell, outgoing_leg, incoming_leg)
        } else {
            (TxType::Buy, incoming_leg, outgoing_leg)
        };

        let order = Order::new(a.hash.clone(), a.timestamp()?, kind, base, quote)
            .with_fee(self.native_symbol.clone(), a.gas_fee()?);
        Ok(Some(order.into()))
    }

    /// Receives cost the holder nothing; everything else pays gas.
    fn with_transfer_fee(&self, tx: Transaction, kind: TxType, gas_fee: Decimal) -> Transaction {
        if kind == TxType::Receive {
            tx.with_fee(FREE_FEE_CURRENCY, Decimal::ZERO)
        } else {
            tx.with_fee(self.native_symbol.clone(), gas_fee)
        }
    }
}
