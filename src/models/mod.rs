pub mod currency;
mod raw;
mod record;

pub use currency::{
    is_fiat, is_ledger_quote_coin, is_stable, is_stable_coin, FIAT_CURRENCIES, FREE_FEE_CURRENCY,
    STABLE_CURRENCIES,
};
pub use raw::{RawFee, RawKind, RawOrder, RawRecord, RawTransaction};
pub use record::{ratio, sort_by_timestamp, Order, Record, Transaction, TxType};
