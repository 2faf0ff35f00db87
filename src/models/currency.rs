//! Currency classification tables shared by the resolver, the valuation
//! pipeline and the ledger reconstructor.

/// Currencies treated as price-equal to one US dollar, in preference order.
pub const STABLE_CURRENCIES: &[&str] = &["USD", "USDC", "USDT"];

/// USD-pegged tokens.
pub const STABLE_COINS: &[&str] = &["USDC", "USDT"];

/// Currencies that keep a trade a buy/sell rather than a swap.
pub const FIAT_CURRENCIES: &[&str] = &["USD"];

/// Quote currencies the resolver falls back to after the stables.
pub const INTERMEDIATE_QUOTES: &[&str] = &["BTC", "ETH"];

/// Assets that should never end up as the "bought" side of a token-to-token
/// ledger trade.
pub const LEDGER_QUOTE_COINS: &[&str] = &["USD", "USDC", "USDT", "BTC"];

/// Currency used for fee legs that carry no cost to the account holder.
pub const FREE_FEE_CURRENCY: &str = "USD";

pub fn is_stable(symbol: &str) -> bool {
    STABLE_CURRENCIES.contains(&symbol)
}

pub fn is_stable_coin(symbol: &str) -> bool {
    STABLE_COINS.contains(&symbol)
}

pub fn is_fiat(symbol: &str) -> bool {
    FIAT_CURRENCIES.contains(&symbol)
}

pub fn is_ledger_quote_coin(symbol: &str) -> bool {
    LEDGER_QUOTE_COINS.contains(&symbol)
}

/// Full quote preference order: stables first (in declared order), then BTC, then ETH.
pub fn quote_preference() -> impl Iterator<Item = &'static str> {
    STABLE_CURRENCIES
        .iter()
        .chain(INTERMEDIATE_QUOTES.iter())
        .copied()
}
