use std::collections::{HashMap, HashSet};

use crate::models::currency::{quote_preference, STABLE_CURRENCIES};
use crate::models::is_stable;

use super::Market;

/// Active pairs of one source, indexed by base currency.
#[derive(Debug, Clone, Default)]
pub struct MarketIndex {
    quotes_by_base: HashMap<String, HashSet<String>>,
    base_quote: String,
}

impl MarketIndex {
    /// Build the index from a market listing, ignoring inactive pairs, and
    /// detect the source's own USD-equivalent quote currency.
    pub fn from_markets(markets: impl IntoIterator<Item = Market>) -> Self {
        let mut quotes_by_base: HashMap<String, HashSet<String>> = HashMap::new();
        let mut all_quotes: HashSet<String> = HashSet::new();

        for market in markets.into_iter().filter(|m| m.active) {
            all_quotes.insert(market.quote.clone());
            quotes_by_base
                .entry(market.base)
                .or_default()
                .insert(market.quote);
        }

        let base_quote = STABLE_CURRENCIES
            .iter()
            .find(|q| all_quotes.contains(**q))
            .copied()
            .unwrap_or("USD")
            .to_string();

        Self {
            quotes_by_base,
            base_quote,
        }
    }

    pub fn with_base_quote(mut self, base_quote: impl Into<String>) -> Self {
        self.base_quote = base_quote.into();
        self
    }

    /// The quote currency used as the second hop of two-hop paths.
    pub fn base_quote(&self) -> &str {
        &self.base_quote
    }

    pub fn has_pair(&self, base: &str, quote: &str) -> bool {
        self.quotes_by_base
            .get(base)
            .is_some_and(|quotes| quotes.contains(quote))
    }

    pub fn len(&self) -> usize {
        self.quotes_by_base.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes_by_base.is_empty()
    }

    /// Preferred path from `symbol` to a USD-equivalent price.
    ///
    /// Returns `[stable]` for a direct stable market, `[intermediate,
    /// base_quote]` for a two-hop path, or an empty path when no candidate
    /// quote (outside `exclude`) is listed.
    pub fn quote_conversion(&self, symbol: &str, exclude: &HashSet<String>) -> Vec<String> {
        let Some(quotes) = self.quotes_by_base.get(symbol) else {
            return Vec::new();
        };

        let Some(quote) = quote_preference()
            .find(|q| quotes.contains(*q) && !exclude.contains(*q))
        else {
            return Vec::new();
        };

        if is_stable(quote) {
            vec![quote.to_string()]
        } else {
            vec![quote.to_string(), self.base_quote.clone()]
        }
    }
}
