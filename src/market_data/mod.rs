//! Historical USD pricing from public exchange market data.

mod builder;
mod index;
mod memory;
pub mod providers;
mod rate_limit;
mod resolver;
mod router;
mod source;

pub use builder::{build_resolver, build_router};
pub use index::MarketIndex;
pub use memory::StaticMarketSource;
pub use rate_limit::RateLimitGate;
pub use resolver::QuoteResolver;
pub use router::{MarketSearch, SourceRouter};
pub use source::{Candle, Market, MarketSource, CANDLE_LIMIT, ONE_MINUTE};
