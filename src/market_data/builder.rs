use std::sync::Arc;

use tracing::debug;

use crate::config::Config;

use super::providers::build_source;
use super::{MarketSource, QuoteResolver, SourceRouter};

/// Wrap a market source in a resolver using the configured rate-limit policy.
pub fn build_resolver(source: Arc<dyn MarketSource>, config: &Config) -> Arc<QuoteResolver> {
    Arc::new(QuoteResolver::new(source).with_rate_limit(&config.rate_limit))
}

/// Build the fallback router from the configured price source registry.
pub fn build_router(config: &Config) -> SourceRouter {
    let resolvers: Vec<Arc<QuoteResolver>> = config
        .price_source_registry()
        .iter()
        .map(|entry| build_resolver(build_source(entry), config))
        .collect();

    debug!(
        sources = ?resolvers.iter().map(|r| r.name()).collect::<Vec<_>>(),
        "built price source router"
    );
    SourceRouter::new(resolvers)
}
