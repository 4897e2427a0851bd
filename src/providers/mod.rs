pub mod util;
pub mod yahoo_finance;

use crate::core::config::AppConfig;
use crate::core::source::ProviderRegistry;
use anyhow::Result;
use std::sync::Arc;
use yahoo_finance::YahooFinanceProvider;

/// Identifier the Yahoo adapter is registered under.
pub const YAHOO: &str = "yahoo";

/// Registers every bundled provider, configured from `config`.
pub fn default_registry(config: &AppConfig) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::default();
    registry.register(
        YAHOO,
        Arc::new(YahooFinanceProvider::new(&config.providers.yahoo.base_url)?),
    );
    Ok(registry)
}
