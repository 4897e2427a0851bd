//! Core price-fetching logic

pub mod config;
pub mod fetch;
pub mod job;
pub mod ledger;
pub mod lifetimes;
pub mod log;
pub mod planner;
pub mod price;
pub mod quote;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for cleaner imports
pub use fetch::{FetchReport, PriceFetcher};
pub use job::{CurrencyPair, DatedPriceJob};
pub use planner::{JobPlanner, PlannerOptions};
pub use price::PriceRecord;
pub use quote::{FetchError, FetchedQuote, QuoteProvider};
pub use source::{PriceSource, ProviderRegistry};
