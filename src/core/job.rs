//! Fetch jobs produced by the planner.

use crate::core::source::PriceSource;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_string(),
            quote: quote.to_string(),
        }
    }
}

impl Display for CurrencyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} /{}", self.base, self.quote)
    }
}

/// A price to fetch for `base`, on `date` or the latest available when `None`.
///
/// `sources` is a fallback chain: the first source returning a quote wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedPriceJob {
    pub base: String,
    pub quote: Option<String>,
    pub date: Option<NaiveDate>,
    pub sources: Vec<PriceSource>,
}

impl DatedPriceJob {
    pub fn new(pair: &CurrencyPair, date: Option<NaiveDate>, sources: Vec<PriceSource>) -> Self {
        Self {
            base: pair.base.clone(),
            quote: Some(pair.quote.clone()),
            date,
            sources,
        }
    }

    fn sort_key(&self) -> (&str, Option<&str>, Option<NaiveDate>) {
        (&self.base, self.quote.as_deref(), self.date)
    }
}

/// One line describing the job, as printed by dry runs.
impl Display for DatedPriceJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let base_quote = format!(
            "{} /{}",
            self.base,
            self.quote.as_deref().unwrap_or("None")
        );
        let date = self
            .date
            .map_or_else(|| "latest".to_string(), |date| date.to_string());
        let sources = self
            .sources
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{base_quote:<32} @ {date:10} [ {sources} ]")
    }
}

/// Orders jobs by pair then date and drops repeated `(pair, date)` jobs,
/// keeping the first one seen.
pub fn sort_jobs(jobs: &mut Vec<DatedPriceJob>) {
    jobs.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    jobs.dedup_by(|a, b| a.sort_key() == b.sort_key());
}
