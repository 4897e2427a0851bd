//! Turns ledger facts into the list of prices to fetch.

use crate::core::job::{CurrencyPair, DatedPriceJob, sort_jobs};
use crate::core::ledger::Ledger;
use crate::core::lifetimes::{ActivityInterval, Cadence, compress, required_dates, trim};
use crate::core::source::{
    PriceSource, ProviderRef, ProviderRegistry, SourceParseError, parse_source_map,
};
use chrono::{Days, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Explicit fallback chains per declared pair.
pub type DeclaredSources = BTreeMap<CurrencyPair, Vec<PriceSource>>;

#[derive(Debug, Clone)]
pub struct PlannerOptions {
    /// Include pairs with no balance at the date.
    pub inactive: bool,
    /// Provider for pairs without a declared source. Also widens the
    /// candidates to every pair the ledger uses.
    pub undeclared: Option<ProviderRef>,
    pub cadence: Cadence,
    /// Holding gaps shorter than this many days are priced through.
    pub compress_days: u32,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            inactive: false,
            undeclared: None,
            cadence: Cadence::Weekdays,
            compress_days: 1,
        }
    }
}

pub struct JobPlanner<'a> {
    ledger: &'a Ledger,
    registry: &'a ProviderRegistry,
    options: PlannerOptions,
}

impl<'a> JobPlanner<'a> {
    pub fn new(ledger: &'a Ledger, registry: &'a ProviderRegistry, options: PlannerOptions) -> Self {
        Self {
            ledger,
            registry,
            options,
        }
    }

    /// Pairs whose commodity declaration, made before `date`, carries a
    /// `price` source map.
    pub fn declared_currencies(&self, date: Option<NaiveDate>) -> DeclaredSources {
        let mut declared = DeclaredSources::new();
        for decl in self.ledger.commodities_before(date) {
            let Some(spec) = decl.price.as_deref() else {
                continue;
            };
            if spec.is_empty() {
                debug!(currency = %decl.currency, "Skipping ignored currency (with empty price)");
                continue;
            }
            match parse_source_map(spec, self.registry) {
                Ok(source_map) => {
                    for (quote, sources) in source_map {
                        declared.insert(CurrencyPair::new(&decl.currency, &quote), sources);
                    }
                }
                Err(e) => warn!(
                    currency = %decl.currency,
                    error = %e,
                    "Ignoring currency with invalid 'price' source"
                ),
            }
        }
        declared
    }

    /// One job per pair to price at `date`, or at the latest price when `None`.
    pub fn jobs_at_date(&self, date: Option<NaiveDate>) -> Vec<DatedPriceJob> {
        let declared = self.declared_currencies(date);
        let mut pairs = self.candidates(date, &declared);

        if !self.options.inactive {
            let held = self.ledger.balance_pairs(date);
            log_pairs("Currencies held in assets", &held);
            pairs.retain(|pair| held.contains(pair));
        }
        log_pairs("Currencies to fetch", &pairs);

        let mut jobs: Vec<_> = pairs
            .iter()
            .filter_map(|pair| {
                self.sources_for(pair, &declared)
                    .map(|sources| DatedPriceJob::new(pair, date, sources))
            })
            .collect();
        sort_jobs(&mut jobs);
        jobs
    }

    /// Jobs filling the gap between the latest known price of each pair and
    /// `date_last`, exclusive, while the pair was held.
    pub fn jobs_up_to_date(&self, date_last: NaiveDate) -> Vec<DatedPriceJob> {
        let declared = self.declared_currencies(Some(date_last));
        let candidates = self.candidates(Some(date_last), &declared);
        let lifetimes = self.ledger.lifetime_map();
        let latest_prices = self.ledger.latest_price_dates();

        let mut jobs = Vec::new();
        for pair in &candidates {
            let Some(sources) = self.sources_for(pair, &declared) else {
                debug!(%pair, "No source to fetch from");
                continue;
            };

            let held = lifetimes.get(pair).map(Vec::as_slice).unwrap_or_default();
            let intervals = if self.options.inactive {
                let start = held
                    .first()
                    .map(|interval| interval.start)
                    .or_else(|| self.ledger.commodity(&pair.base).map(|decl| decl.date));
                match start {
                    Some(start) => vec![ActivityInterval::open(start)],
                    None => {
                        debug!(%pair, "No activity or declaration to start from");
                        continue;
                    }
                }
            } else {
                compress(held, self.options.compress_days)
            };

            let first = latest_prices
                .get(pair)
                .and_then(|latest| latest.checked_add_days(Days::new(1)));
            if first.is_some_and(|first| first >= date_last) {
                debug!(%pair, "Prices are up to date");
                continue;
            }

            let intervals = trim(&intervals, first, date_last);
            for date in required_dates(&intervals, self.options.cadence, first) {
                jobs.push(DatedPriceJob::new(pair, Some(date), sources.clone()));
            }
        }

        sort_jobs(&mut jobs);
        jobs
    }

    fn candidates(
        &self,
        date: Option<NaiveDate>,
        declared: &DeclaredSources,
    ) -> BTreeSet<CurrencyPair> {
        let pairs = match self.options.undeclared {
            Some(_) => self.ledger.usage_pairs(date),
            None => declared.keys().cloned().collect(),
        };
        log_pairs("Currencies in primary list", &pairs);
        pairs
    }

    fn sources_for(&self, pair: &CurrencyPair, declared: &DeclaredSources) -> Option<Vec<PriceSource>> {
        declared
            .get(pair)
            .filter(|sources| !sources.is_empty())
            .cloned()
            .or_else(|| {
                self.options
                    .undeclared
                    .as_ref()
                    .map(|provider| vec![PriceSource::new(provider.clone(), &pair.base)])
            })
    }
}

/// Jobs for a source map given directly, one per quote currency. The base is
/// the symbol of the first source in each chain.
pub fn jobs_from_expression(
    spec: &str,
    registry: &ProviderRegistry,
    date: Option<NaiveDate>,
) -> Result<Vec<DatedPriceJob>, SourceParseError> {
    let source_map = parse_source_map(spec, registry)?;
    Ok(source_map
        .into_iter()
        .filter_map(|(quote, sources)| {
            let base = sources.first()?.symbol.clone();
            Some(DatedPriceJob {
                base,
                quote: Some(quote),
                date,
                sources,
            })
        })
        .collect())
}

fn log_pairs(title: &str, pairs: &BTreeSet<CurrencyPair>) {
    info!("{title}:");
    for pair in pairs {
        info!("  {pair}");
    }
}
