//! Snapshot of the ledger facts the planner needs.
//!
//! Parsing the ledger itself and computing position lifetimes happen outside
//! this crate. Their output is handed over as YAML:
//!
//! ```yaml
//! commodities:
//!   - { currency: QQQ, date: 2014-01-01, price: "USD:yahoo/NASDAQ:QQQ" }
//! usage:
//!   - { base: QQQ, quote: USD, kind: at_cost, date: 2014-02-06 }
//! lifetimes:
//!   - base: QQQ
//!     quote: USD
//!     intervals: [{ start: 2014-02-06, end: 2014-08-08 }, { start: 2015-01-15 }]
//! prices:
//!   - { date: 2014-02-05, currency: QQQ, amount: { number: "86.10", currency: USD } }
//! ```

use crate::core::job::CurrencyPair;
use crate::core::lifetimes::{ActivityInterval, LifetimeMap};
use crate::core::price::PriceRecord;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use tracing::debug;

/// A commodity declaration and its optional `price` source map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommodityDecl {
    pub currency: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub price: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    /// Held in a position with a cost basis.
    AtCost,
    /// Used as the price of a conversion.
    Converted,
    /// Appears in an explicit price directive.
    Priced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyUsage {
    pub base: String,
    pub quote: String,
    pub kind: UsageKind,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairLifetime {
    pub base: String,
    pub quote: String,
    #[serde(default)]
    pub intervals: Vec<ActivityInterval>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub commodities: Vec<CommodityDecl>,
    #[serde(default)]
    pub usage: Vec<CurrencyUsage>,
    #[serde(default)]
    pub lifetimes: Vec<PairLifetime>,
    #[serde(default)]
    pub prices: Vec<PriceRecord>,
}

impl Ledger {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read ledger file: {}", path.display()))?;
        let ledger: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse ledger file: {}", path.display()))?;
        debug!(
            path = %path.display(),
            commodities = ledger.commodities.len(),
            prices = ledger.prices.len(),
            "Loaded ledger"
        );
        Ok(ledger)
    }

    /// Appends the contents of another snapshot.
    pub fn merge(&mut self, other: Ledger) {
        self.commodities.extend(other.commodities);
        self.usage.extend(other.usage);
        self.lifetimes.extend(other.lifetimes);
        self.prices.extend(other.prices);
    }

    /// Intervals per pair, sorted by start.
    pub fn lifetime_map(&self) -> LifetimeMap {
        let mut map = LifetimeMap::new();
        for lifetime in &self.lifetimes {
            map.entry(CurrencyPair::new(&lifetime.base, &lifetime.quote))
                .or_insert_with(Vec::new)
                .extend(lifetime.intervals.iter().copied());
        }
        for intervals in map.values_mut() {
            intervals.sort();
        }
        map
    }

    /// Earliest declaration of `currency`.
    pub fn commodity(&self, currency: &str) -> Option<&CommodityDecl> {
        self.commodities
            .iter()
            .filter(|decl| decl.currency == currency)
            .min_by_key(|decl| decl.date)
    }

    /// Declarations made strictly before `date`, in date order. All of them
    /// when there is no date.
    pub fn commodities_before(&self, date: Option<NaiveDate>) -> Vec<&CommodityDecl> {
        let mut decls: Vec<_> = self
            .commodities
            .iter()
            .filter(|decl| date.is_none_or(|date| decl.date < date))
            .collect();
        decls.sort_by_key(|decl| decl.date);
        decls
    }

    /// Pairs the ledger uses at all: held at cost on any date, or converted
    /// or priced before `date`.
    pub fn usage_pairs(&self, date: Option<NaiveDate>) -> BTreeSet<CurrencyPair> {
        self.usage
            .iter()
            .filter(|usage| match usage.kind {
                UsageKind::AtCost => true,
                UsageKind::Converted | UsageKind::Priced => {
                    date.is_none_or(|date| usage.date < date)
                }
            })
            .map(|usage| CurrencyPair::new(&usage.base, &usage.quote))
            .collect()
    }

    /// Pairs with a non-zero balance at `date`, or currently when `None`.
    pub fn balance_pairs(&self, date: Option<NaiveDate>) -> BTreeSet<CurrencyPair> {
        self.lifetime_map()
            .into_iter()
            .filter(|(_, intervals)| intervals.iter().any(|interval| interval.is_held_at(date)))
            .map(|(pair, _)| pair)
            .collect()
    }

    /// Date of the most recent known price of each pair.
    pub fn latest_price_dates(&self) -> HashMap<CurrencyPair, NaiveDate> {
        let mut latest: HashMap<CurrencyPair, NaiveDate> = HashMap::new();
        for record in &self.prices {
            let pair = CurrencyPair::new(&record.currency, &record.amount.currency);
            latest
                .entry(pair)
                .and_modify(|date| *date = (*date).max(record.date))
                .or_insert(record.date);
        }
        latest
    }
}
