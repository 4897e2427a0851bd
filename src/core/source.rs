//! Price source specifications and the provider registry they resolve against.
//!
//! A source map groups fallback chains by quote currency:
//!
//! ```text
//! USD:yahoo/AAPL,oanda/AAPL CAD:0.01*yahoo/^CADUSD=X
//! ```
//!
//! Each chain reads `[MULTIPLIER*]PROVIDER/[^]SYMBOL`, where `^` asks for the
//! inverse of the fetched rate.

use crate::core::quote::QuoteProvider;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceParseError {
    #[error("invalid source map pattern: \"{group}\"")]
    InvalidSourceMap { group: String },
    #[error("invalid source name: \"{spec}\"")]
    InvalidSource { spec: String },
    #[error("invalid multiplier \"{value}\" in source \"{spec}\"")]
    InvalidMultiplier { spec: String, value: String },
    #[error("could not find price source provider \"{name}\"")]
    UnknownProvider { name: String },
}

/// A named handle to a registered provider. Compares by name only.
#[derive(Clone)]
pub struct ProviderRef {
    id: Arc<str>,
    provider: Arc<dyn QuoteProvider>,
}

impl ProviderRef {
    pub fn new(id: &str, provider: Arc<dyn QuoteProvider>) -> Self {
        Self {
            id: Arc::from(id),
            provider,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> &dyn QuoteProvider {
        self.provider.as_ref()
    }
}

impl fmt::Debug for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProviderRef").field(&self.id).finish()
    }
}

impl PartialEq for ProviderRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProviderRef {}

impl Hash for ProviderRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ProviderRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProviderRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

/// Providers available to source specifications, keyed by name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn QuoteProvider>>,
}

impl ProviderRegistry {
    pub fn register(&mut self, id: &str, provider: Arc<dyn QuoteProvider>) {
        self.providers.insert(id.to_string(), provider);
    }

    pub fn resolve(&self, id: &str) -> Option<ProviderRef> {
        self.providers
            .get(id)
            .map(|provider| ProviderRef::new(id, Arc::clone(provider)))
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// One link of a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriceSource {
    pub provider: ProviderRef,
    pub symbol: String,
    pub invert: bool,
    pub multiplier: Decimal,
}

impl PriceSource {
    pub fn new(provider: ProviderRef, symbol: &str) -> Self {
        Self {
            provider,
            symbol: symbol.to_string(),
            invert: false,
            multiplier: Decimal::ONE,
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.multiplier != Decimal::ONE {
            write!(f, "{}*", self.multiplier)?;
        }
        let inverse = if self.invert { "1/" } else { "" };
        write!(f, "{}({}{})", self.provider.id(), inverse, self.symbol)
    }
}

/// Fallback chains per quote currency.
pub type SourceMap = BTreeMap<String, Vec<PriceSource>>;

/// Parses a whole source map. Groups may be separated by whitespace or `;`,
/// and repeated currencies extend the same chain in input order.
pub fn parse_source_map(
    spec: &str,
    registry: &ProviderRegistry,
) -> Result<SourceMap, SourceParseError> {
    let mut source_map = SourceMap::new();
    let groups = spec
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|group| !group.is_empty());

    for group in groups {
        let (currency, chains) = group
            .split_once(':')
            .filter(|(currency, _)| is_currency(currency))
            .ok_or_else(|| SourceParseError::InvalidSourceMap {
                group: group.to_string(),
            })?;

        let sources = chains
            .split(',')
            .map(|chain| parse_price_source(chain, registry))
            .collect::<Result<Vec<_>, _>>()?;
        source_map
            .entry(currency.to_string())
            .or_default()
            .extend(sources);
    }

    if source_map.is_empty() {
        return Err(SourceParseError::InvalidSourceMap {
            group: spec.to_string(),
        });
    }
    Ok(source_map)
}

/// Parses a single `[MULTIPLIER*]PROVIDER/[^]SYMBOL` chain.
pub fn parse_price_source(
    spec: &str,
    registry: &ProviderRegistry,
) -> Result<PriceSource, SourceParseError> {
    let invalid = || SourceParseError::InvalidSource {
        spec: spec.to_string(),
    };

    let (head, tail) = spec.split_once('/').ok_or_else(invalid)?;
    let (multiplier, provider_name) = match head.split_once('*') {
        Some((value, name)) => (parse_multiplier(spec, value)?, name),
        None => (Decimal::ONE, head),
    };
    let (invert, symbol) = match tail.strip_prefix('^') {
        Some(symbol) => (true, symbol),
        None => (false, tail),
    };

    if !is_provider_name(provider_name) || !is_symbol(symbol) {
        return Err(invalid());
    }

    let provider =
        registry
            .resolve(provider_name)
            .ok_or_else(|| SourceParseError::UnknownProvider {
                name: provider_name.to_string(),
            })?;

    Ok(PriceSource {
        provider,
        symbol: symbol.to_string(),
        invert,
        multiplier,
    })
}

fn parse_multiplier(spec: &str, value: &str) -> Result<Decimal, SourceParseError> {
    Decimal::from_str(value)
        .ok()
        .filter(|multiplier| multiplier.is_sign_positive() && !multiplier.is_zero())
        .ok_or_else(|| SourceParseError::InvalidMultiplier {
            spec: spec.to_string(),
            value: value.to_string(),
        })
}

fn is_currency(name: &str) -> bool {
    let bytes = name.as_bytes();
    match bytes {
        [] => false,
        [only] => only.is_ascii_uppercase(),
        [first, middle @ .., last] => {
            first.is_ascii_uppercase()
                && (last.is_ascii_uppercase() || last.is_ascii_digit())
                && middle.len() <= 22
                && middle.iter().all(|c| {
                    c.is_ascii_uppercase() || c.is_ascii_digit() || b"'._-".contains(c)
                })
        }
    }
}

fn is_provider_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && name.len() >= 2
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

fn is_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ":=_-.()".contains(c))
}
