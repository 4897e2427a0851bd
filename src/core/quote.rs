//! Quote provider abstractions and core types

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Timestamp attached to a quote by the provider that produced it.
///
/// Providers are required to return zoned timestamps: the calendar date of a
/// quote depends on the zone it is read in. A `Naive` value is kept only so the
/// violation can be reported instead of guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteTime {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl QuoteTime {
    pub fn zoned(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            QuoteTime::Zoned(time) => Some(*time),
            QuoteTime::Naive(_) => None,
        }
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for QuoteTime {
    fn from(time: DateTime<Tz>) -> Self {
        QuoteTime::Zoned(time.fixed_offset())
    }
}

impl From<NaiveDateTime> for QuoteTime {
    fn from(time: NaiveDateTime) -> Self {
        QuoteTime::Naive(time)
    }
}

/// A single price returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedQuote {
    pub price: Decimal,
    pub time: QuoteTime,
    /// Currency the price is denominated in, when the provider knows it.
    pub quote_currency: Option<String>,
}

impl FetchedQuote {
    pub fn new(price: Decimal, time: impl Into<QuoteTime>, quote_currency: Option<&str>) -> Self {
        Self {
            price,
            time: time.into(),
            quote_currency: quote_currency.map(str::to_string),
        }
    }
}

/// Ways a provider call can fail. "No data" is not an error: it is `Ok(None)`.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The provider knows that no quote exists for exactly the requested date.
    #[error("no quote exists for the requested date")]
    MissingDate,

    #[error("time returned by the price source is not timezone aware: {0}")]
    NaiveTimestamp(NaiveDateTime),

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// Contract implemented by every remote price adapter.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetches the most recent price. The quote's date may be earlier than today.
    async fn latest_price(&self, symbol: &str) -> Result<Option<FetchedQuote>, FetchError>;

    /// Fetches the latest price available at `time`, usually the close of that day.
    async fn historical_price(
        &self,
        symbol: &str,
        time: DateTime<Utc>,
    ) -> Result<Option<FetchedQuote>, FetchError>;

    /// Fetches the daily prices between `begin` and `end`. `None` means the
    /// provider does not support series queries.
    async fn price_series(
        &self,
        _symbol: &str,
        _begin: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Option<Vec<FetchedQuote>>, FetchError> {
        Ok(None)
    }
}
