//! Runs price jobs against their sources.

use crate::core::job::DatedPriceJob;
use crate::core::price::PriceRecord;
use crate::core::quote::{FetchError, FetchedQuote, QuoteTime};
use crate::core::source::PriceSource;
use crate::store::ResultCache;
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Quote currency used when neither the job nor the provider names one.
pub const UNKNOWN_CURRENCY: &str = "?";

/// Outcome of a batch of jobs.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Distinct fetched records, sorted by date, currency, quote currency and price.
    pub records: Vec<PriceRecord>,
    /// Jobs for which no source produced a price.
    pub failed: Vec<DatedPriceJob>,
    /// Jobs whose provider broke the fetch contract, with the violation.
    pub violations: Vec<(DatedPriceJob, FetchError)>,
}

pub struct PriceFetcher<Tz: TimeZone = Local> {
    cache: Arc<ResultCache>,
    timezone: Tz,
    swap_inverted: bool,
}

impl PriceFetcher<Local> {
    pub fn new(cache: Arc<ResultCache>, swap_inverted: bool) -> Self {
        Self::with_timezone(cache, Local, swap_inverted)
    }
}

impl<Tz> PriceFetcher<Tz>
where
    Tz: TimeZone + Send + Sync,
    Tz::Offset: Send + Sync,
{
    /// A fetcher reading dates in `timezone` instead of the local one.
    pub fn with_timezone(cache: Arc<ResultCache>, timezone: Tz, swap_inverted: bool) -> Self {
        Self {
            cache,
            timezone,
            swap_inverted,
        }
    }

    /// The instant a historical price is asked for: 4pm on `date` in the
    /// fetcher's timezone.
    pub fn query_time(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default());
        self.timezone
            .from_local_datetime(&local)
            .earliest()
            .map_or_else(|| local.and_utc(), |time| time.with_timezone(&Utc))
    }

    /// Fetches one job, trying its sources in order.
    ///
    /// Returns `Ok(None)` when no source has a price. Fails only when a
    /// provider returns a timestamp without a timezone.
    #[instrument(skip(self, job), fields(base = %job.base, date = ?job.date))]
    pub async fn fetch_price(&self, job: &DatedPriceJob) -> Result<Option<PriceRecord>, FetchError> {
        let time = job.date.map(|date| self.query_time(date));

        for source in &job.sources {
            let provider = source.provider.provider();
            let symbol = source.symbol.as_str();
            let result = self
                .cache
                .get_or_fetch(source.provider.id(), symbol, job.date, || async move {
                    match time {
                        Some(time) => provider.historical_price(symbol, time).await,
                        None => provider.latest_price(symbol).await,
                    }
                })
                .await;

            match result {
                Ok(Some(quote)) => return self.to_record(job, source, quote),
                Ok(None) => debug!(%source, "No price from source"),
                Err(FetchError::MissingDate) => {
                    debug!(%source, "Missing date for symbol");
                    return Ok(None);
                }
                Err(FetchError::Provider(e)) => error!(%source, error = %e, "Price source failed"),
                Err(e @ FetchError::NaiveTimestamp(_)) => return Err(e),
            }
        }

        error!(job = %job, "Could not fetch for job");
        Ok(None)
    }

    /// Fetches every job with up to `workers` in flight, calling `progress`
    /// as each one completes.
    pub async fn fetch_all(
        &self,
        jobs: &[DatedPriceJob],
        workers: usize,
        progress: impl Fn(),
    ) -> FetchReport {
        let results: Vec<_> = stream::iter(jobs)
            .map(|job| async move { (job, self.fetch_price(job).await) })
            .buffer_unordered(workers.max(1))
            .inspect(|_| progress())
            .collect()
            .await;

        let mut report = FetchReport::default();
        for (job, result) in results {
            match result {
                Ok(Some(record)) => report.records.push(record),
                Ok(None) => report.failed.push(job.clone()),
                Err(e) => {
                    error!(job = %job, error = %e, "Price source broke the fetch contract");
                    report.violations.push((job.clone(), e));
                }
            }
        }

        // Jobs for different dates can land on the same quote, e.g. a weekend
        // answered with Friday's close.
        report.records.sort_by(|a, b| {
            (a.date, &a.currency, &a.amount.currency, a.amount.number).cmp(&(
                b.date,
                &b.currency,
                &b.amount.currency,
                b.amount.number,
            ))
        });
        report.records.dedup();
        report.failed.sort_by(|a, b| (&a.base, a.date).cmp(&(&b.base, b.date)));
        report
    }

    fn to_record(
        &self,
        job: &DatedPriceJob,
        source: &PriceSource,
        quote: FetchedQuote,
    ) -> Result<Option<PriceRecord>, FetchError> {
        let time = match quote.time {
            QuoteTime::Zoned(time) => time,
            QuoteTime::Naive(time) => return Err(FetchError::NaiveTimestamp(time)),
        };

        let Some(mut price) = quote.price.checked_mul(source.multiplier) else {
            error!(%source, price = %quote.price, "Price overflows after multiplier");
            return Ok(None);
        };
        let mut base = job.base.clone();
        let mut quote_currency = job
            .quote
            .clone()
            .or(quote.quote_currency)
            .unwrap_or_else(|| UNKNOWN_CURRENCY.to_string());

        if source.invert {
            if self.swap_inverted {
                std::mem::swap(&mut base, &mut quote_currency);
            } else {
                let Some(inverse) = Decimal::ONE.checked_div(price) else {
                    error!(%source, "Cannot invert a zero price");
                    return Ok(None);
                };
                price = inverse;
            }
        }

        let date = time.with_timezone(&self.timezone).date_naive();
        Ok(Some(PriceRecord::new(date, &base, price, &quote_currency)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::CurrencyPair;
    use crate::core::source::parse_price_source;
    use crate::core::testing::{ScriptedProvider, registry_with};
    use chrono::{FixedOffset, NaiveDateTime};
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at_utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn fetcher(swap: bool) -> PriceFetcher<Utc> {
        PriceFetcher::with_timezone(Arc::new(ResultCache::disabled()), Utc, swap)
    }

    fn job(
        registry: &crate::core::source::ProviderRegistry,
        specs: &[&str],
        quote: Option<&str>,
        date: Option<NaiveDate>,
    ) -> DatedPriceJob {
        let sources = specs
            .iter()
            .map(|spec| parse_price_source(spec, registry).unwrap())
            .collect();
        DatedPriceJob {
            base: "HOOL".to_string(),
            quote: quote.map(str::to_string),
            date,
            sources,
        }
    }

    #[tokio::test]
    async fn test_fetch_price_normal() {
        let provider = ScriptedProvider::returning(FetchedQuote::new(
            dec("125.00"),
            at_utc(2015, 11, 22, 16),
            Some("JPY"),
        ));
        let registry = registry_with(&[("src", provider)]);
        let job = job(&registry, &["src/USDJPY"], Some("JPY"), None);

        let record = fetcher(false).fetch_price(&job).await.unwrap().unwrap();
        assert_eq!(record, PriceRecord::new(date(2015, 11, 22), "HOOL", dec("125.00"), "JPY"));
    }

    #[tokio::test]
    async fn test_fetch_price_inverted() {
        let provider = ScriptedProvider::returning(FetchedQuote::new(
            dec("125.00"),
            at_utc(2015, 11, 22, 16),
            Some("JPY"),
        ));
        let registry = registry_with(&[("src", provider)]);
        let job = DatedPriceJob::new(
            &CurrencyPair::new("JPY", "USD"),
            None,
            vec![parse_price_source("src/^USDJPY", &registry).unwrap()],
        );

        let record = fetcher(false).fetch_price(&job).await.unwrap().unwrap();
        assert_eq!(record.currency, "JPY");
        assert_eq!(record.amount.number, dec("0.008"));
        assert_eq!(record.amount.currency, "USD");

        let swapped = fetcher(true).fetch_price(&job).await.unwrap().unwrap();
        assert_eq!(swapped.currency, "USD");
        assert_eq!(swapped.amount.number, dec("125.00"));
        assert_eq!(swapped.amount.currency, "JPY");
    }

    #[tokio::test]
    async fn test_fetch_price_multiplier() {
        let provider = ScriptedProvider::returning(FetchedQuote::new(
            dec("16824.00"),
            at_utc(2020, 3, 4, 12),
            Some("GBX"),
        ));
        let registry = registry_with(&[("src", provider)]);
        let job = job(&registry, &["0.01*src/SPX"], Some("GBP"), None);

        let record = fetcher(false).fetch_price(&job).await.unwrap().unwrap();
        assert_eq!(record.amount.number.to_string(), "168.2400");
        assert_eq!(record.amount.currency, "GBP");
    }

    #[tokio::test]
    async fn test_fetch_price_quote_currency_fallbacks() {
        let with_currency = ScriptedProvider::returning(FetchedQuote::new(
            dec("10"),
            at_utc(2020, 3, 4, 12),
            Some("EUR"),
        ));
        let without_currency =
            ScriptedProvider::returning(FetchedQuote::new(dec("10"), at_utc(2020, 3, 4, 12), None));
        let registry = registry_with(&[("eur", with_currency), ("bare", without_currency)]);

        let record = fetcher(false)
            .fetch_price(&job(&registry, &["eur/X"], None, None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.amount.currency, "EUR");

        let record = fetcher(false)
            .fetch_price(&job(&registry, &["bare/X"], None, None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.amount.currency, UNKNOWN_CURRENCY);
    }

    #[tokio::test]
    async fn test_fetch_price_falls_through_chain() {
        let empty = ScriptedProvider::empty();
        let failing = ScriptedProvider::failing("connection refused");
        let good = ScriptedProvider::returning(FetchedQuote::new(
            dec("1.5"),
            at_utc(2020, 3, 4, 12),
            Some("USD"),
        ));
        let registry = registry_with(&[
            ("first", Arc::clone(&empty)),
            ("second", Arc::clone(&failing)),
            ("third", Arc::clone(&good)),
        ]);
        let job = job(&registry, &["first/X", "second/X", "third/X"], Some("USD"), None);

        let record = fetcher(false).fetch_price(&job).await.unwrap();
        assert!(record.is_some());
        assert_eq!(empty.calls(), 1);
        assert_eq!(failing.calls(), 1);
        assert_eq!(good.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_price_exhausted_chain() {
        let empty = ScriptedProvider::empty();
        let registry = registry_with(&[("first", Arc::clone(&empty))]);
        let job = job(&registry, &["first/X", "first/Y"], Some("USD"), None);

        assert_eq!(fetcher(false).fetch_price(&job).await.unwrap(), None);
        assert_eq!(empty.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_price_missing_date_stops_chain() {
        let missing = ScriptedProvider::missing_date();
        let good = ScriptedProvider::returning(FetchedQuote::new(
            dec("1.5"),
            at_utc(2020, 3, 4, 12),
            Some("USD"),
        ));
        let registry = registry_with(&[("first", Arc::clone(&missing)), ("second", Arc::clone(&good))]);
        let job = job(&registry, &["first/X", "second/X"], Some("USD"), Some(date(2020, 3, 4)));

        assert_eq!(fetcher(false).fetch_price(&job).await.unwrap(), None);
        assert_eq!(missing.calls(), 1);
        assert_eq!(good.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_price_naive_time_is_an_error() {
        let naive = NaiveDateTime::parse_from_str("2015-11-22 16:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let provider = ScriptedProvider::returning(FetchedQuote::new(dec("125.00"), naive, Some("JPY")));
        let registry = registry_with(&[("src", provider)]);
        let job = job(&registry, &["src/X"], Some("JPY"), None);

        let result = fetcher(false).fetch_price(&job).await;
        assert!(matches!(result, Err(FetchError::NaiveTimestamp(time)) if time == naive));
    }

    #[tokio::test]
    async fn test_fetch_price_zero_cannot_be_inverted() {
        let provider = ScriptedProvider::returning(FetchedQuote::new(
            Decimal::ZERO,
            at_utc(2020, 3, 4, 12),
            Some("USD"),
        ));
        let registry = registry_with(&[("src", provider)]);
        let job = job(&registry, &["src/^X"], Some("USD"), None);

        assert_eq!(fetcher(false).fetch_price(&job).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_historical_query_at_4pm_local() {
        let provider = ScriptedProvider::returning(FetchedQuote::new(
            dec("1"),
            at_utc(2020, 3, 4, 21),
            Some("USD"),
        ));
        let registry = registry_with(&[("src", Arc::clone(&provider))]);
        let job = job(&registry, &["src/X"], Some("USD"), Some(date(2020, 3, 4)));
        let new_york = FixedOffset::west_opt(5 * 3600).unwrap();
        let fetcher = PriceFetcher::with_timezone(Arc::new(ResultCache::disabled()), new_york, false);

        let record = fetcher.fetch_price(&job).await.unwrap().unwrap();
        assert_eq!(provider.requested(), vec![Some(at_utc(2020, 3, 4, 21))]);
        assert_eq!(record.date, date(2020, 3, 4));
    }

    #[tokio::test]
    async fn test_date_is_taken_in_fetcher_timezone() {
        let provider = ScriptedProvider::returning(FetchedQuote::new(
            dec("1"),
            at_utc(2020, 3, 5, 2),
            Some("USD"),
        ));
        let registry = registry_with(&[("src", provider)]);
        let job = job(&registry, &["src/X"], Some("USD"), None);

        let utc = fetcher(false).fetch_price(&job).await.unwrap().unwrap();
        assert_eq!(utc.date, date(2020, 3, 5));

        let new_york = FixedOffset::west_opt(5 * 3600).unwrap();
        let local = PriceFetcher::with_timezone(Arc::new(ResultCache::disabled()), new_york, false)
            .fetch_price(&job)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.date, date(2020, 3, 4));
    }

    #[tokio::test]
    async fn test_fetch_all_sorts_and_reports() {
        let provider = ScriptedProvider::with(|symbol, _| match symbol {
            "MISSING" => Ok(None),
            "NAIVE" => Ok(Some(FetchedQuote::new(
                Decimal::ONE,
                NaiveDateTime::parse_from_str("2020-03-04 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
                None,
            ))),
            _ => Ok(Some(FetchedQuote::new(
                Decimal::ONE,
                Utc.with_ymd_and_hms(2020, 3, 4, 12, 0, 0).unwrap(),
                Some("USD"),
            ))),
        });
        let registry = registry_with(&[("src", provider)]);
        let make = |base: &str, symbol: &str| {
            DatedPriceJob::new(
                &CurrencyPair::new(base, "USD"),
                None,
                vec![parse_price_source(&format!("src/{symbol}"), &registry).unwrap()],
            )
        };
        let jobs = vec![
            make("VEA", "VEA"),
            make("GLD", "MISSING"),
            make("QQQ", "QQQ"),
            make("BAD", "NAIVE"),
            make("AAPL", "AAPL"),
        ];

        let completed = std::sync::atomic::AtomicUsize::new(0);
        let report = fetcher(false)
            .fetch_all(&jobs, 3, || {
                completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .await;

        let currencies: Vec<_> = report.records.iter().map(|r| r.currency.as_str()).collect();
        assert_eq!(currencies, vec!["AAPL", "QQQ", "VEA"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].base, "GLD");
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].0.base, "BAD");
        assert_eq!(completed.into_inner(), 5);
    }

    #[tokio::test]
    async fn test_fetch_all_drops_duplicate_records() {
        let friday_close = FetchedQuote::new(dec("100"), at_utc(2021, 1, 8, 21), Some("USD"));
        let provider = ScriptedProvider::returning(friday_close);
        let registry = registry_with(&[("src", provider)]);
        let jobs: Vec<_> = [date(2021, 1, 8), date(2021, 1, 9), date(2021, 1, 10)]
            .into_iter()
            .map(|day| job(&registry, &["src/AAPL"], Some("USD"), Some(day)))
            .collect();

        let report = fetcher(false).fetch_all(&jobs, 3, || {}).await;

        assert_eq!(
            report.records,
            vec![PriceRecord::new(date(2021, 1, 8), "HOOL", dec("100"), "USD")]
        );
        assert!(report.failed.is_empty());
    }
}
