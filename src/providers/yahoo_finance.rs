use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, instrument};

use crate::core::quote::{FetchError, FetchedQuote, QuoteProvider};
use crate::providers::util::with_retry;

const RETRIES: usize = 3;
const RETRY_DELAY_MS: u64 = 500;

/// How far back a historical lookup searches for a close.
const HISTORICAL_WINDOW_DAYS: i64 = 5;

/// Quotes from the Yahoo Finance v8 chart API.
pub struct YahooFinanceProvider {
    base_url: String,
    client: reqwest::Client,
}

impl YahooFinanceProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("pricer/1.0")
            .build()
            .context("Failed to build HTTP client")?;
        Ok(YahooFinanceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn fetch_chart(&self, symbol: &str, query: &str) -> Result<Option<ChartItem>> {
        let url = format!("{}/v8/finance/chart/{}?{}", self.base_url, symbol, query);
        debug!("Requesting price data from {}", url);

        let response = with_retry(|| self.client.get(&url).send(), RETRIES, RETRY_DELAY_MS)
            .await
            .map_err(|e| anyhow!("Request error: {} for symbol: {} URL: {}", e, symbol, url))?;
        let status = response.status();
        let text = response.text().await?;

        let data: ChartResponse = serde_json::from_str(&text).map_err(|e| {
            anyhow!(
                "Failed to parse JSON response for {} (HTTP {}): {}",
                symbol,
                status,
                e
            )
        })?;

        if let Some(error) = data.chart.error {
            bail!(
                "Yahoo error for symbol {}: {} ({})",
                symbol,
                error.description,
                error.code
            );
        }
        if !status.is_success() {
            bail!("HTTP error: {} for symbol: {}", status, symbol);
        }

        Ok(data.chart.result.and_then(|items| items.into_iter().next()))
    }

    async fn fetch_series(
        &self,
        symbol: &str,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Vec<FetchedQuote>>> {
        let query = format!(
            "period1={}&period2={}&interval=1d",
            begin.timestamp(),
            end.timestamp()
        );
        let Some(item) = self.fetch_chart(symbol, &query).await? else {
            return Ok(None);
        };
        item.daily_closes(symbol).map(Some)
    }
}

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    currency: Option<String>,
    regular_market_price: Option<f64>,
    regular_market_time: Option<i64>,
    #[serde(rename = "gmtoffset")]
    gmt_offset: Option<i32>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug)]
struct Quote {
    close: Option<Vec<Option<f64>>>,
}

impl ChartMeta {
    fn offset(&self) -> FixedOffset {
        self.gmt_offset
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }

    fn time_at(&self, timestamp: i64) -> Result<DateTime<FixedOffset>> {
        DateTime::from_timestamp(timestamp, 0)
            .map(|time| time.with_timezone(&self.offset()))
            .ok_or_else(|| anyhow!("Invalid timestamp: {}", timestamp))
    }
}

impl ChartItem {
    /// Daily closes in ascending time order. Days without a close are skipped.
    fn daily_closes(&self, symbol: &str) -> Result<Vec<FetchedQuote>> {
        let closes = self
            .indicators
            .as_ref()
            .and_then(|indicators| indicators.quote.first())
            .and_then(|quote| quote.close.as_ref());
        let Some(closes) = closes else {
            return Ok(Vec::new());
        };
        let timestamps = self
            .timestamp
            .as_ref()
            .ok_or_else(|| anyhow!("No timestamps returned for symbol: {}", symbol))?;

        let mut quotes = Vec::new();
        for (timestamp, close) in timestamps.iter().zip(closes) {
            let Some(close) = close else {
                continue;
            };
            quotes.push(FetchedQuote::new(
                to_decimal(*close)?,
                self.meta.time_at(*timestamp)?,
                self.meta.currency.as_deref(),
            ));
        }
        quotes.sort_by_key(|quote| quote.time.zoned());
        Ok(quotes)
    }
}

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_str(&value.to_string()).with_context(|| format!("Invalid price: {value}"))
}

#[async_trait]
impl QuoteProvider for YahooFinanceProvider {
    #[instrument(name = "YahooLatestPrice", skip(self), fields(symbol = %symbol))]
    async fn latest_price(&self, symbol: &str) -> Result<Option<FetchedQuote>, FetchError> {
        let Some(item) = self.fetch_chart(symbol, "interval=1d&range=1d").await? else {
            return Ok(None);
        };
        let (Some(price), Some(time)) = (item.meta.regular_market_price, item.meta.regular_market_time)
        else {
            debug!("No regular market price in response");
            return Ok(None);
        };

        Ok(Some(FetchedQuote::new(
            to_decimal(price)?,
            item.meta.time_at(time)?,
            item.meta.currency.as_deref(),
        )))
    }

    #[instrument(name = "YahooHistoricalPrice", skip(self), fields(symbol = %symbol, time = %time))]
    async fn historical_price(
        &self,
        symbol: &str,
        time: DateTime<Utc>,
    ) -> Result<Option<FetchedQuote>, FetchError> {
        let begin = time - Duration::days(HISTORICAL_WINDOW_DAYS);
        let quotes = self.fetch_series(symbol, begin, time).await?.unwrap_or_default();

        let quote = quotes
            .into_iter()
            .rfind(|quote| quote.time.zoned().is_some_and(|at| at < time))
            .ok_or_else(|| anyhow!("No close found for symbol: {} before {}", symbol, time))?;
        Ok(Some(quote))
    }

    #[instrument(name = "YahooPriceSeries", skip(self), fields(symbol = %symbol))]
    async fn price_series(
        &self,
        symbol: &str,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Vec<FetchedQuote>>, FetchError> {
        Ok(self.fetch_series(symbol, begin, end).await?)
    }
}
