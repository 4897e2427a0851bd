pub mod disk;

use crate::core::quote::{FetchError, FetchedQuote, QuoteTime};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use disk::DiskStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// How long a fetched quote is reused.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(30 * 60);

const PARTITION: &str = "prices";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Stored form of a quote. The time is kept as naive UTC.
#[derive(Serialize, Deserialize)]
struct CacheEntry {
    created_at: i64,
    price: Decimal,
    time: NaiveDateTime,
    quote_currency: Option<String>,
}

impl CacheEntry {
    fn into_quote(self) -> FetchedQuote {
        FetchedQuote {
            price: self.price,
            time: self.time.and_utc().into(),
            quote_currency: self.quote_currency,
        }
    }
}

/// Persistent cache of provider answers keyed by `(provider, symbol, date)`.
///
/// Lookups of one key are serialized, so concurrent fetches of the same
/// quote hit the provider once. Empty answers and failures are never stored.
pub struct ResultCache {
    store: Option<DiskStore>,
    expiration: Duration,
    clock: Clock,
    in_flight: Mutex<HashMap<Vec<u8>, Arc<Mutex<()>>>>,
}

impl ResultCache {
    /// A cache that always asks the provider.
    pub fn disabled() -> Self {
        Self {
            store: None,
            expiration: DEFAULT_EXPIRATION,
            clock: Arc::new(Utc::now),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn open(path: &Path, clear: bool) -> Result<Self> {
        let store = DiskStore::open(path, PARTITION)?;
        if clear {
            let removed = store.clear()?;
            info!(removed, "Cleared price cache");
        }
        info!(path = %path.display(), "Using price cache");

        Ok(Self {
            store: Some(store),
            ..Self::disabled()
        })
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Returns the cached quote for the key, or calls `fetch` and stores what
    /// it returns.
    ///
    /// Provider failures are logged and reported as no quote. `MissingDate`
    /// propagates.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        provider: &str,
        symbol: &str,
        date: Option<NaiveDate>,
        fetch: F,
    ) -> Result<Option<FetchedQuote>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<FetchedQuote>, FetchError>>,
    {
        let Some(store) = &self.store else {
            return absorb_provider_error(fetch().await, provider, symbol);
        };

        let key = cache_key(provider, symbol, date);
        let lock = self.key_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            let now = (self.clock)();
            match self.lookup(store, &key, now) {
                Some(quote) => {
                    debug!(provider, symbol, ?date, "Cache HIT");
                    Ok(Some(quote))
                }
                None => {
                    info!(provider, symbol, ?date, "Fetching");
                    let result = absorb_provider_error(fetch().await, provider, symbol);
                    if let Ok(Some(quote)) = &result {
                        self.save(store, &key, now, quote);
                    }
                    result
                }
            }
        };
        self.release_key(&key, lock).await;
        result
    }

    async fn key_lock(&self, key: &[u8]) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(in_flight.entry(key.to_vec()).or_default())
    }

    /// Drops the lock of `key` once no other lookup holds or waits on it.
    async fn release_key(&self, key: &[u8], lock: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        drop(lock);
        if in_flight
            .get(key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            in_flight.remove(key);
        }
    }

    fn lookup(&self, store: &DiskStore, key: &[u8], now: DateTime<Utc>) -> Option<FetchedQuote> {
        let bytes = match store.get(key) {
            Ok(bytes) => bytes?,
            Err(e) => {
                debug!(error = %e, "Cache read failed");
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Ignoring corrupt cache entry");
                return None;
            }
        };

        let age = now.timestamp() - entry.created_at;
        if age > self.expiration.as_secs() as i64 {
            debug!(age, "Cache entry expired");
            return None;
        }
        Some(entry.into_quote())
    }

    fn save(&self, store: &DiskStore, key: &[u8], now: DateTime<Utc>, quote: &FetchedQuote) {
        let QuoteTime::Zoned(time) = quote.time else {
            debug!("Not caching quote without a zoned time");
            return;
        };
        let entry = CacheEntry {
            created_at: now.timestamp(),
            price: quote.price,
            time: time.naive_utc(),
            quote_currency: quote.quote_currency.clone(),
        };

        let res = serde_json::to_vec(&entry)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| store.insert(key, &bytes));
        if let Err(e) = res {
            debug!(error = %e, "Cache write failed");
        }
    }
}

/// Structural key for one `(provider, symbol, date)` lookup.
fn cache_key(provider: &str, symbol: &str, date: Option<NaiveDate>) -> Vec<u8> {
    let date = date.map_or_else(|| "latest".to_string(), |date| date.to_string());
    serde_json::json!([provider, symbol, date])
        .to_string()
        .into_bytes()
}

fn absorb_provider_error(
    result: Result<Option<FetchedQuote>, FetchError>,
    provider: &str,
    symbol: &str,
) -> Result<Option<FetchedQuote>, FetchError> {
    match result {
        Err(FetchError::Provider(e)) => {
            error!(provider, symbol, error = %e, "Price source failed");
            Ok(None)
        }
        other => other,
    }
}
