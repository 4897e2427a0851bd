//! Scripted providers shared by the unit tests.

use crate::core::quote::{FetchError, FetchedQuote, QuoteProvider};
use crate::core::source::ProviderRegistry;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Script = Box<dyn Fn(&str, Option<DateTime<Utc>>) -> Result<Option<FetchedQuote>, FetchError> + Send + Sync>;

pub(crate) struct ScriptedProvider {
    script: Script,
    calls: AtomicUsize,
    requested: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl ScriptedProvider {
    pub(crate) fn with(
        script: impl Fn(&str, Option<DateTime<Utc>>) -> Result<Option<FetchedQuote>, FetchError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn returning(quote: FetchedQuote) -> Arc<Self> {
        Self::with(move |_, _| Ok(Some(quote.clone())))
    }

    pub(crate) fn empty() -> Arc<Self> {
        Self::with(|_, _| Ok(None))
    }

    pub(crate) fn failing(message: &'static str) -> Arc<Self> {
        Self::with(move |_, _| Err(FetchError::Provider(anyhow!(message))))
    }

    pub(crate) fn missing_date() -> Arc<Self> {
        Self::with(|_, _| Err(FetchError::MissingDate))
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Query times seen so far, `None` for latest-price calls.
    pub(crate) fn requested(&self) -> Vec<Option<DateTime<Utc>>> {
        self.requested.lock().unwrap().clone()
    }

    fn call(&self, symbol: &str, time: Option<DateTime<Utc>>) -> Result<Option<FetchedQuote>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(time);
        (self.script)(symbol, time)
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    async fn latest_price(&self, symbol: &str) -> Result<Option<FetchedQuote>, FetchError> {
        self.call(symbol, None)
    }

    async fn historical_price(
        &self,
        symbol: &str,
        time: DateTime<Utc>,
    ) -> Result<Option<FetchedQuote>, FetchError> {
        self.call(symbol, Some(time))
    }
}

pub(crate) fn registry_with(providers: &[(&str, Arc<ScriptedProvider>)]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::default();
    for (id, provider) in providers {
        registry.register(*id, Arc::clone(provider) as Arc<dyn QuoteProvider>);
    }
    registry
}

/// A registry with inert `yahoo` and `oanda` providers, enough for parsing.
pub(crate) fn parsing_registry() -> ProviderRegistry {
    registry_with(&[
        ("yahoo", ScriptedProvider::empty()),
        ("oanda", ScriptedProvider::empty()),
    ])
}
