use crate::core::lifetimes::Cadence;
use anyhow::{Context, Result};
use chrono::Weekday;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

impl Default for YahooProviderConfig {
    fn default() -> Self {
        YahooProviderConfig {
            base_url: "https://query1.finance.yahoo.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub yahoo: YahooProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Directory of the cache. Defaults to the user cache directory.
    pub path: Option<PathBuf>,
    pub expiration_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            path: None,
            expiration_minutes: 30,
        }
    }
}

impl CacheConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_minutes * 60)
    }
}

/// How often trailing prices are fetched.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UpdateRate {
    Daily,
    #[default]
    Weekday,
    Weekly,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub workers: usize,
    /// Provider used for pairs without a declared source.
    pub undeclared_provider: String,
    pub update_rate: UpdateRate,
    /// Day of the week priced by the weekly rate.
    pub weekly_anchor: Weekday,
    pub compress_days: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            workers: 1,
            undeclared_provider: "yahoo".to_string(),
            update_rate: UpdateRate::Weekday,
            weekly_anchor: Weekday::Fri,
            compress_days: 1,
        }
    }
}

impl FetchConfig {
    pub fn cadence(&self, update_rate: UpdateRate) -> Cadence {
        match update_rate {
            UpdateRate::Daily => Cadence::Daily,
            UpdateRate::Weekday => Cadence::Weekdays,
            UpdateRate::Weekly => Cadence::Weekly(self.weekly_anchor),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl AppConfig {
    /// Loads the default config file, falling back to defaults when there is none.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(path = %config_path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = Self::project_dirs()?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    /// Directory of the price cache.
    pub fn cache_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.cache.path {
            return Ok(custom_path.clone());
        }
        let proj_dirs = Self::project_dirs()?;
        Ok(proj_dirs.cache_dir().join("prices"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("in", "codito", "pricer").context("Could not determine project directories")
    }
}
