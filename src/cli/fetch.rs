use crate::cli::ui::{self, StyleType};
use crate::core::config::{AppConfig, UpdateRate};
use crate::core::job::{DatedPriceJob, sort_jobs};
use crate::core::ledger::Ledger;
use crate::core::planner::{JobPlanner, PlannerOptions, jobs_from_expression};
use crate::core::price::filter_redundant_prices;
use crate::core::source::ProviderRegistry;
use crate::core::PriceFetcher;
use crate::providers;
use crate::store::ResultCache;
use anyhow::{Context, Result, anyhow, bail};
use chrono::{Local, NaiveDate};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Options of a single `fetch` run.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Ledger snapshot paths, or source maps when `expressions` is set.
    pub sources: Vec<String>,
    pub expressions: bool,
    pub date: Option<NaiveDate>,
    /// Fetch every missing price up to `date` (or today).
    pub update: bool,
    pub update_rate: Option<UpdateRate>,
    pub update_compress: Option<u32>,
    pub inactive: bool,
    pub undeclared: bool,
    pub clobber: bool,
    pub diffs: bool,
    pub swap_inverted: bool,
    pub workers: Option<usize>,
    pub dry_run: bool,
    pub cache_path: Option<PathBuf>,
    pub no_cache: bool,
    pub clear_cache: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub planned: usize,
    pub fetched: usize,
    /// Fetched but already in the ledger.
    pub ignored: usize,
    pub failed: usize,
    pub violations: usize,
}

impl fmt::Display for FetchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = format!(
            "{} {}",
            ui::style_text("Prices:", StyleType::TotalLabel),
            ui::style_text(
                &format!("{} of {} fetched", self.fetched, self.planned),
                StyleType::TotalValue
            )
        );
        if self.ignored > 0 {
            line.push_str(&ui::style_text(
                &format!(", {} already on file", self.ignored),
                StyleType::Subtle,
            ));
        }
        if self.failed > 0 {
            line.push_str(&ui::style_text(
                &format!(", {} failed", self.failed),
                StyleType::Error,
            ));
        }
        if self.violations > 0 {
            line.push_str(&ui::style_text(
                &format!(", {} without timezone", self.violations),
                StyleType::Error,
            ));
        }
        write!(f, "{line}")
    }
}

/// Plans, fetches and prints prices to `out`, one record per line.
pub async fn run(options: &FetchOptions, config: &AppConfig, out: &mut dyn Write) -> Result<FetchSummary> {
    let registry = providers::default_registry(config)?;

    let (jobs, existing) = if options.expressions {
        (expression_jobs(options, &registry)?, Ledger::default())
    } else {
        let ledger = load_ledgers(&options.sources)?;
        (ledger_jobs(options, config, &ledger, &registry)?, ledger)
    };

    let mut summary = FetchSummary {
        planned: jobs.len(),
        ..FetchSummary::default()
    };

    if options.dry_run {
        for job in &jobs {
            writeln!(out, "{job}")?;
        }
        return Ok(summary);
    }

    let cache = open_cache(options, config)?;
    let fetcher = PriceFetcher::new(Arc::new(cache), options.swap_inverted);
    let workers = options.workers.unwrap_or(config.fetch.workers);

    let pb = ui::new_progress_bar(jobs.len() as u64, true);
    pb.set_message("Fetching prices...");
    let report = fetcher.fetch_all(&jobs, workers, || pb.inc(1)).await;
    pb.finish_and_clear();

    summary.fetched = report.records.len();
    summary.failed = report.failed.len();
    summary.violations = report.violations.len();

    let records = if options.clobber {
        report.records
    } else {
        let (kept, ignored) = filter_redundant_prices(report.records, &existing.prices, options.diffs);
        for record in &ignored {
            info!("Ignored to avoid clobber: {} {}", record.date, record.currency);
        }
        summary.ignored = ignored.len();
        kept
    };

    for record in &records {
        writeln!(out, "{record}")?;
    }
    Ok(summary)
}

fn expression_jobs(options: &FetchOptions, registry: &ProviderRegistry) -> Result<Vec<DatedPriceJob>> {
    let mut jobs = Vec::new();
    for source in &options.sources {
        let parsed = jobs_from_expression(source, registry, options.date).map_err(|e| {
            let hint = if Path::new(source).exists() {
                "; did you provide a filename?"
            } else {
                ""
            };
            anyhow!(
                "Invalid source \"{source}\": {e}{hint}. Supported format is \"CCY:provider/SYMBOL\""
            )
        })?;
        jobs.extend(parsed);
    }
    sort_jobs(&mut jobs);
    Ok(jobs)
}

fn load_ledgers(paths: &[String]) -> Result<Ledger> {
    let mut ledger = Ledger::default();
    for path in paths {
        if !Path::new(path).exists() {
            bail!("File does not exist: \"{path}\"; did you mean to use -e?");
        }
        ledger.merge(Ledger::load_from_path(path)?);
    }
    Ok(ledger)
}

fn ledger_jobs(
    options: &FetchOptions,
    config: &AppConfig,
    ledger: &Ledger,
    registry: &ProviderRegistry,
) -> Result<Vec<DatedPriceJob>> {
    let undeclared = if options.undeclared {
        let id = &config.fetch.undeclared_provider;
        Some(
            registry
                .resolve(id)
                .ok_or_else(|| anyhow!("Unknown provider for undeclared commodities: \"{id}\""))?,
        )
    } else {
        None
    };

    let planner_options = PlannerOptions {
        inactive: options.inactive,
        undeclared,
        cadence: config
            .fetch
            .cadence(options.update_rate.unwrap_or(config.fetch.update_rate)),
        compress_days: options.update_compress.unwrap_or(config.fetch.compress_days),
    };
    let planner = JobPlanner::new(ledger, registry, planner_options);

    if options.update {
        let date_last = options.date.unwrap_or_else(|| Local::now().date_naive());
        info!("Fetching missing prices up to {date_last}");
        Ok(planner.jobs_up_to_date(date_last))
    } else {
        match options.date {
            Some(date) => info!("Processing at date: {date}"),
            None => info!("Processing at latest date"),
        }
        Ok(planner.jobs_at_date(options.date))
    }
}

fn open_cache(options: &FetchOptions, config: &AppConfig) -> Result<ResultCache> {
    if options.no_cache || !config.cache.enabled {
        debug!("Price cache disabled");
        return Ok(ResultCache::disabled());
    }
    let path = match &options.cache_path {
        Some(path) => path.clone(),
        None => config.cache_path()?,
    };
    let cache = ResultCache::open(&path, options.clear_cache)
        .with_context(|| format!("Failed to open price cache at {}", path.display()))?;
    Ok(cache.with_expiration(config.cache.expiration()))
}
