pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::cli::fetch::FetchOptions;
use crate::core::config::AppConfig;
use anyhow::{Result, bail};
use std::io::Write;
use tracing::debug;

/// Runs `fetch`, printing records on stdout and a summary on stderr.
pub async fn run_fetch(options: &FetchOptions, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let mut out = std::io::stdout();
    let summary = cli::fetch::run(options, &config, &mut out).await?;
    out.flush()?;

    if !options.dry_run {
        eprintln!("{summary}");
    }
    if summary.violations > 0 {
        bail!(
            "{} price sources returned a time without a timezone",
            summary.violations
        );
    }
    Ok(())
}
