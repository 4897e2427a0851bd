use anyhow::Result;
use chrono::NaiveDate;
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use pricer::cli::fetch::FetchOptions;
use pricer::core::config::UpdateRate;
use pricer::core::log::init_logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Increase logging verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Path to optional configuration file
    #[arg(long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch prices for the commodities of a ledger
    Fetch(FetchArgs),
}

#[derive(Args)]
struct FetchArgs {
    /// Ledger snapshot files, or source maps with --expressions
    #[arg(required = true)]
    sources: Vec<String>,

    /// Read sources as source maps, e.g. "USD:yahoo/AAPL"
    #[arg(short, long)]
    expressions: bool,

    /// Date to fetch prices at (YYYY-MM-DD); latest when omitted
    #[arg(short, long)]
    date: Option<NaiveDate>,

    /// Fetch every missing price up to the date, or today
    #[arg(long)]
    update: bool,

    /// Cadence of --update
    #[arg(long, value_enum)]
    update_rate: Option<UpdateRate>,

    /// Price through holding gaps shorter than this many days
    #[arg(long)]
    update_compress: Option<u32>,

    /// Include commodities not held at the date
    #[arg(short, long)]
    inactive: bool,

    /// Use the default provider for commodities without a price source
    #[arg(short, long)]
    undeclared: bool,

    /// Print prices already present in the ledger
    #[arg(short, long)]
    clobber: bool,

    /// Print prices that differ from those in the ledger
    #[arg(long)]
    diffs: bool,

    /// Shorthand for --inactive --undeclared --clobber
    #[arg(short, long)]
    all: bool,

    /// Swap base and quote of inverted sources instead of inverting the rate
    #[arg(short, long)]
    swap_inverted: bool,

    /// Number of prices fetched at once
    #[arg(short, long)]
    workers: Option<usize>,

    /// Print the jobs without fetching
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Directory of the price cache
    #[arg(long, conflicts_with = "no_cache")]
    cache: Option<PathBuf>,

    /// Disable the price cache
    #[arg(long)]
    no_cache: bool,

    /// Clear the price cache before fetching
    #[arg(long)]
    clear_cache: bool,
}

impl From<FetchArgs> for FetchOptions {
    fn from(args: FetchArgs) -> FetchOptions {
        FetchOptions {
            sources: args.sources,
            expressions: args.expressions,
            date: args.date,
            update: args.update,
            update_rate: args.update_rate,
            update_compress: args.update_compress,
            inactive: args.inactive || args.all,
            undeclared: args.undeclared || args.all,
            clobber: args.clobber || args.all,
            diffs: args.diffs,
            swap_inverted: args.swap_inverted,
            workers: args.workers,
            dry_run: args.dry_run,
            cache_path: args.cache,
            no_cache: args.no_cache,
            clear_cache: args.clear_cache,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => pricer::cli::setup::setup(),
        Some(Commands::Fetch(args)) => {
            pricer::run_fetch(&args.into(), cli.config_path.as_deref()).await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
